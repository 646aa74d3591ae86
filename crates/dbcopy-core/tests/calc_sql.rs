use anyhow::{anyhow, Context};
use dbcopy_core::calc::{translate_to_acc_sql, translate_to_expr_sql, translate_to_micro_sql, CalcRequest, CalcSql};
use dbcopy_core::cell::CellConverter;
use dbcopy_core::ini::IniFile;
use dbcopy_core::testing::model_one;

fn testdata(name: &str) -> anyhow::Result<IniFile> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/testdata").join(name);
    Ok(IniFile::read(&path)?)
}

fn list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn run_ids(value: Option<&str>) -> anyhow::Result<Vec<i32>> {
    list(value).iter().map(|s| s.parse::<i32>().map_err(Into::into)).collect()
}

/// Run every numbered case of a section through `translate`.
fn check_section(
    ini: &IniFile,
    section: &str,
    translate: impl Fn(&str, &[String], &CalcRequest) -> dbcopy_core::Result<CalcSql>,
) -> anyhow::Result<usize> {
    let target = ini
        .get(section, "Table")
        .or_else(|| ini.get(section, "Entity"))
        .ok_or_else(|| anyhow!("section {section} has no Table or Entity"))?;
    let mut n = 1;
    while let Some(src) = ini.get(section, &format!("Src_{n}")) {
        let from_id: i32 = ini
            .get(section, &format!("FromId_{n}"))
            .ok_or_else(|| anyhow!("{section} FromId_{n} missing"))?
            .parse()?;
        let ids = run_ids(ini.get(section, &format!("RunIds_{n}")))?;
        let group_by = list(ini.get(section, &format!("GroupBy_{n}")));
        let req = CalcRequest { expr: src, from_id, run_ids: &ids, filters: &[], order_by: &[] };
        let sql = translate(target, &group_by, &req).with_context(|| format!("{section} Src_{n}: {src}"))?;

        assert_eq!(Some(sql.cte.as_str()), ini.get(section, &format!("Cte_{n}")), "{section} Cte_{n}");
        assert_eq!(Some(sql.main.as_str()), ini.get(section, &format!("Main_{n}")), "{section} Main_{n}");
        n += 1;
    }
    Ok(n - 1)
}

#[test]
fn expression_sql_matches_expected() -> anyhow::Result<()> {
    let meta = model_one()?;
    let ini = testdata("calc_sql.ini")?;
    let count = check_section(&ini, "Expr", |t, _, r| translate_to_expr_sql(&meta, t, r))?;
    assert_eq!(count, 2);
    Ok(())
}

#[test]
fn accumulator_sql_matches_expected() -> anyhow::Result<()> {
    let meta = model_one()?;
    let ini = testdata("calc_sql.ini")?;
    let count = check_section(&ini, "Acc", |t, _, r| translate_to_acc_sql(&meta, t, r))?;
    assert_eq!(count, 2);
    Ok(())
}

#[test]
fn microdata_sql_matches_expected() -> anyhow::Result<()> {
    let meta = model_one()?;
    let ini = testdata("calc_sql.ini")?;
    let count = check_section(&ini, "Micro", |e, g, r| translate_to_micro_sql(&meta, e, g, r))?;
    assert_eq!(count, 2);
    Ok(())
}

#[test]
fn unsafe_expressions_never_reach_sql() -> anyhow::Result<()> {
    let meta = model_one()?;
    for src in [
        "Expr0; DROP TABLE run_lst",
        "Expr0 -- tail",
        "Expr0[base] - Expr0",
        "Expr0[variant] + 1",
        "noSuchExpr + 1",
    ] {
        let req = CalcRequest { expr: src, from_id: 1, run_ids: &[2], filters: &[], order_by: &[] };
        match translate_to_expr_sql(&meta, "salarySex", &req) {
            Ok(sql) => panic!("{src} produced {}", sql.to_sql()),
            Err(err) => assert_eq!(err.kind(), dbcopy_core::ErrorKind::Syntax, "{src}"),
        }
    }
    Ok(())
}

#[test]
fn code_rows_convert_to_id_rows() -> anyhow::Result<()> {
    let meta = model_one()?;
    let ini = testdata("cell_csv.ini")?;
    for section in ini.sections() {
        let (kind, name) = section.split_once('.').ok_or_else(|| anyhow!("bad section {section}"))?;
        let cvt = match kind {
            "param" => CellConverter::param(&meta, name)?,
            "expr" => CellConverter::expr(&meta, name)?,
            "acc" => CellConverter::acc(&meta, name)?,
            other => panic!("unknown converter kind {other}"),
        };
        let mut n = 1;
        while let Some(row) = ini.get(section, &format!("Row_{n}")) {
            let fields: Vec<String> = row.split(',').map(ToString::to_string).collect();
            let cell = cvt.to_cell(&fields).with_context(|| format!("{section} Row_{n}"))?;
            let id_row = cvt.to_csv_id_row(&cell)?.ok_or_else(|| anyhow!("{section} Row_{n} suppressed"))?;
            assert_eq!(Some(id_row.join(",").as_str()), ini.get(section, &format!("IdRow_{n}")), "{section} IdRow_{n}");
            assert_eq!(cvt.to_csv_row(&cell)?, Some(fields), "{section} Row_{n} back");
            n += 1;
        }
        assert!(n > 1, "{section} has no rows");
    }
    Ok(())
}

//! Copy from a database into the file tree: model documents, CSV values of
//! runs and sets, run, set and task documents, and the optional archive.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use dbcopy_core::cell::CellConverter;
use dbcopy_core::csv::{create_csv_file, CsvWriter};
use dbcopy_core::layout::{
    meta_json_name, model_json_name, run_dirs, set_dirs, task_json_name, IdNames, MICRODATA_DIR, OUTPUT_TABLES_DIR,
    PARAMETERS_DIR,
};
use dbcopy_core::model::ModelMeta;
use dbcopy_core::progress::{Context, Periodic};
use dbcopy_core::run::RunMeta;
use dbcopy_core::workset::{WorksetMeta, WorksetRow};
use dbcopy_core::DbcopyError;
use dbcopy_store_sqlite::model_db::{read_model, require_model};
use dbcopy_store_sqlite::run_db::{find_run, read_run_meta};
use dbcopy_store_sqlite::values::{read_values, ValueSource};
use dbcopy_store_sqlite::workset_db::read_workset_meta;
use dbcopy_store_sqlite::{ModelDb, RunRef};
use rusqlite::Connection;

use crate::config::{Artifact, Config, CsvOptions};
use crate::copy::{select_source, GroupDoc, ModelDocs};
use crate::files::{create_dir, pack_dir, prepare_output_dir, write_json};

/// Apply the CSV options of the invocation to a converter.
pub(crate) fn csv_converter<'a>(conv: CellConverter<'a>, opts: &CsvOptions) -> CellConverter<'a> {
    conv.with_id_csv(opts.is_id_csv)
        .with_double_format(opts.double_format)
        .with_no_zero(opts.no_zero)
        .with_no_null(opts.no_null)
}

/// Stream values of one parameter, table or entity as CSV rows, optionally
/// prefixed with one extra column. Returns `None` when there are no values.
pub(crate) fn stream_csv<W: Write>(
    conn: &Connection,
    meta: &ModelMeta,
    conv: &CellConverter<'_>,
    src: ValueSource,
    out: &mut CsvWriter<W>,
    prefix: Option<&str>,
    ctx: &Context<'_>,
) -> Result<Option<usize>> {
    read_values(conn, meta, conv.kind(), conv.index(), src, ctx, |cell| {
        let Some(row) = conv.to_csv(&cell)? else {
            return Ok(());
        };
        match prefix {
            Some(p) => {
                let mut full = Vec::with_capacity(row.len() + 1);
                full.push(p.to_string());
                full.extend(row);
                out.write_row(&full)?;
            }
            None => out.write_row(&row)?,
        }
        Ok(())
    })
}

/// Write `{dir}/{name}.csv` with header and values; a file of an item
/// without values is removed again.
pub(crate) fn write_values_file(
    conn: &Connection,
    meta: &ModelMeta,
    conv: &CellConverter<'_>,
    src: ValueSource,
    dir: &Path,
    opts: &CsvOptions,
    ctx: &Context<'_>,
) -> Result<Option<usize>> {
    let path = dir.join(conv.csv_file_name(opts.is_tsv));
    let mut out = create_csv_file(&path, opts.is_bom)?;
    out.write_row(&conv.csv_header())?;
    let rows = stream_csv(conn, meta, conv, src, &mut out, None, ctx)?;
    out.flush()?;
    drop(out);
    if rows.is_none() {
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(rows)
}

/// Write the model documents into `dir`.
///
/// # Errors
/// Returns `Io` when a document cannot be written.
pub fn write_model_docs(dir: &Path, docs: &ModelDocs) -> Result<()> {
    let name = &docs.meta.model.name;
    write_json(&dir.join(model_json_name(name, "model")), &docs.meta)?;
    write_json(&dir.join(model_json_name(name, "lang")), &docs.lang)?;
    write_json(&dir.join(model_json_name(name, "word")), &docs.words)?;
    write_json(&dir.join(model_json_name(name, "text")), &docs.txt)?;
    let groups = GroupDoc { groups: docs.meta.group_meta(), txt: docs.txt.group_txt_meta() };
    write_json(&dir.join(model_json_name(name, "group")), &groups)?;
    write_json(&dir.join(model_json_name(name, "profile")), &docs.profiles)?;
    Ok(())
}

/// Write parameter, output table and microdata CSV files of a run under
/// `run_dir`; entities listed in the run are written unless `no_microdata`.
pub(crate) fn write_run_values(
    conn: &Connection,
    meta: &ModelMeta,
    run: &RunMeta,
    run_dir: &Path,
    opts: &CsvOptions,
    no_microdata: bool,
    ctx: &Context<'_>,
) -> Result<()> {
    let (run_id, run_name) = (run.run.run_id, &run.run.name);
    let src = ValueSource::Run(run_id);
    let entity_count = if no_microdata { 0 } else { run.entity.len() };
    let total = run.param.len() + run.table.len() + entity_count;
    let mut periodic = Periodic::new();
    let mut n = 0;

    let param_dir = run_dir.join(PARAMETERS_DIR);
    create_dir(&param_dir)?;
    for rp in &run.param {
        let Some(idx) = meta.param_by_hid(rp.param_hid) else { continue };
        let name = &meta.param[idx].param.name;
        n += 1;
        periodic.tick(ctx.progress, n, total, name);
        let conv = csv_converter(CellConverter::param(meta, name)?, opts);
        if write_values_file(conn, meta, &conv, src, &param_dir, opts, ctx)?.is_none() {
            return Err(DbcopyError::integrity(format!(
                "values of parameter {name} not found, model run {run_id} {run_name}"
            ))
            .into());
        }
    }

    let table_dir = run_dir.join(OUTPUT_TABLES_DIR);
    create_dir(&table_dir)?;
    for rt in &run.table {
        let Some(idx) = meta.out_table_by_hid(rt.table_hid) else { continue };
        let name = &meta.table[idx].table.name;
        n += 1;
        periodic.tick(ctx.progress, n, total, name);
        let expr = csv_converter(CellConverter::expr(meta, name)?, opts);
        write_values_file(conn, meta, &expr, src, &table_dir, opts, ctx)?;
        if !opts.no_acc {
            let acc = csv_converter(CellConverter::acc(meta, name)?, opts);
            write_values_file(conn, meta, &acc, src, &table_dir, opts, ctx)?;
        }
    }

    if entity_count > 0 {
        let micro_dir = run_dir.join(MICRODATA_DIR);
        create_dir(&micro_dir)?;
        for re in &run.entity {
            let Some(idx) = meta.entity_by_hid(re.entity_hid) else { continue };
            let name = &meta.entity[idx].entity.name;
            n += 1;
            periodic.tick(ctx.progress, n, total, name);
            let conv = csv_converter(CellConverter::micro(meta, name)?, opts);
            write_values_file(conn, meta, &conv, src, &micro_dir, opts, ctx)?;
        }
    }
    Ok(())
}

/// Write parameter CSV files of a set into `set_dir`.
pub(crate) fn write_set_values(
    conn: &Connection,
    meta: &ModelMeta,
    ws: &WorksetMeta,
    set_dir: &Path,
    opts: &CsvOptions,
    ctx: &Context<'_>,
) -> Result<()> {
    create_dir(set_dir)?;
    let mut periodic = Periodic::new();
    for (n, wp) in ws.param.iter().enumerate() {
        let Some(idx) = meta.param_by_hid(wp.param_hid) else { continue };
        let name = &meta.param[idx].param.name;
        periodic.tick(ctx.progress, n + 1, ws.param.len(), name);
        let conv = csv_converter(CellConverter::param(meta, name)?, opts);
        write_values_file(conn, meta, &conv, ValueSource::Set(ws.set.set_id), set_dir, opts, ctx)?;
    }
    Ok(())
}

/// Run digest of the base run of a set, empty when there is none.
pub(crate) fn base_run_digest(conn: &Connection, meta: &ModelMeta, row: &WorksetRow) -> Result<String> {
    if row.base_run_id <= 0 {
        return Ok(String::new());
    }
    let base = find_run(conn, meta.model.model_id, &RunRef::Id(row.base_run_id))?;
    Ok(base.map(|r| r.run_digest).unwrap_or_default())
}

/// Copy the selected model, run, set or task from the database into the
/// output directory, then pack it when `zip` is set.
///
/// # Errors
/// Returns `NotFound` for a missing model or artifact, `Precondition` for a
/// run that is not completed or a set that is not read-only, and the first
/// failure of reading or writing otherwise.
pub fn db_to_text(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    let db = ModelDb::open(&cfg.database, &cfg.database_driver, false)?;
    let conn = db.conn();
    let model_row = require_model(conn, &cfg.model_name, &cfg.model_digest)?;
    let meta = read_model(conn, model_row.model_id)?;
    let docs = ModelDocs::read_db(conn, meta.clone())?;
    let model_name = &meta.model.name;

    let out = cfg.output_dir.as_path();
    prepare_output_dir(out, cfg.keep_output_dir)?;
    write_model_docs(out, &docs)?;
    ctx.info(&format!("Model {model_name} {}", meta.model.digest));

    let sel = select_source(conn, &meta, &docs.lang, &cfg.artifact, ctx)?;

    let names: Vec<(i32, String)> = sel.runs.iter().map(|r| (r.run_id, r.name.clone())).collect();
    let dirs = run_dirs(&names, cfg.id_names);
    for row in sel.runs {
        ctx.check_cancel()?;
        let dir = dirs.get(row.run_id, &row.name);
        let mut run = read_run_meta(conn, row, &docs.lang)?;
        if cfg.no_microdata {
            run.entity.clear();
        }
        ctx.info(&format!("Model run {} {}", run.run.run_id, run.run.name));
        write_run_values(conn, &meta, &run, &out.join(&dir), &cfg.csv, cfg.no_microdata, ctx)?;
        write_json(&out.join(meta_json_name(model_name, &dir)), &run.to_public(&meta)?)?;
    }

    let names: Vec<(i32, String)> = sel.sets.iter().map(|s| (s.set_id, s.name.clone())).collect();
    let dirs = set_dirs(&names, cfg.id_names);
    let param_dir = match cfg.artifact {
        Artifact::Set(_) => cfg.param_dir.as_deref(),
        _ => None,
    };
    for row in sel.sets {
        ctx.check_cancel()?;
        let dir = dirs.get(row.set_id, &row.name);
        let base_digest = base_run_digest(conn, &meta, &row)?;
        let ws = read_workset_meta(conn, row, &docs.lang)?;
        ctx.info(&format!("Workset {} {}", ws.set.set_id, ws.set.name));
        let set_dir = param_dir.map_or_else(|| out.join(&dir), Path::to_path_buf);
        write_set_values(conn, &meta, &ws, &set_dir, &cfg.csv, ctx)?;
        write_json(&out.join(meta_json_name(model_name, &dir)), &ws.to_public(&meta, &base_digest)?)?;
    }

    let with_id = cfg.id_names == IdNames::Always;
    for (task_id, walk) in &sel.tasks {
        ctx.info(&format!("Modeling task {task_id} {}", walk.task.name));
        write_json(&out.join(task_json_name(model_name, *task_id, &walk.task.name, with_id)), &walk.task)?;
    }

    if cfg.is_zip {
        let zip = pack_dir(out)?;
        ctx.info(&format!("Packed {}", zip.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::RunStatus;
    use dbcopy_store_sqlite::testing::{seed_run, seed_set, seeded_db};

    #[test]
    fn set_values_are_written_with_header() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let set_id = seed_set(&mut db, &meta, "Default")?;
        let tmp = tempfile::tempdir()?;
        let progress = MemoryProgress::default();
        let opts = CsvOptions::default();
        let name = meta.param[0].param.name.clone();
        let conv = csv_converter(CellConverter::param(&meta, &name)?, &opts);

        let rows = write_values_file(db.conn(), &meta, &conv, ValueSource::Set(set_id), tmp.path(), &opts, &Context::new(&progress))?;
        let body = fs::read_to_string(tmp.path().join(format!("{name}.csv")))?;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(Some(lines.len() - 1), rows);
        assert!(lines[0].starts_with("sub_id,"));
        Ok(())
    }

    #[test]
    fn missing_values_leave_no_file() -> Result<()> {
        let db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let tmp = tempfile::tempdir()?;
        let progress = MemoryProgress::default();
        let opts = CsvOptions::default();
        let name = meta.table[0].table.name.clone();
        let conv = csv_converter(CellConverter::expr(&meta, &name)?, &opts);

        let rows = write_values_file(db.conn(), &meta, &conv, ValueSource::Run(999), tmp.path(), &opts, &Context::new(&progress))?;
        assert_eq!(rows, None);
        assert!(!tmp.path().join(format!("{name}.csv")).exists());
        Ok(())
    }

    #[test]
    fn prefix_column_leads_every_row() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "r1", RunStatus::Success)?;
        let progress = MemoryProgress::default();
        let name = meta.table[0].table.name.clone();
        let conv = csv_converter(CellConverter::expr(&meta, &name)?, &CsvOptions::default());

        let mut out = CsvWriter::new(Vec::new(), false, false)?;
        let rows = stream_csv(db.conn(), &meta, &conv, ValueSource::Run(run_id), &mut out, Some("r1"), &Context::new(&progress))?;
        let body = String::from_utf8(out.into_inner())?;
        assert!(rows.is_some_and(|n| n > 0));
        assert!(body.lines().all(|l| l.starts_with("r1,")));
        Ok(())
    }
}

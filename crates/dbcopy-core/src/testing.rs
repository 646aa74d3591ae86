//! Small model fixture shared by unit tests here and in the store and cli crates.

use std::collections::BTreeMap;

use crate::digest::run_meta_digest;
use crate::error::Result;
use crate::model::{
    DicKind, EntityAttrRow, EntityDicRow, EntityMeta, GroupLstRow, GroupPcRow, ModelDicRow, ModelMeta,
    ParamDicRow, ParamDimsRow, ParamMeta, TableAccRow, TableDicRow, TableDimsRow, TableExprRow, TableMeta,
    TypeDicRow, TypeEnumRow, TypeMeta,
};
use crate::run::{DescrNote, RunMeta, RunParam, RunRow, RunStatus, RunTable};
use crate::workset::{WorksetMeta, WorksetParam, WorksetRow};

pub const MODEL_NAME: &str = "modelOne";
pub const MODEL_DIGEST: &str = "_201208171604590148_";

fn type_meta(type_id: i32, hid: i32, name: &str, kind: DicKind, total: i32, enums: &[(i32, &str)]) -> TypeMeta {
    TypeMeta {
        type_dic: TypeDicRow {
            model_id: 1,
            type_id,
            type_hid: hid,
            name: name.to_string(),
            digest: format!("_{name}_digest_"),
            dic_id: kind.id(),
            total_enum_id: total,
            ..TypeDicRow::default()
        },
        enums: enums
            .iter()
            .map(|(id, code)| TypeEnumRow { model_id: 1, type_id, enum_id: *id, name: (*code).to_string() })
            .collect(),
    }
}

fn param(param_id: i32, name: &str, type_id: i32, dims: &[(&str, i32)]) -> ParamMeta {
    let rank = i32::try_from(dims.len()).unwrap_or(0);
    ParamMeta {
        param: ParamDicRow {
            model_id: 1,
            param_id,
            param_hid: param_id + 1,
            name: name.to_string(),
            digest: format!("_{name}_digest_"),
            rank,
            type_id,
            db_run_table: format!("{name}_p_2012817"),
            db_set_table: format!("{name}_w_2012817"),
            ..ParamDicRow::default()
        },
        dims: dims
            .iter()
            .enumerate()
            .map(|(k, (dim, type_id))| ParamDimsRow {
                model_id: 1,
                param_id,
                dim_id: i32::try_from(k).unwrap_or(0),
                name: (*dim).to_string(),
                type_id: *type_id,
                ..ParamDimsRow::default()
            })
            .collect(),
        ..ParamMeta::default()
    }
}

fn table(table_id: i32, name: &str, dims: &[(i32, bool)], acc: &[(&str, bool)], expr: &[&str]) -> TableMeta {
    TableMeta {
        table: TableDicRow {
            model_id: 1,
            table_id,
            table_hid: table_id + 1,
            name: name.to_string(),
            digest: format!("_{name}_digest_"),
            rank: i32::try_from(dims.len()).unwrap_or(0),
            db_expr_table: format!("{name}_v_2012882"),
            db_acc_table: format!("{name}_a_2012882"),
            db_acc_all_view: format!("{name}_d_2012882"),
            ..TableDicRow::default()
        },
        dims: dims
            .iter()
            .enumerate()
            .map(|(k, (type_id, is_total))| TableDimsRow {
                model_id: 1,
                table_id,
                dim_id: i32::try_from(k).unwrap_or(0),
                name: format!("dim{k}"),
                type_id: *type_id,
                is_total: *is_total,
                ..TableDimsRow::default()
            })
            .collect(),
        acc: acc
            .iter()
            .enumerate()
            .map(|(k, (src, is_derived))| TableAccRow {
                model_id: 1,
                table_id,
                acc_id: i32::try_from(k).unwrap_or(0),
                name: format!("acc{k}"),
                is_derived: *is_derived,
                src_acc: (*src).to_string(),
                ..TableAccRow::default()
            })
            .collect(),
        expr: expr
            .iter()
            .enumerate()
            .map(|(k, src)| TableExprRow {
                model_id: 1,
                table_id,
                expr_id: i32::try_from(k).unwrap_or(0),
                name: format!("Expr{k}"),
                decimals: 4,
                src_expr: (*src).to_string(),
                ..TableExprRow::default()
            })
            .collect(),
    }
}

/// `modelOne`: classification, logical and range types, six parameters, two
/// output tables and one entity.
///
/// # Errors
/// Never fails unless the fixture itself is inconsistent.
pub fn model_one() -> Result<ModelMeta> {
    let types = vec![
        type_meta(4, 5, "int", DicKind::Simple, 0, &[]),
        type_meta(7, 8, "bool", DicKind::Logical, 2, &[(0, "false"), (1, "true")]),
        type_meta(14, 15, "double", DicKind::Simple, 0, &[]),
        type_meta(21, 22, "file", DicKind::Simple, 0, &[]),
        type_meta(101, 101, "age", DicKind::Classification, 50, &[(10, "10-20"), (20, "20-30"), (30, "30-40"), (40, "40+")]),
        type_meta(102, 102, "sex", DicKind::Classification, 2, &[(0, "M"), (1, "F")]),
        type_meta(103, 103, "salary", DicKind::Classification, 400, &[(100, "L"), (200, "M"), (300, "H")]),
        type_meta(104, 104, "YEAR", DicKind::Range, 2024, &[(2021, "2021"), (2022, "2022"), (2023, "2023")]),
    ];

    let params = vec![
        param(0, "ageSex", 14, &[("dim0", 101), ("dim1", 102)]),
        param(1, "salaryAge", 4, &[("dim0", 103), ("dim1", 101)]),
        param(2, "StartingSeed", 4, &[]),
        param(3, "isOldAge", 7, &[("dim0", 101)]),
        param(4, "filePath", 21, &[]),
        param(5, "yearRatio", 14, &[("dim0", 104)]),
    ];

    let tables = vec![
        table(
            0,
            "salarySex",
            &[(103, false), (102, true)],
            &[("value_sum()", false), ("value_count()", false), ("acc0 + acc1", true)],
            &["OM_AVG(acc0)", "OM_SUM(acc1)", "OM_MIN(acc0)", "OM_AVG(acc0 * acc1)"],
        ),
        table(
            1,
            "ageSexIncome",
            &[(101, false), (102, false)],
            &[("value_sum()", false), ("value_count()", false)],
            &["OM_AVG(acc0)", "OM_AVG(acc1)"],
        ),
    ];

    let attr = |attr_id: i32, name: &str, type_id: i32, is_internal: bool| EntityAttrRow {
        model_id: 1,
        entity_id: 0,
        attr_id,
        name: name.to_string(),
        type_id,
        is_internal,
        ..EntityAttrRow::default()
    };
    let entity = vec![EntityMeta {
        entity: EntityDicRow {
            model_id: 1,
            entity_id: 0,
            entity_hid: 1,
            name: "Person".to_string(),
            digest: "_Person_digest_".to_string(),
            db_entity_table: "Person_g_2012882".to_string(),
        },
        attr: vec![
            attr(0, "Age", 4, false),
            attr(1, "Sex", 102, false),
            attr(2, "Income", 14, false),
            attr(3, "isOld", 7, false),
            attr(4, "internalKey", 4, true),
        ],
    }];

    let group = |group_id: i32, is_param: bool, name: &str| GroupLstRow {
        model_id: 1,
        group_id,
        is_param,
        name: name.to_string(),
        is_hidden: false,
    };
    let pc = |group_id: i32, child_pos: i32, child_group_id: Option<i32>, leaf_id: Option<i32>| GroupPcRow {
        model_id: 1,
        group_id,
        child_pos,
        child_group_id,
        leaf_id,
    };

    let mut meta = ModelMeta {
        model: ModelDicRow {
            model_id: 1,
            name: MODEL_NAME.to_string(),
            digest: MODEL_DIGEST.to_string(),
            model_type: 0,
            version: "1.0.0.0".to_string(),
            create_date_time: "2012-08-17 16:04:59.148".to_string(),
            default_lang_code: "EN".to_string(),
        },
        types,
        param: params,
        table: tables,
        entity,
        group: vec![
            group(1, true, "AllParameters"),
            group(2, true, "AgeSexParameters"),
            group(10, false, "AdditionalTables"),
        ],
        group_pc: vec![
            pc(1, 0, Some(2), None),
            pc(1, 1, None, Some(2)),
            pc(2, 0, None, Some(0)),
            pc(2, 1, None, Some(1)),
            pc(10, 0, None, Some(1)),
        ],
        ..ModelMeta::default()
    };
    meta.update_internals()?;
    Ok(meta)
}

/// Completed run with every parameter and output table of the model.
#[must_use]
pub fn run_one(meta: &ModelMeta, run_id: i32, name: &str) -> RunMeta {
    let create_dt = "2024-03-01 10:20:30.123";
    let stamp = "2024_03_01_10_20_30_123";
    let digest = run_meta_digest(&meta.model.digest, name, 1, create_dt, stamp);
    RunMeta {
        run: RunRow {
            run_id,
            model_id: meta.model.model_id,
            name: name.to_string(),
            sub_count: 1,
            sub_started: 1,
            sub_completed: 1,
            sub_restart: 0,
            create_date_time: create_dt.to_string(),
            status: RunStatus::Success,
            update_date_time: "2024-03-01 10:20:31.456".to_string(),
            run_digest: digest,
            value_digest: String::new(),
            run_stamp: stamp.to_string(),
        },
        txt: vec![DescrNote { lang_code: "EN".into(), descr: format!("{name} description"), note: String::new() }],
        opts: BTreeMap::from([("OpenM.RunName".to_string(), name.to_string())]),
        param: meta
            .param
            .iter()
            .map(|p| RunParam {
                param_hid: p.param.param_hid,
                sub_count: 1,
                value_digest: String::new(),
                base_run_id: run_id,
                txt: vec![],
            })
            .collect(),
        table: meta
            .table
            .iter()
            .map(|t| RunTable { table_hid: t.table.table_hid, value_digest: String::new(), base_run_id: run_id })
            .collect(),
        entity: vec![],
        progress: vec![],
    }
}

/// Read-only input set with every parameter of the model.
#[must_use]
pub fn set_one(meta: &ModelMeta, set_id: i32, name: &str) -> WorksetMeta {
    WorksetMeta {
        set: WorksetRow {
            set_id,
            base_run_id: 0,
            model_id: meta.model.model_id,
            name: name.to_string(),
            is_readonly: true,
            update_date_time: "2024-03-01 09:00:00.000".to_string(),
        },
        txt: vec![DescrNote { lang_code: "EN".into(), descr: format!("{name} input set"), note: String::new() }],
        param: meta
            .param
            .iter()
            .map(|p| WorksetParam { param_hid: p.param.param_hid, sub_count: 1, default_sub_id: 0, txt: vec![] })
            .collect(),
    }
}

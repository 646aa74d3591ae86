//! Seeded databases for tests of this crate and of the cli crate.

use std::collections::BTreeMap;

use anyhow::Result;
use dbcopy_core::cell::{AccCell, Cell, CellValue, ExprCell, MicroCell, ParamCell};
use dbcopy_core::lang::{LangEntry, LangLstRow, LangMeta};
use dbcopy_core::model::ModelMeta;
use dbcopy_core::model_txt::{GroupTxtRow, ModelTxtMeta, ModelTxtRow, ParamTxtRow, TableTxtRow};
use dbcopy_core::progress::{Context, MemoryProgress};
use dbcopy_core::run::{RunEntity, RunStatus};
use dbcopy_core::testing::{model_one, run_one, set_one, MODEL_DIGEST, MODEL_NAME};

use crate::lang_db::{read_lang, write_lang};
use crate::model_db::insert_model;
use crate::model_txt_db::write_model_txt;
use crate::run_db::insert_run_meta;
use crate::values::{fill_run_digests, ValueSource, ValueWriter};
use crate::workset_db::{replace_workset, set_workset_readonly};
use crate::ModelDb;

/// English and French, each with a translation of the total item word.
#[must_use]
pub fn two_languages() -> LangMeta {
    let entry = |lang_id: i32, code: &str, name: &str, all: &str| LangEntry {
        lang: LangLstRow { lang_id, lang_code: code.to_string(), name: name.to_string() },
        words: BTreeMap::from([("all".to_string(), all.to_string())]),
    };
    LangMeta::new(vec![entry(0, "EN", "English", "All"), entry(1, "FR", "Français", "Tous")])
}

/// English text of the model, two parameters, one table and one group.
#[must_use]
pub fn model_one_txt() -> ModelTxtMeta {
    let en = || "EN".to_string();
    ModelTxtMeta {
        model_name: MODEL_NAME.to_string(),
        model_digest: MODEL_DIGEST.to_string(),
        model_txt: vec![ModelTxtRow { model_id: 1, lang_code: en(), descr: "First model".into(), note: String::new() }],
        param_txt: vec![
            ParamTxtRow { model_id: 1, param_id: 0, lang_code: en(), descr: "Age by sex".into(), note: "Age by sex note".into() },
            ParamTxtRow { model_id: 1, param_id: 2, lang_code: en(), descr: "Random seed".into(), note: String::new() },
        ],
        table_txt: vec![TableTxtRow {
            model_id: 1,
            table_id: 0,
            lang_code: en(),
            descr: "Salary by sex".into(),
            note: String::new(),
            expr_descr: "Measure".into(),
            expr_note: String::new(),
        }],
        group_txt: vec![GroupTxtRow { model_id: 1, group_id: 1, lang_code: en(), descr: "All parameters".into(), note: String::new() }],
        ..ModelTxtMeta::default()
    }
}

/// In-memory database holding the two languages and `modelOne` with its
/// text, the model stored under id 1.
///
/// # Errors
/// Returns an error when the database cannot be populated.
pub fn seeded_db() -> Result<ModelDb> {
    let mut db = ModelDb::open_in_memory()?;
    seed_model(&mut db)?;
    Ok(db)
}

/// Write the two languages and `modelOne` with its text into `db`.
///
/// # Errors
/// Returns an error when the database cannot be populated.
pub fn seed_model(db: &mut ModelDb) -> Result<()> {
    let facet = db.facet();
    let tx = db.transaction()?;
    let lang = write_lang(&tx, &two_languages())?;
    let mut meta = model_one()?;
    insert_model(&tx, facet, &mut meta, &lang)?;
    write_model_txt(&tx, &meta, &model_one_txt(), &lang)?;
    tx.commit()?;
    Ok(())
}

/// Every combination of dimension items, first dimension slowest.
fn cartesian(sets: &[Vec<i32>]) -> Vec<Vec<i32>> {
    sets.iter().fold(vec![Vec::new()], |acc, items| {
        acc.iter()
            .flat_map(|prefix| {
                items.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(*v);
                    next
                })
            })
            .collect()
    })
}

fn param_cells(meta: &ModelMeta, idx: usize) -> Vec<Cell> {
    let p = &meta.param[idx];
    let items: Vec<Vec<i32>> = p.dims.iter().map(|d| meta.types[d.type_index].enum_ids()).collect();
    let t = &meta.types[p.type_index].type_dic;
    cartesian(&items)
        .into_iter()
        .zip(0_i32..)
        .map(|(dims, k)| {
            let value = if t.is_bool() {
                CellValue::Bool(k % 2 == 0)
            } else if t.is_string() {
                CellValue::Str(format!("data/file{k}.csv"))
            } else if t.is_float() {
                CellValue::Float(f64::from(k) * 1.5 + 0.25)
            } else {
                CellValue::Int(i64::from(k) + 100)
            };
            Cell::Param(ParamCell { sub_id: 0, dims, value })
        })
        .collect()
}

fn table_cells(meta: &ModelMeta, idx: usize) -> Vec<Cell> {
    let t = &meta.table[idx];
    let items: Vec<Vec<i32>> = t
        .dims
        .iter()
        .map(|d| {
            let ty = &meta.types[d.type_index];
            let mut ids = ty.enum_ids();
            if d.is_total {
                ids.push(ty.type_dic.total_enum_id);
            }
            ids
        })
        .collect();
    let cells = cartesian(&items);

    let mut out = Vec::new();
    for a in t.stored_acc() {
        for (dims, k) in cells.iter().zip(0_i32..) {
            out.push(Cell::Acc(AccCell {
                acc_id: a.acc_id,
                sub_id: 0,
                dims: dims.clone(),
                value: Some(f64::from(k + 1) * f64::from(a.acc_id + 2)),
            }));
        }
    }
    for e in &t.expr {
        for (dims, k) in cells.iter().zip(0_i32..) {
            out.push(Cell::Expr(ExprCell { expr_id: e.expr_id, dims: dims.clone(), value: Some(f64::from(k) + 0.5) }));
        }
    }
    out
}

fn micro_cells() -> Vec<Cell> {
    (1_i32..=3)
        .map(|key| {
            Cell::Micro(MicroCell {
                key: i64::from(key),
                attrs: vec![
                    CellValue::Int(i64::from(20 + key * 10)),
                    CellValue::Int(i64::from(key % 2)),
                    CellValue::Float(1000.0 * f64::from(key)),
                    CellValue::Bool(key == 3),
                ],
            })
        })
        .collect()
}

/// Insert a run of `modelOne` with full parameter, output table and
/// microdata values and their digests. Returns the run id.
///
/// # Errors
/// Returns an error when the run cannot be written.
pub fn seed_run(db: &mut ModelDb, meta: &ModelMeta, name: &str, status: RunStatus) -> Result<i32> {
    let lang = read_lang(db.conn())?;
    let mut run = run_one(meta, 0, name);
    run.run.status = status;
    run.entity = meta.entity.iter().map(|e| RunEntity { entity_hid: e.entity.entity_hid, value_digest: String::new() }).collect();

    let tx = db.transaction()?;
    insert_run_meta(&tx, meta, &mut run, &lang)?;
    let run_id = run.run.run_id;

    for idx in 0..meta.param.len() {
        let mut w = ValueWriter::param(&tx, meta, idx, ValueSource::Run(run_id));
        for cell in param_cells(meta, idx) {
            w.write(&cell)?;
        }
    }
    for idx in 0..meta.table.len() {
        let mut w = ValueWriter::table(&tx, meta, idx, run_id);
        for cell in table_cells(meta, idx) {
            w.write(&cell)?;
        }
    }
    for idx in 0..meta.entity.len() {
        let mut w = ValueWriter::micro(&tx, meta, idx, run_id);
        for cell in micro_cells() {
            w.write(&cell)?;
        }
    }

    let progress = MemoryProgress::default();
    fill_run_digests(&tx, meta, run_id, &Context::new(&progress))?;
    tx.commit()?;
    Ok(run_id)
}

/// Insert a read-only input set of `modelOne` with values of every
/// parameter. Returns the set id.
///
/// # Errors
/// Returns an error when the set cannot be written.
pub fn seed_set(db: &mut ModelDb, meta: &ModelMeta, name: &str) -> Result<i32> {
    let lang = read_lang(db.conn())?;
    let mut ws = set_one(meta, 0, name);

    let tx = db.transaction()?;
    replace_workset(&tx, meta, &mut ws, &lang)?;
    let set_id = ws.set.set_id;
    for idx in 0..meta.param.len() {
        let mut w = ValueWriter::param(&tx, meta, idx, ValueSource::Set(set_id));
        for cell in param_cells(meta, idx) {
            w.write(&cell)?;
        }
    }
    set_workset_readonly(&tx, set_id, true)?;
    tx.commit()?;
    Ok(set_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_orders_first_dimension_slowest() {
        let rows = cartesian(&[vec![1, 2], vec![7, 8, 9]]);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec![1, 7]);
        assert_eq!(rows[3], vec![2, 7]);
        assert_eq!(cartesian(&[]), vec![Vec::<i32>::new()]);
    }
}

//! Input sets (worksets): selection, load and replace.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use dbcopy_core::facet::{cap, DESCR_MAX_LEN, NAME_MAX_LEN, NOTE_MAX_LEN};
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::run::{DescrNote, LangNote};
use dbcopy_core::workset::{WorksetMeta, WorksetParam, WorksetRow};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{flag, ids, text_or_empty};

/// How an input set is selected within a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetRef {
    Id(i32),
    Name(String),
}

impl std::fmt::Display for SetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

const WORKSET_LST_SELECT: &str =
    "SELECT set_id, base_run_id, model_id, set_name, is_readonly, update_dt FROM workset_lst";

fn workset_row(row: &Row<'_>) -> rusqlite::Result<WorksetRow> {
    Ok(WorksetRow {
        set_id: row.get(0)?,
        base_run_id: row.get::<_, Option<i32>>(1)?.unwrap_or(0),
        model_id: row.get(2)?,
        name: row.get(3)?,
        is_readonly: flag(row, 4)?,
        update_date_time: row.get(5)?,
    })
}

/// # Errors
/// Returns an error when `workset_lst` cannot be read.
pub fn list_worksets(conn: &Connection, model_id: i32) -> Result<Vec<WorksetRow>> {
    let mut stmt = conn
        .prepare(&format!("{WORKSET_LST_SELECT} WHERE model_id = ?1 ORDER BY set_id"))
        .context("failed to prepare workset_lst query")?;
    let rows = stmt.query_map(params![model_id], workset_row)
        .context("failed to query workset_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode workset_lst rows")?;
    Ok(rows)
}

/// # Errors
/// Returns an error when `workset_lst` cannot be read.
pub fn find_workset(conn: &Connection, model_id: i32, set: &SetRef) -> Result<Option<WorksetRow>> {
    let found = match set {
        SetRef::Id(id) => conn
            .query_row(
                &format!("{WORKSET_LST_SELECT} WHERE set_id = ?1 AND model_id = ?2"),
                params![id, model_id],
                workset_row,
            )
            .optional(),
        SetRef::Name(name) => conn
            .query_row(
                &format!("{WORKSET_LST_SELECT} WHERE model_id = ?1 AND set_name = ?2"),
                params![model_id, name],
                workset_row,
            )
            .optional(),
    };
    found.with_context(|| format!("failed to find workset {set}"))
}

/// # Errors
/// Returns an error when a workset table cannot be read.
pub fn read_workset_meta(conn: &Connection, row: WorksetRow, lang: &LangMeta) -> Result<WorksetMeta> {
    let set_id = row.set_id;

    let mut txt = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT lang_id, descr, note FROM workset_txt WHERE set_id = ?1 ORDER BY lang_id")
            .context("failed to prepare workset_txt query")?;
        let mut rows = stmt.query(params![set_id]).context("failed to query workset_txt")?;
        while let Some(r) = rows.next().context("failed to iterate workset_txt")? {
            let (lang_code, ok) = lang.code_by_id(r.get(0)?);
            if ok {
                txt.push(DescrNote { lang_code, descr: r.get(1)?, note: text_or_empty(r, 2)? });
            }
        }
    }

    let mut param: Vec<WorksetParam> = {
        let mut stmt = conn
            .prepare(
                "SELECT WP.parameter_hid, WP.sub_count, WP.default_sub_id
                 FROM workset_parameter WP
                 INNER JOIN model_parameter_dic M ON (M.parameter_hid = WP.parameter_hid AND M.model_id = ?2)
                 WHERE WP.set_id = ?1
                 ORDER BY M.model_parameter_id",
            )
            .context("failed to prepare workset_parameter query")?;
        let rows = stmt.query_map(params![set_id, row.model_id], |r| {
            Ok(WorksetParam { param_hid: r.get(0)?, sub_count: r.get(1)?, default_sub_id: r.get(2)?, txt: Vec::new() })
        })
        .context("failed to query workset_parameter")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode workset_parameter rows")?;
        rows
    };

    let mut stmt = conn
        .prepare(
            "SELECT parameter_hid, lang_id, note FROM workset_parameter_txt
             WHERE set_id = ?1 ORDER BY parameter_hid, lang_id",
        )
        .context("failed to prepare workset_parameter_txt query")?;
    let mut rows = stmt.query(params![set_id]).context("failed to query workset_parameter_txt")?;
    while let Some(r) = rows.next().context("failed to iterate workset_parameter_txt")? {
        let hid: i32 = r.get(0)?;
        let (lang_code, ok) = lang.code_by_id(r.get(1)?);
        if let (true, Some(p)) = (ok, param.iter_mut().find(|p| p.param_hid == hid)) {
            p.txt.push(LangNote { lang_code, note: text_or_empty(r, 2)? });
        }
    }

    Ok(WorksetMeta { set: row, txt, param })
}

fn base_run(base_run_id: i32) -> Option<i32> {
    (base_run_id > 0).then_some(base_run_id)
}

/// Create the input set, or empty and reuse the set of the same name. The set
/// is left read-write with every parameter of `ws` registered; the caller
/// writes parameter values and then restores the read-only flag with
/// [`set_workset_readonly`]. Returns true when a new set was created.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn replace_workset(conn: &Connection, meta: &ModelMeta, ws: &mut WorksetMeta, lang: &LangMeta) -> Result<bool> {
    let model_id = meta.model.model_id;
    ws.set.model_id = model_id;
    let name = cap(&ws.set.name, NAME_MAX_LEN);

    let existing = find_workset(conn, model_id, &SetRef::Name(name.clone()))?;
    let is_new = existing.is_none();
    let set_id = if let Some(old) = existing {
        clear_workset(conn, meta, old.set_id)?;
        conn.execute(
            "UPDATE workset_lst SET base_run_id = ?1, is_readonly = 0, update_dt = ?2 WHERE set_id = ?3",
            params![base_run(ws.set.base_run_id), ws.set.update_date_time, old.set_id],
        )
        .with_context(|| format!("failed to update workset {name}"))?;
        old.set_id
    } else {
        let set_id = ids::next_id(conn, ids::RUN_ID_SET_ID)?;
        conn.execute(
            "INSERT INTO workset_lst (set_id, base_run_id, model_id, set_name, is_readonly, update_dt)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![set_id, base_run(ws.set.base_run_id), model_id, name, ws.set.update_date_time],
        )
        .with_context(|| format!("failed to insert workset {name}"))?;
        set_id
    };
    ws.set.set_id = set_id;

    for t in &ws.txt {
        let (lang_id, ok) = lang.id_by_code(&t.lang_code);
        if !ok {
            continue;
        }
        let note = cap(&t.note, NOTE_MAX_LEN);
        conn.execute(
            "INSERT INTO workset_txt (set_id, lang_id, descr, note) VALUES (?1, ?2, ?3, ?4)",
            params![set_id, lang_id, cap(&t.descr, DESCR_MAX_LEN), (!note.is_empty()).then_some(note)],
        )
        .context("failed to insert workset_txt")?;
    }
    for p in &ws.param {
        add_workset_parameter(conn, set_id, p, lang)?;
    }
    Ok(is_new)
}

/// Drop parameter values, parameter rows and text of a set.
fn clear_workset(conn: &Connection, meta: &ModelMeta, set_id: i32) -> Result<()> {
    let hids: Vec<i32> = {
        let mut stmt = conn
            .prepare("SELECT parameter_hid FROM workset_parameter WHERE set_id = ?1")
            .context("failed to prepare workset_parameter query")?;
        let rows = stmt.query_map(params![set_id], |r| r.get(0))
            .context("failed to query workset_parameter")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode workset_parameter rows")?;
        rows
    };
    for hid in hids {
        if let Some(idx) = meta.param_by_hid(hid) {
            let p = &meta.param[idx].param;
            conn.execute(&format!("DELETE FROM {} WHERE set_id = ?1", p.db_set_table), params![set_id])
                .with_context(|| format!("failed to delete workset values of parameter {}", p.name))?;
        }
    }
    conn.execute("DELETE FROM workset_parameter_txt WHERE set_id = ?1", params![set_id])
        .context("failed to delete workset_parameter_txt")?;
    conn.execute("DELETE FROM workset_parameter WHERE set_id = ?1", params![set_id])
        .context("failed to delete workset_parameter")?;
    conn.execute("DELETE FROM workset_txt WHERE set_id = ?1", params![set_id])
        .context("failed to delete workset_txt")?;
    Ok(())
}

/// Register one parameter of a set with its text.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn add_workset_parameter(conn: &Connection, set_id: i32, p: &WorksetParam, lang: &LangMeta) -> Result<()> {
    conn.execute(
        "INSERT INTO workset_parameter (set_id, parameter_hid, sub_count, default_sub_id) VALUES (?1, ?2, ?3, ?4)",
        params![set_id, p.param_hid, p.sub_count, p.default_sub_id],
    )
    .with_context(|| format!("failed to insert workset parameter {}", p.param_hid))?;
    for t in &p.txt {
        let (lang_id, ok) = lang.id_by_code(&t.lang_code);
        if !ok {
            continue;
        }
        let note = cap(&t.note, NOTE_MAX_LEN);
        conn.execute(
            "INSERT INTO workset_parameter_txt (set_id, parameter_hid, lang_id, note) VALUES (?1, ?2, ?3, ?4)",
            params![set_id, p.param_hid, lang_id, (!note.is_empty()).then_some(note)],
        )
        .context("failed to insert workset_parameter_txt")?;
    }
    Ok(())
}

/// # Errors
/// Returns an error when the row cannot be updated.
pub fn set_workset_readonly(conn: &Connection, set_id: i32, is_readonly: bool) -> Result<()> {
    conn.execute(
        "UPDATE workset_lst SET is_readonly = ?1 WHERE set_id = ?2",
        params![i32::from(is_readonly), set_id],
    )
    .with_context(|| format!("failed to update read-only flag of workset {set_id}"))?;
    Ok(())
}

/// Set names keyed by set id.
///
/// # Errors
/// Returns an error when `workset_lst` cannot be read.
pub fn set_names(conn: &Connection, model_id: i32) -> Result<BTreeMap<i32, String>> {
    Ok(list_worksets(conn, model_id)?.into_iter().map(|w| (w.set_id, w.name)).collect())
}

/// Set ids keyed by set name.
///
/// # Errors
/// Returns an error when `workset_lst` cannot be read.
pub fn set_ids_by_name(conn: &Connection, model_id: i32) -> Result<BTreeMap<String, i32>> {
    Ok(list_worksets(conn, model_id)?.into_iter().map(|w| (w.name, w.set_id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_db;
    use dbcopy_core::testing::set_one;

    #[test]
    fn new_set_reads_back_read_write_until_flag_restored() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;

        let mut ws = set_one(&meta, 0, "Default");
        let tx = db.transaction()?;
        assert!(replace_workset(&tx, &meta, &mut ws, &lang)?);
        tx.commit()?;

        let row = match find_workset(db.conn(), 1, &SetRef::Name("Default".into()))? {
            Some(row) => row,
            None => panic!("workset not found"),
        };
        assert!(!row.is_readonly);
        assert_eq!(row.base_run_id, 0);
        set_workset_readonly(db.conn(), row.set_id, true)?;

        let back = read_workset_meta(db.conn(), row, &lang)?;
        assert_eq!(back.param.len(), meta.param.len());
        assert_eq!(back.txt[0].descr, "Default input set");
        assert!(find_workset(db.conn(), 1, &SetRef::Id(back.set.set_id))?.is_some_and(|w| w.is_readonly));
        Ok(())
    }

    #[test]
    fn replacing_by_name_keeps_the_set_id() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;

        let tx = db.transaction()?;
        let mut first = set_one(&meta, 0, "Default");
        replace_workset(&tx, &meta, &mut first, &lang)?;
        let mut second = set_one(&meta, 0, "Default");
        second.param.truncate(2);
        assert!(!replace_workset(&tx, &meta, &mut second, &lang)?);
        tx.commit()?;

        assert_eq!(first.set.set_id, second.set.set_id);
        let row = match find_workset(db.conn(), 1, &SetRef::Id(first.set.set_id))? {
            Some(row) => row,
            None => panic!("workset not found"),
        };
        assert_eq!(read_workset_meta(db.conn(), row, &lang)?.param.len(), 2);
        assert_eq!(set_ids_by_name(db.conn(), 1)?.get("Default"), Some(&first.set.set_id));
        Ok(())
    }
}

//! Model run metadata: selection, load, insert, value digests and value
//! de-duplication between runs.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use dbcopy_core::digest::run_value_digest;
use dbcopy_core::facet::{cap, DESCR_MAX_LEN, NAME_MAX_LEN, NOTE_MAX_LEN, OPTION_MAX_LEN};
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::run::{
    DescrNote, LangNote, RunEntity, RunMeta, RunParam, RunProgress, RunRow, RunStatus, RunTable,
};
use dbcopy_core::task::TaskRunRef;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{ids, text_or_empty};

/// How a run is selected within a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRef {
    Id(i32),
    Digest(String),
    Name(String),
    First,
    Last,
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Digest(d) => f.write_str(d),
            Self::Name(n) => f.write_str(n),
            Self::First => f.write_str("first run"),
            Self::Last => f.write_str("last run"),
        }
    }
}

const RUN_LST_SELECT: &str = "SELECT run_id, model_id, run_name, sub_count, sub_started, sub_completed,
    sub_restart, create_dt, status, update_dt, run_digest, value_digest, run_stamp
    FROM run_lst";

/// Status column decoded into [`RunStatus`].
pub(crate) fn status(row: &Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    let code: String = row.get(idx)?;
    RunStatus::parse(&code).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        model_id: row.get(1)?,
        name: row.get(2)?,
        sub_count: row.get(3)?,
        sub_started: row.get(4)?,
        sub_completed: row.get(5)?,
        sub_restart: row.get(6)?,
        create_date_time: row.get(7)?,
        status: status(row, 8)?,
        update_date_time: row.get(9)?,
        run_digest: text_or_empty(row, 10)?,
        value_digest: text_or_empty(row, 11)?,
        run_stamp: row.get(12)?,
    })
}

fn null_if_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// # Errors
/// Returns an error when `run_lst` cannot be read.
pub fn list_runs(conn: &Connection, model_id: i32) -> Result<Vec<RunRow>> {
    let mut stmt = conn
        .prepare(&format!("{RUN_LST_SELECT} WHERE model_id = ?1 ORDER BY run_id"))
        .context("failed to prepare run_lst query")?;
    let rows = stmt.query_map(params![model_id], run_row)
        .context("failed to query run_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode run_lst rows")?;
    Ok(rows)
}

/// Find a run of the model; a name or digest shared by several runs selects
/// the one with the smallest id.
///
/// # Errors
/// Returns an error when `run_lst` cannot be read.
pub fn find_run(conn: &Connection, model_id: i32, run: &RunRef) -> Result<Option<RunRow>> {
    let found = match run {
        RunRef::Id(id) => conn
            .query_row(
                &format!("{RUN_LST_SELECT} WHERE run_id = ?1 AND model_id = ?2"),
                params![id, model_id],
                run_row,
            )
            .optional(),
        RunRef::Digest(digest) => conn
            .query_row(
                &format!("{RUN_LST_SELECT} WHERE model_id = ?1 AND run_digest = ?2 ORDER BY run_id LIMIT 1"),
                params![model_id, digest],
                run_row,
            )
            .optional(),
        RunRef::Name(name) => conn
            .query_row(
                &format!("{RUN_LST_SELECT} WHERE model_id = ?1 AND run_name = ?2 ORDER BY run_id LIMIT 1"),
                params![model_id, name],
                run_row,
            )
            .optional(),
        RunRef::First => conn
            .query_row(
                &format!("{RUN_LST_SELECT} WHERE model_id = ?1 ORDER BY run_id LIMIT 1"),
                params![model_id],
                run_row,
            )
            .optional(),
        RunRef::Last => conn
            .query_row(
                &format!("{RUN_LST_SELECT} WHERE model_id = ?1 ORDER BY run_id DESC LIMIT 1"),
                params![model_id],
                run_row,
            )
            .optional(),
    };
    found.with_context(|| format!("failed to find model run {run}"))
}

/// # Errors
/// Returns an error when a run table cannot be read.
pub fn read_run_meta(conn: &Connection, row: RunRow, lang: &LangMeta) -> Result<RunMeta> {
    let run_id = row.run_id;
    let model_id = row.model_id;

    let mut txt = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT lang_id, descr, note FROM run_txt WHERE run_id = ?1 ORDER BY lang_id")
            .context("failed to prepare run_txt query")?;
        let mut rows = stmt.query(params![run_id]).context("failed to query run_txt")?;
        while let Some(r) = rows.next().context("failed to iterate run_txt")? {
            let (lang_code, ok) = lang.code_by_id(r.get(0)?);
            if ok {
                txt.push(DescrNote { lang_code, descr: r.get(1)?, note: text_or_empty(r, 2)? });
            }
        }
    }

    let mut opts = BTreeMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT option_key, option_value FROM run_option WHERE run_id = ?1 ORDER BY option_key")
            .context("failed to prepare run_option query")?;
        let mut rows = stmt.query(params![run_id]).context("failed to query run_option")?;
        while let Some(r) = rows.next().context("failed to iterate run_option")? {
            opts.insert(r.get(0)?, r.get(1)?);
        }
    }

    let mut param: Vec<RunParam> = {
        let mut stmt = conn
            .prepare(
                "SELECT RP.parameter_hid, RP.sub_count, RP.value_digest, RP.base_run_id
                 FROM run_parameter RP
                 INNER JOIN model_parameter_dic M ON (M.parameter_hid = RP.parameter_hid AND M.model_id = ?2)
                 WHERE RP.run_id = ?1
                 ORDER BY M.model_parameter_id",
            )
            .context("failed to prepare run_parameter query")?;
        let rows = stmt.query_map(params![run_id, model_id], |r| {
            Ok(RunParam {
                param_hid: r.get(0)?,
                sub_count: r.get(1)?,
                value_digest: text_or_empty(r, 2)?,
                base_run_id: r.get(3)?,
                txt: Vec::new(),
            })
        })
        .context("failed to query run_parameter")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode run_parameter rows")?;
        rows
    };
    {
        let mut stmt = conn
            .prepare(
                "SELECT parameter_hid, lang_id, note FROM run_parameter_txt
                 WHERE run_id = ?1 ORDER BY parameter_hid, lang_id",
            )
            .context("failed to prepare run_parameter_txt query")?;
        let mut rows = stmt.query(params![run_id]).context("failed to query run_parameter_txt")?;
        while let Some(r) = rows.next().context("failed to iterate run_parameter_txt")? {
            let hid: i32 = r.get(0)?;
            let (lang_code, ok) = lang.code_by_id(r.get(1)?);
            if let (true, Some(p)) = (ok, param.iter_mut().find(|p| p.param_hid == hid)) {
                p.txt.push(LangNote { lang_code, note: text_or_empty(r, 2)? });
            }
        }
    }

    let table = {
        let mut stmt = conn
            .prepare(
                "SELECT RT.table_hid, RT.value_digest, RT.base_run_id
                 FROM run_table RT
                 INNER JOIN model_table_dic M ON (M.table_hid = RT.table_hid AND M.model_id = ?2)
                 WHERE RT.run_id = ?1
                 ORDER BY M.model_table_id",
            )
            .context("failed to prepare run_table query")?;
        let rows = stmt.query_map(params![run_id, model_id], |r| {
            Ok(RunTable { table_hid: r.get(0)?, value_digest: text_or_empty(r, 1)?, base_run_id: r.get(2)? })
        })
        .context("failed to query run_table")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode run_table rows")?;
        rows
    };

    let entity = {
        let mut stmt = conn
            .prepare(
                "SELECT RE.entity_hid, RE.value_digest
                 FROM run_entity RE
                 INNER JOIN model_entity_dic M ON (M.entity_hid = RE.entity_hid AND M.model_id = ?2)
                 WHERE RE.run_id = ?1
                 ORDER BY M.model_entity_id",
            )
            .context("failed to prepare run_entity query")?;
        let rows = stmt.query_map(params![run_id, model_id], |r| {
            Ok(RunEntity { entity_hid: r.get(0)?, value_digest: text_or_empty(r, 1)? })
        })
        .context("failed to query run_entity")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode run_entity rows")?;
        rows
    };

    let progress = {
        let mut stmt = conn
            .prepare(
                "SELECT sub_id, create_dt, status, update_dt, progress_count, progress_value
                 FROM run_progress WHERE run_id = ?1 ORDER BY sub_id",
            )
            .context("failed to prepare run_progress query")?;
        let rows = stmt.query_map(params![run_id], |r| {
            Ok(RunProgress {
                sub_id: r.get(0)?,
                create_date_time: r.get(1)?,
                status: status(r, 2)?,
                update_date_time: r.get(3)?,
                count: r.get(4)?,
                value: r.get(5)?,
            })
        })
        .context("failed to query run_progress")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode run_progress rows")?;
        rows
    };

    Ok(RunMeta { run: row, txt, opts, param, table, entity, progress })
}

/// Insert run metadata. When the model already has a run with the same run
/// digest nothing is written, the existing id is stored into `run` and
/// `false` is returned. Otherwise the run gets a new id and owns its value
/// rows (`base_run_id = run_id`); the caller streams the values next.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn insert_run_meta(conn: &Connection, meta: &ModelMeta, run: &mut RunMeta, lang: &LangMeta) -> Result<bool> {
    let model_id = meta.model.model_id;
    run.run.model_id = model_id;

    if !run.run.run_digest.is_empty() {
        if let Some(existing) = find_run(conn, model_id, &RunRef::Digest(run.run.run_digest.clone()))? {
            tracing::debug!(run_id = existing.run_id, digest = %run.run.run_digest, "model run already exists");
            run.run.run_id = existing.run_id;
            return Ok(false);
        }
    }

    let run_id = ids::next_id(conn, ids::RUN_ID_SET_ID)?;
    run.run.run_id = run_id;
    let r = &run.run;
    conn.execute(
        "INSERT INTO run_lst
           (run_id, model_id, run_name, sub_count, sub_started, sub_completed, sub_restart,
            create_dt, status, update_dt, run_digest, value_digest, run_stamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            run_id,
            model_id,
            cap(&r.name, NAME_MAX_LEN),
            r.sub_count,
            r.sub_started,
            r.sub_completed,
            r.sub_restart,
            r.create_date_time,
            r.status.as_str(),
            r.update_date_time,
            null_if_empty(&r.run_digest),
            null_if_empty(&r.value_digest),
            r.run_stamp,
        ],
    )
    .with_context(|| format!("failed to insert model run {}", r.name))?;

    for t in &run.txt {
        let (lang_id, ok) = lang.id_by_code(&t.lang_code);
        if !ok {
            continue;
        }
        conn.execute(
            "INSERT INTO run_txt (run_id, lang_id, descr, note) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, lang_id, cap(&t.descr, DESCR_MAX_LEN), null_if_empty(&cap(&t.note, NOTE_MAX_LEN))],
        )
        .context("failed to insert run_txt")?;
    }
    for (key, value) in &run.opts {
        conn.execute(
            "INSERT INTO run_option (run_id, option_key, option_value) VALUES (?1, ?2, ?3)",
            params![run_id, cap(key, NAME_MAX_LEN), cap(value, OPTION_MAX_LEN)],
        )
        .with_context(|| format!("failed to insert run option {key}"))?;
    }

    for p in &mut run.param {
        p.base_run_id = run_id;
        conn.execute(
            "INSERT INTO run_parameter (run_id, parameter_hid, base_run_id, sub_count, value_digest)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, p.param_hid, run_id, p.sub_count, null_if_empty(&p.value_digest)],
        )
        .with_context(|| format!("failed to insert run_parameter {}", p.param_hid))?;
        for t in &p.txt {
            let (lang_id, ok) = lang.id_by_code(&t.lang_code);
            if !ok {
                continue;
            }
            conn.execute(
                "INSERT INTO run_parameter_txt (run_id, parameter_hid, lang_id, note) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, p.param_hid, lang_id, null_if_empty(&cap(&t.note, NOTE_MAX_LEN))],
            )
            .context("failed to insert run_parameter_txt")?;
        }
    }
    for t in &mut run.table {
        t.base_run_id = run_id;
        conn.execute(
            "INSERT INTO run_table (run_id, table_hid, base_run_id, value_digest) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, t.table_hid, run_id, null_if_empty(&t.value_digest)],
        )
        .with_context(|| format!("failed to insert run_table {}", t.table_hid))?;
    }
    for e in &run.entity {
        conn.execute(
            "INSERT INTO run_entity (run_id, entity_hid, base_run_id, value_digest) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, e.entity_hid, run_id, null_if_empty(&e.value_digest)],
        )
        .with_context(|| format!("failed to insert run_entity {}", e.entity_hid))?;
    }
    for p in &run.progress {
        conn.execute(
            "INSERT INTO run_progress
               (run_id, sub_id, create_dt, status, update_dt, progress_count, progress_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![run_id, p.sub_id, p.create_date_time, p.status.as_str(), p.update_date_time, p.count, p.value],
        )
        .context("failed to insert run_progress")?;
    }
    Ok(true)
}

/// # Errors
/// Returns an error when the row cannot be updated.
pub fn set_param_value_digest(conn: &Connection, run_id: i32, param_hid: i32, digest: &str) -> Result<()> {
    conn.execute(
        "UPDATE run_parameter SET value_digest = ?1 WHERE run_id = ?2 AND parameter_hid = ?3",
        params![null_if_empty(digest), run_id, param_hid],
    )
    .with_context(|| format!("failed to update value digest of parameter {param_hid}, run {run_id}"))?;
    Ok(())
}

/// # Errors
/// Returns an error when the row cannot be updated.
pub fn set_table_value_digest(conn: &Connection, run_id: i32, table_hid: i32, digest: &str) -> Result<()> {
    conn.execute(
        "UPDATE run_table SET value_digest = ?1 WHERE run_id = ?2 AND table_hid = ?3",
        params![null_if_empty(digest), run_id, table_hid],
    )
    .with_context(|| format!("failed to update value digest of output table {table_hid}, run {run_id}"))?;
    Ok(())
}

/// # Errors
/// Returns an error when the row cannot be updated.
pub fn set_entity_value_digest(conn: &Connection, run_id: i32, entity_hid: i32, digest: &str) -> Result<()> {
    conn.execute(
        "UPDATE run_entity SET value_digest = ?1 WHERE run_id = ?2 AND entity_hid = ?3",
        params![null_if_empty(digest), run_id, entity_hid],
    )
    .with_context(|| format!("failed to update value digest of entity {entity_hid}, run {run_id}"))?;
    Ok(())
}

/// Recompute and store the run value digest from the parameter and output
/// table value digests already stored for the run.
///
/// # Errors
/// Returns `NotFound` when the run does not exist, or a driver error.
pub fn update_run_value_digest(conn: &Connection, run_id: i32) -> Result<String> {
    let row = conn
        .query_row(&format!("{RUN_LST_SELECT} WHERE run_id = ?1"), params![run_id], run_row)
        .optional()
        .with_context(|| format!("failed to read model run {run_id}"))?;
    let row = crate::required(row, || format!("model run not found: {run_id}"))?;

    let digests = |sql: &str| -> Result<Vec<String>> {
        let mut stmt = conn.prepare(sql).context("failed to prepare value digest query")?;
        let rows = stmt.query_map(params![run_id, row.model_id], |r| text_or_empty(r, 0))
            .context("failed to query value digests")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode value digests")?;
        Ok(rows)
    };
    let param = digests(
        "SELECT RP.value_digest FROM run_parameter RP
         INNER JOIN model_parameter_dic M ON (M.parameter_hid = RP.parameter_hid AND M.model_id = ?2)
         WHERE RP.run_id = ?1 ORDER BY M.model_parameter_id",
    )?;
    let table = digests(
        "SELECT RT.value_digest FROM run_table RT
         INNER JOIN model_table_dic M ON (M.table_hid = RT.table_hid AND M.model_id = ?2)
         WHERE RT.run_id = ?1 ORDER BY M.model_table_id",
    )?;

    let digest = run_value_digest(
        row.sub_count,
        row.sub_completed,
        row.status,
        param.iter().map(String::as_str),
        table.iter().map(String::as_str),
    );
    conn.execute("UPDATE run_lst SET value_digest = ?1 WHERE run_id = ?2", params![digest, run_id])
        .with_context(|| format!("failed to update value digest of model run {run_id}"))?;
    Ok(digest)
}

/// Earliest other run of the same model holding its own rows with the same
/// value digest.
fn value_owner(conn: &Connection, link_table: &str, hid_col: &str, run_id: i32, hid: i32, digest: &str) -> Result<Option<i32>> {
    let sql = format!(
        "SELECT MIN(L.run_id) FROM {link_table} L
         INNER JOIN run_lst R ON (R.run_id = L.run_id)
         WHERE L.{hid_col} = ?1 AND L.value_digest = ?2 AND L.run_id <> ?3
         AND L.base_run_id = L.run_id AND R.status IN ('s', 'x', 'e')
         AND R.model_id = (SELECT model_id FROM run_lst WHERE run_id = ?3)"
    );
    conn.query_row(&sql, params![hid, digest, run_id], |r| r.get(0))
        .with_context(|| format!("failed to find value owner in {link_table}"))
}

/// Point parameter, output table and microdata values of a run at an earlier
/// run with identical values and delete the now redundant rows. Returns the
/// number of artifacts redirected.
///
/// # Errors
/// Returns an error when a row cannot be read, updated or deleted.
pub fn dedup_run_values(conn: &Connection, meta: &ModelMeta, run_id: i32) -> Result<usize> {
    let mut n = 0;

    let own = |sql: &str| -> Result<Vec<(i32, String)>> {
        let mut stmt = conn.prepare(sql).context("failed to prepare value digest query")?;
        let rows = stmt.query_map(params![run_id], |r| Ok((r.get(0)?, r.get(1)?)))
            .context("failed to query value digests")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode value digests")?;
        Ok(rows)
    };

    for (hid, digest) in own(
        "SELECT parameter_hid, value_digest FROM run_parameter
         WHERE run_id = ?1 AND base_run_id = run_id AND value_digest IS NOT NULL",
    )? {
        let Some(idx) = meta.param_by_hid(hid) else { continue };
        let Some(owner) = value_owner(conn, "run_parameter", "parameter_hid", run_id, hid, &digest)? else {
            continue;
        };
        let p = &meta.param[idx].param;
        conn.execute(&format!("DELETE FROM {} WHERE run_id = ?1", p.db_run_table), params![run_id])
            .with_context(|| format!("failed to delete values of parameter {}", p.name))?;
        conn.execute(
            "UPDATE run_parameter SET base_run_id = ?1 WHERE run_id = ?2 AND parameter_hid = ?3",
            params![owner, run_id, hid],
        )
        .context("failed to update run_parameter base run")?;
        n += 1;
    }

    for (hid, digest) in own(
        "SELECT table_hid, value_digest FROM run_table
         WHERE run_id = ?1 AND base_run_id = run_id AND value_digest IS NOT NULL",
    )? {
        let Some(idx) = meta.out_table_by_hid(hid) else { continue };
        let Some(owner) = value_owner(conn, "run_table", "table_hid", run_id, hid, &digest)? else {
            continue;
        };
        let t = &meta.table[idx].table;
        conn.execute(&format!("DELETE FROM {} WHERE run_id = ?1", t.db_acc_table), params![run_id])
            .with_context(|| format!("failed to delete accumulators of output table {}", t.name))?;
        conn.execute(&format!("DELETE FROM {} WHERE run_id = ?1", t.db_expr_table), params![run_id])
            .with_context(|| format!("failed to delete expressions of output table {}", t.name))?;
        conn.execute(
            "UPDATE run_table SET base_run_id = ?1 WHERE run_id = ?2 AND table_hid = ?3",
            params![owner, run_id, hid],
        )
        .context("failed to update run_table base run")?;
        n += 1;
    }

    for (hid, digest) in own(
        "SELECT entity_hid, value_digest FROM run_entity
         WHERE run_id = ?1 AND base_run_id = run_id AND value_digest IS NOT NULL",
    )? {
        let Some(idx) = meta.entity_by_hid(hid) else { continue };
        let Some(owner) = value_owner(conn, "run_entity", "entity_hid", run_id, hid, &digest)? else {
            continue;
        };
        let e = &meta.entity[idx].entity;
        conn.execute(&format!("DELETE FROM {} WHERE run_id = ?1", e.db_entity_table), params![run_id])
            .with_context(|| format!("failed to delete microdata of entity {}", e.name))?;
        conn.execute(
            "UPDATE run_entity SET base_run_id = ?1 WHERE run_id = ?2 AND entity_hid = ?3",
            params![owner, run_id, hid],
        )
        .context("failed to update run_entity base run")?;
        n += 1;
    }
    Ok(n)
}

/// Run references keyed by run id, for task history export.
///
/// # Errors
/// Returns an error when `run_lst` cannot be read.
pub fn task_run_refs(conn: &Connection, model_id: i32) -> Result<BTreeMap<i32, TaskRunRef>> {
    Ok(list_runs(conn, model_id)?
        .into_iter()
        .map(|r| {
            (
                r.run_id,
                TaskRunRef {
                    name: r.name,
                    sub_completed: r.sub_completed,
                    create_date_time: r.create_date_time,
                    run_digest: r.run_digest,
                },
            )
        })
        .collect())
}

/// Run ids keyed by run digest; runs without a digest are left out.
///
/// # Errors
/// Returns an error when `run_lst` cannot be read.
pub fn run_ids_by_digest(conn: &Connection, model_id: i32) -> Result<BTreeMap<String, i32>> {
    let mut out = BTreeMap::new();
    for r in list_runs(conn, model_id)? {
        if !r.run_digest.is_empty() {
            out.entry(r.run_digest).or_insert(r.run_id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_db;
    use dbcopy_core::testing::run_one;

    #[test]
    fn inserted_run_reads_back_in_model_order() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;

        let mut run = run_one(&meta, 0, "first");
        let tx = db.transaction()?;
        assert!(insert_run_meta(&tx, &meta, &mut run, &lang)?);
        tx.commit()?;
        assert!(run.run.run_id > 100);

        let row = match find_run(db.conn(), 1, &RunRef::Name("first".into()))? {
            Some(row) => row,
            None => panic!("run not found by name"),
        };
        let back = read_run_meta(db.conn(), row, &lang)?;
        assert_eq!(back.run.status, RunStatus::Success);
        assert_eq!(back.param.len(), meta.param.len());
        assert_eq!(back.param[0].param_hid, meta.param[0].param.param_hid);
        assert!(back.param.iter().all(|p| p.base_run_id == run.run.run_id));
        assert_eq!(back.opts.get("OpenM.RunName").map(String::as_str), Some("first"));
        assert_eq!(back.txt.len(), 1);
        Ok(())
    }

    #[test]
    fn same_run_digest_is_not_inserted_twice() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;

        let tx = db.transaction()?;
        let mut a = run_one(&meta, 0, "same");
        assert!(insert_run_meta(&tx, &meta, &mut a, &lang)?);
        let mut b = run_one(&meta, 0, "same");
        assert!(!insert_run_meta(&tx, &meta, &mut b, &lang)?);
        tx.commit()?;
        assert_eq!(a.run.run_id, b.run.run_id);
        assert_eq!(list_runs(db.conn(), 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn first_and_last_follow_run_id() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;
        let tx = db.transaction()?;
        for name in ["one", "two", "three"] {
            insert_run_meta(&tx, &meta, &mut run_one(&meta, 0, name), &lang)?;
        }
        tx.commit()?;

        let name_of = |r: &RunRef| -> Result<String> {
            Ok(find_run(db.conn(), 1, r)?.map(|r| r.name).unwrap_or_default())
        };
        assert_eq!(name_of(&RunRef::First)?, "one");
        assert_eq!(name_of(&RunRef::Last)?, "three");
        assert!(find_run(db.conn(), 1, &RunRef::Id(9999))?.is_none());
        Ok(())
    }

    #[test]
    fn value_digest_is_recomputed_from_stored_digests() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;
        let tx = db.transaction()?;
        let mut run = run_one(&meta, 0, "digested");
        insert_run_meta(&tx, &meta, &mut run, &lang)?;
        let run_id = run.run.run_id;
        set_param_value_digest(&tx, run_id, meta.param[0].param.param_hid, "p0")?;
        set_table_value_digest(&tx, run_id, meta.table[0].table.table_hid, "t0")?;
        let digest = update_run_value_digest(&tx, run_id)?;
        tx.commit()?;

        let p: Vec<&str> = (0..meta.param.len()).map(|k| if k == 0 { "p0" } else { "" }).collect();
        let t: Vec<&str> = (0..meta.table.len()).map(|k| if k == 0 { "t0" } else { "" }).collect();
        assert_eq!(digest, run_value_digest(1, 1, RunStatus::Success, p, t));
        Ok(())
    }
}

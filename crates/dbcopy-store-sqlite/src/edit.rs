//! Delete and rename of models, model runs, input sets and modeling tasks.
//!
//! Every operation runs in one transaction: a failed step leaves the
//! database unchanged.

use anyhow::{Context, Result};
use dbcopy_core::digest::run_meta_digest;
use dbcopy_core::facet::{cap, NAME_MAX_LEN};
use dbcopy_core::model::ModelMeta;
use dbcopy_core::run::{now_date_time, RunRow};
use dbcopy_core::task::TaskRow;
use dbcopy_core::workset::WorksetRow;
use dbcopy_core::DbcopyError;
use rusqlite::{params, Connection};

use crate::model_db::is_hid_shared;
use crate::run_db::{find_run, RunRef};
use crate::task_db::{clear_task, find_task, TaskRef};
use crate::workset_db::{find_workset, SetRef};
use crate::{ddl, required, ModelDb};

fn exec(conn: &Connection, sql: &str, id: i32) -> Result<usize> {
    conn.execute(sql, params![id]).with_context(|| format!("failed to execute: {sql}"))
}

/// Pass rows owned by `run_id` to the earliest other run sharing them, or
/// delete the rows when no other run reads them.
fn hand_over(conn: &Connection, link_table: &str, hid_col: &str, hid: i32, run_id: i32, value_tables: &[&str]) -> Result<()> {
    let next: Option<i32> = conn
        .query_row(
            &format!("SELECT MIN(run_id) FROM {link_table} WHERE {hid_col} = ?1 AND base_run_id = ?2 AND run_id <> ?2"),
            params![hid, run_id],
            |r| r.get(0),
        )
        .with_context(|| format!("failed to find runs sharing {link_table} values of run {run_id}"))?;

    match next {
        Some(next) => {
            for t in value_tables {
                conn.execute(&format!("UPDATE {t} SET run_id = ?1 WHERE run_id = ?2"), params![next, run_id])
                    .with_context(|| format!("failed to move values of {t} to run {next}"))?;
            }
            conn.execute(
                &format!("UPDATE {link_table} SET base_run_id = ?1 WHERE {hid_col} = ?2 AND base_run_id = ?3"),
                params![next, hid, run_id],
            )
            .with_context(|| format!("failed to update {link_table} base run"))?;
            tracing::debug!(link_table, hid, run_id, next, "moved shared values");
        }
        None => {
            for t in value_tables {
                exec(conn, &format!("DELETE FROM {t} WHERE run_id = ?1"), run_id)?;
            }
        }
    }
    Ok(())
}

fn owned_hids(conn: &Connection, link_table: &str, hid_col: &str, run_id: i32) -> Result<Vec<i32>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {hid_col} FROM {link_table} WHERE run_id = ?1 AND base_run_id = run_id"))
        .with_context(|| format!("failed to prepare {link_table} query"))?;
    let rows = stmt.query_map(params![run_id], |r| r.get(0))
        .with_context(|| format!("failed to query {link_table}"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to decode {link_table} rows"))?;
    Ok(rows)
}

fn delete_run_rows(conn: &Connection, meta: &ModelMeta, run_id: i32) -> Result<()> {
    exec(conn, "DELETE FROM task_run_set WHERE run_id = ?1", run_id)?;
    exec(conn, "UPDATE workset_lst SET base_run_id = NULL WHERE base_run_id = ?1", run_id)?;

    for hid in owned_hids(conn, "run_parameter", "parameter_hid", run_id)? {
        if let Some(idx) = meta.param_by_hid(hid) {
            let p = &meta.param[idx].param;
            hand_over(conn, "run_parameter", "parameter_hid", hid, run_id, &[&p.db_run_table])?;
        }
    }
    for hid in owned_hids(conn, "run_table", "table_hid", run_id)? {
        if let Some(idx) = meta.out_table_by_hid(hid) {
            let t = &meta.table[idx].table;
            hand_over(conn, "run_table", "table_hid", hid, run_id, &[&t.db_expr_table, &t.db_acc_table])?;
        }
    }
    for hid in owned_hids(conn, "run_entity", "entity_hid", run_id)? {
        if let Some(idx) = meta.entity_by_hid(hid) {
            let e = &meta.entity[idx].entity;
            hand_over(conn, "run_entity", "entity_hid", hid, run_id, &[&e.db_entity_table])?;
        }
    }

    for table in [
        "run_parameter_txt",
        "run_parameter",
        "run_table",
        "run_entity",
        "run_progress",
        "run_option",
        "run_txt",
        "run_lst",
    ] {
        exec(conn, &format!("DELETE FROM {table} WHERE run_id = ?1"), run_id)?;
    }
    Ok(())
}

/// Delete a completed model run with its values. Values shared with later
/// runs stay in the database under the next run reading them.
///
/// # Errors
/// Returns `NotFound` for an unknown run, `Precondition` when the run is not
/// completed, or a driver error.
pub fn delete_run(db: &mut ModelDb, meta: &ModelMeta, run: &RunRef) -> Result<RunRow> {
    let row = required(find_run(db.conn(), meta.model.model_id, run)?, || format!("model run not found: {run}"))?;
    if !row.status.is_completed() {
        return Err(DbcopyError::precondition(format!("model run not completed: {} {}", row.run_id, row.name)).into());
    }
    let tx = db.transaction()?;
    delete_run_rows(&tx, meta, row.run_id)?;
    tx.commit().context("failed to commit model run delete")?;
    tracing::info!(run_id = row.run_id, name = %row.name, "deleted model run");
    Ok(row)
}

fn delete_set_rows(conn: &Connection, meta: &ModelMeta, set_id: i32) -> Result<()> {
    exec(conn, "DELETE FROM task_run_set WHERE set_id = ?1", set_id)?;
    exec(conn, "DELETE FROM task_set WHERE set_id = ?1", set_id)?;
    for p in &meta.param {
        exec(conn, &format!("DELETE FROM {} WHERE set_id = ?1", p.param.db_set_table), set_id)?;
    }
    for table in ["workset_parameter_txt", "workset_parameter", "workset_txt", "workset_lst"] {
        exec(conn, &format!("DELETE FROM {table} WHERE set_id = ?1"), set_id)?;
    }
    Ok(())
}

/// Delete a read-write input set with its values.
///
/// # Errors
/// Returns `NotFound` for an unknown set, `Precondition` for a read-only set,
/// or a driver error.
pub fn delete_workset(db: &mut ModelDb, meta: &ModelMeta, set: &SetRef) -> Result<WorksetRow> {
    let row = required(find_workset(db.conn(), meta.model.model_id, set)?, || format!("workset not found: {set}"))?;
    if row.is_readonly {
        return Err(DbcopyError::precondition(format!("workset is read-only: {} {}", row.set_id, row.name)).into());
    }
    let tx = db.transaction()?;
    delete_set_rows(&tx, meta, row.set_id)?;
    tx.commit().context("failed to commit workset delete")?;
    tracing::info!(set_id = row.set_id, name = %row.name, "deleted workset");
    Ok(row)
}

/// Delete a modeling task with its run history.
///
/// # Errors
/// Returns `NotFound` for an unknown task or a driver error.
pub fn delete_task(db: &mut ModelDb, meta: &ModelMeta, task: &TaskRef) -> Result<TaskRow> {
    let row = required(find_task(db.conn(), meta.model.model_id, task)?, || format!("modeling task not found: {task}"))?;
    let tx = db.transaction()?;
    clear_task(&tx, row.task_id)?;
    exec(&tx, "DELETE FROM task_lst WHERE task_id = ?1", row.task_id)?;
    tx.commit().context("failed to commit modeling task delete")?;
    tracing::info!(task_id = row.task_id, name = %row.name, "deleted modeling task");
    Ok(row)
}

fn model_ids(conn: &Connection, sql: &str, model_id: i32) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare(sql).with_context(|| format!("failed to prepare: {sql}"))?;
    let rows = stmt.query_map(params![model_id], |r| r.get(0))
        .with_context(|| format!("failed to query: {sql}"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to decode: {sql}"))?;
    Ok(rows)
}

/// Delete a model: runs, input sets, tasks, text, groups, the model row and
/// every parameter, output table, entity and type not used by another model.
/// Value tables of such artifacts are dropped.
///
/// # Errors
/// Returns a driver error; nothing is deleted in that case.
pub fn delete_model(db: &mut ModelDb, meta: &ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;
    let tx = db.transaction()?;
    let conn: &Connection = &tx;

    for task_id in model_ids(conn, "SELECT task_id FROM task_lst WHERE model_id = ?1", model_id)? {
        clear_task(conn, task_id)?;
    }
    exec(conn, "DELETE FROM task_lst WHERE model_id = ?1", model_id)?;

    let in_runs = "IN (SELECT run_id FROM run_lst WHERE model_id = ?1)";
    let in_sets = "IN (SELECT set_id FROM workset_lst WHERE model_id = ?1)";
    let mut shared_param = Vec::new();
    for p in &meta.param {
        let hid = p.param.param_hid;
        if is_hid_shared(conn, "model_parameter_dic", "parameter_hid", hid, model_id)? {
            exec(conn, &format!("DELETE FROM {} WHERE run_id {in_runs}", p.param.db_run_table), model_id)?;
            exec(conn, &format!("DELETE FROM {} WHERE set_id {in_sets}", p.param.db_set_table), model_id)?;
            shared_param.push(hid);
        } else {
            ddl::drop_param_tables(conn, p)?;
        }
    }
    let mut shared_table = Vec::new();
    for t in &meta.table {
        let hid = t.table.table_hid;
        if is_hid_shared(conn, "model_table_dic", "table_hid", hid, model_id)? {
            exec(conn, &format!("DELETE FROM {} WHERE run_id {in_runs}", t.table.db_expr_table), model_id)?;
            exec(conn, &format!("DELETE FROM {} WHERE run_id {in_runs}", t.table.db_acc_table), model_id)?;
            shared_table.push(hid);
        } else {
            ddl::drop_table_tables(conn, t)?;
        }
    }
    let mut shared_entity = Vec::new();
    for e in &meta.entity {
        let hid = e.entity.entity_hid;
        if is_hid_shared(conn, "model_entity_dic", "entity_hid", hid, model_id)? {
            exec(conn, &format!("DELETE FROM {} WHERE run_id {in_runs}", e.entity.db_entity_table), model_id)?;
            shared_entity.push(hid);
        } else {
            ddl::drop_entity_table(conn, e)?;
        }
    }

    for table in ["workset_parameter_txt", "workset_parameter", "workset_txt"] {
        exec(conn, &format!("DELETE FROM {table} WHERE set_id {in_sets}"), model_id)?;
    }
    exec(conn, "DELETE FROM workset_lst WHERE model_id = ?1", model_id)?;
    for table in [
        "run_parameter_txt",
        "run_parameter",
        "run_table",
        "run_entity",
        "run_progress",
        "run_option",
        "run_txt",
    ] {
        exec(conn, &format!("DELETE FROM {table} WHERE run_id {in_runs}"), model_id)?;
    }
    exec(conn, "DELETE FROM run_lst WHERE model_id = ?1", model_id)?;

    for table in [
        "model_dic_txt",
        "model_word",
        "group_txt",
        "group_pc",
        "group_lst",
        "entity_group_txt",
        "entity_group_pc",
        "entity_group_lst",
        "model_parameter_import",
        "model_parameter_dic",
        "model_table_dic",
        "model_entity_dic",
        "model_type_dic",
    ] {
        exec(conn, &format!("DELETE FROM {table} WHERE model_id = ?1"), model_id)?;
    }

    for p in meta.param.iter().filter(|p| !shared_param.contains(&p.param.param_hid)) {
        for table in ["parameter_dims_txt", "parameter_dims", "parameter_dic_txt", "parameter_dic"] {
            exec(conn, &format!("DELETE FROM {table} WHERE parameter_hid = ?1"), p.param.param_hid)?;
        }
    }
    for t in meta.table.iter().filter(|t| !shared_table.contains(&t.table.table_hid)) {
        for table in [
            "table_dims_txt",
            "table_dims",
            "table_acc_txt",
            "table_acc",
            "table_expr_txt",
            "table_expr",
            "table_dic_txt",
            "table_dic",
        ] {
            exec(conn, &format!("DELETE FROM {table} WHERE table_hid = ?1"), t.table.table_hid)?;
        }
    }
    for e in meta.entity.iter().filter(|e| !shared_entity.contains(&e.entity.entity_hid)) {
        for table in ["entity_attr_txt", "entity_attr", "entity_dic_txt", "entity_dic"] {
            exec(conn, &format!("DELETE FROM {table} WHERE entity_hid = ?1"), e.entity.entity_hid)?;
        }
    }
    for t in &meta.types {
        let hid = t.type_dic.type_hid;
        if is_hid_shared(conn, "model_type_dic", "type_hid", hid, model_id)? {
            continue;
        }
        for table in ["type_enum_txt", "type_enum_lst", "type_dic_txt", "type_dic"] {
            exec(conn, &format!("DELETE FROM {table} WHERE type_hid = ?1"), hid)?;
        }
    }
    exec(conn, "DELETE FROM model_dic WHERE model_id = ?1", model_id)?;

    tx.commit().context("failed to commit model delete")?;
    tracing::info!(model = %meta.model.name, model_id, "deleted model");
    Ok(())
}

/// Rename a completed model run and recompute its metadata digest.
///
/// # Errors
/// Returns `NotFound` for an unknown run, `Precondition` when the run is not
/// completed, or a driver error.
pub fn rename_run(db: &mut ModelDb, meta: &ModelMeta, run: &RunRef, new_name: &str) -> Result<RunRow> {
    let mut row = required(find_run(db.conn(), meta.model.model_id, run)?, || format!("model run not found: {run}"))?;
    if !row.status.is_completed() {
        return Err(DbcopyError::precondition(format!("model run not completed: {} {}", row.run_id, row.name)).into());
    }
    if new_name.is_empty() {
        return Err(DbcopyError::invalid("new model run name is empty").into());
    }

    row.name = cap(new_name, NAME_MAX_LEN);
    row.run_digest = run_meta_digest(&meta.model.digest, &row.name, row.sub_count, &row.create_date_time, &row.run_stamp);
    row.update_date_time = now_date_time();

    let tx = db.transaction()?;
    tx.execute(
        "UPDATE run_lst SET run_name = ?1, run_digest = ?2, update_dt = ?3 WHERE run_id = ?4",
        params![row.name, row.run_digest, row.update_date_time, row.run_id],
    )
    .with_context(|| format!("failed to rename model run {}", row.run_id))?;
    tx.commit().context("failed to commit model run rename")?;
    tracing::info!(run_id = row.run_id, name = %row.name, "renamed model run");
    Ok(row)
}

/// Rename an input set, read-only or not.
///
/// # Errors
/// Returns `NotFound` for an unknown set, `InvalidArgument` when the new name
/// is empty or taken, or a driver error.
pub fn rename_workset(db: &mut ModelDb, meta: &ModelMeta, set: &SetRef, new_name: &str) -> Result<WorksetRow> {
    let model_id = meta.model.model_id;
    let mut row = required(find_workset(db.conn(), model_id, set)?, || format!("workset not found: {set}"))?;
    let name = cap(new_name, NAME_MAX_LEN);
    if name.is_empty() {
        return Err(DbcopyError::invalid("new workset name is empty").into());
    }
    if find_workset(db.conn(), model_id, &SetRef::Name(name.clone()))?.is_some_and(|w| w.set_id != row.set_id) {
        return Err(DbcopyError::invalid(format!("workset already exists: {name}")).into());
    }

    row.name = name;
    row.update_date_time = now_date_time();
    let tx = db.transaction()?;
    tx.execute(
        "UPDATE workset_lst SET set_name = ?1, update_dt = ?2 WHERE set_id = ?3",
        params![row.name, row.update_date_time, row.set_id],
    )
    .with_context(|| format!("failed to rename workset {}", row.set_id))?;
    tx.commit().context("failed to commit workset rename")?;
    tracing::info!(set_id = row.set_id, name = %row.name, "renamed workset");
    Ok(row)
}

/// # Errors
/// Returns `NotFound` for an unknown task, `InvalidArgument` when the new
/// name is empty or taken, or a driver error.
pub fn rename_task(db: &mut ModelDb, meta: &ModelMeta, task: &TaskRef, new_name: &str) -> Result<TaskRow> {
    let model_id = meta.model.model_id;
    let mut row = required(find_task(db.conn(), model_id, task)?, || format!("modeling task not found: {task}"))?;
    let name = cap(new_name, NAME_MAX_LEN);
    if name.is_empty() {
        return Err(DbcopyError::invalid("new modeling task name is empty").into());
    }
    if find_task(db.conn(), model_id, &TaskRef::Name(name.clone()))?.is_some_and(|t| t.task_id != row.task_id) {
        return Err(DbcopyError::invalid(format!("modeling task already exists: {name}")).into());
    }

    row.name = name;
    let tx = db.transaction()?;
    tx.execute("UPDATE task_lst SET task_name = ?1 WHERE task_id = ?2", params![row.name, row.task_id])
        .with_context(|| format!("failed to rename modeling task {}", row.task_id))?;
    tx.commit().context("failed to commit modeling task rename")?;
    tracing::info!(task_id = row.task_id, name = %row.name, "renamed modeling task");
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_db::{list_models, read_model};
    use crate::run_db::{dedup_run_values, list_runs};
    use crate::schema::table_exists;
    use crate::testing::{seed_run, seed_set, seeded_db};
    use crate::values::check_param_rows;
    use crate::workset_db::set_workset_readonly;
    use dbcopy_core::run::RunStatus;
    use dbcopy_core::{classify, ErrorKind};

    #[test]
    fn run_in_progress_is_not_deleted() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "busy", RunStatus::Progress)?;

        let err = match delete_run(&mut db, &meta, &RunRef::Id(run_id)) {
            Ok(_) => panic!("delete of a run in progress must fail"),
            Err(err) => err,
        };
        assert_eq!(classify(err.as_ref()), ErrorKind::Precondition);
        assert!(err.to_string().contains("model run not completed"));
        assert_eq!(list_runs(db.conn(), 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn rename_changes_run_digest_only() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "before", RunStatus::Success)?;
        let old = required(find_run(db.conn(), 1, &RunRef::Id(run_id))?, || "missing".into())?;

        let renamed = rename_run(&mut db, &meta, &RunRef::Id(run_id), "renamed")?;
        let back = required(find_run(db.conn(), 1, &RunRef::Id(run_id))?, || "missing".into())?;
        assert_eq!(back.name, "renamed");
        assert_eq!(back.run_digest, renamed.run_digest);
        assert_ne!(back.run_digest, old.run_digest);
        assert_eq!(back.value_digest, old.value_digest);
        Ok(())
    }

    #[test]
    fn deleting_value_owner_hands_values_to_next_run() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let first = seed_run(&mut db, &meta, "first", RunStatus::Success)?;
        let second = seed_run(&mut db, &meta, "second", RunStatus::Success)?;
        assert!(dedup_run_values(db.conn(), &meta, second)? > 0);

        delete_run(&mut db, &meta, &RunRef::Id(first))?;
        for idx in 0..meta.param.len() {
            check_param_rows(db.conn(), &meta, idx, second, 1)?;
        }
        let base: i32 = db.conn().query_row(
            "SELECT base_run_id FROM run_table WHERE run_id = ?1 AND table_hid = 1",
            params![second],
            |r| r.get(0),
        )?;
        assert_eq!(base, second);
        Ok(())
    }

    #[test]
    fn read_only_workset_is_not_deleted() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let set_id = seed_set(&mut db, &meta, "Default")?;

        let err = match delete_workset(&mut db, &meta, &SetRef::Id(set_id)) {
            Ok(_) => panic!("delete of a read-only workset must fail"),
            Err(err) => err,
        };
        assert_eq!(classify(err.as_ref()), ErrorKind::Precondition);

        set_workset_readonly(db.conn(), set_id, false)?;
        delete_workset(&mut db, &meta, &SetRef::Name("Default".into()))?;
        assert!(find_workset(db.conn(), 1, &SetRef::Id(set_id))?.is_none());
        Ok(())
    }

    #[test]
    fn rename_workset_refuses_taken_name() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        seed_set(&mut db, &meta, "Default")?;
        let other = seed_set(&mut db, &meta, "Other")?;

        assert!(rename_workset(&mut db, &meta, &SetRef::Id(other), "Default").is_err());
        let row = rename_workset(&mut db, &meta, &SetRef::Id(other), "Renamed")?;
        assert_eq!(row.name, "Renamed");
        assert!(row.is_readonly);
        Ok(())
    }

    #[test]
    fn delete_model_drops_value_tables() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        seed_run(&mut db, &meta, "r1", RunStatus::Success)?;
        seed_set(&mut db, &meta, "Default")?;

        delete_model(&mut db, &meta)?;
        assert!(list_models(db.conn())?.is_empty());
        assert!(!table_exists(db.conn(), &meta.param[0].param.db_run_table)?);
        assert!(!table_exists(db.conn(), &meta.table[0].table.db_acc_table)?);
        let types: i64 = db.conn().query_row("SELECT COUNT(*) FROM type_dic", [], |r| r.get(0))?;
        assert_eq!(types, 0);
        Ok(())
    }
}

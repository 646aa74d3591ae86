//! Modeling tasks: the set list and the run history.

use anyhow::{Context, Result};
use dbcopy_core::facet::{cap, DESCR_MAX_LEN, NAME_MAX_LEN, NOTE_MAX_LEN};
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::run::DescrNote;
use dbcopy_core::task::{TaskMeta, TaskRow, TaskRunMeta, TaskRunRow, TaskRunSetRow};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::run_db::status;
use crate::{ids, text_or_empty};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Id(i32),
    Name(String),
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow { task_id: row.get(0)?, model_id: row.get(1)?, name: row.get(2)? })
}

/// # Errors
/// Returns an error when `task_lst` cannot be read.
pub fn list_tasks(conn: &Connection, model_id: i32) -> Result<Vec<TaskRow>> {
    let mut stmt = conn
        .prepare("SELECT task_id, model_id, task_name FROM task_lst WHERE model_id = ?1 ORDER BY task_id")
        .context("failed to prepare task_lst query")?;
    let rows = stmt.query_map(params![model_id], task_row)
        .context("failed to query task_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode task_lst rows")?;
    Ok(rows)
}

/// # Errors
/// Returns an error when `task_lst` cannot be read.
pub fn find_task(conn: &Connection, model_id: i32, task: &TaskRef) -> Result<Option<TaskRow>> {
    let found = match task {
        TaskRef::Id(id) => conn
            .query_row(
                "SELECT task_id, model_id, task_name FROM task_lst WHERE task_id = ?1 AND model_id = ?2",
                params![id, model_id],
                task_row,
            )
            .optional(),
        TaskRef::Name(name) => conn
            .query_row(
                "SELECT task_id, model_id, task_name FROM task_lst WHERE model_id = ?1 AND task_name = ?2",
                params![model_id, name],
                task_row,
            )
            .optional(),
    };
    found.with_context(|| format!("failed to find modeling task {task}"))
}

/// # Errors
/// Returns an error when a task table cannot be read.
pub fn read_task_meta(conn: &Connection, row: TaskRow, lang: &LangMeta) -> Result<TaskMeta> {
    let task_id = row.task_id;

    let mut txt = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT lang_id, descr, note FROM task_txt WHERE task_id = ?1 ORDER BY lang_id")
            .context("failed to prepare task_txt query")?;
        let mut rows = stmt.query(params![task_id]).context("failed to query task_txt")?;
        while let Some(r) = rows.next().context("failed to iterate task_txt")? {
            let (lang_code, ok) = lang.code_by_id(r.get(0)?);
            if ok {
                txt.push(DescrNote { lang_code, descr: r.get(1)?, note: text_or_empty(r, 2)? });
            }
        }
    }

    let set = {
        let mut stmt = conn
            .prepare("SELECT set_id FROM task_set WHERE task_id = ?1 ORDER BY set_id")
            .context("failed to prepare task_set query")?;
        let rows = stmt.query_map(params![task_id], |r| r.get(0))
            .context("failed to query task_set")?
            .collect::<rusqlite::Result<Vec<i32>>>()
            .context("failed to decode task_set rows")?;
        rows
    };

    let mut task_run: Vec<TaskRunMeta> = {
        let mut stmt = conn
            .prepare(
                "SELECT task_run_id, task_id, run_name, sub_count, create_dt, status, update_dt, run_stamp
                 FROM task_run_lst WHERE task_id = ?1 ORDER BY task_run_id",
            )
            .context("failed to prepare task_run_lst query")?;
        let rows = stmt.query_map(params![task_id], |r| {
            Ok(TaskRunMeta {
                run: TaskRunRow {
                    task_run_id: r.get(0)?,
                    task_id: r.get(1)?,
                    name: r.get(2)?,
                    sub_count: r.get(3)?,
                    create_date_time: r.get(4)?,
                    status: status(r, 5)?,
                    update_date_time: r.get(6)?,
                    run_stamp: r.get(7)?,
                },
                task_run_set: Vec::new(),
            })
        })
        .context("failed to query task_run_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode task_run_lst rows")?;
        rows
    };

    let mut stmt = conn
        .prepare("SELECT task_run_id, run_id, set_id FROM task_run_set WHERE task_id = ?1 ORDER BY task_run_id, run_id")
        .context("failed to prepare task_run_set query")?;
    let mut rows = stmt.query(params![task_id]).context("failed to query task_run_set")?;
    while let Some(r) = rows.next().context("failed to iterate task_run_set")? {
        let task_run_id: i32 = r.get(0)?;
        if let Some(tr) = task_run.iter_mut().find(|tr| tr.run.task_run_id == task_run_id) {
            tr.task_run_set.push(TaskRunSetRow { run_id: r.get(1)?, set_id: r.get(2)? });
        }
    }

    Ok(TaskMeta { task: row, txt, set, task_run })
}

/// Delete the set list, history and text of a task, keeping the task row.
pub(crate) fn clear_task(conn: &Connection, task_id: i32) -> Result<()> {
    conn.execute("DELETE FROM task_run_set WHERE task_id = ?1", params![task_id])
        .context("failed to delete task_run_set")?;
    conn.execute("DELETE FROM task_run_lst WHERE task_id = ?1", params![task_id])
        .context("failed to delete task_run_lst")?;
    conn.execute("DELETE FROM task_set WHERE task_id = ?1", params![task_id])
        .context("failed to delete task_set")?;
    conn.execute("DELETE FROM task_txt WHERE task_id = ?1", params![task_id])
        .context("failed to delete task_txt")?;
    Ok(())
}

/// Insert a task, replacing the body and history of a task with the same
/// name. Set and run ids of `task` must already be destination ids. Returns
/// true when a new task was created.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn insert_task(conn: &Connection, meta: &ModelMeta, task: &mut TaskMeta, lang: &LangMeta) -> Result<bool> {
    let model_id = meta.model.model_id;
    task.task.model_id = model_id;
    let name = cap(&task.task.name, NAME_MAX_LEN);

    let existing = find_task(conn, model_id, &TaskRef::Name(name.clone()))?;
    let is_new = existing.is_none();
    let task_id = if let Some(old) = existing {
        clear_task(conn, old.task_id)?;
        old.task_id
    } else {
        let task_id = ids::next_id(conn, ids::TASK_ID)?;
        conn.execute(
            "INSERT INTO task_lst (task_id, model_id, task_name) VALUES (?1, ?2, ?3)",
            params![task_id, model_id, name],
        )
        .with_context(|| format!("failed to insert modeling task {name}"))?;
        task_id
    };
    task.task.task_id = task_id;

    for t in &task.txt {
        let (lang_id, ok) = lang.id_by_code(&t.lang_code);
        if !ok {
            continue;
        }
        let note = cap(&t.note, NOTE_MAX_LEN);
        conn.execute(
            "INSERT INTO task_txt (task_id, lang_id, descr, note) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, lang_id, cap(&t.descr, DESCR_MAX_LEN), (!note.is_empty()).then_some(note)],
        )
        .context("failed to insert task_txt")?;
    }
    for set_id in &task.set {
        conn.execute("INSERT OR IGNORE INTO task_set (task_id, set_id) VALUES (?1, ?2)", params![task_id, set_id])
            .with_context(|| format!("failed to insert task_set {set_id}"))?;
    }

    for tr in &mut task.task_run {
        let task_run_id = ids::next_id(conn, ids::TASK_RUN_ID)?;
        tr.run.task_run_id = task_run_id;
        tr.run.task_id = task_id;
        let r = &tr.run;
        conn.execute(
            "INSERT INTO task_run_lst
               (task_run_id, task_id, run_name, sub_count, create_dt, status, update_dt, run_stamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task_run_id,
                task_id,
                cap(&r.name, NAME_MAX_LEN),
                r.sub_count,
                r.create_date_time,
                r.status.as_str(),
                r.update_date_time,
                r.run_stamp
            ],
        )
        .with_context(|| format!("failed to insert task run {}", r.name))?;
        for trs in &tr.task_run_set {
            conn.execute(
                "INSERT OR IGNORE INTO task_run_set (task_run_id, run_id, set_id, task_id) VALUES (?1, ?2, ?3, ?4)",
                params![task_run_id, trs.run_id, trs.set_id, task_id],
            )
            .context("failed to insert task_run_set")?;
        }
    }
    Ok(is_new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_run, seed_set, seeded_db};
    use dbcopy_core::run::RunStatus;

    #[test]
    fn task_with_history_reads_back() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;
        let run_id = seed_run(&mut db, &meta, "r1", RunStatus::Success)?;
        let set_id = seed_set(&mut db, &meta, "Default")?;

        let mut task = TaskMeta {
            task: TaskRow { task_id: 0, model_id: 0, name: "taskOne".into() },
            txt: vec![DescrNote { lang_code: "EN".into(), descr: "Task one".into(), note: String::new() }],
            set: vec![set_id],
            task_run: vec![TaskRunMeta {
                run: TaskRunRow {
                    name: "first".into(),
                    sub_count: 1,
                    create_date_time: "2024-03-01 11:00:00.000".into(),
                    status: RunStatus::Success,
                    update_date_time: "2024-03-01 11:00:05.000".into(),
                    run_stamp: "2024_03_01_11_00_00_000".into(),
                    ..TaskRunRow::default()
                },
                task_run_set: vec![TaskRunSetRow { run_id, set_id }],
            }],
        };
        let tx = db.transaction()?;
        assert!(insert_task(&tx, &meta, &mut task, &lang)?);
        // same name again replaces the history instead of appending to it
        assert!(!insert_task(&tx, &meta, &mut task.clone(), &lang)?);
        tx.commit()?;

        let row = match find_task(db.conn(), 1, &TaskRef::Name("taskOne".into()))? {
            Some(row) => row,
            None => panic!("task not found"),
        };
        let back = read_task_meta(db.conn(), row, &lang)?;
        assert_eq!(back.set, vec![set_id]);
        assert_eq!(back.task_run.len(), 1);
        assert_eq!(back.task_run[0].task_run_set, vec![TaskRunSetRow { run_id, set_id }]);
        assert_eq!(back.txt[0].descr, "Task one");
        assert_eq!(list_tasks(db.conn(), 1)?.len(), 1);
        Ok(())
    }
}

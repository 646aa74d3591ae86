//! Delete or rename one model, run, set or task in place.

use anyhow::Result;
use dbcopy_core::progress::Context;
use dbcopy_store_sqlite::edit::{
    delete_model, delete_run, delete_task, delete_workset, rename_run, rename_task, rename_workset,
};
use dbcopy_store_sqlite::model_db::{read_model, require_model};
use dbcopy_store_sqlite::ModelDb;

use crate::config::{Artifact, Config};

fn open(cfg: &Config) -> Result<(ModelDb, dbcopy_core::ModelMeta)> {
    let db = ModelDb::open(&cfg.database, &cfg.database_driver, false)?;
    let row = require_model(db.conn(), &cfg.model_name, &cfg.model_digest)?;
    let meta = read_model(db.conn(), row.model_id)?;
    Ok((db, meta))
}

/// Delete the selected artifact, or the whole model when none is selected.
///
/// # Errors
/// Returns `NotFound` for a missing model or artifact and `Precondition`
/// for a run that is not completed or a set that is read-only.
pub fn delete(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    let (mut db, meta) = open(cfg)?;
    match &cfg.artifact {
        Artifact::Model => {
            delete_model(&mut db, &meta)?;
            ctx.info(&format!("Deleted model {} {}", meta.model.name, meta.model.digest));
        }
        Artifact::Run(r) => {
            let row = delete_run(&mut db, &meta, r)?;
            ctx.info(&format!("Deleted model run {} {}", row.run_id, row.name));
        }
        Artifact::Set(s) => {
            let row = delete_workset(&mut db, &meta, s)?;
            ctx.info(&format!("Deleted workset {} {}", row.set_id, row.name));
        }
        Artifact::Task(t) => {
            let row = delete_task(&mut db, &meta, t)?;
            ctx.info(&format!("Deleted modeling task {} {}", row.task_id, row.name));
        }
    }
    Ok(())
}

/// Rename the selected run, set or task.
///
/// # Errors
/// Returns `InvalidArgument` when no artifact is selected, `NotFound` for a
/// missing one and `Precondition` for a run that is not completed.
pub fn rename(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    let (mut db, meta) = open(cfg)?;
    let new_name = cfg.new_name.as_str();
    match &cfg.artifact {
        Artifact::Model => {
            return Err(dbcopy_core::DbcopyError::invalid("rename requires a model run, workset or modeling task").into())
        }
        Artifact::Run(r) => {
            let row = rename_run(&mut db, &meta, r, new_name)?;
            ctx.info(&format!("Renamed model run {} to {}", row.run_id, row.name));
        }
        Artifact::Set(s) => {
            let row = rename_workset(&mut db, &meta, s, new_name)?;
            ctx.info(&format!("Renamed workset {} to {}", row.set_id, row.name));
        }
        Artifact::Task(t) => {
            let row = rename_task(&mut db, &meta, t, new_name)?;
            ctx.info(&format!("Renamed modeling task {} to {}", row.task_id, row.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::RunStatus;
    use dbcopy_store_sqlite::run_db::find_run;
    use dbcopy_store_sqlite::testing::{seed_model, seed_run};
    use dbcopy_store_sqlite::RunRef;

    fn file_db(dir: &std::path::Path) -> Result<(String, i32)> {
        let path = dir.join("m.sqlite").display().to_string();
        let mut db = ModelDb::open(&path, "SQLite", true)?;
        seed_model(&mut db)?;
        let meta = read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "first", RunStatus::Success)?;
        Ok((path, run_id))
    }

    fn config(database: String, run_id: i32, rename: Option<&str>) -> Result<Config> {
        let args = crate::config::Args {
            model_name: Some(dbcopy_core::testing::MODEL_NAME.to_string()),
            database: Some(database),
            run_id: Some(run_id),
            delete: rename.is_none(),
            rename: rename.is_some(),
            to_run_name: rename.map(str::to_string),
            ..crate::config::Args::default()
        };
        Config::resolve(&args, &MemoryProgress::default())
    }

    #[test]
    fn rename_reports_new_name() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (path, run_id) = file_db(tmp.path())?;
        let cfg = config(path.clone(), run_id, Some("renamed"))?;
        let progress = MemoryProgress::default();
        rename(&cfg, &Context::new(&progress))?;

        let db = ModelDb::open(&path, "SQLite", false)?;
        let row = find_run(db.conn(), 1, &RunRef::Id(run_id))?;
        assert_eq!(row.map(|r| r.name), Some("renamed".to_string()));
        assert!(progress.infos().iter().any(|m| m.contains("renamed")));
        Ok(())
    }

    #[test]
    fn delete_run_removes_it() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (path, run_id) = file_db(tmp.path())?;
        let progress = MemoryProgress::default();
        delete(&config(path.clone(), run_id, None)?, &Context::new(&progress))?;

        let db = ModelDb::open(&path, "SQLite", false)?;
        assert!(find_run(db.conn(), 1, &RunRef::Id(run_id))?.is_none());
        Ok(())
    }
}

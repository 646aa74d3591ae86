use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Result;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::testing::MODEL_NAME;
use dbcopy_core::RunStatus;
use dbcopy_store_sqlite::model_db::{read_model, require_model};
use dbcopy_store_sqlite::run_db::{find_run, list_runs};
use dbcopy_store_sqlite::testing::{seed_model, seed_run, seed_set};
use dbcopy_store_sqlite::workset_db::list_worksets;
use dbcopy_store_sqlite::{ModelDb, RunRef};

fn run_dbcopy<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_dbcopy"))
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute dbcopy binary: {err}"))
}

fn run_ok<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_dbcopy(args);
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        panic!("dbcopy failed (status={}):\nstderr:\n{stderr}", output.status);
    }
    stderr
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

struct Seeded {
    path: String,
    meta: ModelMeta,
    run_id: i32,
}

fn seed_db(dir: &Path, file: &str) -> Result<Seeded> {
    let path = path_arg(&dir.join(file));
    let mut db = ModelDb::open(&path, "SQLite", true)?;
    seed_model(&mut db)?;
    let model = require_model(db.conn(), MODEL_NAME, "")?;
    let meta = read_model(db.conn(), model.model_id)?;
    let run_id = seed_run(&mut db, &meta, "Default", RunStatus::Success)?;
    seed_set(&mut db, &meta, "Default_set")?;
    Ok(Seeded { path, meta, run_id })
}

fn open_model(path: &str) -> Result<(ModelDb, i32)> {
    let db = ModelDb::open(path, "SQLite", false)?;
    let model_id = require_model(db.conn(), MODEL_NAME, "")?.model_id;
    Ok((db, model_id))
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, name) {
                return Some(found);
            }
        } else if path.file_name().is_some_and(|n| n == name) {
            return Some(path);
        }
    }
    None
}

#[test]
fn text_round_trip_keeps_run_digests() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "src.sqlite")?;
    let out = tmp.path().join("out");
    let dst = path_arg(&tmp.path().join("dst.sqlite"));

    run_ok(["--modelName", MODEL_NAME, "--database", &src.path, "--outputDir", &path_arg(&out)]);
    assert!(out.join(format!("{MODEL_NAME}.model.json")).is_file());

    let stderr = run_ok([
        "--modelName",
        MODEL_NAME,
        "--to",
        "db",
        "--inputDir",
        &path_arg(&out),
        "--toDatabase",
        &dst,
    ]);
    assert!(stderr.contains("Model run"));

    let (src_db, src_model) = open_model(&src.path)?;
    let (dst_db, dst_model) = open_model(&dst)?;
    let src_runs = list_runs(src_db.conn(), src_model)?;
    let dst_runs = list_runs(dst_db.conn(), dst_model)?;
    assert_eq!(src_runs.len(), dst_runs.len());
    for (a, b) in src_runs.iter().zip(&dst_runs) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.run_digest, b.run_digest);
        assert_eq!(a.value_digest, b.value_digest);
    }
    assert_eq!(list_worksets(dst_db.conn(), dst_model)?.len(), 1);
    Ok(())
}

#[test]
fn zipped_text_round_trip() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "src.sqlite")?;
    let out = tmp.path().join(MODEL_NAME);
    let dst = path_arg(&tmp.path().join("dst.sqlite"));

    run_ok(["--modelName", MODEL_NAME, "--database", &src.path, "--outputDir", &path_arg(&out), "--zip"]);
    assert!(tmp.path().join(format!("{MODEL_NAME}.zip")).is_file());
    fs::remove_dir_all(&out)?;

    run_ok([
        "--modelName",
        MODEL_NAME,
        "--to",
        "db",
        "--inputDir",
        &path_arg(&out),
        "--toDatabase",
        &dst,
        "--zip",
    ]);
    let (db, model_id) = open_model(&dst)?;
    assert_eq!(list_runs(db.conn(), model_id)?.len(), 1);
    Ok(())
}

#[test]
fn rename_run_changes_name_and_digest_only() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "m.sqlite")?;
    let (db, model_id) = open_model(&src.path)?;
    let before = find_run(db.conn(), model_id, &RunRef::Id(src.run_id))?;
    drop(db);

    run_ok([
        "--modelName",
        MODEL_NAME,
        "--database",
        &src.path,
        "--rename",
        "--runId",
        &src.run_id.to_string(),
        "--toRunName",
        "Renamed",
    ]);

    let (db, model_id) = open_model(&src.path)?;
    let after = find_run(db.conn(), model_id, &RunRef::Id(src.run_id))?;
    match (before, after) {
        (Some(before), Some(after)) => {
            assert_eq!(after.name, "Renamed");
            assert_ne!(after.run_digest, before.run_digest);
            assert_eq!(after.value_digest, before.value_digest);
        }
        _ => panic!("run {} missing", src.run_id),
    }
    Ok(())
}

#[test]
fn delete_of_running_run_is_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "m.sqlite")?;
    let mut db = ModelDb::open(&src.path, "SQLite", false)?;
    let busy = seed_run(&mut db, &src.meta, "busy", RunStatus::Progress)?;
    drop(db);

    let output = run_dbcopy(["--modelName", MODEL_NAME, "--database", &src.path, "--delete", "--runId", &busy.to_string()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("model run not completed"));

    let (db, model_id) = open_model(&src.path)?;
    assert!(find_run(db.conn(), model_id, &RunRef::Id(busy))?.is_some());
    Ok(())
}

#[test]
fn db2db_into_same_database_is_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "m.sqlite")?;
    let output = run_dbcopy([
        "--modelName",
        MODEL_NAME,
        "--to",
        "db2db",
        "--database",
        &src.path,
        "--toDatabase",
        &format!("Database={}; Timeout=5", src.path),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("same database"));
    Ok(())
}

#[test]
fn db2db_copies_run_with_its_digest() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "src.sqlite")?;
    let dst = path_arg(&tmp.path().join("dst.sqlite"));
    run_ok(["--modelName", MODEL_NAME, "--to", "db2db", "--database", &src.path, "--toDatabase", &dst, "--firstRun"]);

    let (src_db, src_model) = open_model(&src.path)?;
    let (dst_db, dst_model) = open_model(&dst)?;
    let src_runs = list_runs(src_db.conn(), src_model)?;
    let dst_runs = list_runs(dst_db.conn(), dst_model)?;
    assert_eq!(dst_runs.len(), 1);
    assert_eq!(src_runs[0].run_digest, dst_runs[0].run_digest);
    assert!(list_worksets(dst_db.conn(), dst_model)?.is_empty());
    Ok(())
}

#[test]
fn db2db_task_drops_history_of_runs_not_copied() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "src.sqlite")?;
    let dst = path_arg(&tmp.path().join("dst.sqlite"));

    let mut db = ModelDb::open(&src.path, "SQLite", false)?;
    let busy = seed_run(&mut db, &src.meta, "busy", RunStatus::Progress)?;
    let set_id = match list_worksets(db.conn(), src.meta.model.model_id)?.first() {
        Some(s) => s.set_id,
        None => panic!("seeded workset not found"),
    };
    let dt = "2024-03-01 10:20:30.123";
    db.conn().execute_batch("PRAGMA foreign_keys = OFF")?;
    db.conn().execute(
        "INSERT INTO task_lst (task_id, model_id, task_name) VALUES (1000, ?1, 'taskOne')",
        [src.meta.model.model_id],
    )?;
    db.conn().execute("INSERT INTO task_set (task_id, set_id) VALUES (1000, ?1)", [set_id])?;
    db.conn().execute(
        "INSERT INTO task_run_lst (task_run_id, task_id, run_name, sub_count, create_dt, status, update_dt, run_stamp)
         VALUES (1001, 1000, 'taskOne_run', 1, ?1, 's', ?1, '2024_03_01_10_20_30_123')",
        [dt],
    )?;
    for run_id in [src.run_id, busy, 9999] {
        db.conn().execute(
            "INSERT INTO task_run_set (task_run_id, run_id, set_id, task_id) VALUES (1001, ?1, ?2, 1000)",
            [run_id, set_id],
        )?;
    }
    drop(db);

    let stderr = run_ok([
        "--modelName",
        MODEL_NAME,
        "--to",
        "db2db",
        "--database",
        &src.path,
        "--toDatabase",
        &dst,
        "--taskName",
        "taskOne",
    ]);
    assert!(stderr.contains("Warning: task taskOne model run(s) not found"), "stderr:\n{stderr}");
    assert!(stderr.contains("Warning: task taskOne model run(s) not completed"), "stderr:\n{stderr}");

    let (dst_db, dst_model) = open_model(&dst)?;
    let dst_runs = list_runs(dst_db.conn(), dst_model)?;
    assert_eq!(dst_runs.len(), 1);
    let history: Vec<i32> = {
        let mut stmt = dst_db.conn().prepare("SELECT run_id FROM task_run_set ORDER BY run_id")?;
        let rows = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };
    assert_eq!(history, vec![dst_runs[0].run_id]);
    Ok(())
}

#[test]
fn csv_skips_zero_and_null_values() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "m.sqlite")?;
    let table = &src.meta.table[0].table;
    let db = ModelDb::open(&src.path, "SQLite", false)?;
    db.conn().execute(
        &format!(
            "UPDATE {} SET expr_value = CASE WHEN expr_id = 0 THEN 0 ELSE NULL END WHERE run_id = ?1",
            table.db_expr_table
        ),
        [src.run_id],
    )?;
    drop(db);

    let out = tmp.path().join("csv");
    run_ok([
        "--modelName",
        MODEL_NAME,
        "--to",
        "csv",
        "--database",
        &src.path,
        "--outputDir",
        &path_arg(&out),
        "--noZeroCsv",
        "--noNullCsv",
    ]);
    assert!(out.join("model_dic.csv").is_file());
    assert!(out.join("run_lst.csv").is_file());

    let expr = match find_file(&out, &format!("{}.csv", table.name)) {
        Some(path) => path,
        None => panic!("output table {} not written", table.name),
    };
    let body = fs::read_to_string(expr)?;
    assert_eq!(body.lines().count(), 1, "only the header expected:\n{body}");
    Ok(())
}

#[test]
fn ini_file_supplies_missing_options() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = seed_db(tmp.path(), "m.sqlite")?;
    let out = tmp.path().join("all");
    let ini = tmp.path().join("dbcopy.ini");
    fs::write(
        &ini,
        format!(
            "[dbcopy]\nModelName = {MODEL_NAME}\nDatabase = {}\nTo = csv-all\nOutputDir = {}\n",
            src.path,
            path_arg(&out)
        ),
    )?;

    run_ok(["--ini", &path_arg(&ini)]);
    let param = &src.meta.param[0].param.name;
    let all = fs::read_to_string(out.join("all_model_runs").join(format!("{param}.csv")))?;
    assert!(all.starts_with("run_name,sub_id"));
    assert!(all.lines().skip(1).all(|l| l.starts_with("Default,")));
    Ok(())
}

#[test]
fn invalid_options_exit_with_error() {
    let output = run_dbcopy(["--modelName", MODEL_NAME, "--delete", "--rename"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot be combined"));
}

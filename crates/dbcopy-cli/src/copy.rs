//! Pieces shared by every copy direction: value feeds, model documents, the
//! insert side of run, workset and task copies, and the walk over a task.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use dbcopy_core::cell::{Cell, CellConverter, CellKind};
use dbcopy_core::csv::open_csv_file;
use dbcopy_core::lang::{LangMeta, ModelWordMeta};
use dbcopy_core::layout::{MICRODATA_DIR, OUTPUT_TABLES_DIR, PARAMETERS_DIR};
use dbcopy_core::model::{GroupMeta, ModelMeta};
use dbcopy_core::model_txt::{GroupTxtMeta, ModelTxtMeta, ProfileMeta};
use dbcopy_core::progress::{Context, Periodic};
use dbcopy_core::run::RunRow;
use dbcopy_core::workset::WorksetRow;
use dbcopy_core::{DbcopyError, RunPub, TaskMeta, TaskPub, WorksetPub};
use dbcopy_store_sqlite::lang_db::{read_lang, read_model_words, read_profiles, write_lang, write_model_words, write_profiles};
use dbcopy_store_sqlite::model_db::insert_model;
use dbcopy_store_sqlite::model_txt_db::{read_model_txt, write_model_txt};
use dbcopy_store_sqlite::run_db::{dedup_run_values, find_run, insert_run_meta, list_runs, run_ids_by_digest, task_run_refs};
use dbcopy_store_sqlite::task_db::{find_task, insert_task, list_tasks, read_task_meta};
use dbcopy_store_sqlite::values::{check_param_rows, fill_run_digests, read_values, ValueSource, ValueWriter};
use dbcopy_store_sqlite::workset_db::{find_workset, list_worksets, replace_workset, set_ids_by_name, set_names, set_workset_readonly};
use dbcopy_store_sqlite::ModelDb;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::Artifact;

/// Source of parameter, output table and microdata values of one run or set.
pub trait ValueFeed {
    /// Stream id-form cells of a parameter (`Param`), an output table (`Expr`
    /// or `Acc`) or an entity (`Micro`) named as in the destination model.
    /// Returns `None` when the source has no such values.
    fn values(&mut self, kind: CellKind, name: &str, visit: &mut dyn FnMut(Cell) -> Result<()>) -> Result<Option<usize>>;
}

/// Values read from a source database.
pub struct DbFeed<'a> {
    pub conn: &'a Connection,
    pub meta: &'a ModelMeta,
    pub src: ValueSource,
    pub ctx: &'a Context<'a>,
}

impl ValueFeed for DbFeed<'_> {
    fn values(&mut self, kind: CellKind, name: &str, visit: &mut dyn FnMut(Cell) -> Result<()>) -> Result<Option<usize>> {
        let idx = match kind {
            CellKind::Param => self.meta.param_by_name(name),
            CellKind::Micro => self.meta.entity_by_name(name),
            CellKind::Expr | CellKind::Acc | CellKind::AllAcc => self.meta.out_table_by_name(name),
        };
        let Some(idx) = idx else {
            return Ok(None);
        };
        read_values(self.conn, self.meta, kind, idx, self.src, self.ctx, |cell| visit(cell))
    }
}

/// Values read from CSV or TSV files of a run or set directory, in code or
/// id form, whichever file exists.
pub struct CsvFeed<'a> {
    meta: &'a ModelMeta,
    param_dir: PathBuf,
    table_dir: PathBuf,
    micro_dir: PathBuf,
    code_page: &'a str,
    ctx: &'a Context<'a>,
}

impl<'a> CsvFeed<'a> {
    #[must_use]
    pub fn run(meta: &'a ModelMeta, run_dir: &Path, code_page: &'a str, ctx: &'a Context<'a>) -> Self {
        Self {
            meta,
            param_dir: run_dir.join(PARAMETERS_DIR),
            table_dir: run_dir.join(OUTPUT_TABLES_DIR),
            micro_dir: run_dir.join(MICRODATA_DIR),
            code_page,
            ctx,
        }
    }

    #[must_use]
    pub fn set(meta: &'a ModelMeta, set_dir: &Path, code_page: &'a str, ctx: &'a Context<'a>) -> Self {
        Self {
            meta,
            param_dir: set_dir.to_path_buf(),
            table_dir: set_dir.to_path_buf(),
            micro_dir: set_dir.to_path_buf(),
            code_page,
            ctx,
        }
    }
}

impl ValueFeed for CsvFeed<'_> {
    fn values(&mut self, kind: CellKind, name: &str, visit: &mut dyn FnMut(Cell) -> Result<()>) -> Result<Option<usize>> {
        let (dir, conv) = match kind {
            CellKind::Param => (&self.param_dir, CellConverter::param(self.meta, name)?),
            CellKind::Expr => (&self.table_dir, CellConverter::expr(self.meta, name)?),
            CellKind::Acc => (&self.table_dir, CellConverter::acc(self.meta, name)?),
            CellKind::AllAcc => (&self.table_dir, CellConverter::all_acc(self.meta, name)?),
            CellKind::Micro => (&self.micro_dir, CellConverter::micro(self.meta, name)?),
        };
        let found = [(false, false), (false, true), (true, false), (true, true)].into_iter().find_map(|(is_id, is_tsv)| {
            let c = conv.clone().with_id_csv(is_id);
            let path = dir.join(c.csv_file_name(is_tsv));
            path.is_file().then_some((path, c))
        });
        let Some((path, conv)) = found else {
            return Ok(None);
        };

        let mut rows = open_csv_file(&path, self.code_page)?;
        if rows.next().transpose()?.is_none() {
            return Ok(Some(0));
        }
        let mut n = 0;
        for row in rows {
            self.ctx.check_cancel()?;
            let row = row?;
            if row.iter().all(String::is_empty) {
                continue;
            }
            let cell = conv.to_cell(&row).with_context(|| format!("invalid row {} of {}", n + 2, path.display()))?;
            visit(cell)?;
            n += 1;
        }
        Ok(Some(n))
    }
}

/// Content of `{model}.group.json`: group forests and their text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GroupDoc {
    #[serde(flatten)]
    pub groups: GroupMeta,
    #[serde(flatten)]
    pub txt: GroupTxtMeta,
}

/// Model-level documents: everything copied before runs, sets and tasks.
#[derive(Debug, Clone)]
pub struct ModelDocs {
    pub meta: ModelMeta,
    pub txt: ModelTxtMeta,
    pub lang: LangMeta,
    pub words: ModelWordMeta,
    pub profiles: Vec<ProfileMeta>,
}

impl ModelDocs {
    /// # Errors
    /// Returns an error when a metadata table cannot be read.
    pub fn read_db(conn: &Connection, meta: ModelMeta) -> Result<Self> {
        let lang = read_lang(conn)?;
        let txt = read_model_txt(conn, &meta, &lang)?;
        let words = read_model_words(conn, &meta.model, &lang)?;
        let profiles = read_profiles(conn)?;
        Ok(Self { meta, txt, lang, words, profiles })
    }
}

/// Make sure the destination has the model: merge languages, insert the
/// model with its text and words when it is new, and merge profiles.
/// Returns the model and languages as stored in the destination.
///
/// # Errors
/// Returns an error when a row cannot be written; nothing is written then.
pub fn install_model(dst: &mut ModelDb, docs: &ModelDocs, ctx: &Context<'_>) -> Result<(ModelMeta, LangMeta)> {
    let facet = dst.facet();
    let tx = dst.transaction()?;
    let lang = write_lang(&tx, &docs.lang)?;
    let mut meta = docs.meta.clone_model()?;
    if insert_model(&tx, facet, &mut meta, &lang)? {
        let mut txt = docs.txt.clone();
        txt.set_model_id(meta.model.model_id);
        let rows = write_model_txt(&tx, &meta, &txt, &lang)?;
        let words = write_model_words(&tx, meta.model.model_id, &docs.words, &lang)?;
        ctx.info(&format!("Model {} {}", meta.model.name, meta.model.digest));
        tracing::debug!(model_id = meta.model.model_id, rows, words, "inserted model text");
    } else {
        ctx.info(&format!("Model {} {} already exists", meta.model.name, meta.model.digest));
    }
    write_profiles(&tx, &docs.profiles)?;
    tx.commit().context("failed to commit model metadata")?;
    Ok((meta, lang))
}

fn not_in_model(what: &str, hid: i32, meta: &ModelMeta) -> anyhow::Error {
    DbcopyError::not_found(format!("{what} {hid} not found in model {}", meta.model.name)).into()
}

/// Insert a completed run and its values. Returns the destination run id;
/// a run with the same run digest already in the destination is kept as is.
///
/// # Errors
/// Returns `Precondition` for a run that is not completed, `IntegrityMismatch`
/// when parameter values are missing, or the first failure of the insert, in
/// which case nothing of the run is written.
pub fn import_run(
    dst: &mut ModelDb,
    meta: &ModelMeta,
    lang: &LangMeta,
    run_pub: &RunPub,
    feed: &mut dyn ValueFeed,
    check_digest: bool,
    ctx: &Context<'_>,
) -> Result<i32> {
    let mut run = run_pub.from_public(meta, check_digest)?;
    if !run.is_completed() {
        return Err(DbcopyError::precondition(format!("model run not completed: {}", run.run.name)).into());
    }

    for rp in &run.param {
        meta.param_by_hid(rp.param_hid).ok_or_else(|| not_in_model("parameter", rp.param_hid, meta))?;
    }
    let mut params = Vec::with_capacity(meta.param.len());
    for (idx, pm) in meta.param.iter().enumerate() {
        let Some(rp) = run.param.iter().find(|rp| rp.param_hid == pm.param.param_hid) else {
            return Err(DbcopyError::integrity(format!(
                "parameter {} not found in model run {}",
                pm.param.name, run.run.name
            ))
            .into());
        };
        params.push((idx, rp.sub_count));
    }

    let tx = dst.transaction()?;
    if !insert_run_meta(&tx, meta, &mut run, lang)? {
        ctx.info(&format!("Model run {} {} already exists", run.run.run_id, run.run.name));
        return Ok(run.run.run_id);
    }
    let run_id = run.run.run_id;
    ctx.info(&format!("Model run {run_id} {}", run.run.name));

    let total = params.len() + run.table.len() + run.entity.len();
    let mut periodic = Periodic::new();
    let mut n = 0;

    for (idx, sub_count) in params {
        let name = &meta.param[idx].param.name;
        n += 1;
        periodic.tick(ctx.progress, n, total, name);

        let mut w = ValueWriter::param(&tx, meta, idx, ValueSource::Run(run_id));
        if feed.values(CellKind::Param, name, &mut |cell| w.write(&cell))?.is_none() {
            return Err(DbcopyError::integrity(format!(
                "values of parameter {name} not found, model run {}",
                run.run.name
            ))
            .into());
        }
        check_param_rows(&tx, meta, idx, run_id, sub_count)?;
    }

    for rt in &run.table {
        let idx = meta.out_table_by_hid(rt.table_hid).ok_or_else(|| not_in_model("output table", rt.table_hid, meta))?;
        let name = &meta.table[idx].table.name;
        n += 1;
        periodic.tick(ctx.progress, n, total, name);

        let mut w = ValueWriter::table(&tx, meta, idx, run_id);
        let expr = feed.values(CellKind::Expr, name, &mut |cell| w.write(&cell))?;
        let acc = feed.values(CellKind::Acc, name, &mut |cell| w.write(&cell))?;
        if expr.is_none() && acc.is_none() {
            tracing::debug!(run_id, table = %name, "output table has no values");
        }
    }

    for re in &run.entity {
        let idx = meta.entity_by_hid(re.entity_hid).ok_or_else(|| not_in_model("entity", re.entity_hid, meta))?;
        let name = &meta.entity[idx].entity.name;
        n += 1;
        periodic.tick(ctx.progress, n, total, name);

        let mut w = ValueWriter::micro(&tx, meta, idx, run_id);
        feed.values(CellKind::Micro, name, &mut |cell| w.write(&cell))?;
    }

    let value_digest = fill_run_digests(&tx, meta, run_id, ctx)?;
    let shared = dedup_run_values(&tx, meta, run_id)?;
    tx.commit().context("failed to commit model run")?;
    tracing::debug!(run_id, shared, value_digest = %value_digest, "inserted model run");
    Ok(run_id)
}

/// Insert or replace a workset with its parameter values and restore its
/// read-only flag. Returns the destination set id.
///
/// # Errors
/// Returns `IntegrityMismatch` when parameter values are missing, or the
/// first failure of the insert, in which case nothing of the set is written.
pub fn import_workset(
    dst: &mut ModelDb,
    meta: &ModelMeta,
    lang: &LangMeta,
    set_pub: &WorksetPub,
    feed: &mut dyn ValueFeed,
    check_digest: bool,
    ctx: &Context<'_>,
) -> Result<i32> {
    let run_ids = run_ids_by_digest(dst.conn(), meta.model.model_id)?;
    let mut ws = set_pub.from_public(meta, check_digest, |digest| Ok(run_ids.get(digest).copied()), ctx.progress)?;

    let tx = dst.transaction()?;
    replace_workset(&tx, meta, &mut ws, lang)?;
    let set_id = ws.set.set_id;
    ctx.info(&format!("Workset {set_id} {}", ws.set.name));

    let mut periodic = Periodic::new();
    for (n, wp) in ws.param.iter().enumerate() {
        let idx = meta.param_by_hid(wp.param_hid).ok_or_else(|| not_in_model("parameter", wp.param_hid, meta))?;
        let name = &meta.param[idx].param.name;
        periodic.tick(ctx.progress, n + 1, ws.param.len(), name);

        let mut w = ValueWriter::param(&tx, meta, idx, ValueSource::Set(set_id));
        if feed.values(CellKind::Param, name, &mut |cell| w.write(&cell))?.is_none() {
            return Err(DbcopyError::integrity(format!(
                "values of parameter {name} not found, workset {}",
                ws.set.name
            ))
            .into());
        }
    }

    set_workset_readonly(&tx, set_id, set_pub.is_readonly)?;
    tx.commit().context("failed to commit workset")?;
    Ok(set_id)
}

/// Insert or replace a modeling task. Sets and runs are resolved by name and
/// digest in the destination; what cannot be resolved is dropped with a
/// warning. Returns the destination task id.
///
/// # Errors
/// Returns an error when the task does not belong to the model or cannot be written.
pub fn import_task(
    dst: &mut ModelDb,
    meta: &ModelMeta,
    lang: &LangMeta,
    task_pub: &TaskPub,
    check_digest: bool,
    ctx: &Context<'_>,
) -> Result<i32> {
    let model_id = meta.model.model_id;
    let set_ids = set_ids_by_name(dst.conn(), model_id)?;
    let run_ids = run_ids_by_digest(dst.conn(), model_id)?;
    let import = task_pub.from_public(meta, check_digest, &set_ids, &run_ids)?;
    if import.is_set_not_found {
        ctx.warn(&format!("Warning: task {} workset(s) not found", task_pub.name));
    }
    if import.is_task_run_not_found {
        ctx.warn(&format!("Warning: task {} model run(s) not found", task_pub.name));
    }

    let mut task = import.meta;
    let tx = dst.transaction()?;
    insert_task(&tx, meta, &mut task, lang)?;
    tx.commit().context("failed to commit modeling task")?;
    ctx.info(&format!("Modeling task {} {}", task.task.task_id, task.task.name));
    Ok(task.task.task_id)
}

#[derive(Debug, Default)]
struct Dropped {
    set_not_found: bool,
    set_not_readonly: bool,
    run_not_found: bool,
    run_not_completed: bool,
}

fn set_usable(sets: &BTreeMap<i32, WorksetRow>, set_id: i32, dropped: &mut Dropped) -> bool {
    match sets.get(&set_id) {
        None => {
            dropped.set_not_found = true;
            false
        }
        Some(s) if !s.is_readonly => {
            dropped.set_not_readonly = true;
            false
        }
        Some(_) => true,
    }
}

fn run_usable(runs: &BTreeMap<i32, RunRow>, run_id: i32, dropped: &mut Dropped) -> bool {
    match runs.get(&run_id) {
        None => {
            dropped.run_not_found = true;
            false
        }
        Some(r) if !r.status.is_completed() => {
            dropped.run_not_completed = true;
            false
        }
        Some(_) => true,
    }
}

/// A task reduced to what can be copied from its source database.
#[derive(Debug, Clone)]
pub struct TaskWalk {
    /// Read-only sets of the task body and history, ascending.
    pub set_ids: Vec<i32>,
    /// Completed runs of the task history, ascending.
    pub run_ids: Vec<i32>,
    pub task: TaskPub,
}

/// Walk the body sets and history (run, set) pairs of a task. Missing sets,
/// read-write sets, missing runs and runs not completed are dropped with a
/// warning each; the rest of the task is kept.
///
/// # Errors
/// Returns an error when the source lists cannot be read.
pub fn walk_task(conn: &Connection, meta: &ModelMeta, task: &TaskMeta, ctx: &Context<'_>) -> Result<TaskWalk> {
    let model_id = meta.model.model_id;
    let sets: BTreeMap<i32, WorksetRow> = list_worksets(conn, model_id)?.into_iter().map(|s| (s.set_id, s)).collect();
    let runs: BTreeMap<i32, RunRow> = list_runs(conn, model_id)?.into_iter().map(|r| (r.run_id, r)).collect();

    let mut dropped = Dropped::default();
    let mut body = task.clone();
    body.set.retain(|&set_id| set_usable(&sets, set_id, &mut dropped));
    for tr in &mut body.task_run {
        tr.task_run_set
            .retain(|p| run_usable(&runs, p.run_id, &mut dropped) && set_usable(&sets, p.set_id, &mut dropped));
    }

    let name = &task.task.name;
    if dropped.set_not_found {
        ctx.warn(&format!("Warning: task {name} workset(s) not found"));
    }
    if dropped.set_not_readonly {
        ctx.warn(&format!("Warning: task {name} workset(s) not read-only"));
    }
    if dropped.run_not_found {
        ctx.warn(&format!("Warning: task {name} model run(s) not found"));
    }
    if dropped.run_not_completed {
        ctx.warn(&format!("Warning: task {name} model run(s) not completed"));
    }

    let mut set_ids: BTreeSet<i32> = body.set.iter().copied().collect();
    let mut run_ids = BTreeSet::new();
    for p in body.task_run.iter().flat_map(|tr| &tr.task_run_set) {
        set_ids.insert(p.set_id);
        run_ids.insert(p.run_id);
    }

    let task = body.to_public(meta, &set_names(conn, model_id)?, &task_run_refs(conn, model_id)?)?;
    Ok(TaskWalk { set_ids: set_ids.into_iter().collect(), run_ids: run_ids.into_iter().collect(), task })
}

/// Source items of one invocation: runs ascending, then sets, then tasks.
#[derive(Debug, Default)]
pub struct Selection {
    pub runs: Vec<RunRow>,
    pub sets: Vec<WorksetRow>,
    /// Task id and the walk of each selected task.
    pub tasks: Vec<(i32, TaskWalk)>,
}

/// Resolve the artifact selection against the source database. The whole
/// model selects its completed runs, read-only sets and every task; a task
/// selects the usable runs and sets it refers to.
///
/// # Errors
/// Returns `NotFound` for a missing run, set or task and `Precondition` for
/// an explicitly selected run that is not completed or set that is not read-only.
pub fn select_source(conn: &Connection, meta: &ModelMeta, lang: &LangMeta, artifact: &Artifact, ctx: &Context<'_>) -> Result<Selection> {
    let model_id = meta.model.model_id;
    let mut sel = Selection::default();
    match artifact {
        Artifact::Model => {
            sel.runs = list_runs(conn, model_id)?.into_iter().filter(|r| r.status.is_completed()).collect();
            sel.sets = list_worksets(conn, model_id)?.into_iter().filter(|s| s.is_readonly).collect();
            for row in list_tasks(conn, model_id)? {
                let task_id = row.task_id;
                let task = read_task_meta(conn, row, lang)?;
                sel.tasks.push((task_id, walk_task(conn, meta, &task, ctx)?));
            }
        }
        Artifact::Run(r) => {
            let row = find_run(conn, model_id, r)?.ok_or_else(|| DbcopyError::not_found(format!("model run not found: {r}")))?;
            if !row.status.is_completed() {
                return Err(DbcopyError::precondition(format!("model run not completed: {} {}", row.run_id, row.name)).into());
            }
            sel.runs.push(row);
        }
        Artifact::Set(s) => {
            let row = find_workset(conn, model_id, s)?.ok_or_else(|| DbcopyError::not_found(format!("workset not found: {s}")))?;
            if !row.is_readonly {
                return Err(DbcopyError::precondition(format!("workset must be read-only: {} {}", row.set_id, row.name)).into());
            }
            sel.sets.push(row);
        }
        Artifact::Task(t) => {
            let row = find_task(conn, model_id, t)?.ok_or_else(|| DbcopyError::not_found(format!("modeling task not found: {t}")))?;
            let task_id = row.task_id;
            let task = read_task_meta(conn, row, lang)?;
            let walk = walk_task(conn, meta, &task, ctx)?;
            sel.runs = list_runs(conn, model_id)?.into_iter().filter(|r| walk.run_ids.contains(&r.run_id)).collect();
            sel.sets = list_worksets(conn, model_id)?.into_iter().filter(|s| walk.set_ids.contains(&s.set_id)).collect();
            sel.tasks.push((task_id, walk));
        }
    }
    Ok(sel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::task::{TaskRow, TaskRunMeta, TaskRunRow, TaskRunSetRow};
    use dbcopy_core::RunStatus;
    use dbcopy_store_sqlite::model_db::read_model;
    use dbcopy_store_sqlite::run_db::read_run_meta;
    use dbcopy_store_sqlite::testing::{seed_run, seed_set, seeded_db};
    use dbcopy_store_sqlite::workset_db::read_workset_meta;
    use dbcopy_store_sqlite::{RunRef, SetRef};

    fn task_of(name: &str, set: Vec<i32>, pairs: Vec<TaskRunSetRow>) -> TaskMeta {
        TaskMeta {
            task: TaskRow { task_id: 0, model_id: 1, name: name.into() },
            txt: Vec::new(),
            set,
            task_run: vec![TaskRunMeta {
                run: TaskRunRow { name: "batch".into(), sub_count: 1, status: RunStatus::Success, ..TaskRunRow::default() },
                task_run_set: pairs,
            }],
        }
    }

    #[test]
    fn run_copies_between_databases_once() -> Result<()> {
        let mut src = seeded_db()?;
        let meta = read_model(src.conn(), 1)?;
        let run_id = seed_run(&mut src, &meta, "r1", RunStatus::Success)?;
        let lang = read_lang(src.conn())?;
        let row = match find_run(src.conn(), 1, &RunRef::Id(run_id))? {
            Some(row) => row,
            None => panic!("seeded run not found"),
        };
        let run_pub = read_run_meta(src.conn(), row.clone(), &lang)?.to_public(&meta)?;

        let progress = MemoryProgress::default();
        let ctx = Context::new(&progress);
        let mut dst = ModelDb::open_in_memory()?;
        let docs = ModelDocs::read_db(src.conn(), meta.clone())?;
        let (dst_meta, dst_lang) = install_model(&mut dst, &docs, &ctx)?;

        let mut feed = DbFeed { conn: src.conn(), meta: &meta, src: ValueSource::Run(run_id), ctx: &ctx };
        let first = import_run(&mut dst, &dst_meta, &dst_lang, &run_pub, &mut feed, true, &ctx)?;
        let again = import_run(&mut dst, &dst_meta, &dst_lang, &run_pub, &mut feed, true, &ctx)?;
        assert_eq!(first, again);

        let copied = match find_run(dst.conn(), dst_meta.model.model_id, &RunRef::Id(first))? {
            Some(row) => row,
            None => panic!("copied run not found"),
        };
        assert_eq!(copied.run_digest, row.run_digest);
        assert_eq!(copied.value_digest, row.value_digest);
        assert!(progress.infos().iter().any(|m| m.ends_with("already exists")));
        Ok(())
    }

    #[test]
    fn run_not_completed_is_refused() -> Result<()> {
        let mut src = seeded_db()?;
        let meta = read_model(src.conn(), 1)?;
        let run_id = seed_run(&mut src, &meta, "busy", RunStatus::Progress)?;
        let lang = read_lang(src.conn())?;
        let row = match find_run(src.conn(), 1, &RunRef::Id(run_id))? {
            Some(row) => row,
            None => panic!("seeded run not found"),
        };
        let run_pub = read_run_meta(src.conn(), row, &lang)?.to_public(&meta)?;

        let progress = MemoryProgress::default();
        let ctx = Context::new(&progress);
        let mut feed = DbFeed { conn: src.conn(), meta: &meta, src: ValueSource::Run(run_id), ctx: &ctx };
        let mut dst = seeded_db()?;
        let dst_meta = read_model(dst.conn(), 1)?;
        let err = match import_run(&mut dst, &dst_meta, &lang, &run_pub, &mut feed, true, &ctx) {
            Ok(id) => panic!("run {id} copied while in progress"),
            Err(err) => err,
        };
        assert_eq!(dbcopy_core::classify(err.as_ref()), dbcopy_core::ErrorKind::Precondition);
        assert!(list_runs(dst.conn(), 1)?.is_empty());
        Ok(())
    }

    #[test]
    fn run_missing_parameters_is_refused() -> Result<()> {
        let mut src = seeded_db()?;
        let meta = read_model(src.conn(), 1)?;
        let run_id = seed_run(&mut src, &meta, "partial", RunStatus::Success)?;
        let lang = read_lang(src.conn())?;
        let row = match find_run(src.conn(), 1, &RunRef::Id(run_id))? {
            Some(row) => row,
            None => panic!("seeded run not found"),
        };
        let mut run_pub = read_run_meta(src.conn(), row, &lang)?.to_public(&meta)?;
        assert!(run_pub.param.len() > 1);
        run_pub.param.truncate(1);

        let progress = MemoryProgress::default();
        let ctx = Context::new(&progress);
        let mut dst = ModelDb::open_in_memory()?;
        let docs = ModelDocs::read_db(src.conn(), meta.clone())?;
        let (dst_meta, dst_lang) = install_model(&mut dst, &docs, &ctx)?;

        let mut feed = DbFeed { conn: src.conn(), meta: &meta, src: ValueSource::Run(run_id), ctx: &ctx };
        let err = match import_run(&mut dst, &dst_meta, &dst_lang, &run_pub, &mut feed, false, &ctx) {
            Ok(id) => panic!("run {id} copied without all parameters"),
            Err(err) => err,
        };
        assert_eq!(dbcopy_core::classify(err.as_ref()), dbcopy_core::ErrorKind::IntegrityMismatch);
        assert!(list_runs(dst.conn(), dst_meta.model.model_id)?.is_empty());
        Ok(())
    }

    #[test]
    fn workset_copy_restores_read_only_flag() -> Result<()> {
        let mut src = seeded_db()?;
        let meta = read_model(src.conn(), 1)?;
        let set_id = seed_set(&mut src, &meta, "Default")?;
        let lang = read_lang(src.conn())?;
        let row = match find_workset(src.conn(), 1, &SetRef::Id(set_id))? {
            Some(row) => row,
            None => panic!("seeded set not found"),
        };
        let set_pub = read_workset_meta(src.conn(), row, &lang)?.to_public(&meta, "")?;

        let progress = MemoryProgress::default();
        let ctx = Context::new(&progress);
        let mut feed = DbFeed { conn: src.conn(), meta: &meta, src: ValueSource::Set(set_id), ctx: &ctx };
        let mut dst = seeded_db()?;
        let dst_meta = read_model(dst.conn(), 1)?;
        let dst_lang = read_lang(dst.conn())?;
        let first = import_workset(&mut dst, &dst_meta, &dst_lang, &set_pub, &mut feed, true, &ctx)?;
        let again = import_workset(&mut dst, &dst_meta, &dst_lang, &set_pub, &mut feed, true, &ctx)?;
        assert_eq!(first, again);

        let copied = match find_workset(dst.conn(), 1, &SetRef::Name("Default".into()))? {
            Some(row) => row,
            None => panic!("copied set not found"),
        };
        assert!(copied.is_readonly);
        Ok(())
    }

    #[test]
    fn task_walk_drops_what_cannot_be_copied() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let lang = read_lang(db.conn())?;
        let done = seed_run(&mut db, &meta, "done", RunStatus::Success)?;
        let busy = seed_run(&mut db, &meta, "busy", RunStatus::Progress)?;
        let set_id = seed_set(&mut db, &meta, "Default")?;
        let tx = db.transaction()?;
        let mut task = task_of(
            "taskOne",
            vec![set_id],
            vec![TaskRunSetRow { run_id: done, set_id }, TaskRunSetRow { run_id: busy, set_id }],
        );
        insert_task(&tx, &meta, &mut task, &lang)?;
        tx.commit()?;

        let progress = MemoryProgress::default();
        let walk = walk_task(db.conn(), &meta, &task, &Context::new(&progress))?;
        assert_eq!(walk.set_ids, vec![set_id]);
        assert_eq!(walk.run_ids, vec![done]);
        assert_eq!(walk.task.task_run[0].task_run_set.len(), 1);
        assert_eq!(progress.warnings(), vec!["Warning: task taskOne model run(s) not completed".to_string()]);
        Ok(())
    }
}

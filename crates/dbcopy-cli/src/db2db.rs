//! Copy between two databases of the same schema.

use anyhow::Result;
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::progress::Context;
use dbcopy_core::run::RunRow;
use dbcopy_core::workset::WorksetRow;
use dbcopy_core::DbcopyError;
use dbcopy_store_sqlite::model_db::{read_model, require_model};
use dbcopy_store_sqlite::run_db::read_run_meta;
use dbcopy_store_sqlite::values::ValueSource;
use dbcopy_store_sqlite::workset_db::read_workset_meta;
use dbcopy_store_sqlite::{ConnectionSpec, ModelDb};

use crate::config::Config;
use crate::copy::{import_run, import_task, import_workset, install_model, select_source, DbFeed, ModelDocs};
use crate::to_text::base_run_digest;

struct DbCopy<'a> {
    src: &'a ModelDb,
    src_meta: &'a ModelMeta,
    src_lang: &'a LangMeta,
    dst_meta: &'a ModelMeta,
    dst_lang: &'a LangMeta,
    check_digest: bool,
    ctx: &'a Context<'a>,
}

impl DbCopy<'_> {
    fn run(&self, dst: &mut ModelDb, row: RunRow) -> Result<i32> {
        self.ctx.check_cancel()?;
        let run_id = row.run_id;
        let run_pub = read_run_meta(self.src.conn(), row, self.src_lang)?.to_public(self.src_meta)?;
        let mut feed = DbFeed { conn: self.src.conn(), meta: self.src_meta, src: ValueSource::Run(run_id), ctx: self.ctx };
        import_run(dst, self.dst_meta, self.dst_lang, &run_pub, &mut feed, self.check_digest, self.ctx)
    }

    fn set(&self, dst: &mut ModelDb, row: WorksetRow) -> Result<i32> {
        self.ctx.check_cancel()?;
        let conn = self.src.conn();
        let base_digest = base_run_digest(conn, self.src_meta, &row)?;
        let set_id = row.set_id;
        let set_pub = read_workset_meta(conn, row, self.src_lang)?.to_public(self.src_meta, &base_digest)?;
        let mut feed = DbFeed { conn, meta: self.src_meta, src: ValueSource::Set(set_id), ctx: self.ctx };
        import_workset(dst, self.dst_meta, self.dst_lang, &set_pub, &mut feed, self.check_digest, self.ctx)
    }
}

/// Copy the selected model, run, set or task into another database,
/// created when missing. Runs go first so that sets and tasks can refer to
/// them by digest.
///
/// # Errors
/// Returns `Precondition` when both ends are the same database, for a run
/// that is not completed or a set that is not read-only, `NotFound` for a
/// missing model or artifact, and the first copy failure otherwise.
pub fn db_to_db(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    let src = ModelDb::open(&cfg.database, &cfg.database_driver, false)?;
    let dst_spec = ConnectionSpec::parse(&cfg.to_database)?;
    if src.spec().is_same_database(&dst_spec) {
        return Err(DbcopyError::precondition(format!(
            "source and destination are the same database: {}",
            dst_spec.path.display()
        ))
        .into());
    }

    let conn = src.conn();
    let model_row = require_model(conn, &cfg.model_name, &cfg.model_digest)?;
    let src_meta = read_model(conn, model_row.model_id)?;
    let docs = ModelDocs::read_db(conn, src_meta.clone())?;
    let sel = select_source(conn, &src_meta, &docs.lang, &cfg.artifact, ctx)?;

    let mut dst = ModelDb::open(&cfg.to_database, &cfg.to_database_driver, true)?;
    let (dst_meta, dst_lang) = install_model(&mut dst, &docs, ctx)?;

    let copy = DbCopy {
        src: &src,
        src_meta: &src_meta,
        src_lang: &docs.lang,
        dst_meta: &dst_meta,
        dst_lang: &dst_lang,
        check_digest: !cfg.no_digest_check,
        ctx,
    };
    for row in sel.runs {
        copy.run(&mut dst, row)?;
    }
    for row in sel.sets {
        copy.set(&mut dst, row)?;
    }
    for (_, walk) in &sel.tasks {
        ctx.check_cancel()?;
        import_task(&mut dst, &dst_meta, &dst_lang, &walk.task, copy.check_digest, ctx)?;
    }
    Ok(())
}

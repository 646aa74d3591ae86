//! Dispatch of a resolved configuration to one copy, delete or rename
//! pipeline.

use anyhow::Result;
use dbcopy_core::progress::Context;

use crate::config::{Action, Config, Direction};
use crate::{db2db, edit, from_text, to_csv, to_text};

/// Run the pipeline selected by `cfg.action`.
///
/// # Errors
/// Returns the first error of the selected pipeline.
pub fn run(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    tracing::debug!(action = ?cfg.action, model = cfg.model_label(), artifact = ?cfg.artifact, "start");
    match cfg.action {
        Action::Copy(Direction::Text) => to_text::db_to_text(cfg, ctx),
        Action::Copy(Direction::Db) => from_text::text_to_db(cfg, ctx),
        Action::Copy(Direction::Db2Db) => db2db::db_to_db(cfg, ctx),
        Action::Copy(Direction::Csv) => to_csv::db_to_csv(cfg, false, ctx),
        Action::Copy(Direction::CsvAll) => to_csv::db_to_csv(cfg, true, ctx),
        Action::Delete => edit::delete(cfg, ctx),
        Action::Rename => edit::rename(cfg, ctx),
    }
}

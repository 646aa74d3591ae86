mod config;
mod copy;
mod db2db;
mod edit;
mod files;
mod from_text;
mod orchestrator;
mod to_csv;
mod to_text;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use dbcopy_core::ini::IniFile;
use dbcopy_core::{classify, Context, LogProgress};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn execute(mut args: Args) -> Result<()> {
    if let Some(path) = args.ini.clone() {
        let ini = IniFile::read(&path).with_context(|| format!("failed to read ini file {}", path.display()))?;
        args.merge_ini(&ini)?;
    }
    let progress = LogProgress::default();
    let cfg = Config::resolve(&args, &progress)?;
    let ctx = Context::new(&progress);
    orchestrator::run(&cfg, &ctx)?;
    if progress.warning_count() > 0 {
        tracing::info!("Done with {} warning(s)", progress.warning_count());
    } else {
        tracing::info!("Done.");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();
    match catch_unwind(AssertUnwindSafe(|| execute(args))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            tracing::error!(kind = %classify(err.as_ref()), "{err:#}");
            ExitCode::from(1)
        }
        Err(_) => {
            tracing::error!("dbcopy aborted by an internal error");
            ExitCode::from(2)
        }
    }
}

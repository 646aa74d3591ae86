//! Command line and ini options resolved into one configuration record.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dbcopy_core::format::DoubleFormat;
use dbcopy_core::ini::IniFile;
use dbcopy_core::layout::IdNames;
use dbcopy_core::{DbcopyError, ProgressSink};
use dbcopy_store_sqlite::{RunRef, SetRef, TaskRef};

/// Ini section holding dbcopy options.
pub const INI_SECTION: &str = "dbcopy";
const DEFAULT_DRIVER: &str = "SQLite";

#[derive(Debug, Default, Parser)]
#[command(name = "dbcopy")]
#[command(about = "Copy openM++ models, model runs, input sets and modeling tasks between databases and files")]
pub struct Args {
    /// Ini file with a [dbcopy] section, command line values win over it.
    #[arg(long)]
    pub ini: Option<PathBuf>,

    /// text, db, db2db, csv or csv-all
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub delete: bool,
    #[arg(long)]
    pub rename: bool,

    #[arg(long = "modelName")]
    pub model_name: Option<String>,
    #[arg(long = "modelDigest")]
    pub model_digest: Option<String>,

    #[arg(long = "runId")]
    pub run_id: Option<i32>,
    #[arg(long = "runDigest")]
    pub run_digest: Option<String>,
    #[arg(long = "runName")]
    pub run_name: Option<String>,
    #[arg(long = "firstRun")]
    pub first_run: bool,
    #[arg(long = "lastRun")]
    pub last_run: bool,
    #[arg(long = "setId")]
    pub set_id: Option<i32>,
    #[arg(long = "setName")]
    pub set_name: Option<String>,
    #[arg(long = "taskId")]
    pub task_id: Option<i32>,
    #[arg(long = "taskName")]
    pub task_name: Option<String>,

    #[arg(long = "toRunName")]
    pub to_run_name: Option<String>,
    #[arg(long = "toSetName")]
    pub to_set_name: Option<String>,
    #[arg(long = "toTaskName")]
    pub to_task_name: Option<String>,

    #[arg(long)]
    pub database: Option<String>,
    #[arg(long = "databaseDriver")]
    pub database_driver: Option<String>,
    #[arg(long = "toDatabase")]
    pub to_database: Option<String>,
    #[arg(long = "toDatabaseDriver")]
    pub to_database_driver: Option<String>,

    #[arg(long = "inputDir")]
    pub input_dir: Option<PathBuf>,
    #[arg(long = "outputDir")]
    pub output_dir: Option<PathBuf>,
    #[arg(long = "paramDir")]
    pub param_dir: Option<PathBuf>,

    #[arg(long)]
    pub zip: bool,
    /// printf-style format of float values, %.15g by default
    #[arg(long = "doubleFormat")]
    pub double_format: Option<String>,
    #[arg(long = "idCsv")]
    pub id_csv: bool,
    #[arg(long = "idOutputNames")]
    pub id_output_names: bool,
    #[arg(long = "codePage")]
    pub code_page: Option<String>,
    #[arg(long = "utf8BomIntoCsv")]
    pub utf8_bom_into_csv: bool,
    #[arg(long)]
    pub tsv: bool,
    #[arg(long = "noMicrodata")]
    pub no_microdata: bool,
    #[arg(long = "noAccCsv")]
    pub no_acc_csv: bool,
    #[arg(long = "noZeroCsv")]
    pub no_zero_csv: bool,
    #[arg(long = "noNullCsv")]
    pub no_null_csv: bool,
    #[arg(long = "noDigestCheck")]
    pub no_digest_check: bool,
    #[arg(long = "keepOutputDir")]
    pub keep_output_dir: bool,
}

fn fill(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn fill_path(slot: &mut Option<PathBuf>, value: &str) {
    if slot.is_none() {
        *slot = Some(PathBuf::from(value));
    }
}

fn fill_id(slot: &mut Option<i32>, key: &str, value: &str) -> Result<()> {
    if slot.is_none() {
        let id = value
            .trim()
            .parse()
            .map_err(|_| DbcopyError::invalid(format!("invalid {key} value in ini file: {value}")))?;
        *slot = Some(id);
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(DbcopyError::invalid(format!("invalid {key} value in ini file: {value}")).into()),
    }
}

impl Args {
    /// Fill options not given on the command line from the `[dbcopy]`
    /// section. Keys compare case-insensitively.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a malformed number or boolean.
    pub fn merge_ini(&mut self, ini: &IniFile) -> Result<()> {
        for e in ini.section(INI_SECTION) {
            let (key, v) = (e.key.as_str(), e.value.as_str());
            match key.to_ascii_lowercase().as_str() {
                "to" => fill(&mut self.to, v),
                "delete" => self.delete |= parse_bool(key, v)?,
                "rename" => self.rename |= parse_bool(key, v)?,
                "modelname" => fill(&mut self.model_name, v),
                "modeldigest" => fill(&mut self.model_digest, v),
                "runid" => fill_id(&mut self.run_id, key, v)?,
                "rundigest" => fill(&mut self.run_digest, v),
                "runname" => fill(&mut self.run_name, v),
                "firstrun" => self.first_run |= parse_bool(key, v)?,
                "lastrun" => self.last_run |= parse_bool(key, v)?,
                "setid" => fill_id(&mut self.set_id, key, v)?,
                "setname" => fill(&mut self.set_name, v),
                "taskid" => fill_id(&mut self.task_id, key, v)?,
                "taskname" => fill(&mut self.task_name, v),
                "torunname" => fill(&mut self.to_run_name, v),
                "tosetname" => fill(&mut self.to_set_name, v),
                "totaskname" => fill(&mut self.to_task_name, v),
                "database" => fill(&mut self.database, v),
                "databasedriver" => fill(&mut self.database_driver, v),
                "todatabase" => fill(&mut self.to_database, v),
                "todatabasedriver" => fill(&mut self.to_database_driver, v),
                "inputdir" => fill_path(&mut self.input_dir, v),
                "outputdir" => fill_path(&mut self.output_dir, v),
                "paramdir" => fill_path(&mut self.param_dir, v),
                "zip" => self.zip |= parse_bool(key, v)?,
                "doubleformat" => fill(&mut self.double_format, v),
                "idcsv" => self.id_csv |= parse_bool(key, v)?,
                "idoutputnames" => self.id_output_names |= parse_bool(key, v)?,
                "codepage" => fill(&mut self.code_page, v),
                "utf8bomintocsv" => self.utf8_bom_into_csv |= parse_bool(key, v)?,
                "tsv" => self.tsv |= parse_bool(key, v)?,
                "nomicrodata" => self.no_microdata |= parse_bool(key, v)?,
                "noacccsv" => self.no_acc_csv |= parse_bool(key, v)?,
                "nozerocsv" => self.no_zero_csv |= parse_bool(key, v)?,
                "nonullcsv" => self.no_null_csv |= parse_bool(key, v)?,
                "nodigestcheck" => self.no_digest_check |= parse_bool(key, v)?,
                "keepoutputdir" => self.keep_output_dir |= parse_bool(key, v)?,
                _ => tracing::debug!(key, "unknown ini option ignored"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Text,
    Db,
    Db2Db,
    Csv,
    CsvAll,
}

impl Direction {
    /// # Errors
    /// Returns `InvalidArgument` for an unknown direction.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "db" => Ok(Self::Db),
            "db2db" => Ok(Self::Db2Db),
            "csv" => Ok(Self::Csv),
            "csv-all" => Ok(Self::CsvAll),
            _ => Err(DbcopyError::invalid(format!("invalid copy direction: {value}")).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copy(Direction),
    Delete,
    Rename,
}

/// What a pipeline works on: the whole model or one artifact of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Model,
    Run(RunRef),
    Set(SetRef),
    Task(TaskRef),
}

/// Options of CSV value files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvOptions {
    pub double_format: DoubleFormat,
    pub is_id_csv: bool,
    pub is_bom: bool,
    pub is_tsv: bool,
    pub no_acc: bool,
    pub no_zero: bool,
    pub no_null: bool,
}

/// Resolved configuration record passed to the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    pub action: Action,
    pub model_name: String,
    pub model_digest: String,
    pub artifact: Artifact,
    /// New name of the renamed artifact.
    pub new_name: String,
    pub database: String,
    pub database_driver: String,
    pub to_database: String,
    pub to_database_driver: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub param_dir: Option<PathBuf>,
    pub is_zip: bool,
    pub csv: CsvOptions,
    pub id_names: IdNames,
    pub code_page: String,
    pub no_microdata: bool,
    pub no_digest_check: bool,
    pub keep_output_dir: bool,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    DbcopyError::invalid(msg).into()
}

/// Run selector: a positive id wins over everything else, first or last
/// run cannot be mixed with a digest, a digest wins over a name.
fn select_run(args: &Args, progress: &dyn ProgressSink) -> Result<Option<RunRef>> {
    let digest = non_empty(args.run_digest.as_ref());
    let name = non_empty(args.run_name.as_ref());
    if args.first_run && args.last_run {
        return Err(invalid("firstRun and lastRun cannot be combined"));
    }
    let edge = if args.first_run {
        Some(RunRef::First)
    } else if args.last_run {
        Some(RunRef::Last)
    } else {
        None
    };

    if let Some(id) = args.run_id.filter(|id| *id > 0) {
        if digest.is_some() || name.is_some() || edge.is_some() {
            progress.warn(&format!("Warning: model run id {id} used, other model run options ignored"));
        }
        return Ok(Some(RunRef::Id(id)));
    }
    if let Some(edge) = edge {
        if digest.is_some() {
            return Err(invalid("firstRun or lastRun cannot be combined with runDigest"));
        }
        if let Some(name) = name {
            progress.warn(&format!("Warning: {edge} model run used, run name ignored: {name}"));
        }
        return Ok(Some(edge));
    }
    if let Some(digest) = digest {
        if let Some(name) = name {
            progress.warn(&format!("Warning: model run digest {digest} used, run name ignored: {name}"));
        }
        return Ok(Some(RunRef::Digest(digest)));
    }
    Ok(name.map(RunRef::Name))
}

fn select_set(args: &Args, progress: &dyn ProgressSink) -> Option<SetRef> {
    let name = non_empty(args.set_name.as_ref());
    if let Some(id) = args.set_id.filter(|id| *id > 0) {
        if let Some(name) = name {
            progress.warn(&format!("Warning: workset id {id} used, workset name ignored: {name}"));
        }
        return Some(SetRef::Id(id));
    }
    name.map(SetRef::Name)
}

fn select_task(args: &Args, progress: &dyn ProgressSink) -> Option<TaskRef> {
    let name = non_empty(args.task_name.as_ref());
    if let Some(id) = args.task_id.filter(|id| *id > 0) {
        if let Some(name) = name {
            progress.warn(&format!("Warning: modeling task id {id} used, task name ignored: {name}"));
        }
        return Some(TaskRef::Id(id));
    }
    name.map(TaskRef::Name)
}

fn select_artifact(args: &Args, progress: &dyn ProgressSink) -> Result<Artifact> {
    let run = select_run(args, progress)?;
    let set = select_set(args, progress);
    let task = select_task(args, progress);
    match (run, set, task) {
        (None, None, None) => Ok(Artifact::Model),
        (Some(run), None, None) => Ok(Artifact::Run(run)),
        (None, Some(set), None) => Ok(Artifact::Set(set)),
        (None, None, Some(task)) => Ok(Artifact::Task(task)),
        _ => Err(invalid("only one of model run, workset or modeling task can be selected")),
    }
}

/// New name for a rename, checked against the selected artifact.
fn rename_target(action: Action, artifact: &Artifact, args: &Args) -> Result<String> {
    let to_run = non_empty(args.to_run_name.as_ref());
    let to_set = non_empty(args.to_set_name.as_ref());
    let to_task = non_empty(args.to_task_name.as_ref());
    if action != Action::Rename {
        if to_run.is_some() || to_set.is_some() || to_task.is_some() {
            return Err(invalid("toRunName, toSetName and toTaskName are valid only with rename"));
        }
        return Ok(String::new());
    }
    let given = [&to_run, &to_set, &to_task].iter().filter(|v| v.is_some()).count();
    let (target, flag) = match artifact {
        Artifact::Model => return Err(invalid("rename requires a model run, workset or modeling task")),
        Artifact::Run(_) => (to_run, "toRunName"),
        Artifact::Set(_) => (to_set, "toSetName"),
        Artifact::Task(_) => (to_task, "toTaskName"),
    };
    match target {
        Some(name) if given == 1 => Ok(name),
        _ => Err(invalid(format!("rename of the selected item requires {flag} and no other new name"))),
    }
}

impl Config {
    /// Apply defaults and the option conflict rules. Conflicts resolved by
    /// precedence are reported as warnings.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for conflicting or missing options.
    pub fn resolve(args: &Args, progress: &dyn ProgressSink) -> Result<Self> {
        let action = match (args.delete, args.rename, &args.to) {
            (true, true, _) => return Err(invalid("delete and rename cannot be combined")),
            (true, false, Some(_)) | (false, true, Some(_)) => {
                return Err(invalid("to cannot be combined with delete or rename"))
            }
            (true, false, None) => Action::Delete,
            (false, true, None) => Action::Rename,
            (false, false, to) => Action::Copy(to.as_deref().map(Direction::parse).transpose()?.unwrap_or_default()),
        };

        let model_name = non_empty(args.model_name.as_ref()).unwrap_or_default();
        let model_digest = non_empty(args.model_digest.as_ref()).unwrap_or_default();
        if model_name.is_empty() && model_digest.is_empty() {
            return Err(invalid("model name or model digest required"));
        }
        let model_dir = if model_name.is_empty() { &model_digest } else { &model_name };

        let artifact = select_artifact(args, progress)?;
        let new_name = rename_target(action, &artifact, args)?;

        let to_database = non_empty(args.to_database.as_ref()).unwrap_or_default();
        let is_to_db = matches!(action, Action::Copy(Direction::Db | Direction::Db2Db));
        if !to_database.is_empty() && !is_to_db {
            return Err(invalid("toDatabase is valid only for to=db or to=db2db"));
        }
        if action == Action::Copy(Direction::Db2Db) && to_database.is_empty() {
            return Err(invalid("destination database required for to=db2db"));
        }
        let is_text_out = matches!(action, Action::Copy(Direction::Text | Direction::Csv | Direction::CsvAll));
        if args.id_csv && !is_text_out {
            return Err(invalid("idCsv is valid only for to=text, to=csv or to=csv-all"));
        }
        if args.param_dir.is_some()
            && !(matches!(artifact, Artifact::Set(_)) && matches!(action, Action::Copy(Direction::Text | Direction::Db)))
        {
            return Err(invalid("paramDir is valid only with workset selection and to=text or to=db"));
        }

        let database = match non_empty(args.database.as_ref()) {
            Some(db) => db,
            None if !model_name.is_empty() => format!("{model_name}.sqlite"),
            None => return Err(invalid("database required when model name is not given")),
        };
        let input_dir = args.input_dir.clone().unwrap_or_else(|| PathBuf::from(".").join(model_dir));
        let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from(".").join(model_dir));
        let to_database = if to_database.is_empty() && action == Action::Copy(Direction::Db) {
            input_dir.join(format!("{model_dir}.sqlite")).to_string_lossy().into_owned()
        } else {
            to_database
        };

        let driver = |v: &Option<String>| non_empty(v.as_ref()).unwrap_or_else(|| DEFAULT_DRIVER.to_string());
        let double_format = DoubleFormat::parse(args.double_format.as_deref().unwrap_or_default())?;

        Ok(Self {
            action,
            model_name,
            model_digest,
            artifact,
            new_name,
            database,
            database_driver: driver(&args.database_driver),
            to_database,
            to_database_driver: driver(&args.to_database_driver),
            input_dir,
            output_dir,
            param_dir: args.param_dir.clone(),
            is_zip: args.zip,
            csv: CsvOptions {
                double_format,
                is_id_csv: args.id_csv,
                is_bom: args.utf8_bom_into_csv,
                is_tsv: args.tsv,
                no_acc: args.no_acc_csv,
                no_zero: args.no_zero_csv,
                no_null: args.no_null_csv,
            },
            id_names: if args.id_output_names { IdNames::Always } else { IdNames::Auto },
            code_page: non_empty(args.code_page.as_ref()).unwrap_or_default(),
            no_microdata: args.no_microdata,
            no_digest_check: args.no_digest_check,
            keep_output_dir: args.keep_output_dir,
        })
    }

    /// Model name, or the digest when only the digest was given.
    #[must_use]
    pub fn model_label(&self) -> &str {
        if self.model_name.is_empty() {
            &self.model_digest
        } else {
            &self.model_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::ErrorKind;

    fn args(list: &[&str]) -> Args {
        let mut argv = vec!["dbcopy"];
        argv.extend_from_slice(list);
        match Args::try_parse_from(argv) {
            Ok(args) => args,
            Err(err) => panic!("invalid test arguments: {err}"),
        }
    }

    fn resolve(list: &[&str]) -> (Result<Config>, MemoryProgress) {
        let progress = MemoryProgress::default();
        let cfg = Config::resolve(&args(list), &progress);
        (cfg, progress)
    }

    fn kind_of(result: Result<Config>) -> ErrorKind {
        match result {
            Ok(cfg) => panic!("expected an error, resolved {cfg:?}"),
            Err(err) => dbcopy_core::classify(err.as_ref()),
        }
    }

    #[test]
    fn run_id_wins_over_name_with_warning() -> Result<()> {
        let (cfg, progress) = resolve(&["--modelName", "modelOne", "--runId", "7", "--runName", "abc"]);
        assert_eq!(cfg?.artifact, Artifact::Run(RunRef::Id(7)));
        assert_eq!(progress.warnings().len(), 1);

        let (cfg, progress) = resolve(&["--modelName", "modelOne", "--runDigest", "d1", "--runName", "abc"]);
        assert_eq!(cfg?.artifact, Artifact::Run(RunRef::Digest("d1".into())));
        assert_eq!(progress.warnings().len(), 1);
        Ok(())
    }

    #[test]
    fn set_and_task_ids_win_over_names() -> Result<()> {
        let (cfg, progress) = resolve(&["--modelName", "m", "--setId", "3", "--setName", "Default"]);
        assert_eq!(cfg?.artifact, Artifact::Set(SetRef::Id(3)));
        assert_eq!(progress.warnings().len(), 1);

        let (cfg, progress) = resolve(&["--modelName", "m", "--taskId", "2", "--taskName", "t"]);
        assert_eq!(cfg?.artifact, Artifact::Task(TaskRef::Id(2)));
        assert_eq!(progress.warnings().len(), 1);

        let (cfg, progress) = resolve(&["--modelName", "m", "--setId", "0", "--setName", "Default"]);
        assert_eq!(cfg?.artifact, Artifact::Set(SetRef::Name("Default".into())));
        assert!(progress.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn first_and_last_run_rules() {
        let (cfg, _) = resolve(&["--modelName", "m", "--firstRun", "--lastRun"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--lastRun", "--runDigest", "d"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, progress) = resolve(&["--modelName", "m", "--lastRun", "--runId", "5"]);
        assert!(matches!(cfg, Ok(Config { artifact: Artifact::Run(RunRef::Id(5)), .. })));
        assert_eq!(progress.warnings().len(), 1);
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        let (cfg, _) = resolve(&["--modelName", "m", "--delete", "--rename", "--runId", "1"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--delete", "--to", "db"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--to", "xml"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&[]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
    }

    #[test]
    fn option_scope_is_checked() {
        let (cfg, _) = resolve(&["--modelName", "m", "--toDatabase", "x.sqlite"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--to", "db", "--idCsv"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--paramDir", "p", "--runId", "1"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--toRunName", "x", "--runId", "1"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--rename", "--runId", "1", "--toSetName", "x"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--to", "db2db"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
        let (cfg, _) = resolve(&["--modelName", "m", "--runId", "1", "--setId", "2"]);
        assert_eq!(kind_of(cfg), ErrorKind::InvalidArgument);
    }

    #[test]
    fn defaults_follow_model_name() -> Result<()> {
        let (cfg, _) = resolve(&["--modelName", "modelOne", "--to", "db"]);
        let cfg = cfg?;
        assert_eq!(cfg.database, "modelOne.sqlite");
        assert_eq!(cfg.output_dir, PathBuf::from(".").join("modelOne"));
        assert_eq!(cfg.to_database, PathBuf::from(".").join("modelOne").join("modelOne.sqlite").to_string_lossy());
        assert_eq!(cfg.database_driver, "SQLite");
        assert_eq!(cfg.id_names, IdNames::Auto);

        let (cfg, _) = resolve(&["--modelName", "m", "--rename", "--setName", "a", "--toSetName", "b"]);
        let cfg = cfg?;
        assert_eq!(cfg.action, Action::Rename);
        assert_eq!(cfg.new_name, "b");
        Ok(())
    }

    #[test]
    fn command_line_wins_over_ini() -> Result<()> {
        let ini = IniFile::parse(
            "[dbcopy]\nModelName = fromIni\nTo = csv\nIdCsv = true\nRunId = 4\n[other]\nDatabase = ignored\n",
        )?;
        let mut a = args(&["--modelName", "fromCli"]);
        a.merge_ini(&ini)?;
        assert_eq!(a.model_name.as_deref(), Some("fromCli"));
        assert_eq!(a.to.as_deref(), Some("csv"));
        assert!(a.id_csv);
        assert_eq!(a.run_id, Some(4));
        assert_eq!(a.database, None);

        let bad = IniFile::parse("[dbcopy]\nZip = maybe\n")?;
        assert!(args(&[]).merge_ini(&bad).is_err());
        Ok(())
    }
}

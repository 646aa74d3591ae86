//! File tree naming: run, set and task directories and metadata files.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const PARAMETERS_DIR: &str = "parameters";
pub const OUTPUT_TABLES_DIR: &str = "output-tables";
pub const MICRODATA_DIR: &str = "microdata";
pub const ALL_RUNS_DIR: &str = "all_model_runs";
pub const ALL_SETS_DIR: &str = "all_input_sets";

/// How run and set directory names include the database id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdNames {
    /// Add ids only when names collide.
    #[default]
    Auto,
    Always,
}

/// Replace characters that are not safe in file names.
#[must_use]
pub fn clean_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

fn item_name(prefix: &str, id: i32, name: &str, with_id: bool) -> String {
    if with_id {
        format!("{prefix}.{id}.{}", clean_file_name(name))
    } else {
        format!("{prefix}.{}", clean_file_name(name))
    }
}

/// Directory names for a list of exported items, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DirNames {
    prefix: String,
    names: BTreeMap<i32, String>,
}

impl DirNames {
    /// In `Auto` mode ids are added to every name as soon as two cleaned names collide.
    #[must_use]
    pub fn new(prefix: &str, items: &[(i32, String)], mode: IdNames) -> Self {
        let with_id = match mode {
            IdNames::Always => true,
            IdNames::Auto => {
                let mut seen = HashSet::new();
                items.iter().any(|(_, name)| !seen.insert(clean_file_name(name).to_lowercase()))
            }
        };
        let names = items
            .iter()
            .map(|(id, name)| (*id, item_name(prefix, *id, name, with_id)))
            .collect();
        Self { prefix: prefix.to_string(), names }
    }

    /// Directory name of an item, falling back to the id form for unknown ids.
    #[must_use]
    pub fn get(&self, id: i32, name: &str) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| item_name(&self.prefix, id, name, true))
    }
}

#[must_use]
pub fn run_dirs(runs: &[(i32, String)], mode: IdNames) -> DirNames {
    DirNames::new("run", runs, mode)
}

#[must_use]
pub fn set_dirs(sets: &[(i32, String)], mode: IdNames) -> DirNames {
    DirNames::new("set", sets, mode)
}

/// `{model}.{dir}.json` next to the value directory `dir`.
#[must_use]
pub fn meta_json_name(model_name: &str, dir_name: &str) -> String {
    format!("{model_name}.{dir_name}.json")
}

#[must_use]
pub fn task_json_name(model_name: &str, task_id: i32, task_name: &str, with_id: bool) -> String {
    format!("{model_name}.{}.json", item_name("task", task_id, task_name, with_id))
}

#[must_use]
pub fn model_json_name(model_name: &str, kind: &str) -> String {
    format!("{model_name}.{kind}.json")
}

/// Value directory name of a run or set metadata file, e.g.
/// `modelOne.run.42.my run.json` gives `run.42.my run`.
#[must_use]
pub fn dir_from_meta_json(model_name: &str, file_name: &str) -> Option<String> {
    let rest = file_name.strip_prefix(model_name)?.strip_prefix('.')?;
    let dir = rest.strip_suffix(".json")?;
    (dir.starts_with("run.") || dir.starts_with("set.")).then(|| dir.to_string())
}

/// Metadata files of one kind (`run`, `set` or `task`) in a directory, sorted by name.
///
/// # Errors
/// Returns an i/o error when the directory cannot be listed.
pub fn list_meta_json(dir: &Path, model_name: &str, kind: &str) -> std::io::Result<Vec<PathBuf>> {
    let prefix = format!("{model_name}.{kind}.");
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".json") && entry.path().is_file() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Files of the all-in-one CSV mode already started by this invocation.
#[derive(Debug, Default)]
pub struct AllInOneFiles {
    created: HashSet<PathBuf>,
}

impl AllInOneFiles {
    /// True the first time a path is seen: the caller creates the file and
    /// writes the header, later calls append.
    pub fn is_first(&mut self, path: &Path) -> bool {
        self.created.insert(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automatic_mode_adds_ids_on_conflict() {
        let unique = run_dirs(&[(1, "a".into()), (2, "b".into())], IdNames::Auto);
        assert_eq!(unique.get(1, "a"), "run.a");
        let clash = run_dirs(&[(1, "same".into()), (2, "same".into())], IdNames::Auto);
        assert_eq!(clash.get(1, "same"), "run.1.same");
        assert_eq!(clash.get(2, "same"), "run.2.same");
        let always = set_dirs(&[(3, "Default".into())], IdNames::Always);
        assert_eq!(always.get(3, "Default"), "set.3.Default");
    }

    #[test]
    fn names_are_cleaned_for_the_file_system() {
        assert_eq!(clean_file_name("a/b:c"), "a_b_c");
        assert_eq!(clean_file_name("  "), "_");
        let clash = run_dirs(&[(1, "a/b".into()), (2, "a:b".into())], IdNames::Auto);
        assert_eq!(clash.get(2, "a:b"), "run.2.a_b");
    }

    #[test]
    fn meta_json_names_map_back_to_dirs() {
        let json = meta_json_name("modelOne", "run.42.my run");
        assert_eq!(json, "modelOne.run.42.my run.json");
        assert_eq!(dir_from_meta_json("modelOne", &json), Some("run.42.my run".to_string()));
        assert_eq!(dir_from_meta_json("modelOne", "modelOne.model.json"), None);
        assert_eq!(task_json_name("modelOne", 1, "taskOne", false), "modelOne.task.taskOne.json");
        assert_eq!(task_json_name("modelOne", 1, "taskOne", true), "modelOne.task.1.taskOne.json");
    }

    #[test]
    fn all_in_one_tracks_first_write() {
        let mut files = AllInOneFiles::default();
        let p = Path::new("all_model_runs/salarySex.csv");
        assert!(files.is_first(p));
        assert!(!files.is_first(p));
    }
}

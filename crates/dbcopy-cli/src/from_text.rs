//! Copy from the file tree into a database: model documents first, then
//! runs, sets and tasks with their CSV values.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use dbcopy_core::lang::{LangMeta, ModelWordMeta};
use dbcopy_core::layout::{dir_from_meta_json, list_meta_json, model_json_name};
use dbcopy_core::model::ModelMeta;
use dbcopy_core::model_txt::{ModelTxtMeta, ProfileMeta};
use dbcopy_core::progress::Context;
use dbcopy_core::{DbcopyError, RunPub, TaskPub, WorksetPub};
use dbcopy_store_sqlite::{ModelDb, RunRef, SetRef, TaskRef};
use serde::de::DeserializeOwned;

use crate::config::{Artifact, Config};
use crate::copy::{import_run, import_task, import_workset, install_model, CsvFeed, GroupDoc, ModelDocs};
use crate::files::{read_json, read_json_opt, unpack_model_zip};

fn model_json_by_digest(root: &Path, digest: &str) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(root)
        .with_context(|| format!("failed to list {}", root.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", root.display()))?;
    entries.sort();
    for path in entries {
        let is_model = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(".model.json"));
        if !is_model {
            continue;
        }
        let body = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        if ModelMeta::from_public_json(&body)?.model.digest == digest {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Read `{model}.model.json` and the documents next to it. The model is
/// found by name, or by digest when only the digest is known.
///
/// # Errors
/// Returns `NotFound` when there is no model document for the selection and
/// `Io` or `IntegrityMismatch` for an invalid document.
pub fn read_model_docs(root: &Path, model_name: &str, model_digest: &str) -> Result<ModelDocs> {
    let model_path = if model_name.is_empty() {
        model_json_by_digest(root, model_digest)?
    } else {
        Some(root.join(model_json_name(model_name, "model"))).filter(|p| p.is_file())
    };
    let Some(model_path) = model_path else {
        return Err(DbcopyError::not_found(format!("model not found in {}: {model_name} {model_digest}", root.display())).into());
    };

    let body = fs::read(&model_path).with_context(|| format!("failed to read {}", model_path.display()))?;
    let mut meta = ModelMeta::from_public_json(&body)?;
    if !model_digest.is_empty() && meta.model.digest != model_digest {
        return Err(DbcopyError::not_found(format!("model not found: {model_name} {model_digest}")).into());
    }

    let name = meta.model.name.clone();
    let doc = |kind: &str| root.join(model_json_name(&name, kind));
    let mut lang: LangMeta = read_json_opt(&doc("lang"))?.unwrap_or_default();
    lang.update_internals();
    let words: ModelWordMeta = read_json_opt(&doc("word"))?.unwrap_or_default();
    let mut txt: ModelTxtMeta = read_json_opt(&doc("text"))?.unwrap_or_default();
    let profiles: Vec<ProfileMeta> = read_json_opt(&doc("profile"))?.unwrap_or_default();
    if let Some(groups) = read_json_opt::<GroupDoc>(&doc("group"))? {
        meta.set_groups(groups.groups)?;
        txt.group_txt = groups.txt.group_txt;
        txt.entity_group_txt = groups.txt.entity_group_txt;
    }
    Ok(ModelDocs { meta, txt, lang, words, profiles })
}

fn file_has_id(path: &Path, prefix: &str, kind: &str, id: i32) -> bool {
    let head = format!("{prefix}.{kind}.{id}.");
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(&head))
}

fn select_run(docs: Vec<(PathBuf, RunPub)>, prefix: &str, sel: &RunRef) -> Option<(PathBuf, RunPub)> {
    let by_time = |a: &(PathBuf, RunPub), b: &(PathBuf, RunPub)| {
        (&a.1.create_date_time, &a.1.run_stamp).cmp(&(&b.1.create_date_time, &b.1.run_stamp))
    };
    match sel {
        RunRef::Id(id) => docs.into_iter().find(|(p, _)| file_has_id(p, prefix, "run", *id)),
        RunRef::Digest(d) => docs.into_iter().find(|(_, r)| r.run_digest == *d),
        RunRef::Name(n) => docs.into_iter().find(|(_, r)| r.name == *n),
        RunRef::First => docs.into_iter().min_by(by_time),
        RunRef::Last => docs.into_iter().max_by(by_time),
    }
}

fn select_set(docs: Vec<(PathBuf, WorksetPub)>, prefix: &str, sel: &SetRef) -> Option<(PathBuf, WorksetPub)> {
    match sel {
        SetRef::Id(id) => docs.into_iter().find(|(p, _)| file_has_id(p, prefix, "set", *id)),
        SetRef::Name(n) => docs.into_iter().find(|(_, s)| s.name == *n),
    }
}

fn select_task(docs: Vec<(PathBuf, TaskPub)>, prefix: &str, sel: &TaskRef) -> Option<(PathBuf, TaskPub)> {
    match sel {
        TaskRef::Id(id) => docs.into_iter().find(|(p, _)| file_has_id(p, prefix, "task", *id)),
        TaskRef::Name(n) => docs.into_iter().find(|(_, t)| t.name == *n),
    }
}

struct TextImport<'a> {
    root: &'a Path,
    /// Model name as used in file names.
    prefix: &'a str,
    meta: &'a ModelMeta,
    lang: &'a LangMeta,
    cfg: &'a Config,
    ctx: &'a Context<'a>,
}

impl TextImport<'_> {
    fn docs<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<(PathBuf, T)>> {
        let paths = list_meta_json(self.root, self.prefix, kind)
            .with_context(|| format!("failed to list {}", self.root.display()))?;
        paths
            .into_iter()
            .map(|p| {
                let doc = read_json(&p)?;
                Ok((p, doc))
            })
            .collect()
    }

    fn value_dir(&self, json: &Path) -> Result<PathBuf> {
        let file_name = json.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dir = dir_from_meta_json(self.prefix, &file_name)
            .ok_or_else(|| DbcopyError::invalid(format!("not a run or set document: {}", json.display())))?;
        Ok(json.parent().unwrap_or(self.root).join(dir))
    }

    fn run(&self, dst: &mut ModelDb, path: &Path, run_pub: &RunPub) -> Result<i32> {
        self.ctx.check_cancel()?;
        let dir = self.value_dir(path)?;
        let mut feed = CsvFeed::run(self.meta, &dir, &self.cfg.code_page, self.ctx);
        import_run(dst, self.meta, self.lang, run_pub, &mut feed, !self.cfg.no_digest_check, self.ctx)
    }

    fn set(&self, dst: &mut ModelDb, path: &Path, set_pub: &WorksetPub, param_dir: Option<&Path>) -> Result<i32> {
        self.ctx.check_cancel()?;
        let dir = match param_dir {
            Some(d) => d.to_path_buf(),
            None => self.value_dir(path)?,
        };
        let mut feed = CsvFeed::set(self.meta, &dir, &self.cfg.code_page, self.ctx);
        import_workset(dst, self.meta, self.lang, set_pub, &mut feed, !self.cfg.no_digest_check, self.ctx)
    }

    /// Completed runs only, the rest is skipped with a warning.
    fn runs(&self, dst: &mut ModelDb, docs: &[(PathBuf, RunPub)]) -> Result<()> {
        for (path, run_pub) in docs {
            if run_pub.status.is_completed() {
                self.run(dst, path, run_pub)?;
            } else {
                self.ctx.warn(&format!("Warning: model run not completed, skipped: {}", run_pub.name));
            }
        }
        Ok(())
    }

    /// Read-only sets only, the rest is skipped with a warning.
    fn sets(&self, dst: &mut ModelDb, docs: &[(PathBuf, WorksetPub)]) -> Result<()> {
        for (path, set_pub) in docs {
            if set_pub.is_readonly {
                self.set(dst, path, set_pub, None)?;
            } else {
                self.ctx.warn(&format!("Warning: workset not read-only, skipped: {}", set_pub.name));
            }
        }
        Ok(())
    }

    fn task(&self, dst: &mut ModelDb, task_pub: &TaskPub) -> Result<i32> {
        self.ctx.check_cancel()?;
        import_task(dst, self.meta, self.lang, task_pub, !self.cfg.no_digest_check, self.ctx)
    }
}

/// Copy the selected model, run, set or task from the input directory (or
/// its archive) into the destination database, created when missing.
///
/// # Errors
/// Returns `NotFound` for a missing document, `Precondition` for an
/// explicitly selected run that is not completed or set that is not
/// read-only, and the first failure of reading or writing otherwise.
pub fn text_to_db(cfg: &Config, ctx: &Context<'_>) -> Result<()> {
    let unpacked = if cfg.is_zip { Some(unpack_model_zip(&cfg.input_dir, cfg.model_label())?) } else { None };
    let root = unpacked.as_ref().map_or(cfg.input_dir.as_path(), |u| u.root.as_path());

    let docs = read_model_docs(root, &cfg.model_name, &cfg.model_digest)?;
    let mut dst = ModelDb::open(&cfg.to_database, &cfg.to_database_driver, true)?;
    let (meta, lang) = install_model(&mut dst, &docs, ctx)?;

    let prefix = docs.meta.model.name.as_str();
    let import = TextImport { root, prefix, meta: &meta, lang: &lang, cfg, ctx };
    match &cfg.artifact {
        Artifact::Model => {
            import.runs(&mut dst, &import.docs::<RunPub>("run")?)?;
            import.sets(&mut dst, &import.docs::<WorksetPub>("set")?)?;
            for (_, task_pub) in import.docs::<TaskPub>("task")? {
                import.task(&mut dst, &task_pub)?;
            }
        }
        Artifact::Run(sel) => {
            let (path, run_pub) = select_run(import.docs("run")?, prefix, sel)
                .ok_or_else(|| DbcopyError::not_found(format!("model run not found: {sel}")))?;
            import.run(&mut dst, &path, &run_pub)?;
        }
        Artifact::Set(sel) => {
            let (path, set_pub) = select_set(import.docs("set")?, prefix, sel)
                .ok_or_else(|| DbcopyError::not_found(format!("workset not found: {sel}")))?;
            if !set_pub.is_readonly {
                return Err(DbcopyError::precondition(format!("workset must be read-only: {}", set_pub.name)).into());
            }
            import.set(&mut dst, &path, &set_pub, cfg.param_dir.as_deref())?;
        }
        Artifact::Task(sel) => {
            let (_, task_pub) = select_task(import.docs("task")?, prefix, sel)
                .ok_or_else(|| DbcopyError::not_found(format!("modeling task not found: {sel}")))?;
            let pairs = task_pub.task_run.iter().flat_map(|tr| &tr.task_run_set);
            let digests: BTreeSet<&str> = pairs.clone().map(|p| p.run.run_digest.as_str()).collect();
            let set_names: BTreeSet<&str> =
                task_pub.set.iter().map(String::as_str).chain(pairs.map(|p| p.set_name.as_str())).collect();

            let runs: Vec<(PathBuf, RunPub)> = import
                .docs::<RunPub>("run")?
                .into_iter()
                .filter(|(_, r)| digests.contains(r.run_digest.as_str()))
                .collect();
            import.runs(&mut dst, &runs)?;
            let sets: Vec<(PathBuf, WorksetPub)> = import
                .docs::<WorksetPub>("set")?
                .into_iter()
                .filter(|(_, s)| set_names.contains(s.name.as_str()))
                .collect();
            import.sets(&mut dst, &sets)?;
            import.task(&mut dst, &task_pub)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_doc(file: &str, name: &str, created: &str) -> (PathBuf, RunPub) {
        let run = RunPub {
            name: name.into(),
            run_digest: format!("d-{name}"),
            create_date_time: created.into(),
            ..RunPub::default()
        };
        (PathBuf::from("/in").join(file), run)
    }

    fn docs() -> Vec<(PathBuf, RunPub)> {
        vec![
            run_doc("modelOne.run.11.beta.json", "beta", "2024-03-02 10:00:00.000"),
            run_doc("modelOne.run.alpha.json", "alpha", "2024-03-01 10:00:00.000"),
            run_doc("modelOne.run.12.gamma.json", "gamma", "2024-03-03 10:00:00.000"),
        ]
    }

    fn picked(sel: &RunRef) -> String {
        select_run(docs(), "modelOne", sel).map(|(_, r)| r.name).unwrap_or_default()
    }

    #[test]
    fn run_documents_are_selected_by_every_kind_of_reference() {
        assert_eq!(picked(&RunRef::Id(12)), "gamma");
        assert_eq!(picked(&RunRef::Id(1)), "");
        assert_eq!(picked(&RunRef::Digest("d-beta".into())), "beta");
        assert_eq!(picked(&RunRef::Name("alpha".into())), "alpha");
        assert_eq!(picked(&RunRef::First), "alpha");
        assert_eq!(picked(&RunRef::Last), "gamma");
    }

    #[test]
    fn missing_model_document_is_not_found() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let err = match read_model_docs(tmp.path(), "modelOne", "") {
            Ok(_) => panic!("model found in an empty directory"),
            Err(err) => err,
        };
        assert_eq!(dbcopy_core::classify(err.as_ref()), dbcopy_core::ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn model_documents_are_found_by_digest() -> Result<()> {
        let meta = dbcopy_core::testing::model_one()?;
        let tmp = tempfile::tempdir()?;
        crate::files::write_json(&tmp.path().join("modelOne.model.json"), &meta)?;

        let docs = read_model_docs(tmp.path(), "", dbcopy_core::testing::MODEL_DIGEST)?;
        assert_eq!(docs.meta.model.name, dbcopy_core::testing::MODEL_NAME);
        assert!(docs.lang.lang.is_empty());
        Ok(())
    }
}

//! Input sets (worksets) in database and public form.

use serde::{Deserialize, Serialize};

use crate::error::{DbcopyError, Result};
use crate::model::{check_model_identity, ModelMeta};
use crate::progress::ProgressSink;
use crate::run::{DescrNote, LangNote};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct WorksetRow {
    pub set_id: i32,
    /// Zero when the set has no base run.
    pub base_run_id: i32,
    pub model_id: i32,
    pub name: String,
    pub is_readonly: bool,
    pub update_date_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorksetParam {
    pub param_hid: i32,
    pub sub_count: i32,
    pub default_sub_id: i32,
    pub txt: Vec<LangNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorksetMeta {
    pub set: WorksetRow,
    pub txt: Vec<DescrNote>,
    pub param: Vec<WorksetParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamSetPub {
    pub name: String,
    pub sub_count: i32,
    #[serde(default)]
    pub default_sub_id: i32,
    #[serde(default)]
    pub txt: Vec<LangNote>,
}

/// Workset addressed by names, the content of `{model}.set.{id}.{name}.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct WorksetPub {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    #[serde(default)]
    pub base_run_digest: String,
    pub is_readonly: bool,
    #[serde(default)]
    pub update_date_time: String,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    #[serde(default)]
    pub param: Vec<ParamSetPub>,
}

impl WorksetMeta {
    /// # Errors
    /// Returns `NotFound` when a parameter hid is not part of the model.
    pub fn to_public(&self, meta: &ModelMeta, base_run_digest: &str) -> Result<WorksetPub> {
        let mut param = Vec::with_capacity(self.param.len());
        for wp in &self.param {
            let idx = meta.param_by_hid(wp.param_hid).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "parameter {} not found in model {}, workset {}",
                    wp.param_hid, meta.model.name, self.set.name
                ))
            })?;
            param.push(ParamSetPub {
                name: meta.param[idx].param.name.clone(),
                sub_count: wp.sub_count,
                default_sub_id: wp.default_sub_id,
                txt: wp.txt.clone(),
            });
        }
        Ok(WorksetPub {
            model_name: meta.model.name.clone(),
            model_digest: meta.model.digest.clone(),
            name: self.set.name.clone(),
            base_run_digest: base_run_digest.to_string(),
            is_readonly: self.set.is_readonly,
            update_date_time: self.set.update_date_time.clone(),
            txt: self.txt.clone(),
            param,
        })
    }
}

impl WorksetPub {
    /// Convert to database form. `resolve_base_run` maps the base run digest to
    /// a destination run id; an unresolved digest clears the base run and is
    /// reported as a warning.
    ///
    /// # Errors
    /// Returns an error on model identity mismatch, an empty set name or an
    /// unknown parameter name.
    pub fn from_public(
        &self,
        meta: &ModelMeta,
        check_digest: bool,
        resolve_base_run: impl FnOnce(&str) -> Result<Option<i32>>,
        progress: &dyn ProgressSink,
    ) -> Result<WorksetMeta> {
        check_model_identity(&self.model_name, &self.model_digest, &meta.model, check_digest)?;
        if self.name.is_empty() {
            return Err(DbcopyError::invalid(format!(
                "workset name is empty, model {}",
                meta.model.name
            )));
        }

        let base_run_id = if self.base_run_digest.is_empty() {
            0
        } else if let Some(id) = resolve_base_run(&self.base_run_digest)? {
            id
        } else {
            progress.warn(&format!(
                "Warning: workset {} base run not found by digest {}",
                self.name, self.base_run_digest
            ));
            0
        };

        let mut param = Vec::with_capacity(self.param.len());
        for pp in &self.param {
            let idx = meta.require_param(&pp.name)?;
            param.push(WorksetParam {
                param_hid: meta.param[idx].param.param_hid,
                sub_count: pp.sub_count,
                default_sub_id: pp.default_sub_id,
                txt: pp.txt.clone(),
            });
        }

        Ok(WorksetMeta {
            set: WorksetRow {
                set_id: 0,
                base_run_id,
                model_id: meta.model.model_id,
                name: self.name.clone(),
                is_readonly: self.is_readonly,
                update_date_time: self.update_date_time.clone(),
            },
            txt: self.txt.clone(),
            param,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgress;
    use crate::testing::{model_one, set_one};

    #[test]
    fn missing_base_run_becomes_zero_with_warning() -> anyhow::Result<()> {
        let meta = model_one()?;
        let set = set_one(&meta, 3, "Default");
        let pub_set = set.to_public(&meta, "no-such-run")?;
        let progress = MemoryProgress::default();
        let db = pub_set.from_public(&meta, true, |_| Ok(None), &progress)?;
        assert_eq!(db.set.base_run_id, 0);
        assert_eq!(progress.warnings().len(), 1);
        assert!(progress.warnings()[0].contains("no-such-run"));
        Ok(())
    }

    #[test]
    fn resolved_base_run_is_kept() -> anyhow::Result<()> {
        let meta = model_one()?;
        let pub_set = set_one(&meta, 3, "Default").to_public(&meta, "r42")?;
        let progress = MemoryProgress::default();
        let db = pub_set.from_public(&meta, true, |d| Ok((d == "r42").then_some(11)), &progress)?;
        assert_eq!(db.set.base_run_id, 11);
        assert!(progress.warnings().is_empty());
        assert_eq!(db.param.len(), set_one(&meta, 3, "Default").param.len());
        Ok(())
    }

    #[test]
    fn digest_mismatch_is_precondition() -> anyhow::Result<()> {
        let meta = model_one()?;
        let mut pub_set = set_one(&meta, 3, "Default").to_public(&meta, "")?;
        pub_set.model_digest = "other".to_string();
        let progress = MemoryProgress::default();
        match pub_set.from_public(&meta, true, |_| Ok(None), &progress) {
            Ok(_) => panic!("expected digest mismatch"),
            Err(err) => assert_eq!(err.kind(), crate::ErrorKind::Precondition),
        }
        assert!(pub_set.from_public(&meta, false, |_| Ok(None), &progress).is_ok());
        Ok(())
    }
}

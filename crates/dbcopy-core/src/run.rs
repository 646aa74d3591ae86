//! Model run metadata in database form ([`RunMeta`]) and public form ([`RunPub`]).

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{DbcopyError, Result};
use crate::model::{check_model_identity, ModelMeta};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
pub enum RunStatus {
    #[default]
    #[serde(rename = "i")]
    Init,
    #[serde(rename = "p")]
    Progress,
    #[serde(rename = "s")]
    Success,
    #[serde(rename = "x")]
    Exit,
    #[serde(rename = "e")]
    Error,
    #[serde(rename = "d")]
    Delete,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "i",
            Self::Progress => "p",
            Self::Success => "s",
            Self::Exit => "x",
            Self::Error => "e",
            Self::Delete => "d",
        }
    }

    /// # Errors
    /// Returns `InvalidArgument` for an unknown status code.
    pub fn parse(code: &str) -> Result<Self> {
        match code.trim() {
            "i" => Ok(Self::Init),
            "p" => Ok(Self::Progress),
            "s" => Ok(Self::Success),
            "x" => Ok(Self::Exit),
            "e" => Ok(Self::Error),
            "d" => Ok(Self::Delete),
            other => Err(DbcopyError::invalid(format!("invalid run status: {other}"))),
        }
    }

    /// Success, exit and error are final states.
    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Success | Self::Exit | Self::Error)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp in the `2024-03-01 10:20:30.123` form used by every `*_date_time` column.
#[must_use]
pub fn make_date_time(dt: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

#[must_use]
pub fn now_date_time() -> String {
    make_date_time(OffsetDateTime::now_utc())
}

/// Run stamp derived from a timestamp: `2024_03_01_10_20_30_123`.
#[must_use]
pub fn stamp_from_date_time(dt: &str) -> String {
    dt.chars()
        .map(|c| if c.is_ascii_digit() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RunRow {
    pub run_id: i32,
    pub model_id: i32,
    pub name: String,
    pub sub_count: i32,
    pub sub_started: i32,
    pub sub_completed: i32,
    pub sub_restart: i32,
    pub create_date_time: String,
    pub status: RunStatus,
    pub update_date_time: String,
    pub run_digest: String,
    pub value_digest: String,
    pub run_stamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescrNote {
    pub lang_code: String,
    pub descr: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LangNote {
    pub lang_code: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunParam {
    pub param_hid: i32,
    pub sub_count: i32,
    pub value_digest: String,
    /// Run holding the value rows; equal to the run itself unless the values
    /// are shared with an earlier run with the same value digest.
    pub base_run_id: i32,
    pub txt: Vec<LangNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunTable {
    pub table_hid: i32,
    pub value_digest: String,
    pub base_run_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunEntity {
    pub entity_hid: i32,
    pub value_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RunProgress {
    pub sub_id: i32,
    pub create_date_time: String,
    pub status: RunStatus,
    pub update_date_time: String,
    pub count: i32,
    pub value: f64,
}

/// Run metadata as stored in one database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunMeta {
    pub run: RunRow,
    pub txt: Vec<DescrNote>,
    pub opts: BTreeMap<String, String>,
    pub param: Vec<RunParam>,
    pub table: Vec<RunTable>,
    pub entity: Vec<RunEntity>,
    pub progress: Vec<RunProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamRunPub {
    pub name: String,
    pub sub_count: i32,
    #[serde(default)]
    pub value_digest: String,
    #[serde(default)]
    pub txt: Vec<LangNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableRunPub {
    pub name: String,
    #[serde(default)]
    pub value_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityRunPub {
    pub name: String,
    #[serde(default)]
    pub value_digest: String,
}

/// Run metadata addressed by names and digests, the content of
/// `{model}.run.{id}.{name}.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RunPub {
    pub model_name: String,
    pub model_digest: String,
    #[serde(default)]
    pub model_version: String,
    #[serde(default)]
    pub model_create_date_time: String,
    pub name: String,
    pub sub_count: i32,
    pub sub_started: i32,
    pub sub_completed: i32,
    pub create_date_time: String,
    pub status: RunStatus,
    pub update_date_time: String,
    pub run_digest: String,
    #[serde(default)]
    pub value_digest: String,
    pub run_stamp: String,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
    #[serde(default)]
    pub param: Vec<ParamRunPub>,
    #[serde(default)]
    pub table: Vec<TableRunPub>,
    #[serde(default)]
    pub entity: Vec<EntityRunPub>,
    #[serde(default)]
    pub progress: Vec<RunProgress>,
}

impl RunMeta {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.run.status.is_completed()
    }

    /// Convert to the public form, resolving every hid through the model.
    ///
    /// # Errors
    /// Returns `NotFound` when a parameter, table or entity hid is not part of the model.
    pub fn to_public(&self, meta: &ModelMeta) -> Result<RunPub> {
        let mut param = Vec::with_capacity(self.param.len());
        for rp in &self.param {
            let idx = meta.param_by_hid(rp.param_hid).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "parameter {} not found in model {}, run {}",
                    rp.param_hid, meta.model.name, self.run.name
                ))
            })?;
            param.push(ParamRunPub {
                name: meta.param[idx].param.name.clone(),
                sub_count: rp.sub_count,
                value_digest: rp.value_digest.clone(),
                txt: rp.txt.clone(),
            });
        }

        let mut table = Vec::with_capacity(self.table.len());
        for rt in &self.table {
            let idx = meta.out_table_by_hid(rt.table_hid).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "output table {} not found in model {}, run {}",
                    rt.table_hid, meta.model.name, self.run.name
                ))
            })?;
            table.push(TableRunPub {
                name: meta.table[idx].table.name.clone(),
                value_digest: rt.value_digest.clone(),
            });
        }

        let mut entity = Vec::with_capacity(self.entity.len());
        for re in &self.entity {
            let idx = meta.entity_by_hid(re.entity_hid).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "entity {} not found in model {}, run {}",
                    re.entity_hid, meta.model.name, self.run.name
                ))
            })?;
            entity.push(EntityRunPub {
                name: meta.entity[idx].entity.name.clone(),
                value_digest: re.value_digest.clone(),
            });
        }

        Ok(RunPub {
            model_name: meta.model.name.clone(),
            model_digest: meta.model.digest.clone(),
            model_version: meta.model.version.clone(),
            model_create_date_time: meta.model.create_date_time.clone(),
            name: self.run.name.clone(),
            sub_count: self.run.sub_count,
            sub_started: self.run.sub_started,
            sub_completed: self.run.sub_completed,
            create_date_time: self.run.create_date_time.clone(),
            status: self.run.status,
            update_date_time: self.run.update_date_time.clone(),
            run_digest: self.run.run_digest.clone(),
            value_digest: self.run.value_digest.clone(),
            run_stamp: self.run.run_stamp.clone(),
            txt: self.txt.clone(),
            opts: self.opts.clone(),
            param,
            table,
            entity,
            progress: self.progress.clone(),
        })
    }
}

impl RunPub {
    /// Convert to database form for the destination model. The run id stays 0
    /// until the run is inserted.
    ///
    /// # Errors
    /// Returns an error when the model identity does not match or a name cannot
    /// be resolved in the destination model.
    pub fn from_public(&self, meta: &ModelMeta, check_digest: bool) -> Result<RunMeta> {
        check_model_identity(&self.model_name, &self.model_digest, &meta.model, check_digest)?;
        if self.name.is_empty() {
            return Err(DbcopyError::invalid(format!(
                "model run name is empty, model {}",
                meta.model.name
            )));
        }

        let mut param = Vec::with_capacity(self.param.len());
        for pp in &self.param {
            let idx = meta.require_param(&pp.name)?;
            param.push(RunParam {
                param_hid: meta.param[idx].param.param_hid,
                sub_count: pp.sub_count,
                value_digest: pp.value_digest.clone(),
                base_run_id: 0,
                txt: pp.txt.clone(),
            });
        }

        let mut table = Vec::with_capacity(self.table.len());
        for tp in &self.table {
            let idx = meta.require_table(&tp.name)?;
            table.push(RunTable {
                table_hid: meta.table[idx].table.table_hid,
                value_digest: tp.value_digest.clone(),
                base_run_id: 0,
            });
        }

        let mut entity = Vec::with_capacity(self.entity.len());
        for ep in &self.entity {
            let idx = meta.entity_by_name(&ep.name).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "entity {} not found in model {}",
                    ep.name, meta.model.name
                ))
            })?;
            entity.push(RunEntity {
                entity_hid: meta.entity[idx].entity.entity_hid,
                value_digest: ep.value_digest.clone(),
            });
        }

        Ok(RunMeta {
            run: RunRow {
                run_id: 0,
                model_id: meta.model.model_id,
                name: self.name.clone(),
                sub_count: self.sub_count,
                sub_started: self.sub_started,
                sub_completed: self.sub_completed,
                sub_restart: 0,
                create_date_time: self.create_date_time.clone(),
                status: self.status,
                update_date_time: self.update_date_time.clone(),
                run_digest: self.run_digest.clone(),
                value_digest: self.value_digest.clone(),
                run_stamp: self.run_stamp.clone(),
            },
            txt: self.txt.clone(),
            opts: self.opts.clone(),
            param,
            table,
            entity,
            progress: self.progress.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model_one, run_one};

    #[test]
    fn timestamps_and_stamps_share_digits() -> anyhow::Result<()> {
        let dt = time::OffsetDateTime::from_unix_timestamp(1_709_288_430)?;
        let text = make_date_time(dt);
        assert_eq!(text, "2024-03-01 10:20:30.000");
        assert_eq!(stamp_from_date_time(&text), "2024_03_01_10_20_30_000");
        Ok(())
    }

    #[test]
    fn completed_statuses() {
        assert!(RunStatus::Success.is_completed());
        assert!(RunStatus::Exit.is_completed());
        assert!(RunStatus::Error.is_completed());
        assert!(!RunStatus::Progress.is_completed());
        assert!(!RunStatus::Init.is_completed());
        assert!(RunStatus::parse("q").is_err());
    }

    #[test]
    fn public_form_round_trip_maps_hids_to_names() -> anyhow::Result<()> {
        let meta = model_one()?;
        let run = run_one(&meta, 42, "my run");
        let pub_run = run.to_public(&meta)?;
        assert_eq!(pub_run.param[0].name, "ageSex");
        assert_eq!(pub_run.run_digest, run.run.run_digest);

        let json = serde_json::to_string(&pub_run)?;
        assert!(json.contains("\"Status\":\"s\""));
        let back: RunPub = serde_json::from_str(&json)?;
        let db = back.from_public(&meta, true)?;
        assert_eq!(db.run.run_id, 0);
        assert_eq!(db.param.len(), run.param.len());
        assert_eq!(db.param[0].param_hid, run.param[0].param_hid);
        assert_eq!(db.table[0].table_hid, run.table[0].table_hid);
        Ok(())
    }

    #[test]
    fn unknown_parameter_name_is_not_found() -> anyhow::Result<()> {
        let meta = model_one()?;
        let mut pub_run = run_one(&meta, 1, "r").to_public(&meta)?;
        pub_run.param[0].name = "noSuchParam".to_string();
        let err = match pub_run.from_public(&meta, true) {
            Ok(_) => panic!("expected not found"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        Ok(())
    }
}

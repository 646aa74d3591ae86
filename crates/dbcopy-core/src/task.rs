//! Modeling tasks: a static list of worksets plus the history of task runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DbcopyError, Result};
use crate::model::{check_model_identity, ModelMeta};
use crate::run::{DescrNote, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskRow {
    pub task_id: i32,
    pub model_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskRunRow {
    pub task_run_id: i32,
    pub task_id: i32,
    pub name: String,
    pub sub_count: i32,
    pub create_date_time: String,
    pub status: RunStatus,
    pub update_date_time: String,
    pub run_stamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskRunSetRow {
    pub run_id: i32,
    pub set_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskRunMeta {
    pub run: TaskRunRow,
    pub task_run_set: Vec<TaskRunSetRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskMeta {
    pub task: TaskRow,
    pub txt: Vec<DescrNote>,
    /// Set ids of the task body.
    pub set: Vec<i32>,
    pub task_run: Vec<TaskRunMeta>,
}

/// Reference to a model run inside task history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TaskRunRef {
    pub name: String,
    #[serde(default)]
    pub sub_completed: i32,
    #[serde(default)]
    pub create_date_time: String,
    pub run_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TaskRunSetPub {
    pub run: TaskRunRef,
    pub set_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TaskRunPub {
    pub name: String,
    pub sub_count: i32,
    pub create_date_time: String,
    pub status: RunStatus,
    pub update_date_time: String,
    #[serde(default)]
    pub run_stamp: String,
    #[serde(default)]
    pub task_run_set: Vec<TaskRunSetPub>,
}

/// Task addressed by set names and run digests, `{model}.task.{id}.{name}.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TaskPub {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    #[serde(default)]
    pub set: Vec<String>,
    #[serde(default)]
    pub task_run: Vec<TaskRunPub>,
}

/// Database-form task produced from a public document, with flags telling
/// whether any part of it had to be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskImport {
    pub meta: TaskMeta,
    pub is_set_not_found: bool,
    pub is_task_run_not_found: bool,
}

impl TaskMeta {
    /// `set_names` maps set id to set name and `runs` maps run id to its
    /// reference; history pairs with an unknown run or set are dropped.
    ///
    /// # Errors
    /// Returns `NotFound` when a set of the task body has no name.
    pub fn to_public(
        &self,
        meta: &ModelMeta,
        set_names: &BTreeMap<i32, String>,
        runs: &BTreeMap<i32, TaskRunRef>,
    ) -> Result<TaskPub> {
        let mut set = Vec::with_capacity(self.set.len());
        for set_id in &self.set {
            let name = set_names.get(set_id).ok_or_else(|| {
                DbcopyError::not_found(format!(
                    "workset {set_id} not found, task {}",
                    self.task.name
                ))
            })?;
            set.push(name.clone());
        }

        let task_run = self
            .task_run
            .iter()
            .map(|tr| TaskRunPub {
                name: tr.run.name.clone(),
                sub_count: tr.run.sub_count,
                create_date_time: tr.run.create_date_time.clone(),
                status: tr.run.status,
                update_date_time: tr.run.update_date_time.clone(),
                run_stamp: tr.run.run_stamp.clone(),
                task_run_set: tr
                    .task_run_set
                    .iter()
                    .filter_map(|trs| {
                        let run = runs.get(&trs.run_id)?;
                        let set_name = set_names.get(&trs.set_id)?;
                        Some(TaskRunSetPub { run: run.clone(), set_name: set_name.clone() })
                    })
                    .collect(),
            })
            .collect();

        Ok(TaskPub {
            model_name: meta.model.name.clone(),
            model_digest: meta.model.digest.clone(),
            name: self.task.name.clone(),
            txt: self.txt.clone(),
            set,
            task_run,
        })
    }
}

impl TaskPub {
    /// `set_ids` maps destination set names to ids, `run_ids` maps destination
    /// run digests to ids. Unresolvable sets and (run, set) pairs are dropped
    /// and reported through the returned flags.
    ///
    /// # Errors
    /// Returns an error on model identity mismatch or an empty task name.
    pub fn from_public(
        &self,
        meta: &ModelMeta,
        check_digest: bool,
        set_ids: &BTreeMap<String, i32>,
        run_ids: &BTreeMap<String, i32>,
    ) -> Result<TaskImport> {
        check_model_identity(&self.model_name, &self.model_digest, &meta.model, check_digest)?;
        if self.name.is_empty() {
            return Err(DbcopyError::invalid(format!(
                "task name is empty, model {}",
                meta.model.name
            )));
        }

        let mut is_set_not_found = false;
        let mut set = Vec::with_capacity(self.set.len());
        for name in &self.set {
            match set_ids.get(name) {
                Some(&id) => set.push(id),
                None => is_set_not_found = true,
            }
        }

        let mut is_task_run_not_found = false;
        let mut task_run = Vec::with_capacity(self.task_run.len());
        for tr in &self.task_run {
            let mut pairs = Vec::with_capacity(tr.task_run_set.len());
            for trs in &tr.task_run_set {
                match (run_ids.get(&trs.run.run_digest), set_ids.get(&trs.set_name)) {
                    (Some(&run_id), Some(&set_id)) => pairs.push(TaskRunSetRow { run_id, set_id }),
                    _ => is_task_run_not_found = true,
                }
            }
            task_run.push(TaskRunMeta {
                run: TaskRunRow {
                    task_run_id: 0,
                    task_id: 0,
                    name: tr.name.clone(),
                    sub_count: tr.sub_count,
                    create_date_time: tr.create_date_time.clone(),
                    status: tr.status,
                    update_date_time: tr.update_date_time.clone(),
                    run_stamp: tr.run_stamp.clone(),
                },
                task_run_set: pairs,
            });
        }

        Ok(TaskImport {
            meta: TaskMeta {
                task: TaskRow { task_id: 0, model_id: meta.model.model_id, name: self.name.clone() },
                txt: self.txt.clone(),
                set,
                task_run,
            },
            is_set_not_found,
            is_task_run_not_found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::model_one;

    fn task_with_history() -> TaskMeta {
        TaskMeta {
            task: TaskRow { task_id: 1, model_id: 1, name: "taskOne".into() },
            txt: vec![],
            set: vec![2, 3],
            task_run: vec![TaskRunMeta {
                run: TaskRunRow {
                    task_run_id: 5,
                    task_id: 1,
                    name: "first".into(),
                    sub_count: 1,
                    create_date_time: "2024-01-01 00:00:00.000".into(),
                    status: RunStatus::Success,
                    update_date_time: "2024-01-01 00:00:01.000".into(),
                    run_stamp: "2024_01_01_00_00_00_000".into(),
                },
                task_run_set: vec![
                    TaskRunSetRow { run_id: 11, set_id: 2 },
                    TaskRunSetRow { run_id: 12, set_id: 3 },
                ],
            }],
        }
    }

    fn run_ref(digest: &str) -> TaskRunRef {
        TaskRunRef { name: digest.into(), sub_completed: 1, create_date_time: String::new(), run_digest: digest.into() }
    }

    #[test]
    fn missing_run_is_dropped_and_flagged() -> anyhow::Result<()> {
        let meta = model_one()?;
        let set_names = BTreeMap::from([(2, "Default".to_string()), (3, "other".to_string())]);
        let runs = BTreeMap::from([(11, run_ref("r11")), (12, run_ref("gone"))]);
        let pub_task = task_with_history().to_public(&meta, &set_names, &runs)?;
        assert_eq!(pub_task.set, vec!["Default", "other"]);
        assert_eq!(pub_task.task_run[0].task_run_set.len(), 2);

        let set_ids = BTreeMap::from([("Default".to_string(), 20), ("other".to_string(), 30)]);
        let run_ids = BTreeMap::from([("r11".to_string(), 110)]);
        let imported = pub_task.from_public(&meta, true, &set_ids, &run_ids)?;
        assert!(!imported.is_set_not_found);
        assert!(imported.is_task_run_not_found);
        assert_eq!(imported.meta.set, vec![20, 30]);
        assert_eq!(
            imported.meta.task_run[0].task_run_set,
            vec![TaskRunSetRow { run_id: 110, set_id: 20 }]
        );
        Ok(())
    }

    #[test]
    fn missing_set_is_flagged() -> anyhow::Result<()> {
        let meta = model_one()?;
        let set_names = BTreeMap::from([(2, "Default".to_string()), (3, "other".to_string())]);
        let pub_task = task_with_history().to_public(&meta, &set_names, &BTreeMap::new())?;
        assert!(pub_task.task_run[0].task_run_set.is_empty());
        let set_ids = BTreeMap::from([("Default".to_string(), 20)]);
        let imported = pub_task.from_public(&meta, true, &set_ids, &BTreeMap::new())?;
        assert!(imported.is_set_not_found);
        assert!(!imported.is_task_run_not_found);
        assert_eq!(imported.meta.set, vec![20]);
        Ok(())
    }
}

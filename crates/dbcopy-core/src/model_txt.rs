//! Language-specific descriptions and notes of model metadata.
//!
//! Rows carry the language code rather than the database language id so that
//! `{model}.text.json` can be read into any database.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelTxtRow {
    pub model_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeTxtRow {
    pub model_id: i32,
    pub type_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeEnumTxtRow {
    pub model_id: i32,
    pub type_id: i32,
    pub enum_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamTxtRow {
    pub model_id: i32,
    pub param_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamDimsTxtRow {
    pub model_id: i32,
    pub param_id: i32,
    pub dim_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableTxtRow {
    pub model_id: i32,
    pub table_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
    pub expr_descr: String,
    pub expr_note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableDimsTxtRow {
    pub model_id: i32,
    pub table_id: i32,
    pub dim_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableAccTxtRow {
    pub model_id: i32,
    pub table_id: i32,
    pub acc_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableExprTxtRow {
    pub model_id: i32,
    pub table_id: i32,
    pub expr_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityTxtRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityAttrTxtRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub attr_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupTxtRow {
    pub model_id: i32,
    pub group_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityGroupTxtRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub group_id: i32,
    pub lang_code: String,
    pub descr: String,
    pub note: String,
}

/// Content of `{model}.text.json`. Group text travels in the group document
/// but is loaded and stored together with the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelTxtMeta {
    pub model_name: String,
    pub model_digest: String,
    #[serde(default)]
    pub model_txt: Vec<ModelTxtRow>,
    #[serde(default)]
    pub type_txt: Vec<TypeTxtRow>,
    #[serde(default)]
    pub type_enum_txt: Vec<TypeEnumTxtRow>,
    #[serde(default)]
    pub param_txt: Vec<ParamTxtRow>,
    #[serde(default)]
    pub param_dims_txt: Vec<ParamDimsTxtRow>,
    #[serde(default)]
    pub table_txt: Vec<TableTxtRow>,
    #[serde(default)]
    pub table_dims_txt: Vec<TableDimsTxtRow>,
    #[serde(default)]
    pub table_acc_txt: Vec<TableAccTxtRow>,
    #[serde(default)]
    pub table_expr_txt: Vec<TableExprTxtRow>,
    #[serde(default)]
    pub entity_txt: Vec<EntityTxtRow>,
    #[serde(default)]
    pub entity_attr_txt: Vec<EntityAttrTxtRow>,
    #[serde(skip)]
    pub group_txt: Vec<GroupTxtRow>,
    #[serde(skip)]
    pub entity_group_txt: Vec<EntityGroupTxtRow>,
}

/// Group text, stored next to the group forest in `{model}.group.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupTxtMeta {
    #[serde(default)]
    pub group_txt: Vec<GroupTxtRow>,
    #[serde(default)]
    pub entity_group_txt: Vec<EntityGroupTxtRow>,
}

impl ModelTxtMeta {
    /// Set the model id of every row to the destination model id.
    pub fn set_model_id(&mut self, model_id: i32) {
        self.model_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.type_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.type_enum_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.param_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.param_dims_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.table_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.table_dims_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.table_acc_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.table_expr_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.entity_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.entity_attr_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.group_txt.iter_mut().for_each(|r| r.model_id = model_id);
        self.entity_group_txt.iter_mut().for_each(|r| r.model_id = model_id);
    }

    #[must_use]
    pub fn group_txt_meta(&self) -> GroupTxtMeta {
        GroupTxtMeta {
            group_txt: self.group_txt.clone(),
            entity_group_txt: self.entity_group_txt.clone(),
        }
    }

    /// Number of text rows, used for progress messages.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.model_txt.len()
            + self.type_txt.len()
            + self.type_enum_txt.len()
            + self.param_txt.len()
            + self.param_dims_txt.len()
            + self.table_txt.len()
            + self.table_dims_txt.len()
            + self.table_acc_txt.len()
            + self.table_expr_txt.len()
            + self.entity_txt.len()
            + self.entity_attr_txt.len()
            + self.group_txt.len()
            + self.entity_group_txt.len()
    }
}

/// One model profile: a named set of run options, `{model}.profile.json`
/// holds all profiles of the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ProfileMeta {
    pub name: String,
    #[serde(default)]
    pub opts: std::collections::BTreeMap<String, String>,
}

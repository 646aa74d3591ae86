//! In-memory model metadata graph.
//!
//! A [`ModelMeta`] owns its types, parameters, output tables, entities and
//! groups. Cross references between them use model-local ids on the wire and
//! array indexes in memory; the indexes and derived column names are rebuilt by
//! [`ModelMeta::update_internals`] after every load or deserialization.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DbcopyError, Result};

/// Largest hid reserved for built-in types.
pub const BUILTIN_TYPE_MAX_HID: i32 = 100;

/// Code of the synthetic "total" enum of a dimension with totals.
pub const TOTAL_ENUM_CODE: &str = "all";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DicKind {
    Simple,
    Logical,
    Classification,
    Range,
    Partition,
    Link,
}

impl DicKind {
    #[must_use]
    pub fn from_id(dic_id: i32) -> Option<Self> {
        match dic_id {
            0 => Some(Self::Simple),
            1 => Some(Self::Logical),
            2 => Some(Self::Classification),
            3 => Some(Self::Range),
            4 => Some(Self::Partition),
            5 => Some(Self::Link),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> i32 {
        match self {
            Self::Simple => 0,
            Self::Logical => 1,
            Self::Classification => 2,
            Self::Range => 3,
            Self::Partition => 4,
            Self::Link => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelDicRow {
    pub model_id: i32,
    pub name: String,
    pub digest: String,
    pub model_type: i32,
    pub version: String,
    pub create_date_time: String,
    pub default_lang_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeDicRow {
    pub model_id: i32,
    pub type_id: i32,
    #[serde(skip)]
    pub type_hid: i32,
    pub name: String,
    pub digest: String,
    pub dic_id: i32,
    pub total_enum_id: i32,
    #[serde(default)]
    pub is_range: bool,
    #[serde(default)]
    pub min_enum_id: i32,
    #[serde(default)]
    pub max_enum_id: i32,
}

impl TypeDicRow {
    #[must_use]
    pub fn dic_kind(&self) -> Option<DicKind> {
        DicKind::from_id(self.dic_id)
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        self.name == "bool"
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        self.name == "file"
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self.name.as_str(), "float" | "double" | "ldouble" | "time" | "real")
    }

    #[must_use]
    pub fn is_int(&self) -> bool {
        !self.is_bool() && !self.is_string() && !self.is_float()
    }

    /// Built-in types share a reserved hid range in every database.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.type_hid > 0 && self.type_hid <= BUILTIN_TYPE_MAX_HID
    }

    /// True for types whose values are enum ids: classifications, ranges,
    /// partitions and the logical type.
    #[must_use]
    pub fn is_enum_based(&self) -> bool {
        !matches!(self.dic_kind(), Some(DicKind::Simple) | None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeEnumRow {
    pub model_id: i32,
    pub type_id: i32,
    pub enum_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TypeMeta {
    #[serde(rename = "Type")]
    pub type_dic: TypeDicRow,
    #[serde(rename = "Enum", default)]
    pub enums: Vec<TypeEnumRow>,
}

impl TypeMeta {
    /// Number of distinct enum values, excluding the synthetic total.
    #[must_use]
    pub fn size_of(&self) -> usize {
        if self.type_dic.is_range {
            let span = i64::from(self.type_dic.max_enum_id) - i64::from(self.type_dic.min_enum_id) + 1;
            usize::try_from(span).unwrap_or(0)
        } else {
            self.enums.len()
        }
    }

    #[must_use]
    pub fn enum_code_by_id(&self, enum_id: i32) -> Option<String> {
        if self.type_dic.is_range {
            return (self.type_dic.min_enum_id..=self.type_dic.max_enum_id)
                .contains(&enum_id)
                .then(|| enum_id.to_string());
        }
        self.enums
            .binary_search_by_key(&enum_id, |e| e.enum_id)
            .ok()
            .map(|idx| self.enums[idx].name.clone())
    }

    #[must_use]
    pub fn enum_id_by_code(&self, code: &str) -> Option<i32> {
        if self.type_dic.is_range {
            let id = code.trim().parse::<i32>().ok()?;
            return (self.type_dic.min_enum_id..=self.type_dic.max_enum_id)
                .contains(&id)
                .then_some(id);
        }
        self.enums.iter().find(|e| e.name == code).map(|e| e.enum_id)
    }

    #[must_use]
    pub fn has_enum_id(&self, enum_id: i32) -> bool {
        if self.type_dic.is_range {
            return (self.type_dic.min_enum_id..=self.type_dic.max_enum_id).contains(&enum_id);
        }
        self.enums.binary_search_by_key(&enum_id, |e| e.enum_id).is_ok()
    }

    /// All enum ids in ascending order, materializing a range.
    #[must_use]
    pub fn enum_ids(&self) -> Vec<i32> {
        if self.type_dic.is_range {
            (self.type_dic.min_enum_id..=self.type_dic.max_enum_id).collect()
        } else {
            self.enums.iter().map(|e| e.enum_id).collect()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamDicRow {
    pub model_id: i32,
    pub param_id: i32,
    #[serde(skip)]
    pub param_hid: i32,
    pub name: String,
    pub digest: String,
    pub rank: i32,
    pub type_id: i32,
    pub is_extendable: bool,
    pub is_hidden: bool,
    pub num_cumulated: i32,
    pub db_run_table: String,
    pub db_set_table: String,
    #[serde(default)]
    pub import_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamDimsRow {
    pub model_id: i32,
    pub param_id: i32,
    pub dim_id: i32,
    pub name: String,
    pub type_id: i32,
    #[serde(skip)]
    pub type_index: usize,
    #[serde(skip)]
    pub col_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamImportRow {
    pub model_id: i32,
    pub param_id: i32,
    pub from_name: String,
    pub from_model_name: String,
    pub is_sample_dim: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ParamMeta {
    #[serde(rename = "Param")]
    pub param: ParamDicRow,
    #[serde(rename = "Dim", default)]
    pub dims: Vec<ParamDimsRow>,
    #[serde(rename = "Import", default)]
    pub import: Vec<ParamImportRow>,
    #[serde(skip)]
    pub type_index: usize,
    #[serde(skip)]
    pub size_of: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableDicRow {
    pub model_id: i32,
    pub table_id: i32,
    #[serde(skip)]
    pub table_hid: i32,
    pub name: String,
    pub digest: String,
    pub is_user: bool,
    pub rank: i32,
    pub is_sparse: bool,
    pub db_expr_table: String,
    pub db_acc_table: String,
    pub db_acc_all_view: String,
    pub expr_pos: i32,
    pub is_hidden: bool,
    #[serde(default)]
    pub import_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableDimsRow {
    pub model_id: i32,
    pub table_id: i32,
    pub dim_id: i32,
    pub name: String,
    pub type_id: i32,
    pub is_total: bool,
    pub dim_size: i32,
    #[serde(skip)]
    pub type_index: usize,
    #[serde(skip)]
    pub col_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableAccRow {
    pub model_id: i32,
    pub table_id: i32,
    pub acc_id: i32,
    pub name: String,
    pub is_derived: bool,
    pub src_acc: String,
    pub acc_sql: String,
    #[serde(skip)]
    pub col_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableExprRow {
    pub model_id: i32,
    pub table_id: i32,
    pub expr_id: i32,
    pub name: String,
    pub decimals: i32,
    pub src_expr: String,
    pub expr_sql: String,
    #[serde(skip)]
    pub col_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct TableMeta {
    #[serde(rename = "Table")]
    pub table: TableDicRow,
    #[serde(rename = "Dim", default)]
    pub dims: Vec<TableDimsRow>,
    #[serde(rename = "Acc", default)]
    pub acc: Vec<TableAccRow>,
    #[serde(rename = "Expr", default)]
    pub expr: Vec<TableExprRow>,
}

impl TableMeta {
    #[must_use]
    pub fn expr_by_name(&self, name: &str) -> Option<&TableExprRow> {
        self.expr.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn acc_by_name(&self, name: &str) -> Option<&TableAccRow> {
        self.acc.iter().find(|a| a.name == name)
    }

    /// Accumulators physically stored in the accumulator table.
    pub fn stored_acc(&self) -> impl Iterator<Item = &TableAccRow> {
        self.acc.iter().filter(|a| !a.is_derived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityDicRow {
    pub model_id: i32,
    pub entity_id: i32,
    #[serde(skip)]
    pub entity_hid: i32,
    pub name: String,
    pub digest: String,
    #[serde(default)]
    pub db_entity_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityAttrRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub attr_id: i32,
    pub name: String,
    pub type_id: i32,
    pub is_internal: bool,
    #[serde(skip)]
    pub type_index: usize,
    #[serde(skip)]
    pub col_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityMeta {
    #[serde(rename = "Entity")]
    pub entity: EntityDicRow,
    #[serde(rename = "Attr", default)]
    pub attr: Vec<EntityAttrRow>,
}

impl EntityMeta {
    #[must_use]
    pub fn attr_by_name(&self, name: &str) -> Option<&EntityAttrRow> {
        self.attr.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupLstRow {
    pub model_id: i32,
    pub group_id: i32,
    pub is_param: bool,
    pub name: String,
    pub is_hidden: bool,
}

/// One edge of a parameter or table group forest: exactly one of
/// `child_group_id` and `leaf_id` is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupPcRow {
    pub model_id: i32,
    pub group_id: i32,
    pub child_pos: i32,
    pub child_group_id: Option<i32>,
    pub leaf_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityGroupLstRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub group_id: i32,
    pub name: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct EntityGroupPcRow {
    pub model_id: i32,
    pub entity_id: i32,
    pub group_id: i32,
    pub child_pos: i32,
    pub child_group_id: Option<i32>,
    pub attr_id: Option<i32>,
}

/// Group forests of a model, the content of `{model}.group.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMeta {
    pub model_name: String,
    pub model_digest: String,
    #[serde(default)]
    pub group: Vec<GroupLstRow>,
    #[serde(default)]
    pub group_pc: Vec<GroupPcRow>,
    #[serde(default)]
    pub entity_group: Vec<EntityGroupLstRow>,
    #[serde(default)]
    pub entity_group_pc: Vec<EntityGroupPcRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelMeta {
    pub model: ModelDicRow,
    #[serde(rename = "Type", default)]
    pub types: Vec<TypeMeta>,
    #[serde(rename = "Param", default)]
    pub param: Vec<ParamMeta>,
    #[serde(rename = "Table", default)]
    pub table: Vec<TableMeta>,
    #[serde(rename = "Entity", default)]
    pub entity: Vec<EntityMeta>,
    #[serde(skip)]
    pub group: Vec<GroupLstRow>,
    #[serde(skip)]
    pub group_pc: Vec<GroupPcRow>,
    #[serde(skip)]
    pub entity_group: Vec<EntityGroupLstRow>,
    #[serde(skip)]
    pub entity_group_pc: Vec<EntityGroupPcRow>,
}

impl ModelMeta {
    /// Restore non-serialized fields: sort order, type indexes, sizes and
    /// value-table column names.
    ///
    /// # Errors
    /// Returns [`DbcopyError::IntegrityMismatch`] when the model has no types or
    /// output tables, or when any type reference cannot be resolved.
    pub fn update_internals(&mut self) -> Result<()> {
        if self.types.is_empty() {
            return Err(DbcopyError::integrity(format!(
                "model {} has no types",
                self.model.name
            )));
        }
        if self.table.is_empty() {
            return Err(DbcopyError::integrity(format!(
                "model {} has no output tables",
                self.model.name
            )));
        }

        self.types.sort_by_key(|t| t.type_dic.type_id);
        for t in &mut self.types {
            t.enums.sort_by_key(|e| e.enum_id);
            if t.type_dic.dic_id == DicKind::Range.id() {
                t.type_dic.is_range = true;
            }
            if t.type_dic.is_range && !t.enums.is_empty() {
                t.type_dic.min_enum_id = t.enums.first().map_or(0, |e| e.enum_id);
                t.type_dic.max_enum_id = t.enums.last().map_or(0, |e| e.enum_id);
                t.enums.clear();
            }
        }

        let type_ids: Vec<i32> = self.types.iter().map(|t| t.type_dic.type_id).collect();
        let type_index = |type_id: i32, what: &str| -> Result<usize> {
            type_ids.binary_search(&type_id).map_err(|_| {
                DbcopyError::integrity(format!("type {type_id} not found for {what}"))
            })
        };

        self.param.sort_by_key(|p| p.param.param_id);
        for p in &mut self.param {
            p.type_index = type_index(p.param.type_id, &p.param.name)?;
            p.dims.sort_by_key(|d| d.dim_id);
            let mut size = 1_usize;
            for (pos, d) in p.dims.iter_mut().enumerate() {
                d.type_index = type_index(d.type_id, &p.param.name)?;
                d.col_name = format!("dim{pos}");
                size = size.saturating_mul(self.types[d.type_index].size_of());
            }
            p.size_of = size;
        }

        self.table.sort_by_key(|t| t.table.table_id);
        for t in &mut self.table {
            t.dims.sort_by_key(|d| d.dim_id);
            for (pos, d) in t.dims.iter_mut().enumerate() {
                d.type_index = type_index(d.type_id, &t.table.name)?;
                d.col_name = format!("dim{pos}");
            }
            t.acc.sort_by_key(|a| a.acc_id);
            for a in &mut t.acc {
                a.col_name = format!("acc{}", a.acc_id);
            }
            t.expr.sort_by_key(|e| e.expr_id);
            for e in &mut t.expr {
                e.col_name = format!("expr{}", e.expr_id);
            }
        }

        self.entity.sort_by_key(|e| e.entity.entity_id);
        for e in &mut self.entity {
            e.attr.sort_by_key(|a| a.attr_id);
            for a in &mut e.attr {
                a.type_index = type_index(a.type_id, &e.entity.name)?;
                a.col_name = format!("attr{}", a.attr_id);
            }
        }

        self.group.sort_by_key(|g| g.group_id);
        self.group_pc.sort_by_key(|g| (g.group_id, g.child_pos));
        self.entity_group.sort_by_key(|g| (g.entity_id, g.group_id));
        self.entity_group_pc.sort_by_key(|g| (g.entity_id, g.group_id, g.child_pos));
        validate_groups(self)?;
        Ok(())
    }

    /// Parse the public model document and restore internal fields.
    ///
    /// # Errors
    /// Returns an error when the JSON is invalid or the metadata is inconsistent.
    pub fn from_public_json(body: &[u8]) -> Result<Self> {
        let mut meta: Self = serde_json::from_slice(body)
            .map_err(|err| DbcopyError::Io(format!("invalid model json: {err}")))?;
        meta.update_internals()?;
        Ok(meta)
    }

    /// Deep copy that re-derives every internal field.
    ///
    /// # Errors
    /// Returns an error when the copy fails validation.
    pub fn clone_model(&self) -> Result<Self> {
        let mut copy = self.clone();
        copy.update_internals()?;
        Ok(copy)
    }

    #[must_use]
    pub fn group_meta(&self) -> GroupMeta {
        GroupMeta {
            model_name: self.model.name.clone(),
            model_digest: self.model.digest.clone(),
            group: self.group.clone(),
            group_pc: self.group_pc.clone(),
            entity_group: self.entity_group.clone(),
            entity_group_pc: self.entity_group_pc.clone(),
        }
    }

    /// Attach groups read from `{model}.group.json`.
    ///
    /// # Errors
    /// Returns an error when the groups belong to another model or the forest is invalid.
    pub fn set_groups(&mut self, groups: GroupMeta) -> Result<()> {
        if groups.model_name != self.model.name {
            return Err(DbcopyError::invalid(format!(
                "groups belong to model {} not {}",
                groups.model_name, self.model.name
            )));
        }
        self.group = groups.group;
        self.group_pc = groups.group_pc;
        self.entity_group = groups.entity_group;
        self.entity_group_pc = groups.entity_group_pc;
        for g in &mut self.group {
            g.model_id = self.model.model_id;
        }
        for g in &mut self.group_pc {
            g.model_id = self.model.model_id;
        }
        for g in &mut self.entity_group {
            g.model_id = self.model.model_id;
        }
        for g in &mut self.entity_group_pc {
            g.model_id = self.model.model_id;
        }
        validate_groups(self)
    }

    #[must_use]
    pub fn type_by_key(&self, type_id: i32) -> Option<usize> {
        self.types.binary_search_by_key(&type_id, |t| t.type_dic.type_id).ok()
    }

    #[must_use]
    pub fn param_by_key(&self, param_id: i32) -> Option<usize> {
        self.param.binary_search_by_key(&param_id, |p| p.param.param_id).ok()
    }

    #[must_use]
    pub fn param_by_name(&self, name: &str) -> Option<usize> {
        self.param.iter().position(|p| p.param.name == name)
    }

    #[must_use]
    pub fn param_by_digest(&self, digest: &str) -> Option<usize> {
        self.param.iter().position(|p| p.param.digest == digest)
    }

    #[must_use]
    pub fn param_by_hid(&self, hid: i32) -> Option<usize> {
        self.param.iter().position(|p| p.param.param_hid == hid)
    }

    #[must_use]
    pub fn param_id_by_hid(&self, hid: i32) -> Option<i32> {
        self.param_by_hid(hid).map(|idx| self.param[idx].param.param_id)
    }

    #[must_use]
    pub fn param_hid_by_id(&self, param_id: i32) -> Option<i32> {
        self.param_by_key(param_id).map(|idx| self.param[idx].param.param_hid)
    }

    #[must_use]
    pub fn out_table_by_key(&self, table_id: i32) -> Option<usize> {
        self.table.binary_search_by_key(&table_id, |t| t.table.table_id).ok()
    }

    #[must_use]
    pub fn out_table_by_name(&self, name: &str) -> Option<usize> {
        self.table.iter().position(|t| t.table.name == name)
    }

    #[must_use]
    pub fn out_table_by_digest(&self, digest: &str) -> Option<usize> {
        self.table.iter().position(|t| t.table.digest == digest)
    }

    #[must_use]
    pub fn out_table_by_hid(&self, hid: i32) -> Option<usize> {
        self.table.iter().position(|t| t.table.table_hid == hid)
    }

    #[must_use]
    pub fn out_table_id_by_hid(&self, hid: i32) -> Option<i32> {
        self.out_table_by_hid(hid).map(|idx| self.table[idx].table.table_id)
    }

    #[must_use]
    pub fn out_table_hid_by_id(&self, table_id: i32) -> Option<i32> {
        self.out_table_by_key(table_id).map(|idx| self.table[idx].table.table_hid)
    }

    #[must_use]
    pub fn entity_by_key(&self, entity_id: i32) -> Option<usize> {
        self.entity.binary_search_by_key(&entity_id, |e| e.entity.entity_id).ok()
    }

    #[must_use]
    pub fn entity_by_name(&self, name: &str) -> Option<usize> {
        self.entity.iter().position(|e| e.entity.name == name)
    }

    #[must_use]
    pub fn entity_by_hid(&self, hid: i32) -> Option<usize> {
        self.entity.iter().position(|e| e.entity.entity_hid == hid)
    }

    /// Type metadata of a parameter dimension.
    #[must_use]
    pub fn param_dim_type(&self, param_idx: usize, dim_pos: usize) -> &TypeMeta {
        &self.types[self.param[param_idx].dims[dim_pos].type_index]
    }

    /// Type metadata of a parameter value.
    #[must_use]
    pub fn param_type(&self, param_idx: usize) -> &TypeMeta {
        &self.types[self.param[param_idx].type_index]
    }

    /// Parameter index resolved by name, as a [`DbcopyError::NotFound`] when absent.
    ///
    /// # Errors
    /// Returns `NotFound` when the model has no such parameter.
    pub fn require_param(&self, name: &str) -> Result<usize> {
        self.param_by_name(name).ok_or_else(|| {
            DbcopyError::not_found(format!("parameter {name} not found in model {}", self.model.name))
        })
    }

    /// Output table index resolved by name, as a [`DbcopyError::NotFound`] when absent.
    ///
    /// # Errors
    /// Returns `NotFound` when the model has no such output table.
    pub fn require_table(&self, name: &str) -> Result<usize> {
        self.out_table_by_name(name).ok_or_else(|| {
            DbcopyError::not_found(format!(
                "output table {name} not found in model {}",
                self.model.name
            ))
        })
    }
}

/// Check the model identity carried by a public document.
///
/// # Errors
/// Returns `InvalidArgument` on an empty or mismatched name and `Precondition`
/// on a digest mismatch while digest checking is enabled.
pub fn check_model_identity(
    name: &str,
    digest: &str,
    model: &ModelDicRow,
    check_digest: bool,
) -> Result<()> {
    if name != model.name {
        return Err(DbcopyError::invalid(format!(
            "model name {name} does not match destination model {}",
            model.name
        )));
    }
    if !check_digest {
        return Ok(());
    }
    if digest.is_empty() {
        return Err(DbcopyError::precondition(format!(
            "model digest is empty for model {}, use noDigestCheck to skip digest validation",
            model.name
        )));
    }
    if digest != model.digest {
        return Err(DbcopyError::precondition(format!(
            "model digest {digest} does not match destination model {} digest {}",
            model.name, model.digest
        )));
    }
    Ok(())
}

fn validate_groups(meta: &ModelMeta) -> Result<()> {
    let known: BTreeSet<i32> = meta.group.iter().map(|g| g.group_id).collect();
    let mut children: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for pc in &meta.group_pc {
        if !known.contains(&pc.group_id) {
            return Err(DbcopyError::integrity(format!("group {} not found", pc.group_id)));
        }
        match (pc.child_group_id, pc.leaf_id) {
            (Some(child), None) => {
                if !known.contains(&child) {
                    return Err(DbcopyError::integrity(format!(
                        "group {} child group {child} not found",
                        pc.group_id
                    )));
                }
                children.entry(pc.group_id).or_default().push(child);
            }
            (None, Some(_)) => {}
            _ => {
                return Err(DbcopyError::integrity(format!(
                    "group {} child at position {} must be either a group or a leaf",
                    pc.group_id, pc.child_pos
                )));
            }
        }
    }
    check_acyclic(&children, "group")?;

    let mut entity_children: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for pc in &meta.entity_group_pc {
        match (pc.child_group_id, pc.attr_id) {
            (Some(child), None) => {
                // entity groups are keyed by (entity, group); fold the entity into the key
                entity_children
                    .entry(pc.entity_id * 1_000_000 + pc.group_id)
                    .or_default()
                    .push(pc.entity_id * 1_000_000 + child);
            }
            (None, Some(_)) => {}
            _ => {
                return Err(DbcopyError::integrity(format!(
                    "entity {} group {} child at position {} must be either a group or an attribute",
                    pc.entity_id, pc.group_id, pc.child_pos
                )));
            }
        }
    }
    check_acyclic(&entity_children, "entity group")
}

fn check_acyclic(children: &BTreeMap<i32, Vec<i32>>, what: &str) -> Result<()> {
    // 0 = unvisited, 1 = on stack, 2 = done
    let mut state: BTreeMap<i32, u8> = BTreeMap::new();
    for &start in children.keys() {
        if state.get(&start).copied().unwrap_or(0) != 0 {
            continue;
        }
        let mut stack: Vec<(i32, usize)> = vec![(start, 0)];
        state.insert(start, 1);
        while let Some((node, next)) = stack.pop() {
            let kids = children.get(&node).map_or(&[][..], Vec::as_slice);
            if next < kids.len() {
                stack.push((node, next + 1));
                let kid = kids[next];
                match state.get(&kid).copied().unwrap_or(0) {
                    1 => {
                        return Err(DbcopyError::integrity(format!(
                            "{what} cycle detected at {kid}"
                        )))
                    }
                    0 => {
                        state.insert(kid, 1);
                        stack.push((kid, 0));
                    }
                    _ => {}
                }
            } else {
                state.insert(node, 2);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::model_one;

    #[test]
    fn update_internals_resolves_types_and_columns() -> anyhow::Result<()> {
        let meta = model_one()?;
        let idx = meta.param_by_name("ageSex").ok_or_else(|| anyhow::anyhow!("ageSex missing"))?;
        let p = &meta.param[idx];
        assert_eq!(p.dims[0].col_name, "dim0");
        assert_eq!(p.dims[1].col_name, "dim1");
        assert_eq!(p.size_of, 4 * 2);
        assert_eq!(meta.types[p.type_index].type_dic.name, "double");

        let t = meta.out_table_by_name("salarySex").ok_or_else(|| anyhow::anyhow!("table"))?;
        assert_eq!(meta.table[t].expr[1].col_name, "expr1");
        assert_eq!(meta.table[t].acc[0].col_name, "acc0");
        Ok(())
    }

    #[test]
    fn range_type_collapses_enums() -> anyhow::Result<()> {
        let meta = model_one()?;
        let idx = meta.types.iter().position(|t| t.type_dic.name == "YEAR").ok_or_else(|| anyhow::anyhow!("YEAR"))?;
        let year = &meta.types[idx];
        assert!(year.type_dic.is_range);
        assert!(year.enums.is_empty());
        assert_eq!(year.size_of(), 3);
        assert_eq!(year.enum_code_by_id(2021), Some("2021".to_string()));
        assert_eq!(year.enum_id_by_code("2022"), Some(2022));
        assert_eq!(year.enum_id_by_code("1999"), None);
        Ok(())
    }

    #[test]
    fn range_with_single_value_has_one_enum() {
        let t = TypeMeta {
            type_dic: TypeDicRow {
                dic_id: DicKind::Range.id(),
                is_range: true,
                min_enum_id: 7,
                max_enum_id: 7,
                ..TypeDicRow::default()
            },
            enums: vec![],
        };
        assert_eq!(t.size_of(), 1);
        assert_eq!(t.enum_ids(), vec![7]);
        assert_eq!(t.enum_id_by_code("7"), Some(7));
        assert_eq!(t.enum_code_by_id(8), None);
    }

    #[test]
    fn type_classification_follows_names() {
        let mut row = TypeDicRow { name: "double".to_string(), ..TypeDicRow::default() };
        assert!(row.is_float());
        row.name = "bool".to_string();
        assert!(row.is_bool());
        row.name = "file".to_string();
        assert!(row.is_string());
        row.name = "int".to_string();
        assert!(row.is_int());
        row.type_hid = 7;
        assert!(row.is_builtin());
        row.type_hid = 101;
        assert!(!row.is_builtin());
    }

    #[test]
    fn lookups_return_absent_for_unknown_keys() -> anyhow::Result<()> {
        let meta = model_one()?;
        assert!(meta.param_by_key(999).is_none());
        assert!(meta.out_table_by_name("noSuchTable").is_none());
        assert!(meta.entity_by_hid(-1).is_none());
        assert!(meta.require_param("noSuchParam").is_err());
        Ok(())
    }

    #[test]
    fn model_without_tables_is_rejected() -> anyhow::Result<()> {
        let mut meta = model_one()?;
        meta.table.clear();
        assert!(meta.update_internals().is_err());
        Ok(())
    }

    #[test]
    fn group_child_must_be_group_or_leaf() -> anyhow::Result<()> {
        let mut meta = model_one()?;
        meta.group_pc.push(GroupPcRow {
            model_id: 1,
            group_id: 1,
            child_pos: 9,
            child_group_id: Some(2),
            leaf_id: Some(0),
        });
        assert!(meta.update_internals().is_err());
        Ok(())
    }

    #[test]
    fn group_cycle_is_rejected() -> anyhow::Result<()> {
        let mut meta = model_one()?;
        meta.group_pc.push(GroupPcRow {
            model_id: 1,
            group_id: 2,
            child_pos: 5,
            child_group_id: Some(1),
            leaf_id: None,
        });
        let err = match meta.update_internals() {
            Ok(()) => panic!("cycle must be rejected"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), crate::ErrorKind::IntegrityMismatch);
        Ok(())
    }

    #[test]
    fn public_json_round_trip_restores_internals() -> anyhow::Result<()> {
        let meta = model_one()?;
        let body = serde_json::to_vec(&meta)?;
        let back = ModelMeta::from_public_json(&body)?;
        assert_eq!(back.param.len(), meta.param.len());
        assert_eq!(back.param[0].dims.first().map(|d| d.col_name.clone()), meta.param[0].dims.first().map(|d| d.col_name.clone()));
        assert_eq!(back.param[0].size_of, meta.param[0].size_of);
        // hids are database specific and never leave the database
        assert_eq!(back.param[0].param.param_hid, 0);
        Ok(())
    }

    #[test]
    fn identity_check_honours_digest_flag() {
        let row = ModelDicRow { name: "modelOne".into(), digest: "d1".into(), ..ModelDicRow::default() };
        assert!(check_model_identity("modelOne", "d1", &row, true).is_ok());
        assert!(check_model_identity("modelOne", "d2", &row, true).is_err());
        assert!(check_model_identity("modelOne", "", &row, true).is_err());
        assert!(check_model_identity("modelOne", "", &row, false).is_ok());
        assert!(check_model_identity("other", "d1", &row, false).is_err());
    }

    #[test]
    fn identity_check_refuses_empty_model_name() {
        let row = ModelDicRow { name: "modelOne".into(), digest: "d1".into(), ..ModelDicRow::default() };
        for check_digest in [true, false] {
            match check_model_identity("", "d1", &row, check_digest) {
                Ok(()) => panic!("empty model name accepted"),
                Err(err) => assert_eq!(crate::classify(&err), crate::ErrorKind::InvalidArgument),
            }
        }
    }
}

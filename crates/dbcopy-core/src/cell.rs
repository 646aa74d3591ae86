//! Parameter, output table and microdata cells and their CSV conversion.
//!
//! A cell is one value row. Id-form cells hold dimension enum ids, code-form
//! cells hold enum codes; [`CellConverter`] moves between the two and CSV rows.

use crate::error::{DbcopyError, Result};
use crate::format::DoubleFormat;
use crate::model::{ModelMeta, TOTAL_ENUM_CODE};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamCell<D> {
    pub sub_id: i32,
    pub dims: Vec<D>,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprCell<D> {
    pub expr_id: i32,
    pub dims: Vec<D>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccCell<D> {
    pub acc_id: i32,
    pub sub_id: i32,
    pub dims: Vec<D>,
    pub value: Option<f64>,
}

/// All stored accumulators of one sub-value and dimension cell.
#[derive(Debug, Clone, PartialEq)]
pub struct AllAccCell<D> {
    pub sub_id: i32,
    pub dims: Vec<D>,
    pub values: Vec<Option<f64>>,
}

/// One entity record; enum-typed attributes hold enum ids in id form and
/// enum codes in code form.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroCell {
    pub key: i64,
    pub attrs: Vec<CellValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell<D = i32> {
    Param(ParamCell<D>),
    Expr(ExprCell<D>),
    Acc(AccCell<D>),
    AllAcc(AllAccCell<D>),
    Micro(MicroCell),
}

pub type CodeCell = Cell<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Param,
    Expr,
    Acc,
    AllAcc,
    Micro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Str,
    Float,
    Int,
    Enum(usize),
}

#[derive(Debug, Clone)]
struct DimInfo {
    name: String,
    type_index: usize,
    is_total: bool,
}

/// Converter between cells and CSV rows for one parameter, output table or entity.
#[derive(Debug, Clone)]
pub struct CellConverter<'a> {
    meta: &'a ModelMeta,
    kind: CellKind,
    idx: usize,
    name: String,
    dims: Vec<DimInfo>,
    values: Vec<(String, String, ValueKind)>,
    is_id_csv: bool,
    fmt: DoubleFormat,
    is_no_zero: bool,
    is_no_null: bool,
    dim_labels: Option<Vec<String>>,
}

fn value_kind(meta: &ModelMeta, type_index: usize) -> ValueKind {
    let t = &meta.types[type_index].type_dic;
    if t.is_bool() {
        ValueKind::Bool
    } else if t.is_string() {
        ValueKind::Str
    } else if t.is_float() {
        ValueKind::Float
    } else if t.is_enum_based() {
        ValueKind::Enum(type_index)
    } else {
        ValueKind::Int
    }
}

impl<'a> CellConverter<'a> {
    /// # Errors
    /// Returns `NotFound` when the model has no such parameter.
    pub fn param(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        let idx = meta.require_param(name)?;
        let p = &meta.param[idx];
        let dims = p
            .dims
            .iter()
            .map(|d| DimInfo { name: d.name.clone(), type_index: d.type_index, is_total: false })
            .collect();
        let values = vec![("param_value".to_string(), "param_value".to_string(), value_kind(meta, p.type_index))];
        Ok(Self::new(meta, CellKind::Param, idx, name, dims, values))
    }

    /// # Errors
    /// Returns `NotFound` when the model has no such output table.
    pub fn expr(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        Self::table(meta, name, CellKind::Expr)
    }

    /// # Errors
    /// Returns `NotFound` when the model has no such output table.
    pub fn acc(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        Self::table(meta, name, CellKind::Acc)
    }

    /// # Errors
    /// Returns `NotFound` when the model has no such output table.
    pub fn all_acc(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        Self::table(meta, name, CellKind::AllAcc)
    }

    fn table(meta: &'a ModelMeta, name: &str, kind: CellKind) -> Result<Self> {
        let idx = meta.require_table(name)?;
        let t = &meta.table[idx];
        let dims = t
            .dims
            .iter()
            .map(|d| DimInfo { name: d.name.clone(), type_index: d.type_index, is_total: d.is_total })
            .collect();
        let values = match kind {
            CellKind::AllAcc => t
                .stored_acc()
                .map(|a| (a.name.clone(), a.col_name.clone(), ValueKind::Float))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self::new(meta, kind, idx, name, dims, values))
    }

    /// # Errors
    /// Returns `NotFound` when the model has no such entity.
    pub fn micro(meta: &'a ModelMeta, name: &str) -> Result<Self> {
        let idx = meta.entity_by_name(name).ok_or_else(|| {
            DbcopyError::not_found(format!("entity {name} not found in model {}", meta.model.name))
        })?;
        let values = meta.entity[idx]
            .attr
            .iter()
            .filter(|a| !a.is_internal)
            .map(|a| (a.name.clone(), a.col_name.clone(), value_kind(meta, a.type_index)))
            .collect();
        Ok(Self::new(meta, CellKind::Micro, idx, name, Vec::new(), values))
    }

    fn new(
        meta: &'a ModelMeta,
        kind: CellKind,
        idx: usize,
        name: &str,
        dims: Vec<DimInfo>,
        values: Vec<(String, String, ValueKind)>,
    ) -> Self {
        Self {
            meta,
            kind,
            idx,
            name: name.to_string(),
            dims,
            values,
            is_id_csv: false,
            fmt: DoubleFormat::default(),
            is_no_zero: false,
            is_no_null: false,
            dim_labels: None,
        }
    }

    #[must_use]
    pub fn with_id_csv(mut self, is_id_csv: bool) -> Self {
        self.is_id_csv = is_id_csv;
        self
    }

    #[must_use]
    pub fn with_double_format(mut self, fmt: DoubleFormat) -> Self {
        self.fmt = fmt;
        self
    }

    #[must_use]
    pub fn with_no_zero(mut self, is_no_zero: bool) -> Self {
        self.is_no_zero = is_no_zero;
        self
    }

    #[must_use]
    pub fn with_no_null(mut self, is_no_null: bool) -> Self {
        self.is_no_null = is_no_null;
        self
    }

    /// Replace dimension header names, e.g. by translated descriptions.
    #[must_use]
    pub fn with_dim_labels(mut self, labels: Vec<String>) -> Self {
        self.dim_labels = Some(labels);
        self
    }

    #[must_use]
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_id_csv(&self) -> bool {
        self.is_id_csv
    }

    /// Index of the parameter, table or entity in the model.
    #[must_use]
    pub fn index(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn csv_file_name(&self, is_tsv: bool) -> String {
        let id = if self.is_id_csv { ".id" } else { "" };
        let suffix = match self.kind {
            CellKind::Param | CellKind::Expr | CellKind::Micro => "",
            CellKind::Acc => ".acc",
            CellKind::AllAcc => ".acc-all",
        };
        let ext = if is_tsv { "tsv" } else { "csv" };
        format!("{}{id}{suffix}.{ext}", self.name)
    }

    #[must_use]
    pub fn csv_header(&self) -> Vec<String> {
        let dim_names: Vec<String> = if self.is_id_csv {
            (0..self.dims.len()).map(|k| format!("dim{k}")).collect()
        } else if let Some(labels) = &self.dim_labels {
            self.dims
                .iter()
                .enumerate()
                .map(|(k, d)| labels.get(k).filter(|l| !l.is_empty()).unwrap_or(&d.name).clone())
                .collect()
        } else {
            self.dims.iter().map(|d| d.name.clone()).collect()
        };

        let mut h = Vec::with_capacity(dim_names.len() + 3);
        match self.kind {
            CellKind::Param => {
                h.push("sub_id".to_string());
                h.extend(dim_names);
                h.push("param_value".to_string());
            }
            CellKind::Expr => {
                h.push(if self.is_id_csv { "expr_id" } else { "expr_name" }.to_string());
                h.extend(dim_names);
                h.push("expr_value".to_string());
            }
            CellKind::Acc => {
                h.push(if self.is_id_csv { "acc_id" } else { "acc_name" }.to_string());
                h.push("sub_id".to_string());
                h.extend(dim_names);
                h.push("acc_value".to_string());
            }
            CellKind::AllAcc => {
                h.push("sub_id".to_string());
                h.extend(dim_names);
                h.extend(self.values.iter().map(|(name, col, _)| {
                    if self.is_id_csv { col.clone() } else { name.clone() }
                }));
            }
            CellKind::Micro => {
                h.push("key".to_string());
                h.extend(self.values.iter().map(|(name, col, _)| {
                    if self.is_id_csv { col.clone() } else { name.clone() }
                }));
            }
        }
        h
    }

    /// CSV row in the form selected by the id-csv flag; `None` when suppressed.
    ///
    /// # Errors
    /// See [`CellConverter::to_csv_row`].
    pub fn to_csv(&self, cell: &Cell) -> Result<Option<Vec<String>>> {
        if self.is_id_csv {
            self.to_csv_id_row(cell)
        } else {
            self.to_csv_row(cell)
        }
    }

    /// Row with enum ids; `None` when the value is suppressed.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when the cell does not match the converter.
    pub fn to_csv_id_row(&self, cell: &Cell) -> Result<Option<Vec<String>>> {
        if self.is_suppressed(cell) {
            return Ok(None);
        }
        let dims_text = |dims: &[i32]| dims.iter().map(ToString::to_string).collect::<Vec<_>>();
        let row = match cell {
            Cell::Param(c) if self.kind == CellKind::Param => {
                let mut row = vec![c.sub_id.to_string()];
                row.extend(dims_text(&c.dims));
                row.push(self.value_text(0, &c.value, false)?);
                row
            }
            Cell::Expr(c) if self.kind == CellKind::Expr => {
                let mut row = vec![c.expr_id.to_string()];
                row.extend(dims_text(&c.dims));
                row.push(self.float_text(c.value));
                row
            }
            Cell::Acc(c) if self.kind == CellKind::Acc => {
                let mut row = vec![c.acc_id.to_string(), c.sub_id.to_string()];
                row.extend(dims_text(&c.dims));
                row.push(self.float_text(c.value));
                row
            }
            Cell::AllAcc(c) if self.kind == CellKind::AllAcc => {
                let mut row = vec![c.sub_id.to_string()];
                row.extend(dims_text(&c.dims));
                row.extend(c.values.iter().map(|v| self.float_text(*v)));
                row
            }
            Cell::Micro(c) if self.kind == CellKind::Micro => self.micro_row(c, false)?,
            _ => return Err(self.kind_mismatch()),
        };
        Ok(Some(row))
    }

    /// Row with enum codes and expression or accumulator names; `None` when
    /// the value is suppressed.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when an enum id or an expression/accumulator id
    /// is unknown, or the cell does not match the converter.
    pub fn to_csv_row(&self, cell: &Cell) -> Result<Option<Vec<String>>> {
        if self.is_suppressed(cell) {
            return Ok(None);
        }
        let row = match cell {
            Cell::Param(c) if self.kind == CellKind::Param => {
                let mut row = vec![c.sub_id.to_string()];
                row.extend(self.dims_to_codes(&c.dims)?);
                row.push(self.value_text(0, &c.value, true)?);
                row
            }
            Cell::Expr(c) if self.kind == CellKind::Expr => {
                let mut row = vec![self.expr_name(c.expr_id)?];
                row.extend(self.dims_to_codes(&c.dims)?);
                row.push(self.float_text(c.value));
                row
            }
            Cell::Acc(c) if self.kind == CellKind::Acc => {
                let mut row = vec![self.acc_name(c.acc_id)?, c.sub_id.to_string()];
                row.extend(self.dims_to_codes(&c.dims)?);
                row.push(self.float_text(c.value));
                row
            }
            Cell::AllAcc(c) if self.kind == CellKind::AllAcc => {
                let mut row = vec![c.sub_id.to_string()];
                row.extend(self.dims_to_codes(&c.dims)?);
                row.extend(c.values.iter().map(|v| self.float_text(*v)));
                row
            }
            Cell::Micro(c) if self.kind == CellKind::Micro => self.micro_row(c, true)?,
            _ => return Err(self.kind_mismatch()),
        };
        Ok(Some(row))
    }

    /// Parse a CSV row (id or code form per the id-csv flag) into an id-form cell.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a wrong column count, an unparseable value
    /// or an unknown code or name.
    pub fn to_cell(&self, row: &[String]) -> Result<Cell> {
        let rank = self.dims.len();
        let expect = match self.kind {
            CellKind::Param | CellKind::Expr => rank + 2,
            CellKind::Acc => rank + 3,
            CellKind::AllAcc => rank + 1 + self.values.len(),
            CellKind::Micro => 1 + self.values.len(),
        };
        if row.len() != expect {
            return Err(DbcopyError::invalid(format!(
                "invalid number of csv columns for {}: expected {expect}, found {}",
                self.name,
                row.len()
            )));
        }
        let as_code = !self.is_id_csv;
        let cell = match self.kind {
            CellKind::Param => Cell::Param(ParamCell {
                sub_id: self.parse_int(&row[0], "sub_id")?,
                dims: self.parse_dims(&row[1..=rank])?,
                value: self.parse_value(0, &row[rank + 1], as_code)?,
            }),
            CellKind::Expr => Cell::Expr(ExprCell {
                expr_id: if as_code { self.expr_id(&row[0])? } else { self.parse_int(&row[0], "expr_id")? },
                dims: self.parse_dims(&row[1..=rank])?,
                value: self.parse_float(&row[rank + 1])?,
            }),
            CellKind::Acc => Cell::Acc(AccCell {
                acc_id: if as_code { self.acc_id(&row[0])? } else { self.parse_int(&row[0], "acc_id")? },
                sub_id: self.parse_int(&row[1], "sub_id")?,
                dims: self.parse_dims(&row[2..rank + 2])?,
                value: self.parse_float(&row[rank + 2])?,
            }),
            CellKind::AllAcc => Cell::AllAcc(AllAccCell {
                sub_id: self.parse_int(&row[0], "sub_id")?,
                dims: self.parse_dims(&row[1..=rank])?,
                values: row[rank + 1..].iter().map(|v| self.parse_float(v)).collect::<Result<_>>()?,
            }),
            CellKind::Micro => Cell::Micro(MicroCell {
                key: row[0].trim().parse::<i64>().map_err(|_| {
                    DbcopyError::invalid(format!("invalid entity key {} of {}", row[0], self.name))
                })?,
                attrs: row[1..]
                    .iter()
                    .enumerate()
                    .map(|(k, v)| self.parse_value(k, v, as_code))
                    .collect::<Result<_>>()?,
            }),
        };
        Ok(cell)
    }

    /// # Errors
    /// Returns `InvalidArgument` when an enum id is not valid for its dimension.
    pub fn id_to_code_cell(&self, cell: &Cell) -> Result<CodeCell> {
        Ok(match cell {
            Cell::Param(c) => Cell::Param(ParamCell {
                sub_id: c.sub_id,
                dims: self.dims_to_codes(&c.dims)?,
                value: self.value_to_code(0, &c.value)?,
            }),
            Cell::Expr(c) => Cell::Expr(ExprCell {
                expr_id: c.expr_id,
                dims: self.dims_to_codes(&c.dims)?,
                value: c.value,
            }),
            Cell::Acc(c) => Cell::Acc(AccCell {
                acc_id: c.acc_id,
                sub_id: c.sub_id,
                dims: self.dims_to_codes(&c.dims)?,
                value: c.value,
            }),
            Cell::AllAcc(c) => Cell::AllAcc(AllAccCell {
                sub_id: c.sub_id,
                dims: self.dims_to_codes(&c.dims)?,
                values: c.values.clone(),
            }),
            Cell::Micro(c) => Cell::Micro(MicroCell {
                key: c.key,
                attrs: c
                    .attrs
                    .iter()
                    .enumerate()
                    .map(|(k, v)| self.value_to_code(k, v))
                    .collect::<Result<_>>()?,
            }),
        })
    }

    /// # Errors
    /// Returns `InvalidArgument` when an enum code is not valid for its dimension.
    pub fn code_to_id_cell(&self, cell: &CodeCell) -> Result<Cell> {
        Ok(match cell {
            Cell::Param(c) => Cell::Param(ParamCell {
                sub_id: c.sub_id,
                dims: self.codes_to_dims(&c.dims)?,
                value: self.value_to_id(0, &c.value)?,
            }),
            Cell::Expr(c) => Cell::Expr(ExprCell {
                expr_id: c.expr_id,
                dims: self.codes_to_dims(&c.dims)?,
                value: c.value,
            }),
            Cell::Acc(c) => Cell::Acc(AccCell {
                acc_id: c.acc_id,
                sub_id: c.sub_id,
                dims: self.codes_to_dims(&c.dims)?,
                value: c.value,
            }),
            Cell::AllAcc(c) => Cell::AllAcc(AllAccCell {
                sub_id: c.sub_id,
                dims: self.codes_to_dims(&c.dims)?,
                values: c.values.clone(),
            }),
            Cell::Micro(c) => Cell::Micro(MicroCell {
                key: c.key,
                attrs: c
                    .attrs
                    .iter()
                    .enumerate()
                    .map(|(k, v)| self.value_to_id(k, v))
                    .collect::<Result<_>>()?,
            }),
        })
    }

    /// Enum code of dimension `k`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an id outside the dimension type.
    pub fn dim_code(&self, k: usize, enum_id: i32) -> Result<String> {
        let d = &self.dims[k];
        let t = &self.meta.types[d.type_index];
        if d.is_total && enum_id == t.type_dic.total_enum_id {
            return Ok(TOTAL_ENUM_CODE.to_string());
        }
        if !t.type_dic.is_enum_based() {
            return Ok(enum_id.to_string());
        }
        t.enum_code_by_id(enum_id).ok_or_else(|| {
            DbcopyError::invalid(format!(
                "invalid enum id {enum_id} of dimension {} of {}",
                d.name, self.name
            ))
        })
    }

    /// Enum id of dimension `k`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a code outside the dimension type.
    pub fn dim_id(&self, k: usize, code: &str) -> Result<i32> {
        let d = &self.dims[k];
        let t = &self.meta.types[d.type_index];
        if d.is_total && code == TOTAL_ENUM_CODE {
            return Ok(t.type_dic.total_enum_id);
        }
        let bad = || {
            DbcopyError::invalid(format!(
                "invalid enum code {code} of dimension {} of {}",
                d.name, self.name
            ))
        };
        if !t.type_dic.is_enum_based() {
            return code.trim().parse::<i32>().map_err(|_| bad());
        }
        t.enum_id_by_code(code).ok_or_else(bad)
    }

    fn dims_to_codes(&self, dims: &[i32]) -> Result<Vec<String>> {
        dims.iter().enumerate().map(|(k, &id)| self.dim_code(k, id)).collect()
    }

    fn codes_to_dims(&self, codes: &[String]) -> Result<Vec<i32>> {
        codes.iter().enumerate().map(|(k, c)| self.dim_id(k, c)).collect()
    }

    fn parse_dims(&self, fields: &[String]) -> Result<Vec<i32>> {
        if self.is_id_csv {
            fields
                .iter()
                .enumerate()
                .map(|(k, f)| {
                    let id = self.parse_int(f, &self.dims[k].name)?;
                    // validate against the type
                    self.dim_code(k, id)?;
                    Ok(id)
                })
                .collect()
        } else {
            self.codes_to_dims(fields)
        }
    }

    fn parse_int(&self, text: &str, what: &str) -> Result<i32> {
        text.trim().parse::<i32>().map_err(|_| {
            DbcopyError::invalid(format!("invalid {what} value {text} of {}", self.name))
        })
    }

    fn parse_float(&self, text: &str) -> Result<Option<f64>> {
        let t = text.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        t.parse::<f64>().map(Some).map_err(|_| {
            DbcopyError::invalid(format!("invalid float value {text} of {}", self.name))
        })
    }

    fn value_kind_at(&self, k: usize) -> ValueKind {
        self.values.get(k).map_or(ValueKind::Float, |v| v.2)
    }

    fn parse_value(&self, k: usize, text: &str, as_code: bool) -> Result<CellValue> {
        let t = text.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("null") {
            return Ok(CellValue::Null);
        }
        let bad = || DbcopyError::invalid(format!("invalid value {text} of {}", self.name));
        match self.value_kind_at(k) {
            ValueKind::Bool => match t.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(CellValue::Bool(true)),
                "false" | "f" | "0" | "no" => Ok(CellValue::Bool(false)),
                _ => Err(bad()),
            },
            ValueKind::Str => Ok(CellValue::Str(text.to_string())),
            ValueKind::Float => t.parse::<f64>().map(CellValue::Float).map_err(|_| bad()),
            ValueKind::Int => t.parse::<i64>().map(CellValue::Int).map_err(|_| bad()),
            ValueKind::Enum(type_index) => {
                let ty = &self.meta.types[type_index];
                let id = if as_code {
                    ty.enum_id_by_code(t).ok_or_else(bad)?
                } else {
                    let id = t.parse::<i32>().map_err(|_| bad())?;
                    if !ty.has_enum_id(id) {
                        return Err(bad());
                    }
                    id
                };
                Ok(CellValue::Int(i64::from(id)))
            }
        }
    }

    fn value_text(&self, k: usize, value: &CellValue, as_code: bool) -> Result<String> {
        Ok(match value {
            CellValue::Null => "null".to_string(),
            CellValue::Float(v) => self.fmt.format(*v),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Str(s) => s.clone(),
            CellValue::Int(i) => match self.value_kind_at(k) {
                ValueKind::Enum(type_index) if as_code => self.enum_value_code(type_index, *i)?,
                _ => i.to_string(),
            },
        })
    }

    fn enum_value_code(&self, type_index: usize, id: i64) -> Result<String> {
        i32::try_from(id)
            .ok()
            .and_then(|id| self.meta.types[type_index].enum_code_by_id(id))
            .ok_or_else(|| DbcopyError::invalid(format!("invalid enum id {id} of {}", self.name)))
    }

    fn value_to_code(&self, k: usize, value: &CellValue) -> Result<CellValue> {
        match (value, self.value_kind_at(k)) {
            (CellValue::Int(i), ValueKind::Enum(type_index)) => {
                Ok(CellValue::Str(self.enum_value_code(type_index, *i)?))
            }
            _ => Ok(value.clone()),
        }
    }

    fn value_to_id(&self, k: usize, value: &CellValue) -> Result<CellValue> {
        match (value, self.value_kind_at(k)) {
            (CellValue::Str(code), ValueKind::Enum(type_index)) => {
                let id = self.meta.types[type_index].enum_id_by_code(code).ok_or_else(|| {
                    DbcopyError::invalid(format!("invalid enum code {code} of {}", self.name))
                })?;
                Ok(CellValue::Int(i64::from(id)))
            }
            _ => Ok(value.clone()),
        }
    }

    fn float_text(&self, value: Option<f64>) -> String {
        value.map_or_else(|| "null".to_string(), |v| self.fmt.format(v))
    }

    fn micro_row(&self, c: &MicroCell, as_code: bool) -> Result<Vec<String>> {
        let mut row = Vec::with_capacity(c.attrs.len() + 1);
        row.push(c.key.to_string());
        for (k, v) in c.attrs.iter().enumerate() {
            row.push(self.value_text(k, v, as_code)?);
        }
        Ok(row)
    }

    fn expr_name(&self, expr_id: i32) -> Result<String> {
        self.meta.table[self.idx]
            .expr
            .iter()
            .find(|e| e.expr_id == expr_id)
            .map(|e| e.name.clone())
            .ok_or_else(|| DbcopyError::invalid(format!("invalid expression id {expr_id} of {}", self.name)))
    }

    fn acc_name(&self, acc_id: i32) -> Result<String> {
        self.meta.table[self.idx]
            .acc
            .iter()
            .find(|a| a.acc_id == acc_id)
            .map(|a| a.name.clone())
            .ok_or_else(|| DbcopyError::invalid(format!("invalid accumulator id {acc_id} of {}", self.name)))
    }

    fn expr_id(&self, name: &str) -> Result<i32> {
        self.meta.table[self.idx]
            .expr
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.expr_id)
            .ok_or_else(|| DbcopyError::invalid(format!("invalid expression name {name} of {}", self.name)))
    }

    fn acc_id(&self, name: &str) -> Result<i32> {
        self.meta.table[self.idx]
            .acc
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.acc_id)
            .ok_or_else(|| DbcopyError::invalid(format!("invalid accumulator name {name} of {}", self.name)))
    }

    fn is_suppressed(&self, cell: &Cell) -> bool {
        let zero = |v: Option<f64>| self.is_no_zero && v == Some(0.0);
        let null = |v: Option<f64>| self.is_no_null && v.is_none();
        match cell {
            Cell::Param(c) => match &c.value {
                CellValue::Float(v) => self.is_no_zero && *v == 0.0,
                CellValue::Null => self.is_no_null,
                _ => false,
            },
            Cell::Expr(c) => zero(c.value) || null(c.value),
            Cell::Acc(c) => zero(c.value) || null(c.value),
            Cell::AllAcc(c) => {
                !c.values.is_empty()
                    && (c.values.iter().all(|v| zero(*v)) || c.values.iter().all(|v| null(*v)))
            }
            Cell::Micro(_) => false,
        }
    }

    fn kind_mismatch(&self) -> DbcopyError {
        DbcopyError::invalid(format!("cell kind does not match converter {:?} of {}", self.kind, self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::model_one;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn file_names_follow_kind_and_flags() -> anyhow::Result<()> {
        let meta = model_one()?;
        assert_eq!(CellConverter::param(&meta, "ageSex")?.csv_file_name(false), "ageSex.csv");
        assert_eq!(CellConverter::param(&meta, "ageSex")?.with_id_csv(true).csv_file_name(false), "ageSex.id.csv");
        assert_eq!(CellConverter::acc(&meta, "salarySex")?.csv_file_name(true), "salarySex.acc.tsv");
        assert_eq!(CellConverter::acc(&meta, "salarySex")?.with_id_csv(true).csv_file_name(false), "salarySex.id.acc.csv");
        assert_eq!(CellConverter::all_acc(&meta, "salarySex")?.csv_file_name(false), "salarySex.acc-all.csv");
        Ok(())
    }

    #[test]
    fn headers_use_dim_names_or_positions() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "ageSex")?;
        assert_eq!(cvt.csv_header(), s(&["sub_id", "dim0", "dim1", "param_value"]));
        let cvt = CellConverter::expr(&meta, "salarySex")?;
        assert_eq!(cvt.csv_header(), s(&["expr_name", "dim0", "dim1", "expr_value"]));
        let cvt = CellConverter::expr(&meta, "salarySex")?.with_id_csv(true);
        assert_eq!(cvt.csv_header(), s(&["expr_id", "dim0", "dim1", "expr_value"]));
        let cvt = CellConverter::acc(&meta, "salarySex")?.with_dim_labels(s(&["Salary", ""]));
        assert_eq!(cvt.csv_header(), s(&["acc_name", "sub_id", "Salary", "dim1", "acc_value"]));
        let cvt = CellConverter::all_acc(&meta, "salarySex")?;
        assert_eq!(cvt.csv_header(), s(&["sub_id", "dim0", "dim1", "acc0", "acc1"]));
        Ok(())
    }

    #[test]
    fn code_row_round_trips_through_to_cell() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "ageSex")?;
        let cell = Cell::Param(ParamCell { sub_id: 0, dims: vec![20, 1], value: CellValue::Float(0.5) });
        let row = cvt.to_csv_row(&cell)?.ok_or_else(|| anyhow::anyhow!("suppressed"))?;
        assert_eq!(row, s(&["0", "20-30", "F", "0.5"]));
        assert_eq!(cvt.to_cell(&row)?, cell);

        let id_cvt = CellConverter::param(&meta, "ageSex")?.with_id_csv(true);
        let id_row = id_cvt.to_csv_id_row(&cell)?.ok_or_else(|| anyhow::anyhow!("suppressed"))?;
        assert_eq!(id_row, s(&["0", "20", "1", "0.5"]));
        assert_eq!(id_cvt.to_cell(&id_row)?, cell);
        Ok(())
    }

    #[test]
    fn expression_names_map_to_ids() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::expr(&meta, "salarySex")?;
        let cell = cvt.to_cell(&s(&["Expr1", "M", "all", "null"]))?;
        assert_eq!(cell, Cell::Expr(ExprCell { expr_id: 1, dims: vec![200, 2], value: None }));
        assert!(cvt.to_cell(&s(&["noSuchExpr", "M", "all", "1"])).is_err());
        assert!(cvt.to_cell(&s(&["Expr1", "M", "1"])).is_err());
        Ok(())
    }

    #[test]
    fn total_dimension_uses_all_code() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::expr(&meta, "salarySex")?;
        let id_cell = Cell::Expr(ExprCell { expr_id: 0, dims: vec![100, 2], value: Some(1.0) });
        let code = cvt.id_to_code_cell(&id_cell)?;
        assert_eq!(code, Cell::Expr(ExprCell { expr_id: 0, dims: s(&["L", "all"]), value: Some(1.0) }));
        assert_eq!(cvt.code_to_id_cell(&code)?, id_cell);
        // salary has no total, so its total enum id is not a valid code
        assert!(cvt.dim_code(0, 400).is_err());
        Ok(())
    }

    #[test]
    fn range_dimension_code_equals_id() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "yearRatio")?;
        assert_eq!(cvt.dim_code(0, 2022)?, "2022");
        assert_eq!(cvt.dim_id(0, "2023")?, 2023);
        assert!(cvt.dim_id(0, "2030").is_err());
        assert!(cvt.dim_code(0, 1999).is_err());
        Ok(())
    }

    #[test]
    fn zero_and_null_rows_are_suppressed() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::expr(&meta, "salarySex")?.with_no_zero(true).with_no_null(true);
        let zero = Cell::Expr(ExprCell { expr_id: 0, dims: vec![100, 0], value: Some(0.0) });
        let null = Cell::Expr(ExprCell { expr_id: 0, dims: vec![100, 1], value: None });
        assert_eq!(cvt.to_csv_row(&zero)?, None);
        assert_eq!(cvt.to_csv_id_row(&null)?, None);
        let plain = CellConverter::expr(&meta, "salarySex")?;
        assert_eq!(plain.to_csv_row(&null)?, Some(s(&["Expr0", "L", "F", "null"])));
        Ok(())
    }

    #[test]
    fn bool_and_string_parameters_parse() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "isOldAge")?;
        let cell = cvt.to_cell(&s(&["0", "40+", "true"]))?;
        assert_eq!(cell, Cell::Param(ParamCell { sub_id: 0, dims: vec![40], value: CellValue::Bool(true) }));
        assert!(cvt.to_cell(&s(&["0", "40+", "maybe"])).is_err());

        let cvt = CellConverter::param(&meta, "filePath")?;
        let cell = cvt.to_cell(&s(&["0", "data/in.csv"]))?;
        assert_eq!(cell, Cell::Param(ParamCell { sub_id: 0, dims: vec![], value: CellValue::Str("data/in.csv".into()) }));
        Ok(())
    }

    #[test]
    fn rank_zero_parameter_has_single_value_column() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "StartingSeed")?;
        assert_eq!(cvt.csv_header(), s(&["sub_id", "param_value"]));
        let cell = cvt.to_cell(&s(&["0", "1023"]))?;
        assert_eq!(cvt.to_csv_row(&cell)?, Some(s(&["0", "1023"])));
        Ok(())
    }

    #[test]
    fn microdata_enum_attributes_use_codes() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::micro(&meta, "Person")?;
        assert_eq!(cvt.csv_header(), s(&["key", "Age", "Sex", "Income", "isOld"]));
        let cell = Cell::Micro(MicroCell {
            key: 7,
            attrs: vec![CellValue::Int(33), CellValue::Int(1), CellValue::Float(1200.0), CellValue::Bool(false)],
        });
        let row = cvt.to_csv_row(&cell)?.ok_or_else(|| anyhow::anyhow!("suppressed"))?;
        assert_eq!(row, s(&["7", "33", "F", "1200", "false"]));
        assert_eq!(cvt.to_cell(&row)?, cell);
        Ok(())
    }

    #[test]
    fn mismatched_cell_kind_is_rejected() -> anyhow::Result<()> {
        let meta = model_one()?;
        let cvt = CellConverter::param(&meta, "ageSex")?;
        let cell = Cell::Expr(ExprCell { expr_id: 0, dims: vec![10, 0], value: Some(1.0) });
        assert!(cvt.to_csv_row(&cell).is_err());
        Ok(())
    }
}

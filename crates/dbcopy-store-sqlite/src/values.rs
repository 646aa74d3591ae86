//! Streaming readers and writers of parameter, output table and microdata
//! values, and the value digests computed from them.
//!
//! Readers walk one SQL cursor in key order and hand each row to a visitor as
//! an id-form [`Cell`]; nothing is collected in memory. Run values are read
//! through `base_run_id`, so a run sharing values with an earlier run reads the
//! rows stored under that earlier run.

use anyhow::{Context, Result};
use dbcopy_core::cell::{AccCell, AllAccCell, Cell, CellKind, CellValue, ExprCell, MicroCell, ParamCell};
use dbcopy_core::digest::ValueDigester;
use dbcopy_core::facet::{cap, flag_from_f64, NOTE_MAX_LEN};
use dbcopy_core::model::{ModelMeta, TypeDicRow};
use dbcopy_core::progress::Context as RunContext;
use dbcopy_core::DbcopyError;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::run_db;

/// Owner of the rows: a model run or an input set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Run(i32),
    Set(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Bool,
    Str,
    Float,
    Int,
}

impl ValueType {
    fn of(t: &TypeDicRow) -> Self {
        if t.is_bool() {
            Self::Bool
        } else if t.is_string() {
            Self::Str
        } else if t.is_float() {
            Self::Float
        } else {
            Self::Int
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn decode(row: &Row<'_>, idx: usize, vt: ValueType) -> rusqlite::Result<CellValue> {
    let v = row.get_ref(idx)?;
    let value = match (v, vt) {
        (ValueRef::Null, _) => CellValue::Null,
        (ValueRef::Integer(i), ValueType::Bool) => CellValue::Bool(i != 0),
        (ValueRef::Real(f), ValueType::Bool) => CellValue::Bool(flag_from_f64(f)),
        (ValueRef::Integer(i), ValueType::Float) => CellValue::Float(i as f64),
        (ValueRef::Real(f), ValueType::Float) => CellValue::Float(f),
        (ValueRef::Integer(i), ValueType::Int) => CellValue::Int(i),
        (ValueRef::Real(f), ValueType::Int) => CellValue::Int(f.round() as i64),
        (ValueRef::Text(t), ValueType::Str) => CellValue::Str(String::from_utf8_lossy(t).into_owned()),
        (ValueRef::Integer(i), ValueType::Str) => CellValue::Str(i.to_string()),
        (ValueRef::Real(f), ValueType::Str) => CellValue::Str(f.to_string()),
        (other, _) => return Err(rusqlite::Error::InvalidColumnType(idx, "value".to_string(), other.data_type())),
    };
    Ok(value)
}

fn encode(v: &CellValue) -> Value {
    match v {
        CellValue::Null => Value::Null,
        CellValue::Int(i) => Value::Integer(*i),
        CellValue::Float(f) => Value::Real(*f),
        CellValue::Bool(b) => Value::Integer(i64::from(*b)),
        CellValue::Str(s) => Value::Text(cap(s, NOTE_MAX_LEN)),
    }
}

fn dims_of(row: &Row<'_>, from: usize, rank: usize) -> rusqlite::Result<Vec<i32>> {
    (from..from + rank).map(|k| row.get(k)).collect()
}

fn dim_list(cols: &[String], prefix: &str) -> String {
    cols.iter().map(|c| format!(", {prefix}{c}")).collect()
}

/// Run id holding the rows of a run artifact, `None` when the run has no
/// rows registered for it.
fn base_run_id(conn: &Connection, link_table: &str, hid_col: &str, run_id: i32, hid: i32) -> Result<Option<i32>> {
    conn.query_row(
        &format!("SELECT base_run_id FROM {link_table} WHERE run_id = ?1 AND {hid_col} = ?2"),
        params![run_id, hid],
        |r| r.get(0),
    )
    .optional()
    .with_context(|| format!("failed to read base run of {hid_col} {hid}, run {run_id}"))
}

/// Stream values of one parameter, output table or entity in key order.
/// `kind` selects the value form for an output table (`Expr`, `Acc` or
/// `AllAcc`); `idx` indexes the model's parameter, table or entity array.
/// Returns the number of rows, or `None` when a run has no such values.
///
/// # Errors
/// Returns `InvalidArgument` for output values of an input set, `Precondition`
/// on cancellation, or a driver error.
pub fn read_values(
    conn: &Connection,
    meta: &ModelMeta,
    kind: CellKind,
    idx: usize,
    src: ValueSource,
    ctx: &RunContext<'_>,
    mut visit: impl FnMut(Cell) -> Result<()>,
) -> Result<Option<usize>> {
    let (sql, key) = match (kind, src) {
        (CellKind::Param, src) => {
            let p = &meta.param[idx];
            let dims: Vec<String> = p.dims.iter().map(|d| d.col_name.clone()).collect();
            let (table, key_col, key) = match src {
                ValueSource::Run(run_id) => {
                    let Some(base) = base_run_id(conn, "run_parameter", "parameter_hid", run_id, p.param.param_hid)?
                    else {
                        return Ok(None);
                    };
                    (&p.param.db_run_table, "run_id", base)
                }
                ValueSource::Set(set_id) => (&p.param.db_set_table, "set_id", set_id),
            };
            (
                format!(
                    "SELECT sub_id{d}, param_value FROM {table} WHERE {key_col} = ?1 ORDER BY sub_id{d}",
                    d = dim_list(&dims, "")
                ),
                key,
            )
        }
        (CellKind::Micro, ValueSource::Run(run_id)) => {
            let e = &meta.entity[idx];
            let Some(base) = base_run_id(conn, "run_entity", "entity_hid", run_id, e.entity.entity_hid)? else {
                return Ok(None);
            };
            let attrs: Vec<String> = e.attr.iter().filter(|a| !a.is_internal).map(|a| a.col_name.clone()).collect();
            (
                format!(
                    "SELECT entity_key{a} FROM {} WHERE run_id = ?1 ORDER BY entity_key",
                    e.entity.db_entity_table,
                    a = dim_list(&attrs, "")
                ),
                base,
            )
        }
        (CellKind::Expr | CellKind::Acc | CellKind::AllAcc, ValueSource::Run(run_id)) => {
            let t = &meta.table[idx];
            let Some(base) = base_run_id(conn, "run_table", "table_hid", run_id, t.table.table_hid)? else {
                return Ok(None);
            };
            let dims: Vec<String> = t.dims.iter().map(|d| d.col_name.clone()).collect();
            let d = dim_list(&dims, "");
            let sql = match kind {
                CellKind::Expr => format!(
                    "SELECT expr_id{d}, expr_value FROM {} WHERE run_id = ?1 ORDER BY expr_id{d}",
                    t.table.db_expr_table
                ),
                CellKind::Acc => format!(
                    "SELECT acc_id, sub_id{d}, acc_value FROM {} WHERE run_id = ?1 ORDER BY acc_id, sub_id{d}",
                    t.table.db_acc_table
                ),
                _ => {
                    let accs: Vec<String> = t.stored_acc().map(|a| a.col_name.clone()).collect();
                    format!(
                        "SELECT sub_id{d}{a} FROM {} WHERE run_id = ?1 ORDER BY sub_id{d}",
                        t.table.db_acc_all_view,
                        a = dim_list(&accs, "")
                    )
                }
            };
            (sql, base)
        }
        (_, ValueSource::Set(set_id)) => {
            return Err(DbcopyError::invalid(format!("input set {set_id} holds parameter values only")).into());
        }
    };

    let mut stmt = conn.prepare(&sql).with_context(|| format!("failed to prepare value query: {sql}"))?;
    let mut rows = stmt.query(params![key]).context("failed to query values")?;
    let mut n = 0;
    while let Some(row) = rows.next().context("failed to iterate values")? {
        ctx.check_cancel()?;
        visit(row_to_cell(row, meta, kind, idx)?)?;
        n += 1;
    }
    Ok(Some(n))
}

fn row_to_cell(row: &Row<'_>, meta: &ModelMeta, kind: CellKind, idx: usize) -> rusqlite::Result<Cell> {
    let cell = match kind {
        CellKind::Param => {
            let p = &meta.param[idx];
            let rank = p.dims.len();
            Cell::Param(ParamCell {
                sub_id: row.get(0)?,
                dims: dims_of(row, 1, rank)?,
                value: decode(row, 1 + rank, ValueType::of(&meta.types[p.type_index].type_dic))?,
            })
        }
        CellKind::Expr => {
            let rank = meta.table[idx].dims.len();
            Cell::Expr(ExprCell { expr_id: row.get(0)?, dims: dims_of(row, 1, rank)?, value: row.get(1 + rank)? })
        }
        CellKind::Acc => {
            let rank = meta.table[idx].dims.len();
            Cell::Acc(AccCell {
                acc_id: row.get(0)?,
                sub_id: row.get(1)?,
                dims: dims_of(row, 2, rank)?,
                value: row.get(2 + rank)?,
            })
        }
        CellKind::AllAcc => {
            let t = &meta.table[idx];
            let rank = t.dims.len();
            let n = t.stored_acc().count();
            Cell::AllAcc(AllAccCell {
                sub_id: row.get(0)?,
                dims: dims_of(row, 1, rank)?,
                values: (1 + rank..1 + rank + n).map(|k| row.get(k)).collect::<rusqlite::Result<_>>()?,
            })
        }
        CellKind::Micro => {
            let e = &meta.entity[idx];
            let mut attrs = Vec::new();
            for (k, a) in e.attr.iter().filter(|a| !a.is_internal).enumerate() {
                attrs.push(decode(row, 1 + k, ValueType::of(&meta.types[a.type_index].type_dic))?);
            }
            Cell::Micro(MicroCell { key: row.get(0)?, attrs })
        }
    };
    Ok(cell)
}

/// Insert-side counterpart of [`read_values`] for one artifact.
pub struct ValueWriter<'c> {
    conn: &'c Connection,
    name: String,
    main_sql: String,
    acc_sql: Option<String>,
    key: i32,
    rank: usize,
    width: usize,
    stored_acc: Vec<i32>,
    rows: usize,
}

impl<'c> ValueWriter<'c> {
    /// Writer of parameter rows owned by `dst`.
    #[must_use]
    pub fn param(conn: &'c Connection, meta: &ModelMeta, idx: usize, dst: ValueSource) -> Self {
        let p = &meta.param[idx];
        let dims: Vec<String> = p.dims.iter().map(|d| d.col_name.clone()).collect();
        let (table, key_col, key) = match dst {
            ValueSource::Run(id) => (&p.param.db_run_table, "run_id", id),
            ValueSource::Set(id) => (&p.param.db_set_table, "set_id", id),
        };
        let marks = placeholders(3 + dims.len());
        Self {
            conn,
            name: p.param.name.clone(),
            main_sql: format!(
                "INSERT INTO {table} ({key_col}, sub_id{d}, param_value) VALUES ({marks})",
                d = dim_list(&dims, "")
            ),
            acc_sql: None,
            key,
            rank: dims.len(),
            width: 1,
            stored_acc: Vec::new(),
            rows: 0,
        }
    }

    /// Writer of expression and accumulator rows of a run; derived
    /// accumulators are not stored and their rows are skipped.
    #[must_use]
    pub fn table(conn: &'c Connection, meta: &ModelMeta, idx: usize, run_id: i32) -> Self {
        let t = &meta.table[idx];
        let dims: Vec<String> = t.dims.iter().map(|d| d.col_name.clone()).collect();
        let d = dim_list(&dims, "");
        Self {
            conn,
            name: t.table.name.clone(),
            main_sql: format!(
                "INSERT INTO {} (run_id, expr_id{d}, expr_value) VALUES ({})",
                t.table.db_expr_table,
                placeholders(3 + dims.len())
            ),
            acc_sql: Some(format!(
                "INSERT INTO {} (run_id, acc_id, sub_id{d}, acc_value) VALUES ({})",
                t.table.db_acc_table,
                placeholders(4 + dims.len())
            )),
            key: run_id,
            rank: dims.len(),
            width: 1,
            stored_acc: t.stored_acc().map(|a| a.acc_id).collect(),
            rows: 0,
        }
    }

    /// Writer of entity microdata rows of a run.
    #[must_use]
    pub fn micro(conn: &'c Connection, meta: &ModelMeta, idx: usize, run_id: i32) -> Self {
        let e = &meta.entity[idx];
        let attrs: Vec<String> = e.attr.iter().filter(|a| !a.is_internal).map(|a| a.col_name.clone()).collect();
        Self {
            conn,
            name: e.entity.name.clone(),
            main_sql: format!(
                "INSERT INTO {} (run_id, entity_key{a}) VALUES ({})",
                e.entity.db_entity_table,
                placeholders(2 + attrs.len()),
                a = dim_list(&attrs, "")
            ),
            acc_sql: None,
            key: run_id,
            rank: 0,
            width: attrs.len(),
            stored_acc: Vec::new(),
            rows: 0,
        }
    }

    /// # Errors
    /// Returns `InvalidArgument` for a cell of the wrong kind or shape and a
    /// driver error when the row cannot be inserted.
    pub fn write(&mut self, cell: &Cell) -> Result<()> {
        let key = Value::Integer(i64::from(self.key));
        let dims = |d: &[i32]| -> Result<Vec<Value>> {
            if d.len() != self.rank {
                return Err(DbcopyError::invalid(format!(
                    "invalid number of dimensions {} of {}, expected {}",
                    d.len(),
                    self.name,
                    self.rank
                ))
                .into());
            }
            Ok(d.iter().map(|v| Value::Integer(i64::from(*v))).collect())
        };

        let (sql, values) = match (cell, &self.acc_sql) {
            (Cell::Param(c), None) if self.width == 1 => {
                let mut v = vec![key, Value::Integer(i64::from(c.sub_id))];
                v.extend(dims(&c.dims)?);
                v.push(encode(&c.value));
                (&self.main_sql, v)
            }
            (Cell::Expr(c), Some(_)) => {
                let mut v = vec![key, Value::Integer(i64::from(c.expr_id))];
                v.extend(dims(&c.dims)?);
                v.push(c.value.map_or(Value::Null, Value::Real));
                (&self.main_sql, v)
            }
            (Cell::Acc(c), Some(acc_sql)) => {
                if !self.stored_acc.contains(&c.acc_id) {
                    return Ok(());
                }
                let mut v = vec![key, Value::Integer(i64::from(c.acc_id)), Value::Integer(i64::from(c.sub_id))];
                v.extend(dims(&c.dims)?);
                v.push(c.value.map_or(Value::Null, Value::Real));
                (acc_sql, v)
            }
            (Cell::Micro(c), None) if c.attrs.len() == self.width => {
                let mut v = vec![key, Value::Integer(c.key)];
                v.extend(c.attrs.iter().map(encode));
                (&self.main_sql, v)
            }
            _ => {
                return Err(DbcopyError::invalid(format!("invalid value row of {}: {cell:?}", self.name)).into());
            }
        };
        let mut stmt = self.conn.prepare_cached(sql).with_context(|| format!("failed to prepare insert into {}", self.name))?;
        stmt.execute(params_from_iter(values)).with_context(|| format!("failed to insert values of {}", self.name))?;
        self.rows += 1;
        Ok(())
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|k| format!("?{k}")).collect::<Vec<_>>().join(", ")
}

/// Verify that a run holds a complete set of parameter rows: one row per
/// dimension cell and sub-value.
///
/// # Errors
/// Returns `IntegrityMismatch` when rows are missing or extra.
pub fn check_param_rows(conn: &Connection, meta: &ModelMeta, idx: usize, run_id: i32, sub_count: i32) -> Result<()> {
    let p = &meta.param[idx];
    let Some(base) = base_run_id(conn, "run_parameter", "parameter_hid", run_id, p.param.param_hid)? else {
        return Err(DbcopyError::integrity(format!("parameter {} not found in model run {run_id}", p.param.name)).into());
    };
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {} WHERE run_id = ?1", p.param.db_run_table), params![base], |r| {
            r.get(0)
        })
        .with_context(|| format!("failed to count values of parameter {}", p.param.name))?;
    let expected = i64::try_from(p.size_of).unwrap_or(i64::MAX).saturating_mul(i64::from(sub_count.max(1)));
    if count != expected {
        return Err(DbcopyError::integrity(format!(
            "invalid number of rows of parameter {} in model run {run_id}: {count}, expected {expected}",
            p.param.name
        ))
        .into());
    }
    Ok(())
}

fn value_text(d: &ValueDigester, v: &CellValue) -> String {
    match v {
        CellValue::Null => "null".to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => d.float(Some(*f)),
        CellValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        CellValue::Str(s) => s.clone(),
    }
}

fn push_cell(d: &mut ValueDigester, cell: &Cell) {
    let mut fields: Vec<String> = Vec::new();
    match cell {
        Cell::Param(c) => {
            fields.push(c.sub_id.to_string());
            fields.extend(c.dims.iter().map(ToString::to_string));
            fields.push(value_text(d, &c.value));
        }
        Cell::Expr(c) => {
            fields.push(c.expr_id.to_string());
            fields.extend(c.dims.iter().map(ToString::to_string));
            fields.push(d.float(c.value));
        }
        Cell::Acc(c) => {
            fields.push(c.acc_id.to_string());
            fields.push(c.sub_id.to_string());
            fields.extend(c.dims.iter().map(ToString::to_string));
            fields.push(d.float(c.value));
        }
        Cell::AllAcc(c) => {
            fields.push(c.sub_id.to_string());
            fields.extend(c.dims.iter().map(ToString::to_string));
            fields.extend(c.values.iter().map(|v| d.float(*v)));
        }
        Cell::Micro(c) => {
            fields.push(c.key.to_string());
            fields.extend(c.attrs.iter().map(|v| value_text(d, v)));
        }
    }
    d.push_fields(&fields);
}

/// Digest of parameter values of a run, `None` when the run has none.
///
/// # Errors
/// Returns an error when values cannot be read.
pub fn param_value_digest(conn: &Connection, meta: &ModelMeta, idx: usize, run_id: i32, ctx: &RunContext<'_>) -> Result<Option<String>> {
    let p = &meta.param[idx];
    let mut d = ValueDigester::param(&p.param.name, &p.param.digest, p.dims.len());
    let n = read_values(conn, meta, CellKind::Param, idx, ValueSource::Run(run_id), ctx, |c| {
        push_cell(&mut d, &c);
        Ok(())
    })?;
    Ok(n.map(|_| d.finish()))
}

/// Digest of output table values of a run: accumulators, then expressions.
///
/// # Errors
/// Returns an error when values cannot be read.
pub fn table_value_digest(conn: &Connection, meta: &ModelMeta, idx: usize, run_id: i32, ctx: &RunContext<'_>) -> Result<Option<String>> {
    let t = &meta.table[idx];
    let dims: String = t.dims.iter().map(|d| format!(",{}", d.col_name)).collect();
    let mut d = ValueDigester::table(&t.table.name, &t.table.digest);

    d.begin_section(&format!("acc_id,sub_id{dims},acc_value"));
    let acc = read_values(conn, meta, CellKind::Acc, idx, ValueSource::Run(run_id), ctx, |c| {
        push_cell(&mut d, &c);
        Ok(())
    })?;
    if acc.is_none() {
        return Ok(None);
    }
    d.begin_section(&format!("expr_id{dims},expr_value"));
    read_values(conn, meta, CellKind::Expr, idx, ValueSource::Run(run_id), ctx, |c| {
        push_cell(&mut d, &c);
        Ok(())
    })?;
    Ok(Some(d.finish()))
}

/// Digest of entity microdata of a run.
///
/// # Errors
/// Returns an error when values cannot be read.
pub fn entity_value_digest(conn: &Connection, meta: &ModelMeta, idx: usize, run_id: i32, ctx: &RunContext<'_>) -> Result<Option<String>> {
    let e = &meta.entity[idx];
    let names: Vec<String> = e.attr.iter().filter(|a| !a.is_internal).map(|a| a.name.clone()).collect();
    let mut d = ValueDigester::entity(&e.entity.name, &e.entity.digest, &names);
    let n = read_values(conn, meta, CellKind::Micro, idx, ValueSource::Run(run_id), ctx, |c| {
        push_cell(&mut d, &c);
        Ok(())
    })?;
    Ok(n.map(|_| d.finish()))
}

/// Compute every missing parameter, table and entity value digest of a run
/// from its stored rows, then recompute the run value digest.
///
/// # Errors
/// Returns an error when values cannot be read or digests cannot be stored.
pub fn fill_run_digests(conn: &Connection, meta: &ModelMeta, run_id: i32, ctx: &RunContext<'_>) -> Result<String> {
    let missing = |sql: &str| -> Result<Vec<i32>> {
        let mut stmt = conn.prepare(sql).context("failed to prepare value digest query")?;
        let rows = stmt.query_map(params![run_id], |r| r.get(0))
            .context("failed to query value digests")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode value digests")?;
        Ok(rows)
    };

    for hid in missing("SELECT parameter_hid FROM run_parameter WHERE run_id = ?1 AND value_digest IS NULL")? {
        if let Some(idx) = meta.param_by_hid(hid) {
            if let Some(digest) = param_value_digest(conn, meta, idx, run_id, ctx)? {
                run_db::set_param_value_digest(conn, run_id, hid, &digest)?;
            }
        }
    }
    for hid in missing("SELECT table_hid FROM run_table WHERE run_id = ?1 AND value_digest IS NULL")? {
        if let Some(idx) = meta.out_table_by_hid(hid) {
            if let Some(digest) = table_value_digest(conn, meta, idx, run_id, ctx)? {
                run_db::set_table_value_digest(conn, run_id, hid, &digest)?;
            }
        }
    }
    for hid in missing("SELECT entity_hid FROM run_entity WHERE run_id = ?1 AND value_digest IS NULL")? {
        if let Some(idx) = meta.entity_by_hid(hid) {
            if let Some(digest) = entity_value_digest(conn, meta, idx, run_id, ctx)? {
                run_db::set_entity_value_digest(conn, run_id, hid, &digest)?;
            }
        }
    }
    run_db::update_run_value_digest(conn, run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_run, seed_set, seeded_db};
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::run::RunStatus;

    fn collect(
        conn: &Connection,
        meta: &ModelMeta,
        kind: CellKind,
        idx: usize,
        src: ValueSource,
    ) -> Result<(Option<usize>, Vec<Cell>)> {
        let progress = MemoryProgress::default();
        let ctx = RunContext::new(&progress);
        let mut cells = Vec::new();
        let n = read_values(conn, meta, kind, idx, src, &ctx, |c| {
            cells.push(c);
            Ok(())
        })?;
        Ok((n, cells))
    }

    #[test]
    fn parameter_values_stream_in_key_order() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "r1", RunStatus::Success)?;

        let idx = meta.require_param("ageSex")?;
        let (n, cells) = collect(db.conn(), &meta, CellKind::Param, idx, ValueSource::Run(run_id))?;
        assert_eq!(n, Some(meta.param[idx].size_of));
        match &cells[0] {
            Cell::Param(c) => {
                assert_eq!(c.dims, vec![10, 0]);
                assert!(matches!(c.value, CellValue::Float(_)));
            }
            other => panic!("unexpected cell {other:?}"),
        }
        check_param_rows(db.conn(), &meta, idx, run_id, 1)?;

        let seed = meta.require_param("StartingSeed")?;
        let (n, _) = collect(db.conn(), &meta, CellKind::Param, seed, ValueSource::Run(run_id))?;
        assert_eq!(n, Some(1));
        Ok(())
    }

    #[test]
    fn all_accumulators_view_pairs_stored_accumulators() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let run_id = seed_run(&mut db, &meta, "r1", RunStatus::Success)?;

        let idx = meta.require_table("salarySex")?;
        let (acc_rows, _) = collect(db.conn(), &meta, CellKind::Acc, idx, ValueSource::Run(run_id))?;
        let (all_rows, all) = collect(db.conn(), &meta, CellKind::AllAcc, idx, ValueSource::Run(run_id))?;
        assert_eq!(acc_rows.map(|n| n / 2), all_rows);
        match &all[0] {
            Cell::AllAcc(c) => assert_eq!(c.values.len(), 2),
            other => panic!("unexpected cell {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn set_values_and_output_of_set_is_invalid() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let set_id = seed_set(&mut db, &meta, "Default")?;

        let idx = meta.require_param("isOldAge")?;
        let (n, cells) = collect(db.conn(), &meta, CellKind::Param, idx, ValueSource::Set(set_id))?;
        assert_eq!(n, Some(4));
        assert!(cells.iter().all(|c| matches!(c, Cell::Param(p) if matches!(p.value, CellValue::Bool(_)))));

        let err = match collect(db.conn(), &meta, CellKind::Expr, 0, ValueSource::Set(set_id)) {
            Ok(_) => panic!("expected invalid argument"),
            Err(err) => err,
        };
        assert_eq!(dbcopy_core::classify(err.as_ref()), dbcopy_core::ErrorKind::InvalidArgument);
        Ok(())
    }

    #[test]
    fn derived_accumulators_are_not_written() -> Result<()> {
        let db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let idx = meta.require_table("salarySex")?;
        let mut w = ValueWriter::table(db.conn(), &meta, idx, 500);
        w.write(&Cell::Acc(AccCell { acc_id: 2, sub_id: 0, dims: vec![100, 0], value: Some(1.0) }))?;
        w.write(&Cell::Acc(AccCell { acc_id: 0, sub_id: 0, dims: vec![100, 0], value: Some(1.0) }))?;
        assert_eq!(w.rows(), 1);

        let bad = w.write(&Cell::Acc(AccCell { acc_id: 0, sub_id: 0, dims: vec![100], value: None }));
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn digests_depend_on_values_and_fill_the_run() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let a = seed_run(&mut db, &meta, "a", RunStatus::Success)?;
        let b = seed_run(&mut db, &meta, "b", RunStatus::Success)?;

        let progress = MemoryProgress::default();
        let ctx = RunContext::new(&progress);
        let idx = meta.require_param("ageSex")?;
        let da = param_value_digest(db.conn(), &meta, idx, a, &ctx)?;
        let db_ = param_value_digest(db.conn(), &meta, idx, b, &ctx)?;
        assert!(da.is_some());
        assert_eq!(da, db_);

        db.conn().execute(
            &format!("UPDATE {} SET param_value = param_value + 1 WHERE run_id = ?1", meta.param[idx].param.db_run_table),
            params![b],
        )?;
        assert_ne!(param_value_digest(db.conn(), &meta, idx, b, &ctx)?, da);

        let run_digest: Option<String> =
            db.conn().query_row("SELECT value_digest FROM run_lst WHERE run_id = ?1", params![a], |r| r.get(0))?;
        assert_eq!(run_digest.map(|d| d.len()), Some(32));
        Ok(())
    }
}

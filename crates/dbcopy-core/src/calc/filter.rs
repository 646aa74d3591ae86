//! Dimension filters and ordering of calculation results.

use crate::error::{DbcopyError, Result};
use crate::model::{ModelMeta, TOTAL_ENUM_CODE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    /// Inclusive range of exactly two values.
    Between,
}

/// Filter on one dimension (or group-by attribute) of a calculation result.
/// Values are enum codes unless `is_enum_id` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimFilter {
    pub name: String,
    pub op: FilterOp,
    pub values: Vec<String>,
    pub is_enum_id: bool,
}

/// Ordering by a result column: `run_id`, a dimension column or `calc_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub is_desc: bool,
}

/// Column a filter name resolves to.
#[derive(Debug, Clone)]
pub(crate) struct FilterTarget {
    pub col_name: String,
    pub type_index: usize,
    pub is_total: bool,
}

/// `C.run_id IN (...)` followed by one condition per filter.
pub(crate) fn main_where(
    meta: &ModelMeta,
    run_ids: &[i32],
    filters: &[DimFilter],
    lookup: impl Fn(&str) -> Option<FilterTarget>,
) -> Result<String> {
    let ids: Vec<String> = run_ids.iter().map(ToString::to_string).collect();
    let mut sql = format!("C.run_id IN ({})", ids.join(", "));

    for f in filters {
        let target = lookup(&f.name)
            .ok_or_else(|| DbcopyError::invalid(format!("filter dimension {} not found", f.name)))?;
        if f.values.is_empty() {
            return Err(DbcopyError::invalid(format!("filter on {} has no values", f.name)));
        }
        let vals = f
            .values
            .iter()
            .map(|v| filter_literal(meta, &target, f, v))
            .collect::<Result<Vec<_>>>()?;
        let col = &target.col_name;
        let cond = match f.op {
            FilterOp::Eq if vals.len() == 1 => format!("C.{col} = {}", vals[0]),
            FilterOp::In => format!("C.{col} IN ({})", vals.join(", ")),
            FilterOp::Between if vals.len() == 2 => format!("C.{col} BETWEEN {} AND {}", vals[0], vals[1]),
            _ => {
                return Err(DbcopyError::invalid(format!(
                    "invalid number of values in filter on {}",
                    f.name
                )))
            }
        };
        sql.push_str(" AND ");
        sql.push_str(&cond);
    }
    Ok(sql)
}

fn filter_literal(meta: &ModelMeta, target: &FilterTarget, f: &DimFilter, value: &str) -> Result<String> {
    let t = &meta.types[target.type_index];
    let bad = || DbcopyError::invalid(format!("invalid value {value} in filter on {}", f.name));

    if !t.type_dic.is_enum_based() {
        if t.type_dic.is_string() {
            return Ok(format!("'{}'", value.replace('\'', "''")));
        }
        if t.type_dic.is_float() {
            return value.trim().parse::<f64>().map(|v| v.to_string()).map_err(|_| bad());
        }
        return value.trim().parse::<i64>().map(|v| v.to_string()).map_err(|_| bad());
    }

    let id = if f.is_enum_id {
        let id = value.trim().parse::<i32>().map_err(|_| bad())?;
        let ok = t.has_enum_id(id) || (target.is_total && id == t.type_dic.total_enum_id);
        ok.then_some(id).ok_or_else(bad)?
    } else if target.is_total && value == TOTAL_ENUM_CODE {
        t.type_dic.total_enum_id
    } else {
        t.enum_id_by_code(value).ok_or_else(bad)?
    };
    Ok(id.to_string())
}

/// `ORDER BY` clause over result columns, by default all key columns in order.
pub(crate) fn order_by_clause(columns: &[String], order: &[OrderBy]) -> Result<String> {
    if order.is_empty() {
        let keys: Vec<String> = (1..columns.len()).map(|k| k.to_string()).collect();
        return Ok(format!("ORDER BY {}", keys.join(", ")));
    }
    let mut parts = Vec::with_capacity(order.len());
    for o in order {
        let Some(col) = columns.iter().find(|c| c.eq_ignore_ascii_case(&o.column)) else {
            return Err(DbcopyError::invalid(format!("invalid order by column {}", o.column)));
        };
        parts.push(if o.is_desc { format!("C.{col} DESC") } else { format!("C.{col}") });
    }
    Ok(format!("ORDER BY {}", parts.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<String> {
        ["run_id", "dim0", "calc_value"].iter().map(ToString::to_string).collect()
    }

    #[test]
    fn default_order_is_by_key_columns() -> anyhow::Result<()> {
        assert_eq!(order_by_clause(&cols(), &[])?, "ORDER BY 1, 2");
        Ok(())
    }

    #[test]
    fn order_by_accepts_only_result_columns() -> anyhow::Result<()> {
        let ok = [OrderBy { column: "DIM0".into(), is_desc: true }, OrderBy { column: "run_id".into(), is_desc: false }];
        assert_eq!(order_by_clause(&cols(), &ok)?, "ORDER BY C.dim0 DESC, C.run_id");
        let bad = [OrderBy { column: "1; select".into(), is_desc: false }];
        assert!(order_by_clause(&cols(), &bad).is_err());
        Ok(())
    }
}

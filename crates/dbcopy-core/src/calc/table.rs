//! Output table calculations over expression and accumulator values.

use std::collections::BTreeSet;

use crate::calc::expr::{compare_mode, expand_macros, find_aggregations, find_refs, replace_refs, NameRef, Side};
use crate::calc::filter::{main_where, order_by_clause, FilterTarget};
use crate::calc::lexer::tokenize;
use crate::calc::{CalcRequest, CalcSql};
use crate::error::{DbcopyError, Result};
use crate::model::{ModelMeta, TableMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Expr,
    Acc,
}

/// SQL of an expression calculation, e.g. `Expr1 / Expr0` for every run or
/// `Expr0[variant] - Expr0[base]` comparing runs to the base run.
///
/// # Errors
/// Returns `NotFound` for an unknown table and `Syntax` for an unsafe or
/// malformed expression.
pub fn translate_to_expr_sql(meta: &ModelMeta, table_name: &str, req: &CalcRequest) -> Result<CalcSql> {
    let idx = meta.require_table(table_name)?;
    translate(meta, &meta.table[idx], req, Source::Expr)
}

/// SQL of an accumulator calculation aggregated over sub-values, e.g.
/// `OM_AVG(acc0[variant]) - OM_AVG(acc0[base])`.
///
/// # Errors
/// Returns `NotFound` for an unknown table and `Syntax` for an unsafe,
/// malformed or non-aggregated expression.
pub fn translate_to_acc_sql(meta: &ModelMeta, table_name: &str, req: &CalcRequest) -> Result<CalcSql> {
    let idx = meta.require_table(table_name)?;
    translate(meta, &meta.table[idx], req, Source::Acc)
}

fn translate(meta: &ModelMeta, table: &TableMeta, req: &CalcRequest, source: Source) -> Result<CalcSql> {
    let tokens = tokenize(req.expr)?;
    let refs = match source {
        Source::Expr => find_refs(&tokens, |n| table.expr_by_name(n).is_some())?,
        Source::Acc => find_refs(&tokens, |n| table.acc_by_name(n).is_some())?,
    };
    let is_compare = compare_mode(&refs, req.expr)?;

    let id_of = |r: &NameRef| -> Result<i32> {
        match source {
            Source::Expr => table.expr_by_name(&r.name).map(|e| e.expr_id),
            Source::Acc => match table.acc_by_name(&r.name) {
                Some(a) if a.is_derived => {
                    return Err(DbcopyError::syntax(format!(
                        "derived accumulator {} cannot be used in calculation",
                        r.name
                    )))
                }
                a => a.map(|a| a.acc_id),
            },
        }
        .ok_or_else(|| DbcopyError::syntax(format!("unknown name {}", r.name)))
    };

    let mut all_ids = BTreeSet::new();
    let mut base_ids = BTreeSet::new();
    let mut var_ids = BTreeSet::new();
    for r in &refs {
        let id = id_of(r)?;
        all_ids.insert(id);
        if r.side == Side::Variant {
            var_ids.insert(id);
        } else {
            base_ids.insert(id);
        }
    }
    let base: Vec<i32> = base_ids.into_iter().collect();
    let variant: Vec<i32> = var_ids.into_iter().collect();

    let alias = |prefix: &str, ids: &[i32], id: i32| -> String {
        if ids.first() == Some(&id) {
            prefix.to_string()
        } else {
            format!("{prefix}{id}")
        }
    };

    let mut columns = std::collections::HashMap::with_capacity(refs.len());
    for r in &refs {
        let id = id_of(r)?;
        let a = if r.side == Side::Variant { alias("V", &variant, id) } else { alias("B", &base, id) };
        columns.insert(r.start, format!("{a}.src{id}"));
    }
    let rewritten = replace_refs(&tokens, &refs, |r| columns.get(&r.start).cloned().unwrap_or_default());
    find_aggregations(&rewritten)?;
    let (calc, has_agg) = expand_macros(&rewritten)?;
    match source {
        Source::Acc if !has_agg => {
            return Err(DbcopyError::syntax(format!(
                "accumulator expression must use an aggregation function: {}",
                req.expr
            )))
        }
        Source::Expr if has_agg => {
            return Err(DbcopyError::syntax(format!(
                "aggregation functions are not allowed in expression calculation: {}",
                req.expr
            )))
        }
        _ => {}
    }

    let dim_cols: Vec<&str> = table.dims.iter().map(|d| d.col_name.as_str()).collect();
    let is_acc = source == Source::Acc;

    let mut ctes = Vec::with_capacity(all_ids.len() + 1);
    for id in &all_ids {
        ctes.push(source_cte(table, &dim_cols, *id, source));
    }

    // joins: first base alias is the anchor, other base aliases join on run,
    // variant aliases join on dimensions to the base and on run to the first variant
    let eq_dims = |a: &str, b: &str| -> Vec<String> {
        let mut v = Vec::new();
        if is_acc {
            v.push(format!("{a}.sub_id = {b}.sub_id"));
        }
        v.extend(dim_cols.iter().map(|d| format!("{a}.{d} = {b}.{d}")));
        v
    };
    let mut from = format!("cs{} B", base[0]);
    for id in &base[1..] {
        let mut on = vec![format!("B{id}.run_id = B.run_id")];
        on.extend(eq_dims(&format!("B{id}"), "B"));
        from.push_str(&format!(" INNER JOIN cs{id} B{id} ON ({})", on.join(" AND ")));
    }
    if is_compare {
        let on = eq_dims("V", "B");
        if on.is_empty() {
            from.push_str(&format!(" CROSS JOIN cs{} V", variant[0]));
        } else {
            from.push_str(&format!(" INNER JOIN cs{} V ON ({})", variant[0], on.join(" AND ")));
        }
        for id in &variant[1..] {
            let a = format!("V{id}");
            let mut on = vec![format!("{a}.run_id = V.run_id")];
            if is_acc {
                on.push(format!("{a}.sub_id = V.sub_id"));
            }
            on.extend(dim_cols.iter().map(|d| format!("{a}.{d} = B.{d}")));
            from.push_str(&format!(" INNER JOIN cs{id} {a} ON ({})", on.join(" AND ")));
        }
    }

    let row = if is_compare { "V" } else { "B" };
    let mut select = vec![format!("{row}.run_id")];
    select.extend(dim_cols.iter().map(|d| format!("{row}.{d}")));
    let group_by = select.join(", ");
    select.push(calc);

    let mut cr_cols = vec!["run_id".to_string()];
    cr_cols.extend(dim_cols.iter().map(ToString::to_string));
    cr_cols.push("calc_value".to_string());

    let mut cr = format!("cr ({}) AS ( SELECT {} FROM {from}", cr_cols.join(", "), select.join(", "));
    if is_compare {
        cr.push_str(&format!(" WHERE B.run_id = {}", req.from_id));
    }
    if is_acc {
        cr.push_str(&format!(" GROUP BY {group_by}"));
    }
    cr.push_str(" )");
    ctes.push(cr);

    let mut run_ids = Vec::with_capacity(req.run_ids.len() + 1);
    if !is_compare {
        run_ids.push(req.from_id);
    }
    run_ids.extend(req.run_ids.iter().copied().filter(|id| is_compare || *id != req.from_id));
    if run_ids.is_empty() {
        return Err(DbcopyError::invalid("list of model runs to compare is empty"));
    }

    let dim_index = |name: &str| table.dims.iter().position(|d| d.name == name);
    let mut main = format!(
        "SELECT C.{} FROM cr C WHERE {}",
        cr_cols.join(", C."),
        main_where(meta, &run_ids, req.filters, |name| {
            dim_index(name).map(|k| FilterTarget {
                col_name: table.dims[k].col_name.clone(),
                type_index: table.dims[k].type_index,
                is_total: table.dims[k].is_total,
            })
        })?
    );
    main.push(' ');
    main.push_str(&order_by_clause(&cr_cols, req.order_by)?);

    Ok(CalcSql { cte: format!("WITH {}", ctes.join(", ")), main, is_compare })
}

fn source_cte(table: &TableMeta, dim_cols: &[&str], id: i32, source: Source) -> String {
    let mut cols = vec!["run_id".to_string()];
    let mut sel = vec!["BR.run_id".to_string()];
    if source == Source::Acc {
        cols.push("sub_id".to_string());
        sel.push("C.sub_id".to_string());
    }
    for d in dim_cols {
        cols.push((*d).to_string());
        sel.push(format!("C.{d}"));
    }
    cols.push(format!("src{id}"));
    let (db_table, value_col, id_col) = match source {
        Source::Expr => (&table.table.db_expr_table, "expr_value", "expr_id"),
        Source::Acc => (&table.table.db_acc_table, "acc_value", "acc_id"),
    };
    sel.push(format!("C.{value_col}"));
    format!(
        "cs{id} ({}) AS ( SELECT {} FROM {db_table} C INNER JOIN run_table BR ON (BR.base_run_id = C.run_id AND BR.table_hid = {}) WHERE C.{id_col} = {id} )",
        cols.join(", "),
        sel.join(", "),
        table.table.table_hid
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{DimFilter, FilterOp, OrderBy};
    use crate::testing::model_one;

    fn req<'a>(expr: &'a str, from_id: i32, run_ids: &'a [i32]) -> CalcRequest<'a> {
        CalcRequest { expr, from_id, run_ids, filters: &[], order_by: &[] }
    }

    #[test]
    fn single_run_expression_uses_base_aliases() -> anyhow::Result<()> {
        let meta = model_one()?;
        let sql = translate_to_expr_sql(&meta, "salarySex", &req("Expr1 / OM_DENOM(Expr0)", 11, &[12]))?;
        assert!(!sql.is_compare);
        assert!(sql.cte.ends_with(
            "cr (run_id, dim0, dim1, calc_value) AS ( SELECT B.run_id, B.dim0, B.dim1, B1.src1 / CASE WHEN ABS(B.src0) > 1.0e-37 THEN B.src0 ELSE NULL END FROM cs0 B INNER JOIN cs1 B1 ON (B1.run_id = B.run_id AND B1.dim0 = B.dim0 AND B1.dim1 = B.dim1) )"
        ));
        assert_eq!(
            sql.main,
            "SELECT C.run_id, C.dim0, C.dim1, C.calc_value FROM cr C WHERE C.run_id IN (11, 12) ORDER BY 1, 2, 3"
        );
        Ok(())
    }

    #[test]
    fn accumulator_expression_must_aggregate() -> anyhow::Result<()> {
        let meta = model_one()?;
        assert!(translate_to_acc_sql(&meta, "salarySex", &req("acc0 + 1", 11, &[])).is_err());
        assert!(translate_to_acc_sql(&meta, "salarySex", &req("OM_AVG(acc2)", 11, &[])).is_err());
        let sql = translate_to_acc_sql(&meta, "salarySex", &req("OM_AVG(acc0)", 11, &[]))?;
        assert!(sql.cte.contains("GROUP BY B.run_id, B.dim0, B.dim1"));
        assert!(sql.cte.contains("C.sub_id"));
        Ok(())
    }

    #[test]
    fn aggregation_is_rejected_for_expressions() -> anyhow::Result<()> {
        let meta = model_one()?;
        assert!(translate_to_expr_sql(&meta, "salarySex", &req("OM_SUM(Expr0)", 11, &[])).is_err());
        Ok(())
    }

    #[test]
    fn filters_and_order_by_are_appended() -> anyhow::Result<()> {
        let meta = model_one()?;
        let filters = [
            DimFilter { name: "dim0".into(), op: FilterOp::In, values: vec!["L".into(), "H".into()], is_enum_id: false },
            DimFilter { name: "dim1".into(), op: FilterOp::Eq, values: vec!["2".into()], is_enum_id: true },
        ];
        let order = [OrderBy { column: "calc_value".into(), is_desc: true }];
        let r = CalcRequest { expr: "Expr0", from_id: 11, run_ids: &[], filters: &filters, order_by: &order };
        let sql = translate_to_expr_sql(&meta, "salarySex", &r)?;
        assert_eq!(
            sql.main,
            "SELECT C.run_id, C.dim0, C.dim1, C.calc_value FROM cr C WHERE C.run_id IN (11) AND C.dim0 IN (100, 300) AND C.dim1 = 2 ORDER BY C.calc_value DESC"
        );
        Ok(())
    }

    #[test]
    fn unknown_table_is_not_found() -> anyhow::Result<()> {
        let meta = model_one()?;
        match translate_to_expr_sql(&meta, "noTable", &req("Expr0", 1, &[])) {
            Ok(_) => panic!("expected error"),
            Err(err) => assert_eq!(err.kind(), crate::ErrorKind::NotFound),
        }
        Ok(())
    }
}

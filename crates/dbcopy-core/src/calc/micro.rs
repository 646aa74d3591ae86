//! Aggregation of entity microdata grouped by attributes.
//!
//! Every attribute reference must sit inside an aggregation macro. In compare
//! mode each aggregation reads a single run, base or variant, and the
//! aggregated values of both runs are joined by the group-by attributes.

use std::collections::{BTreeSet, HashMap};

use crate::calc::expr::{compare_mode, expand_macros, find_aggregations, find_refs, AggCall, NameRef, Side};
use crate::calc::filter::{main_where, order_by_clause, FilterTarget};
use crate::calc::lexer::{tokenize, Token};
use crate::calc::{CalcRequest, CalcSql};
use crate::error::{DbcopyError, Result};
use crate::model::{EntityAttrRow, EntityMeta, ModelMeta};

/// `param.Name` reference spanning tokens `start..end`.
#[derive(Debug, Clone)]
struct ParamRef {
    param_id: i32,
    start: usize,
    end: usize,
}

/// SQL aggregating microdata of `entity_name` by `group_by` attributes, e.g.
/// `OM_AVG(Income)` or `OM_AVG(Income[variant]) - OM_AVG(Income[base])`.
///
/// # Errors
/// Returns `NotFound` for an unknown entity, `InvalidArgument` for an unknown
/// group-by attribute and `Syntax` for an unsafe or malformed expression.
pub fn translate_to_micro_sql(
    meta: &ModelMeta,
    entity_name: &str,
    group_by: &[String],
    req: &CalcRequest,
) -> Result<CalcSql> {
    let ent_idx = meta.entity_by_name(entity_name).ok_or_else(|| {
        DbcopyError::not_found(format!("entity {entity_name} not found in model {}", meta.model.name))
    })?;
    let entity = &meta.entity[ent_idx];

    let mut group_attrs: Vec<&EntityAttrRow> = Vec::with_capacity(group_by.len());
    for name in group_by {
        let attr = entity
            .attr_by_name(name)
            .filter(|a| !a.is_internal)
            .ok_or_else(|| DbcopyError::invalid(format!("group by attribute {name} not found in {entity_name}")))?;
        if group_attrs.iter().any(|a| a.attr_id == attr.attr_id) {
            return Err(DbcopyError::invalid(format!("duplicate group by attribute {name}")));
        }
        group_attrs.push(attr);
    }

    let tokens = tokenize(req.expr)?;
    let params = find_param_refs(meta, &tokens)?;
    let refs = find_refs(&tokens, |n| entity.attr_by_name(n).is_some_and(|a| !a.is_internal))?;
    let is_compare = compare_mode(&refs, req.expr)?;
    let calls = find_aggregations(&tokens)?;
    if calls.is_empty() {
        return Err(DbcopyError::syntax(format!(
            "microdata expression must use an aggregation function: {}",
            req.expr
        )));
    }
    for r in &refs {
        if !calls.iter().any(|c| c.start < r.start && r.end <= c.end) {
            return Err(DbcopyError::syntax(format!(
                "attribute {} must be used inside an aggregation function: {}",
                r.name, req.expr
            )));
        }
    }

    let attr_col = |name: &str| entity.attr_by_name(name).map(|a| a.col_name.clone()).unwrap_or_default();
    let group_cols: Vec<String> = group_attrs.iter().map(|a| a.col_name.clone()).collect();

    let mut ctes: Vec<String> = Vec::new();
    let param_ids: BTreeSet<i32> = params.iter().map(|p| p.param_id).collect();
    for id in &param_ids {
        ctes.push(param_cte(meta, *id)?);
    }
    ctes.push(source_cte(entity, &group_attrs, &refs));

    let cr_cols = {
        let mut v = vec!["run_id".to_string()];
        v.extend(group_cols.iter().cloned());
        v.push("calc_value".to_string());
        v
    };

    if is_compare {
        let mut sides = Vec::with_capacity(calls.len());
        for c in &calls {
            sides.push(call_side(c, &refs, req.expr)?);
        }
        if params.iter().any(|p| !calls.iter().any(|c| c.start < p.start && p.end <= c.end)) {
            return Err(DbcopyError::syntax(format!(
                "parameter must be used inside an aggregation function when comparing runs: {}",
                req.expr
            )));
        }

        for (side, alias, name) in [(Side::Base, "B", "ab"), (Side::Variant, "V", "av")] {
            let mut cols = vec!["run_id".to_string()];
            cols.extend(group_cols.iter().cloned());
            let mut sel = vec![format!("{alias}.run_id")];
            sel.extend(group_cols.iter().map(|g| format!("{alias}.{g}")));
            let group = sel.join(", ");
            for (k, c) in calls.iter().enumerate() {
                if sides[k] != side {
                    continue;
                }
                let mut columns = HashMap::new();
                for r in refs.iter().filter(|r| r.start > c.start && r.end <= c.end) {
                    columns.insert(r.start, (r.end, format!("{alias}.{}", attr_col(&r.name))));
                }
                for p in params.iter().filter(|p| p.start > c.start && p.end <= c.end) {
                    columns.insert(p.start, (p.end, format!("P{}.param_value", p.param_id)));
                }
                let (text, _) = expand_macros(&rewrite(&tokens[c.start..=c.end], c.start, &columns))?;
                cols.push(format!("ag{k}"));
                sel.push(text);
            }
            let used: BTreeSet<i32> = params
                .iter()
                .filter(|p| calls.iter().zip(&sides).any(|(c, s)| *s == side && c.start < p.start && p.end <= c.end))
                .map(|p| p.param_id)
                .collect();
            let mut cte = format!(
                "{name} ({}) AS ( SELECT {} FROM asrc {alias}{}",
                cols.join(", "),
                sel.join(", "),
                param_joins(&used, alias)
            );
            if side == Side::Base {
                cte.push_str(&format!(" WHERE B.run_id = {}", req.from_id));
            }
            cte.push_str(&format!(" GROUP BY {group} )"));
            ctes.push(cte);
        }

        let mut columns = HashMap::new();
        for (k, c) in calls.iter().enumerate() {
            let alias = if sides[k] == Side::Variant { "V" } else { "B" };
            columns.insert(c.start, (c.end + 1, format!("{alias}.ag{k}")));
        }
        let (calc, _) = expand_macros(&rewrite(&tokens, 0, &columns))?;

        let mut sel = vec!["V.run_id".to_string()];
        sel.extend(group_cols.iter().map(|g| format!("V.{g}")));
        sel.push(calc);
        let join = if group_cols.is_empty() {
            " CROSS JOIN ab B".to_string()
        } else {
            let on: Vec<String> = group_cols.iter().map(|g| format!("B.{g} = V.{g}")).collect();
            format!(" INNER JOIN ab B ON ({})", on.join(" AND "))
        };
        ctes.push(format!(
            "cr ({}) AS ( SELECT {} FROM av V{join} )",
            cr_cols.join(", "),
            sel.join(", ")
        ));
    } else {
        let mut columns = HashMap::new();
        for r in &refs {
            columns.insert(r.start, (r.end, format!("B.{}", attr_col(&r.name))));
        }
        for p in &params {
            columns.insert(p.start, (p.end, format!("P{}.param_value", p.param_id)));
        }
        let (calc, _) = expand_macros(&rewrite(&tokens, 0, &columns))?;

        let mut sel = vec!["B.run_id".to_string()];
        sel.extend(group_cols.iter().map(|g| format!("B.{g}")));
        let mut group = sel.clone();
        group.extend(param_ids.iter().map(|id| format!("P{id}.param_value")));
        sel.push(calc);
        ctes.push(format!(
            "cr ({}) AS ( SELECT {} FROM asrc B{} GROUP BY {} )",
            cr_cols.join(", "),
            sel.join(", "),
            param_joins(&param_ids, "B"),
            group.join(", ")
        ));
    }

    let mut run_ids = Vec::with_capacity(req.run_ids.len() + 1);
    if !is_compare {
        run_ids.push(req.from_id);
    }
    run_ids.extend(req.run_ids.iter().copied().filter(|id| is_compare || *id != req.from_id));
    if run_ids.is_empty() {
        return Err(DbcopyError::invalid("list of model runs to compare is empty"));
    }

    let where_sql = main_where(meta, &run_ids, req.filters, |name| {
        group_attrs.iter().find(|a| a.name == name).map(|a| FilterTarget {
            col_name: a.col_name.clone(),
            type_index: a.type_index,
            is_total: false,
        })
    })?;
    let main = format!(
        "SELECT C.{} FROM cr C WHERE {where_sql} {}",
        cr_cols.join(", C."),
        order_by_clause(&cr_cols, req.order_by)?
    );

    Ok(CalcSql { cte: format!("WITH {}", ctes.join(", ")), main, is_compare })
}

fn find_param_refs(meta: &ModelMeta, tokens: &[Token]) -> Result<Vec<ParamRef>> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 2 < tokens.len() {
        let qualified = i > 0 && tokens[i - 1] == Token::Dot;
        if !qualified && tokens[i].is_ident("param") && tokens[i + 1] == Token::Dot {
            let Token::Ident(name) = &tokens[i + 2] else {
                return Err(DbcopyError::syntax("parameter name expected after param."));
            };
            let idx = meta
                .param_by_name(name)
                .ok_or_else(|| DbcopyError::syntax(format!("parameter {name} not found")))?;
            let p = &meta.param[idx].param;
            if p.rank != 0 {
                return Err(DbcopyError::syntax(format!(
                    "parameter {name} must be a scalar to be used in microdata calculation"
                )));
            }
            found.push(ParamRef { param_id: p.param_id, start: i, end: i + 3 });
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(found)
}

/// Run side of one aggregation call in compare mode.
fn call_side(call: &AggCall, refs: &[NameRef], src: &str) -> Result<Side> {
    let sides: BTreeSet<Side> = refs
        .iter()
        .filter(|r| r.start > call.start && r.end <= call.end)
        .map(|r| r.side)
        .collect();
    match sides.len() {
        1 => Ok(sides.into_iter().next().unwrap_or(Side::Base)),
        0 => Err(DbcopyError::syntax(format!(
            "aggregation function must use [base] or [variant] attribute: {src}"
        ))),
        _ => Err(DbcopyError::syntax(format!(
            "aggregation function cannot mix [base] and [variant] attributes: {src}"
        ))),
    }
}

/// Copy `tokens` (starting at global index `offset`), replacing spans by
/// column text keyed by global start index.
fn rewrite(tokens: &[Token], offset: usize, columns: &HashMap<usize, (usize, String)>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let Some((end, text)) = columns.get(&(offset + i)) {
            out.push(Token::Ident(text.clone()));
            i = end - offset;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn source_cte(entity: &EntityMeta, group_attrs: &[&EntityAttrRow], refs: &[NameRef]) -> String {
    let mut ids: BTreeSet<i32> = group_attrs.iter().map(|a| a.attr_id).collect();
    ids.extend(refs.iter().filter_map(|r| entity.attr_by_name(&r.name)).map(|a| a.attr_id));
    let cols: Vec<&str> = entity
        .attr
        .iter()
        .filter(|a| ids.contains(&a.attr_id))
        .map(|a| a.col_name.as_str())
        .collect();

    let mut names = vec!["run_id", "entity_key"];
    names.extend(cols.iter().copied());
    let mut sel = vec!["BR.run_id".to_string(), "A.entity_key".to_string()];
    sel.extend(cols.iter().map(|c| format!("A.{c}")));
    format!(
        "asrc ({}) AS ( SELECT {} FROM {} A INNER JOIN run_entity BR ON (BR.base_run_id = A.run_id AND BR.entity_hid = {}) )",
        names.join(", "),
        sel.join(", "),
        entity.entity.db_entity_table,
        entity.entity.entity_hid
    )
}

fn param_cte(meta: &ModelMeta, param_id: i32) -> Result<String> {
    let idx = meta
        .param_by_key(param_id)
        .ok_or_else(|| DbcopyError::syntax(format!("parameter id {param_id} not found")))?;
    let p = &meta.param[idx].param;
    Ok(format!(
        "par{param_id} (run_id, param_value) AS ( SELECT BR.run_id, P.param_value FROM {} P INNER JOIN run_parameter BR ON (BR.base_run_id = P.run_id AND BR.parameter_hid = {}) WHERE P.sub_id = 0 )",
        p.db_run_table, p.param_hid
    ))
}

fn param_joins(ids: &BTreeSet<i32>, alias: &str) -> String {
    ids.iter()
        .map(|id| format!(" INNER JOIN par{id} P{id} ON (P{id}.run_id = {alias}.run_id)"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::model_one;

    fn req<'a>(expr: &'a str, run_ids: &'a [i32]) -> CalcRequest<'a> {
        CalcRequest { expr, from_id: 11, run_ids, filters: &[], order_by: &[] }
    }

    #[test]
    fn single_run_aggregation_groups_by_attributes() -> anyhow::Result<()> {
        let meta = model_one()?;
        let sql = translate_to_micro_sql(&meta, "Person", &["Sex".to_string()], &req("OM_AVG(Income)", &[12]))?;
        assert!(!sql.is_compare);
        assert!(sql.cte.contains("asrc (run_id, entity_key, attr1, attr2) AS ( SELECT BR.run_id, A.entity_key, A.attr1, A.attr2 FROM "));
        assert!(sql.cte.ends_with(
            "cr (run_id, attr1, calc_value) AS ( SELECT B.run_id, B.attr1, AVG(B.attr2) FROM asrc B GROUP BY B.run_id, B.attr1 )"
        ));
        assert_eq!(
            sql.main,
            "SELECT C.run_id, C.attr1, C.calc_value FROM cr C WHERE C.run_id IN (11, 12) ORDER BY 1, 2"
        );
        Ok(())
    }

    #[test]
    fn compare_joins_base_and_variant_aggregates() -> anyhow::Result<()> {
        let meta = model_one()?;
        let sql = translate_to_micro_sql(
            &meta,
            "Person",
            &[],
            &req("OM_AVG(Income[variant]) - OM_AVG(Income[base])", &[12, 13]),
        )?;
        assert!(sql.is_compare);
        assert!(sql.cte.contains("ab (run_id, ag1) AS ( SELECT B.run_id, AVG(B.attr2) FROM asrc B WHERE B.run_id = 11 GROUP BY B.run_id )"));
        assert!(sql.cte.contains("av (run_id, ag0) AS ( SELECT V.run_id, AVG(V.attr2) FROM asrc V GROUP BY V.run_id )"));
        assert!(sql.cte.ends_with("cr (run_id, calc_value) AS ( SELECT V.run_id, V.ag0 - B.ag1 FROM av V CROSS JOIN ab B )"));
        assert!(sql.main.contains("C.run_id IN (12, 13)"));
        Ok(())
    }

    #[test]
    fn scalar_parameters_are_joined() -> anyhow::Result<()> {
        let meta = model_one()?;
        let sql = translate_to_micro_sql(&meta, "Person", &[], &req("OM_SUM(Income) * param.StartingSeed", &[]))?;
        assert!(sql.cte.starts_with("WITH par2 (run_id, param_value) AS ( SELECT BR.run_id, P.param_value FROM "));
        assert!(sql.cte.contains("INNER JOIN par2 P2 ON (P2.run_id = B.run_id) GROUP BY B.run_id, P2.param_value"));

        assert!(translate_to_micro_sql(&meta, "Person", &[], &req("OM_SUM(Income) * param.ageSex", &[])).is_err());
        Ok(())
    }

    #[test]
    fn attributes_outside_aggregation_are_rejected() -> anyhow::Result<()> {
        let meta = model_one()?;
        for bad in [
            "Income",
            "OM_AVG(Income) + Age",
            "OM_AVG(Income[variant] - Income[base])",
        ] {
            assert!(translate_to_micro_sql(&meta, "Person", &[], &req(bad, &[12])).is_err(), "{bad}");
        }
        assert!(translate_to_micro_sql(&meta, "Person", &["NoSuch".to_string()], &req("OM_AVG(Income)", &[])).is_err());
        Ok(())
    }
}

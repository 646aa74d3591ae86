//! Per-model value tables: parameter run and workset tables, output table
//! expression and accumulator tables, the all-accumulators view and entity
//! microdata tables.

use anyhow::{Context, Result};
use dbcopy_core::facet::{DbFacet, NOTE_MAX_LEN};
use dbcopy_core::model::{EntityMeta, ModelMeta, ParamMeta, TableMeta, TypeDicRow};
use rusqlite::Connection;

fn value_type(facet: DbFacet, t: &TypeDicRow) -> String {
    if t.is_bool() {
        format!("{} NOT NULL", facet.smallint_type())
    } else if t.is_string() {
        format!("{} NULL", facet.text_type(NOTE_MAX_LEN))
    } else if t.is_float() {
        format!("{} NULL", facet.float_type())
    } else if t.name == "llong" || t.name == "ullong" {
        format!("{} NOT NULL", facet.bigint_type())
    } else {
        "INT NOT NULL".to_string()
    }
}

fn dim_columns(names: impl Iterator<Item = String>) -> (String, Vec<String>) {
    let cols: Vec<String> = names.collect();
    let ddl = cols.iter().map(|c| format!("  {c} INT NOT NULL,\n")).collect();
    (ddl, cols)
}

/// `CREATE TABLE` statements of a parameter: run values and workset values.
#[must_use]
pub fn param_tables_sql(facet: DbFacet, meta: &ModelMeta, param: &ParamMeta) -> Vec<String> {
    let vt = value_type(facet, &meta.types[param.type_index].type_dic);
    let (dims_ddl, dims) = dim_columns(param.dims.iter().map(|d| d.col_name.clone()));
    let pk_tail: String = dims.iter().map(|d| format!(", {d}")).collect();

    let run = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  run_id INT NOT NULL,\n  sub_id INT NOT NULL,\n{dims_ddl}  param_value {vt},\n  PRIMARY KEY (run_id, sub_id{pk_tail})\n)",
        param.param.db_run_table
    );
    let set = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  set_id INT NOT NULL,\n  sub_id INT NOT NULL,\n{dims_ddl}  param_value {vt},\n  PRIMARY KEY (set_id, sub_id{pk_tail})\n)",
        param.param.db_set_table
    );
    vec![run, set]
}

/// `CREATE` statements of an output table: expressions, accumulators and the
/// view of all stored accumulators side by side.
#[must_use]
pub fn table_tables_sql(facet: DbFacet, table: &TableMeta) -> Vec<String> {
    let ft = facet.float_type();
    let (dims_ddl, dims) = dim_columns(table.dims.iter().map(|d| d.col_name.clone()));
    let pk_tail: String = dims.iter().map(|d| format!(", {d}")).collect();
    let t = &table.table;

    let expr = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  run_id INT NOT NULL,\n  expr_id INT NOT NULL,\n{dims_ddl}  expr_value {ft} NULL,\n  PRIMARY KEY (run_id, expr_id{pk_tail})\n)",
        t.db_expr_table
    );
    let acc = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  run_id INT NOT NULL,\n  acc_id INT NOT NULL,\n  sub_id INT NOT NULL,\n{dims_ddl}  acc_value {ft} NULL,\n  PRIMARY KEY (run_id, acc_id, sub_id{pk_tail})\n)",
        t.db_acc_table
    );
    vec![expr, acc, acc_all_view_sql(table)]
}

fn acc_all_view_sql(table: &TableMeta) -> String {
    let t = &table.table;
    let dims: Vec<&str> = table.dims.iter().map(|d| d.col_name.as_str()).collect();
    let dim_sel: String = dims.iter().map(|d| format!(", A.{d}")).collect();
    let stored: Vec<_> = table.stored_acc().collect();

    let Some(first) = stored.first() else {
        return format!(
            "CREATE VIEW IF NOT EXISTS {} AS SELECT A.run_id, A.sub_id{dim_sel} FROM {} A WHERE A.acc_id < 0",
            t.db_acc_all_view, t.db_acc_table
        );
    };

    let mut cols = format!("A.acc_value AS {}", first.col_name);
    for a in &stored[1..] {
        let mut on = vec![
            format!("A{id}.run_id = A.run_id", id = a.acc_id),
            format!("A{id}.sub_id = A.sub_id", id = a.acc_id),
        ];
        on.extend(dims.iter().map(|d| format!("A{id}.{d} = A.{d}", id = a.acc_id)));
        cols.push_str(&format!(
            ", (SELECT A{id}.acc_value FROM {acc} A{id} WHERE {on} AND A{id}.acc_id = {id}) AS {col}",
            id = a.acc_id,
            acc = t.db_acc_table,
            on = on.join(" AND "),
            col = a.col_name
        ));
    }
    format!(
        "CREATE VIEW IF NOT EXISTS {} AS SELECT A.run_id, A.sub_id{dim_sel}, {cols} FROM {} A WHERE A.acc_id = {}",
        t.db_acc_all_view, t.db_acc_table, first.acc_id
    )
}

/// `CREATE TABLE` of entity microdata, non-internal attributes only.
#[must_use]
pub fn entity_table_sql(facet: DbFacet, meta: &ModelMeta, entity: &EntityMeta) -> String {
    let attrs: String = entity
        .attr
        .iter()
        .filter(|a| !a.is_internal)
        .map(|a| format!("  {} {},\n", a.col_name, value_type(facet, &meta.types[a.type_index].type_dic)))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  run_id INT NOT NULL,\n  entity_key {} NOT NULL,\n{attrs}  PRIMARY KEY (run_id, entity_key)\n)",
        entity.entity.db_entity_table,
        facet.bigint_type()
    )
}

/// # Errors
/// Returns an error when a statement fails.
pub fn create_param_tables(conn: &Connection, facet: DbFacet, meta: &ModelMeta, param: &ParamMeta) -> Result<()> {
    for sql in param_tables_sql(facet, meta, param) {
        conn.execute_batch(&sql)
            .with_context(|| format!("failed to create value tables of parameter {}", param.param.name))?;
    }
    Ok(())
}

/// # Errors
/// Returns an error when a statement fails.
pub fn create_table_tables(conn: &Connection, facet: DbFacet, table: &TableMeta) -> Result<()> {
    for sql in table_tables_sql(facet, table) {
        conn.execute_batch(&sql)
            .with_context(|| format!("failed to create value tables of output table {}", table.table.name))?;
    }
    Ok(())
}

/// # Errors
/// Returns an error when the statement fails.
pub fn create_entity_table(conn: &Connection, facet: DbFacet, meta: &ModelMeta, entity: &EntityMeta) -> Result<()> {
    conn.execute_batch(&entity_table_sql(facet, meta, entity))
        .with_context(|| format!("failed to create microdata table of entity {}", entity.entity.name))
}

/// # Errors
/// Returns an error when a statement fails.
pub fn drop_param_tables(conn: &Connection, param: &ParamMeta) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
        param.param.db_run_table, param.param.db_set_table
    ))
    .with_context(|| format!("failed to drop value tables of parameter {}", param.param.name))
}

/// # Errors
/// Returns an error when a statement fails.
pub fn drop_table_tables(conn: &Connection, table: &TableMeta) -> Result<()> {
    let t = &table.table;
    conn.execute_batch(&format!(
        "DROP VIEW IF EXISTS {}; DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
        t.db_acc_all_view, t.db_acc_table, t.db_expr_table
    ))
    .with_context(|| format!("failed to drop value tables of output table {}", t.name))
}

/// # Errors
/// Returns an error when the statement fails.
pub fn drop_entity_table(conn: &Connection, entity: &EntityMeta) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", entity.entity.db_entity_table))
        .with_context(|| format!("failed to drop microdata table of entity {}", entity.entity.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table_exists;
    use dbcopy_core::testing::model_one;

    #[test]
    fn parameter_tables_key_on_run_sub_and_dims() -> anyhow::Result<()> {
        let meta = model_one()?;
        let idx = meta.require_param("ageSex")?;
        let sql = param_tables_sql(DbFacet::Sqlite, &meta, &meta.param[idx]);
        assert!(sql[0].starts_with("CREATE TABLE IF NOT EXISTS ageSex_p_2012817"));
        assert!(sql[0].contains("param_value FLOAT NULL"));
        assert!(sql[0].contains("PRIMARY KEY (run_id, sub_id, dim0, dim1)"));
        assert!(sql[1].contains("PRIMARY KEY (set_id, sub_id, dim0, dim1)"));

        let seed = meta.require_param("StartingSeed")?;
        let sql = param_tables_sql(DbFacet::Sqlite, &meta, &meta.param[seed]);
        assert!(sql[0].contains("param_value INT NOT NULL"));
        assert!(sql[0].contains("PRIMARY KEY (run_id, sub_id)"));
        Ok(())
    }

    #[test]
    fn acc_all_view_lists_stored_accumulators_only() -> anyhow::Result<()> {
        let meta = model_one()?;
        let idx = meta.require_table("salarySex")?;
        let view = acc_all_view_sql(&meta.table[idx]);
        assert!(view.contains("A.acc_value AS acc0"));
        assert!(view.contains("AS acc1"));
        assert!(!view.contains("acc2"));
        assert!(view.ends_with("WHERE A.acc_id = 0"));
        Ok(())
    }

    #[test]
    fn value_tables_are_created_and_dropped() -> anyhow::Result<()> {
        let meta = model_one()?;
        let conn = Connection::open_in_memory()?;
        for p in &meta.param {
            create_param_tables(&conn, DbFacet::Sqlite, &meta, p)?;
        }
        for t in &meta.table {
            create_table_tables(&conn, DbFacet::Sqlite, t)?;
        }
        for e in &meta.entity {
            create_entity_table(&conn, DbFacet::Sqlite, &meta, e)?;
        }
        assert!(table_exists(&conn, "salarySex_d_2012882")?);
        assert!(table_exists(&conn, "Person_g_2012882")?);

        drop_table_tables(&conn, &meta.table[0])?;
        assert!(!table_exists(&conn, "salarySex_a_2012882")?);
        assert!(!table_exists(&conn, "salarySex_d_2012882")?);
        Ok(())
    }
}

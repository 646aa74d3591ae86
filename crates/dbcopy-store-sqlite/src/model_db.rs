//! Model metadata: find, load and insert the model graph.
//!
//! Types, parameters, output tables and entities are shared between models of
//! one database through their hid and are matched by digest on insert.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use dbcopy_core::facet::{cap, DbFacet, CODE_MAX_LEN, NAME_MAX_LEN};
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::{
    DicKind, EntityAttrRow, EntityDicRow, EntityGroupLstRow, EntityGroupPcRow, EntityMeta, GroupLstRow,
    GroupPcRow, ModelDicRow, ModelMeta, ParamDicRow, ParamDimsRow, ParamImportRow, ParamMeta, TableAccRow,
    TableDicRow, TableDimsRow, TableExprRow, TableMeta, TypeDicRow, TypeEnumRow, TypeMeta,
    BUILTIN_TYPE_MAX_HID,
};
use dbcopy_core::DbcopyError;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{ddl, flag, ids, required};

const MODEL_DIC_SELECT: &str = "SELECT M.model_id, M.model_name, M.model_digest, M.model_type, M.model_ver,
        M.create_dt, L.lang_code
   FROM model_dic M
   INNER JOIN lang_lst L ON (L.lang_id = M.default_lang_id)";

fn model_dic_row(row: &Row<'_>) -> rusqlite::Result<ModelDicRow> {
    Ok(ModelDicRow {
        model_id: row.get(0)?,
        name: row.get(1)?,
        digest: row.get(2)?,
        model_type: row.get(3)?,
        version: row.get(4)?,
        create_date_time: row.get(5)?,
        default_lang_code: row.get(6)?,
    })
}

/// # Errors
/// Returns an error when `model_dic` cannot be read.
pub fn list_models(conn: &Connection) -> Result<Vec<ModelDicRow>> {
    let mut stmt = conn
        .prepare(&format!("{MODEL_DIC_SELECT} ORDER BY M.model_id"))
        .context("failed to prepare model_dic query")?;
    let rows = stmt
        .query_map([], model_dic_row)
        .context("failed to query model_dic")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode model_dic rows")?;
    Ok(rows)
}

/// Find a model by digest, or by name when the digest is empty. When only
/// the name is given and several versions exist, the first one wins.
///
/// # Errors
/// Returns `InvalidArgument` when both are empty.
pub fn find_model(conn: &Connection, name: &str, digest: &str) -> Result<Option<ModelDicRow>> {
    if name.is_empty() && digest.is_empty() {
        return Err(DbcopyError::invalid("invalid (empty) model name and model digest").into());
    }
    let row = if digest.is_empty() {
        conn.query_row(
            &format!(
                "{MODEL_DIC_SELECT} WHERE M.model_id =
                   (SELECT MIN(F.model_id) FROM model_dic F WHERE F.model_name = ?1)"
            ),
            params![name],
            model_dic_row,
        )
    } else {
        conn.query_row(&format!("{MODEL_DIC_SELECT} WHERE M.model_digest = ?1"), params![digest], model_dic_row)
    }
    .optional()
    .with_context(|| format!("failed to find model {name} {digest}"))?;

    match row {
        Some(m) if !name.is_empty() && m.name != name => Ok(None),
        other => Ok(other),
    }
}

/// Find a model or fail with `NotFound`.
///
/// # Errors
/// Returns `NotFound` when the model does not exist.
pub fn require_model(conn: &Connection, name: &str, digest: &str) -> Result<ModelDicRow> {
    required(find_model(conn, name, digest)?, || format!("model {name} {digest} not found"))
}

/// Child rows are read with the type hid in `type_id`; swap it for the
/// model type id.
fn remap_type_hids(meta: &mut ModelMeta) -> Result<()> {
    let type_ids: HashMap<i32, i32> =
        meta.types.iter().map(|t| (t.type_dic.type_hid, t.type_dic.type_id)).collect();
    let model_name = meta.model.name.clone();
    let resolve = |hid: i32, what: &str| -> Result<i32> {
        type_ids.get(&hid).copied().ok_or_else(|| {
            anyhow!(DbcopyError::integrity(format!(
                "type hid {hid} of {what} is not part of model {model_name}"
            )))
        })
    };
    for p in &mut meta.param {
        p.param.type_id = resolve(p.param.type_id, &p.param.name)?;
        for d in &mut p.dims {
            d.type_id = resolve(d.type_id, &p.param.name)?;
        }
    }
    for t in &mut meta.table {
        for d in &mut t.dims {
            d.type_id = resolve(d.type_id, &t.table.name)?;
        }
    }
    for e in &mut meta.entity {
        for a in &mut e.attr {
            a.type_id = resolve(a.type_id, &e.entity.name)?;
        }
    }
    Ok(())
}

/// Load the complete model graph and restore its internal fields.
///
/// # Errors
/// Returns `NotFound` for an unknown model id and `IntegrityMismatch` when the
/// metadata rows are inconsistent.
pub fn read_model(conn: &Connection, model_id: i32) -> Result<ModelMeta> {
    let model = required(
        conn.query_row(&format!("{MODEL_DIC_SELECT} WHERE M.model_id = ?1"), params![model_id], model_dic_row)
            .optional()
            .context("failed to read model_dic")?,
        || format!("model id {model_id} not found"),
    )?;
    let mut meta = ModelMeta { model, ..ModelMeta::default() };

    read_types(conn, &mut meta)?;
    read_params(conn, &mut meta)?;
    read_tables(conn, &mut meta)?;
    read_entities(conn, &mut meta)?;
    read_groups(conn, &mut meta)?;
    remap_type_hids(&mut meta)?;

    meta.update_internals()?;
    Ok(meta)
}

fn read_types(conn: &Connection, meta: &mut ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;
    let mut stmt = conn
        .prepare(
            "SELECT M.model_type_id, T.type_hid, T.type_name, T.type_digest, T.dic_id, T.total_enum_id
             FROM model_type_dic M
             INNER JOIN type_dic T ON (T.type_hid = M.type_hid)
             WHERE M.model_id = ?1
             ORDER BY 1",
        )
        .context("failed to prepare type_dic query")?;
    meta.types = stmt
        .query_map(params![model_id], |row| {
            Ok(TypeMeta {
                type_dic: TypeDicRow {
                    model_id,
                    type_id: row.get(0)?,
                    type_hid: row.get(1)?,
                    name: row.get(2)?,
                    digest: row.get(3)?,
                    dic_id: row.get(4)?,
                    total_enum_id: row.get(5)?,
                    ..TypeDicRow::default()
                },
                enums: Vec::new(),
            })
        })
        .context("failed to query type_dic")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode type_dic rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT M.model_type_id, E.enum_id, E.enum_name
             FROM type_enum_lst E
             INNER JOIN model_type_dic M ON (M.type_hid = E.type_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare type_enum_lst query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query type_enum_lst")?;
    while let Some(row) = rows.next().context("failed to iterate type_enum_lst")? {
        let type_id: i32 = row.get(0)?;
        if let Ok(idx) = meta.types.binary_search_by_key(&type_id, |t| t.type_dic.type_id) {
            meta.types[idx].enums.push(TypeEnumRow { model_id, type_id, enum_id: row.get(1)?, name: row.get(2)? });
        }
    }
    Ok(())
}

fn read_params(conn: &Connection, meta: &mut ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;
    let mut stmt = conn
        .prepare(
            "SELECT M.model_parameter_id, D.parameter_hid, D.parameter_name, D.parameter_digest,
                    D.parameter_rank, D.type_hid, D.is_extendable, M.is_hidden, D.num_cumulated,
                    D.db_run_table, D.db_set_table, D.import_digest
             FROM model_parameter_dic M
             INNER JOIN parameter_dic D ON (D.parameter_hid = M.parameter_hid)
             WHERE M.model_id = ?1
             ORDER BY 1",
        )
        .context("failed to prepare parameter_dic query")?;
    meta.param = stmt
        .query_map(params![model_id], |row| {
            Ok(ParamMeta {
                param: ParamDicRow {
                    model_id,
                    param_id: row.get(0)?,
                    param_hid: row.get(1)?,
                    name: row.get(2)?,
                    digest: row.get(3)?,
                    rank: row.get(4)?,
                    type_id: row.get(5)?,
                    is_extendable: flag(row, 6)?,
                    is_hidden: flag(row, 7)?,
                    num_cumulated: row.get(8)?,
                    db_run_table: row.get(9)?,
                    db_set_table: row.get(10)?,
                    import_digest: row.get(11)?,
                },
                ..ParamMeta::default()
            })
        })
        .context("failed to query parameter_dic")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode parameter_dic rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT M.model_parameter_id, P.dim_id, P.dim_name, P.type_hid
             FROM parameter_dims P
             INNER JOIN model_parameter_dic M ON (M.parameter_hid = P.parameter_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare parameter_dims query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query parameter_dims")?;
    while let Some(row) = rows.next().context("failed to iterate parameter_dims")? {
        let param_id: i32 = row.get(0)?;
        let idx = required(meta.param_by_key(param_id), || format!("parameter {param_id} not found"))?;
        meta.param[idx].dims.push(ParamDimsRow {
            model_id,
            param_id,
            dim_id: row.get(1)?,
            name: row.get(2)?,
            type_id: row.get(3)?,
            ..ParamDimsRow::default()
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT model_parameter_id, from_name, from_model_name, is_sample_dim
             FROM model_parameter_import
             WHERE model_id = ?1
             ORDER BY 1, 2, 3",
        )
        .context("failed to prepare model_parameter_import query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query model_parameter_import")?;
    while let Some(row) = rows.next().context("failed to iterate model_parameter_import")? {
        let param_id: i32 = row.get(0)?;
        let idx = required(meta.param_by_key(param_id), || format!("parameter {param_id} not found"))?;
        meta.param[idx].import.push(ParamImportRow {
            model_id,
            param_id,
            from_name: row.get(1)?,
            from_model_name: row.get(2)?,
            is_sample_dim: flag(row, 3)?,
        });
    }
    Ok(())
}

fn read_tables(conn: &Connection, meta: &mut ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;
    let mut stmt = conn
        .prepare(
            "SELECT M.model_table_id, D.table_hid, D.table_name, D.table_digest, M.is_user, D.table_rank,
                    D.is_sparse, D.db_expr_table, D.db_acc_table, D.db_acc_all_view, M.expr_dim_pos,
                    M.is_hidden, D.import_digest
             FROM model_table_dic M
             INNER JOIN table_dic D ON (D.table_hid = M.table_hid)
             WHERE M.model_id = ?1
             ORDER BY 1",
        )
        .context("failed to prepare table_dic query")?;
    meta.table = stmt
        .query_map(params![model_id], |row| {
            Ok(TableMeta {
                table: TableDicRow {
                    model_id,
                    table_id: row.get(0)?,
                    table_hid: row.get(1)?,
                    name: row.get(2)?,
                    digest: row.get(3)?,
                    is_user: flag(row, 4)?,
                    rank: row.get(5)?,
                    is_sparse: flag(row, 6)?,
                    db_expr_table: row.get(7)?,
                    db_acc_table: row.get(8)?,
                    db_acc_all_view: row.get(9)?,
                    expr_pos: row.get(10)?,
                    is_hidden: flag(row, 11)?,
                    import_digest: row.get(12)?,
                },
                ..TableMeta::default()
            })
        })
        .context("failed to query table_dic")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode table_dic rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT M.model_table_id, T.dim_id, T.dim_name, T.type_hid, T.is_total, T.dim_size
             FROM table_dims T
             INNER JOIN model_table_dic M ON (M.table_hid = T.table_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare table_dims query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query table_dims")?;
    while let Some(row) = rows.next().context("failed to iterate table_dims")? {
        let table_id: i32 = row.get(0)?;
        let idx = required(meta.out_table_by_key(table_id), || format!("output table {table_id} not found"))?;
        meta.table[idx].dims.push(TableDimsRow {
            model_id,
            table_id,
            dim_id: row.get(1)?,
            name: row.get(2)?,
            type_id: row.get(3)?,
            is_total: flag(row, 4)?,
            dim_size: row.get(5)?,
            ..TableDimsRow::default()
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT M.model_table_id, A.acc_id, A.acc_name, A.is_derived, A.acc_src, A.acc_sql
             FROM table_acc A
             INNER JOIN model_table_dic M ON (M.table_hid = A.table_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare table_acc query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query table_acc")?;
    while let Some(row) = rows.next().context("failed to iterate table_acc")? {
        let table_id: i32 = row.get(0)?;
        let idx = required(meta.out_table_by_key(table_id), || format!("output table {table_id} not found"))?;
        meta.table[idx].acc.push(TableAccRow {
            model_id,
            table_id,
            acc_id: row.get(1)?,
            name: row.get(2)?,
            is_derived: flag(row, 3)?,
            src_acc: row.get(4)?,
            acc_sql: row.get(5)?,
            ..TableAccRow::default()
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT M.model_table_id, E.expr_id, E.expr_name, E.expr_decimals, E.expr_src, E.expr_sql
             FROM table_expr E
             INNER JOIN model_table_dic M ON (M.table_hid = E.table_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare table_expr query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query table_expr")?;
    while let Some(row) = rows.next().context("failed to iterate table_expr")? {
        let table_id: i32 = row.get(0)?;
        let idx = required(meta.out_table_by_key(table_id), || format!("output table {table_id} not found"))?;
        meta.table[idx].expr.push(TableExprRow {
            model_id,
            table_id,
            expr_id: row.get(1)?,
            name: row.get(2)?,
            decimals: row.get(3)?,
            src_expr: row.get(4)?,
            expr_sql: row.get(5)?,
            ..TableExprRow::default()
        });
    }
    Ok(())
}

fn read_entities(conn: &Connection, meta: &mut ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;
    let mut stmt = conn
        .prepare(
            "SELECT M.model_entity_id, D.entity_hid, D.entity_name, D.entity_digest, D.db_entity_table
             FROM model_entity_dic M
             INNER JOIN entity_dic D ON (D.entity_hid = M.entity_hid)
             WHERE M.model_id = ?1
             ORDER BY 1",
        )
        .context("failed to prepare entity_dic query")?;
    meta.entity = stmt
        .query_map(params![model_id], |row| {
            Ok(EntityMeta {
                entity: EntityDicRow {
                    model_id,
                    entity_id: row.get(0)?,
                    entity_hid: row.get(1)?,
                    name: row.get(2)?,
                    digest: row.get(3)?,
                    db_entity_table: row.get(4)?,
                },
                attr: Vec::new(),
            })
        })
        .context("failed to query entity_dic")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode entity_dic rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT M.model_entity_id, A.attr_id, A.attr_name, A.type_hid, A.is_internal
             FROM entity_attr A
             INNER JOIN model_entity_dic M ON (M.entity_hid = A.entity_hid)
             WHERE M.model_id = ?1
             ORDER BY 1, 2",
        )
        .context("failed to prepare entity_attr query")?;
    let mut rows = stmt.query(params![model_id]).context("failed to query entity_attr")?;
    while let Some(row) = rows.next().context("failed to iterate entity_attr")? {
        let entity_id: i32 = row.get(0)?;
        let idx = required(meta.entity_by_key(entity_id), || format!("entity {entity_id} not found"))?;
        meta.entity[idx].attr.push(EntityAttrRow {
            model_id,
            entity_id,
            attr_id: row.get(1)?,
            name: row.get(2)?,
            type_id: row.get(3)?,
            is_internal: flag(row, 4)?,
            ..EntityAttrRow::default()
        });
    }
    Ok(())
}

fn read_groups(conn: &Connection, meta: &mut ModelMeta) -> Result<()> {
    let model_id = meta.model.model_id;

    let mut stmt = conn
        .prepare(
            "SELECT group_id, is_parameter, group_name, is_hidden FROM group_lst WHERE model_id = ?1 ORDER BY 1",
        )
        .context("failed to prepare group_lst query")?;
    meta.group = stmt
        .query_map(params![model_id], |row| {
            Ok(GroupLstRow {
                model_id,
                group_id: row.get(0)?,
                is_param: flag(row, 1)?,
                name: row.get(2)?,
                is_hidden: flag(row, 3)?,
            })
        })
        .context("failed to query group_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode group_lst rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT group_id, child_pos, child_group_id, leaf_id FROM group_pc WHERE model_id = ?1 ORDER BY 1, 2",
        )
        .context("failed to prepare group_pc query")?;
    meta.group_pc = stmt
        .query_map(params![model_id], |row| {
            Ok(GroupPcRow {
                model_id,
                group_id: row.get(0)?,
                child_pos: row.get(1)?,
                child_group_id: row.get(2)?,
                leaf_id: row.get(3)?,
            })
        })
        .context("failed to query group_pc")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode group_pc rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT model_entity_id, group_id, group_name, is_hidden
             FROM entity_group_lst WHERE model_id = ?1 ORDER BY 1, 2",
        )
        .context("failed to prepare entity_group_lst query")?;
    meta.entity_group = stmt
        .query_map(params![model_id], |row| {
            Ok(EntityGroupLstRow {
                model_id,
                entity_id: row.get(0)?,
                group_id: row.get(1)?,
                name: row.get(2)?,
                is_hidden: flag(row, 3)?,
            })
        })
        .context("failed to query entity_group_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode entity_group_lst rows")?;

    let mut stmt = conn
        .prepare(
            "SELECT model_entity_id, group_id, child_pos, child_group_id, attr_id
             FROM entity_group_pc WHERE model_id = ?1 ORDER BY 1, 2, 3",
        )
        .context("failed to prepare entity_group_pc query")?;
    meta.entity_group_pc = stmt
        .query_map(params![model_id], |row| {
            Ok(EntityGroupPcRow {
                model_id,
                entity_id: row.get(0)?,
                group_id: row.get(1)?,
                child_pos: row.get(2)?,
                child_group_id: row.get(3)?,
                attr_id: row.get(4)?,
            })
        })
        .context("failed to query entity_group_pc")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode entity_group_pc rows")?;
    Ok(())
}

fn hid_by_digest(conn: &Connection, sql: &str, digest: &str) -> Result<Option<i32>> {
    conn.query_row(sql, params![digest], |row| row.get(0))
        .optional()
        .with_context(|| format!("failed to look up digest {digest}"))
}

/// Insert the model graph unless a model with the same digest already exists.
/// On return `meta` is the model as stored in this database, with database
/// hids and model id. Returns `false` when the model already existed.
///
/// # Errors
/// Returns `Precondition` when the database has no languages and a driver
/// error when a row or value table cannot be created.
pub fn insert_model(conn: &Connection, facet: DbFacet, meta: &mut ModelMeta, lang: &LangMeta) -> Result<bool> {
    if let Some(existing) = find_model(conn, "", &meta.model.digest)? {
        *meta = read_model(conn, existing.model_id)?;
        return Ok(false);
    }
    if lang.is_empty() {
        return Err(DbcopyError::precondition(format!(
            "cannot insert model {}: destination database has no languages",
            meta.model.name
        ))
        .into());
    }

    let model_id = ids::next_id(conn, ids::MODEL_ID)?;
    let (lang_id, _) = lang.id_by_code(&meta.model.default_lang_code);
    conn.execute(
        "INSERT INTO model_dic (model_id, model_name, model_digest, model_type, model_ver, create_dt, default_lang_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            model_id,
            cap(&meta.model.name, NAME_MAX_LEN),
            cap(&meta.model.digest, CODE_MAX_LEN),
            meta.model.model_type,
            cap(&meta.model.version, CODE_MAX_LEN),
            cap(&meta.model.create_date_time, CODE_MAX_LEN),
            lang_id,
        ],
    )
    .with_context(|| format!("failed to insert model {}", meta.model.name))?;

    insert_types(conn, model_id, meta)?;
    insert_params(conn, facet, model_id, meta)?;
    insert_tables(conn, facet, model_id, meta)?;
    insert_entities(conn, facet, model_id, meta)?;
    insert_groups(conn, model_id, meta)?;

    tracing::debug!(model = %meta.model.name, model_id, "inserted model metadata");
    *meta = read_model(conn, model_id)?;
    Ok(true)
}

fn insert_types(conn: &Connection, model_id: i32, meta: &mut ModelMeta) -> Result<()> {
    for t in &mut meta.types {
        let existing =
            hid_by_digest(conn, "SELECT type_hid FROM type_dic WHERE type_digest = ?1", &t.type_dic.digest)?;
        let hid = match existing {
            Some(hid) => hid,
            None => {
                let hid = new_type_hid(conn, &t.type_dic)?;
                conn.execute(
                    "INSERT INTO type_dic (type_hid, type_name, type_digest, dic_id, total_enum_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        hid,
                        cap(&t.type_dic.name, NAME_MAX_LEN),
                        cap(&t.type_dic.digest, CODE_MAX_LEN),
                        t.type_dic.dic_id,
                        t.type_dic.total_enum_id
                    ],
                )
                .with_context(|| format!("failed to insert type {}", t.type_dic.name))?;

                let mut stmt = conn
                    .prepare_cached("INSERT INTO type_enum_lst (type_hid, enum_id, enum_name) VALUES (?1, ?2, ?3)")
                    .context("failed to prepare type_enum_lst insert")?;
                for enum_id in t.enum_ids() {
                    let code = t.enum_code_by_id(enum_id).unwrap_or_else(|| enum_id.to_string());
                    stmt.execute(params![hid, enum_id, cap(&code, NAME_MAX_LEN)])
                        .with_context(|| format!("failed to insert enum {enum_id} of type {}", t.type_dic.name))?;
                }
                hid
            }
        };
        t.type_dic.type_hid = hid;
        conn.execute(
            "INSERT INTO model_type_dic (model_id, model_type_id, type_hid) VALUES (?1, ?2, ?3)",
            params![model_id, t.type_dic.type_id, hid],
        )
        .with_context(|| format!("failed to insert model type {}", t.type_dic.name))?;
    }
    Ok(())
}

/// Built-in types keep their reserved hid `type_id + 1`; every other type
/// takes the next hid above the reserved range.
fn new_type_hid(conn: &Connection, t: &TypeDicRow) -> Result<i32> {
    let is_builtin_kind = matches!(t.dic_kind(), Some(DicKind::Simple | DicKind::Logical));
    if is_builtin_kind && t.type_id < BUILTIN_TYPE_MAX_HID {
        let hid = t.type_id + 1;
        let taken: Option<i32> = conn
            .query_row("SELECT type_hid FROM type_dic WHERE type_hid = ?1", params![hid], |row| row.get(0))
            .optional()
            .context("failed to check built-in type hid")?;
        if taken.is_none() {
            return Ok(hid);
        }
    }
    ids::next_id(conn, ids::TYPE_HID)
}

fn type_hid(meta: &ModelMeta, type_index: usize) -> i32 {
    meta.types[type_index].type_dic.type_hid
}

fn insert_params(conn: &Connection, facet: DbFacet, model_id: i32, meta: &mut ModelMeta) -> Result<()> {
    for idx in 0..meta.param.len() {
        let existing = hid_by_digest(
            conn,
            "SELECT parameter_hid FROM parameter_dic WHERE parameter_digest = ?1",
            &meta.param[idx].param.digest,
        )?;
        let hid = if let Some(hid) = existing {
            hid
        } else {
            let hid = ids::next_id(conn, ids::PARAMETER_HID)?;
            let p = &meta.param[idx];
            conn.execute(
                "INSERT INTO parameter_dic
                   (parameter_hid, parameter_name, parameter_digest, parameter_rank, type_hid,
                    is_extendable, num_cumulated, db_run_table, db_set_table, import_digest)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    hid,
                    cap(&p.param.name, NAME_MAX_LEN),
                    cap(&p.param.digest, CODE_MAX_LEN),
                    p.param.rank,
                    type_hid(meta, p.type_index),
                    i32::from(p.param.is_extendable),
                    p.param.num_cumulated,
                    p.param.db_run_table,
                    p.param.db_set_table,
                    cap(&p.param.import_digest, CODE_MAX_LEN),
                ],
            )
            .with_context(|| format!("failed to insert parameter {}", p.param.name))?;
            for d in &p.dims {
                conn.execute(
                    "INSERT INTO parameter_dims (parameter_hid, dim_id, dim_name, type_hid) VALUES (?1, ?2, ?3, ?4)",
                    params![hid, d.dim_id, cap(&d.name, NAME_MAX_LEN), type_hid(meta, d.type_index)],
                )
                .with_context(|| format!("failed to insert dimension {} of parameter {}", d.name, p.param.name))?;
            }
            ddl::create_param_tables(conn, facet, meta, p)?;
            hid
        };

        let p = &mut meta.param[idx];
        p.param.param_hid = hid;
        conn.execute(
            "INSERT INTO model_parameter_dic (model_id, model_parameter_id, parameter_hid, is_hidden)
             VALUES (?1, ?2, ?3, ?4)",
            params![model_id, p.param.param_id, hid, i32::from(p.param.is_hidden)],
        )
        .with_context(|| format!("failed to insert model parameter {}", p.param.name))?;
        for imp in &p.import {
            conn.execute(
                "INSERT INTO model_parameter_import
                   (model_id, model_parameter_id, from_name, from_model_name, is_sample_dim)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    model_id,
                    p.param.param_id,
                    cap(&imp.from_name, NAME_MAX_LEN),
                    cap(&imp.from_model_name, NAME_MAX_LEN),
                    i32::from(imp.is_sample_dim)
                ],
            )
            .with_context(|| format!("failed to insert import of parameter {}", p.param.name))?;
        }
    }
    Ok(())
}

fn insert_tables(conn: &Connection, facet: DbFacet, model_id: i32, meta: &mut ModelMeta) -> Result<()> {
    for idx in 0..meta.table.len() {
        let existing = hid_by_digest(
            conn,
            "SELECT table_hid FROM table_dic WHERE table_digest = ?1",
            &meta.table[idx].table.digest,
        )?;
        let hid = if let Some(hid) = existing {
            hid
        } else {
            let hid = ids::next_id(conn, ids::TABLE_HID)?;
            let t = &meta.table[idx];
            conn.execute(
                "INSERT INTO table_dic
                   (table_hid, table_name, table_digest, table_rank, is_sparse,
                    db_expr_table, db_acc_table, db_acc_all_view, import_digest)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    hid,
                    cap(&t.table.name, NAME_MAX_LEN),
                    cap(&t.table.digest, CODE_MAX_LEN),
                    t.table.rank,
                    i32::from(t.table.is_sparse),
                    t.table.db_expr_table,
                    t.table.db_acc_table,
                    t.table.db_acc_all_view,
                    cap(&t.table.import_digest, CODE_MAX_LEN),
                ],
            )
            .with_context(|| format!("failed to insert output table {}", t.table.name))?;
            for d in &t.dims {
                conn.execute(
                    "INSERT INTO table_dims (table_hid, dim_id, dim_name, type_hid, is_total, dim_size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        hid,
                        d.dim_id,
                        cap(&d.name, NAME_MAX_LEN),
                        type_hid(meta, d.type_index),
                        i32::from(d.is_total),
                        d.dim_size
                    ],
                )
                .with_context(|| format!("failed to insert dimension {} of table {}", d.name, t.table.name))?;
            }
            for a in &t.acc {
                conn.execute(
                    "INSERT INTO table_acc (table_hid, acc_id, acc_name, is_derived, acc_src, acc_sql)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![hid, a.acc_id, cap(&a.name, NAME_MAX_LEN), i32::from(a.is_derived), a.src_acc, a.acc_sql],
                )
                .with_context(|| format!("failed to insert accumulator {} of table {}", a.name, t.table.name))?;
            }
            for e in &t.expr {
                conn.execute(
                    "INSERT INTO table_expr (table_hid, expr_id, expr_name, expr_decimals, expr_src, expr_sql)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![hid, e.expr_id, cap(&e.name, NAME_MAX_LEN), e.decimals, e.src_expr, e.expr_sql],
                )
                .with_context(|| format!("failed to insert expression {} of table {}", e.name, t.table.name))?;
            }
            ddl::create_table_tables(conn, facet, t)?;
            hid
        };

        let t = &mut meta.table[idx];
        t.table.table_hid = hid;
        conn.execute(
            "INSERT INTO model_table_dic (model_id, model_table_id, table_hid, is_user, expr_dim_pos, is_hidden)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                model_id,
                t.table.table_id,
                hid,
                i32::from(t.table.is_user),
                t.table.expr_pos,
                i32::from(t.table.is_hidden)
            ],
        )
        .with_context(|| format!("failed to insert model table {}", t.table.name))?;
    }
    Ok(())
}

fn insert_entities(conn: &Connection, facet: DbFacet, model_id: i32, meta: &mut ModelMeta) -> Result<()> {
    for idx in 0..meta.entity.len() {
        let existing = hid_by_digest(
            conn,
            "SELECT entity_hid FROM entity_dic WHERE entity_digest = ?1",
            &meta.entity[idx].entity.digest,
        )?;
        let hid = if let Some(hid) = existing {
            hid
        } else {
            let hid = ids::next_id(conn, ids::ENTITY_HID)?;
            let e = &meta.entity[idx];
            let db_table = if e.entity.db_entity_table.is_empty() {
                format!("{}_g_{hid}", e.entity.name)
            } else {
                e.entity.db_entity_table.clone()
            };
            conn.execute(
                "INSERT INTO entity_dic (entity_hid, entity_name, entity_digest, db_entity_table)
                 VALUES (?1, ?2, ?3, ?4)",
                params![hid, cap(&e.entity.name, NAME_MAX_LEN), cap(&e.entity.digest, CODE_MAX_LEN), db_table],
            )
            .with_context(|| format!("failed to insert entity {}", e.entity.name))?;
            for a in &e.attr {
                conn.execute(
                    "INSERT INTO entity_attr (entity_hid, attr_id, attr_name, type_hid, is_internal)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![hid, a.attr_id, cap(&a.name, NAME_MAX_LEN), type_hid(meta, a.type_index), i32::from(a.is_internal)],
                )
                .with_context(|| format!("failed to insert attribute {} of entity {}", a.name, e.entity.name))?;
            }
            let mut with_table = e.clone();
            with_table.entity.db_entity_table = db_table;
            ddl::create_entity_table(conn, facet, meta, &with_table)?;
            hid
        };

        let e = &mut meta.entity[idx];
        e.entity.entity_hid = hid;
        conn.execute(
            "INSERT INTO model_entity_dic (model_id, model_entity_id, entity_hid) VALUES (?1, ?2, ?3)",
            params![model_id, e.entity.entity_id, hid],
        )
        .with_context(|| format!("failed to insert model entity {}", e.entity.name))?;
    }
    Ok(())
}

fn insert_groups(conn: &Connection, model_id: i32, meta: &ModelMeta) -> Result<()> {
    for g in &meta.group {
        conn.execute(
            "INSERT INTO group_lst (model_id, group_id, is_parameter, group_name, is_hidden) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model_id, g.group_id, i32::from(g.is_param), cap(&g.name, NAME_MAX_LEN), i32::from(g.is_hidden)],
        )
        .with_context(|| format!("failed to insert group {}", g.name))?;
    }
    for pc in &meta.group_pc {
        conn.execute(
            "INSERT INTO group_pc (model_id, group_id, child_pos, child_group_id, leaf_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model_id, pc.group_id, pc.child_pos, pc.child_group_id, pc.leaf_id],
        )
        .with_context(|| format!("failed to insert child {} of group {}", pc.child_pos, pc.group_id))?;
    }
    for g in &meta.entity_group {
        conn.execute(
            "INSERT INTO entity_group_lst (model_id, model_entity_id, group_id, group_name, is_hidden)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model_id, g.entity_id, g.group_id, cap(&g.name, NAME_MAX_LEN), i32::from(g.is_hidden)],
        )
        .with_context(|| format!("failed to insert entity group {}", g.name))?;
    }
    for pc in &meta.entity_group_pc {
        conn.execute(
            "INSERT INTO entity_group_pc (model_id, model_entity_id, group_id, child_pos, child_group_id, attr_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![model_id, pc.entity_id, pc.group_id, pc.child_pos, pc.child_group_id, pc.attr_id],
        )
        .with_context(|| format!("failed to insert child {} of entity group {}", pc.child_pos, pc.group_id))?;
    }
    Ok(())
}

/// True when a model other than `model_id` links to the parameter, table or
/// entity with the given hid.
///
/// # Errors
/// Returns an error when the query fails.
pub fn is_hid_shared(conn: &Connection, link_table: &str, hid_col: &str, hid: i32, model_id: i32) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM {link_table} WHERE {hid_col} = ?1 AND model_id <> ?2");
    let n: i64 = conn
        .query_row(&sql, params![hid, model_id], |row| row.get(0))
        .with_context(|| format!("failed to count {link_table} references"))?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang_db::write_lang;
    use crate::testing::two_languages;
    use crate::ModelDb;
    use dbcopy_core::testing::{model_one, MODEL_DIGEST, MODEL_NAME};

    #[test]
    fn inserted_model_reads_back_with_database_hids() -> Result<()> {
        let mut db = ModelDb::open_in_memory()?;
        let facet = db.facet();
        let tx = db.transaction()?;
        let lang = write_lang(&tx, &two_languages())?;
        let mut meta = model_one()?;
        assert!(insert_model(&tx, facet, &mut meta, &lang)?);
        tx.commit()?;

        let found = require_model(db.conn(), MODEL_NAME, "")?;
        assert_eq!(found.digest, MODEL_DIGEST);
        let back = read_model(db.conn(), found.model_id)?;
        assert_eq!(back.param.len(), 6);
        assert_eq!(back.table.len(), 2);
        assert_eq!(back.group.len(), 3);

        let int_type = &back.types[back.type_by_key(4).unwrap_or(0)];
        assert_eq!(int_type.type_dic.type_hid, 5);
        let age = &back.types[back.type_by_key(101).unwrap_or(0)];
        assert_eq!(age.type_dic.type_hid, 101);

        // range enums are materialized in the database and collapsed again on load
        let year = &back.types[back.type_by_key(104).unwrap_or(0)];
        assert!(year.type_dic.is_range);
        assert_eq!((year.type_dic.min_enum_id, year.type_dic.max_enum_id), (2021, 2023));

        let salary_sex = back.require_table("salarySex")?;
        assert_eq!(back.table[salary_sex].stored_acc().count(), 2);
        Ok(())
    }

    #[test]
    fn second_insert_of_same_digest_is_a_noop() -> Result<()> {
        let mut db = ModelDb::open_in_memory()?;
        let facet = db.facet();
        let tx = db.transaction()?;
        let lang = write_lang(&tx, &two_languages())?;
        let mut first = model_one()?;
        insert_model(&tx, facet, &mut first, &lang)?;
        let mut second = model_one()?;
        assert!(!insert_model(&tx, facet, &mut second, &lang)?);
        assert_eq!(second.model.model_id, first.model.model_id);
        tx.commit()?;
        assert_eq!(list_models(db.conn())?.len(), 1);
        Ok(())
    }

    #[test]
    fn find_by_digest_checks_the_name() -> Result<()> {
        let db = crate::testing::seeded_db()?;
        assert!(find_model(db.conn(), "", MODEL_DIGEST)?.is_some());
        assert!(find_model(db.conn(), "otherModel", MODEL_DIGEST)?.is_none());
        assert!(find_model(db.conn(), "", "").is_err());
        Ok(())
    }
}

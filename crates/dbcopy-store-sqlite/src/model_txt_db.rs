//! Descriptions and notes of model metadata, including group text.

use anyhow::{Context, Result};
use dbcopy_core::facet::{cap, DESCR_MAX_LEN, NOTE_MAX_LEN};
use dbcopy_core::lang::LangMeta;
use dbcopy_core::model::ModelMeta;
use dbcopy_core::model_txt::{
    EntityAttrTxtRow, EntityGroupTxtRow, EntityTxtRow, GroupTxtRow, ModelTxtMeta, ModelTxtRow, ParamDimsTxtRow,
    ParamTxtRow, TableAccTxtRow, TableDimsTxtRow, TableExprTxtRow, TableTxtRow, TypeEnumTxtRow, TypeTxtRow,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::text_or_empty;

/// One text row with model-local key ids.
struct TxtRow {
    keys: Vec<i32>,
    lang_code: String,
    descr: String,
    note: String,
    extra: Option<(String, String)>,
}

/// Run a text query selecting `nkeys` key columns, then `lang_id, descr,
/// note` and optionally two more text columns. Rows of languages unknown to
/// `lang` are dropped.
fn query_txt(conn: &Connection, sql: &str, model_id: i32, nkeys: usize, has_extra: bool, lang: &LangMeta) -> Result<Vec<TxtRow>> {
    let mut stmt = conn.prepare(sql).with_context(|| format!("failed to prepare text query: {sql}"))?;
    let mut rows = stmt.query(params![model_id]).context("failed to query text rows")?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().context("failed to iterate text rows")? {
        let mut keys = Vec::with_capacity(nkeys);
        for k in 0..nkeys {
            keys.push(row.get::<_, i32>(k)?);
        }
        let (lang_code, ok) = lang.code_by_id(row.get(nkeys)?);
        if !ok {
            continue;
        }
        let extra = if has_extra {
            Some((text_or_empty(row, nkeys + 3)?, text_or_empty(row, nkeys + 4)?))
        } else {
            None
        };
        out.push(TxtRow {
            keys,
            lang_code,
            descr: text_or_empty(row, nkeys + 1)?,
            note: text_or_empty(row, nkeys + 2)?,
            extra,
        });
    }
    Ok(out)
}

/// Load every text row of the model in the language codes of `lang`.
///
/// # Errors
/// Returns an error when a text table cannot be read.
pub fn read_model_txt(conn: &Connection, meta: &ModelMeta, lang: &LangMeta) -> Result<ModelTxtMeta> {
    let model_id = meta.model.model_id;
    let q = |sql: &str, nkeys: usize| query_txt(conn, sql, model_id, nkeys, false, lang);

    let mut txt = ModelTxtMeta {
        model_name: meta.model.name.clone(),
        model_digest: meta.model.digest.clone(),
        ..ModelTxtMeta::default()
    };

    txt.model_txt = q("SELECT lang_id, descr, note FROM model_dic_txt WHERE model_id = ?1 ORDER BY lang_id", 0)?
        .into_iter()
        .map(|r| ModelTxtRow { model_id, lang_code: r.lang_code, descr: r.descr, note: r.note })
        .collect();

    txt.type_txt = q(
        "SELECT M.model_type_id, T.lang_id, T.descr, T.note
         FROM type_dic_txt T
         INNER JOIN model_type_dic M ON (M.type_hid = T.type_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2",
        1,
    )?
    .into_iter()
    .map(|r| TypeTxtRow { model_id, type_id: r.keys[0], lang_code: r.lang_code, descr: r.descr, note: r.note })
    .collect();

    txt.type_enum_txt = q(
        "SELECT M.model_type_id, T.enum_id, T.lang_id, T.descr, T.note
         FROM type_enum_txt T
         INNER JOIN model_type_dic M ON (M.type_hid = T.type_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| TypeEnumTxtRow {
        model_id,
        type_id: r.keys[0],
        enum_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.param_txt = q(
        "SELECT M.model_parameter_id, T.lang_id, T.descr, T.note
         FROM parameter_dic_txt T
         INNER JOIN model_parameter_dic M ON (M.parameter_hid = T.parameter_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2",
        1,
    )?
    .into_iter()
    .map(|r| ParamTxtRow { model_id, param_id: r.keys[0], lang_code: r.lang_code, descr: r.descr, note: r.note })
    .collect();

    txt.param_dims_txt = q(
        "SELECT M.model_parameter_id, T.dim_id, T.lang_id, T.descr, T.note
         FROM parameter_dims_txt T
         INNER JOIN model_parameter_dic M ON (M.parameter_hid = T.parameter_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| ParamDimsTxtRow {
        model_id,
        param_id: r.keys[0],
        dim_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.table_txt = query_txt(
        conn,
        "SELECT M.model_table_id, T.lang_id, T.descr, T.note, T.expr_descr, T.expr_note
         FROM table_dic_txt T
         INNER JOIN model_table_dic M ON (M.table_hid = T.table_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2",
        model_id,
        1,
        true,
        lang,
    )?
    .into_iter()
    .map(|r| {
        let (expr_descr, expr_note) = r.extra.unwrap_or_default();
        TableTxtRow {
            model_id,
            table_id: r.keys[0],
            lang_code: r.lang_code,
            descr: r.descr,
            note: r.note,
            expr_descr,
            expr_note,
        }
    })
    .collect();

    txt.table_dims_txt = q(
        "SELECT M.model_table_id, T.dim_id, T.lang_id, T.descr, T.note
         FROM table_dims_txt T
         INNER JOIN model_table_dic M ON (M.table_hid = T.table_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| TableDimsTxtRow {
        model_id,
        table_id: r.keys[0],
        dim_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.table_acc_txt = q(
        "SELECT M.model_table_id, T.acc_id, T.lang_id, T.descr, T.note
         FROM table_acc_txt T
         INNER JOIN model_table_dic M ON (M.table_hid = T.table_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| TableAccTxtRow {
        model_id,
        table_id: r.keys[0],
        acc_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.table_expr_txt = q(
        "SELECT M.model_table_id, T.expr_id, T.lang_id, T.descr, T.note
         FROM table_expr_txt T
         INNER JOIN model_table_dic M ON (M.table_hid = T.table_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| TableExprTxtRow {
        model_id,
        table_id: r.keys[0],
        expr_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.entity_txt = q(
        "SELECT M.model_entity_id, T.lang_id, T.descr, T.note
         FROM entity_dic_txt T
         INNER JOIN model_entity_dic M ON (M.entity_hid = T.entity_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2",
        1,
    )?
    .into_iter()
    .map(|r| EntityTxtRow { model_id, entity_id: r.keys[0], lang_code: r.lang_code, descr: r.descr, note: r.note })
    .collect();

    txt.entity_attr_txt = q(
        "SELECT M.model_entity_id, T.attr_id, T.lang_id, T.descr, T.note
         FROM entity_attr_txt T
         INNER JOIN model_entity_dic M ON (M.entity_hid = T.entity_hid)
         WHERE M.model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| EntityAttrTxtRow {
        model_id,
        entity_id: r.keys[0],
        attr_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    txt.group_txt = q(
        "SELECT group_id, lang_id, descr, note FROM group_txt WHERE model_id = ?1 ORDER BY 1, 2",
        1,
    )?
    .into_iter()
    .map(|r| GroupTxtRow { model_id, group_id: r.keys[0], lang_code: r.lang_code, descr: r.descr, note: r.note })
    .collect();

    txt.entity_group_txt = q(
        "SELECT model_entity_id, group_id, lang_id, descr, note
         FROM entity_group_txt WHERE model_id = ?1 ORDER BY 1, 2, 3",
        2,
    )?
    .into_iter()
    .map(|r| EntityGroupTxtRow {
        model_id,
        entity_id: r.keys[0],
        group_id: r.keys[1],
        lang_code: r.lang_code,
        descr: r.descr,
        note: r.note,
    })
    .collect();

    Ok(txt)
}

/// Writer of `INSERT OR REPLACE` text rows keyed by database ids.
struct TxtWriter<'a> {
    conn: &'a Connection,
    lang: &'a LangMeta,
    count: usize,
}

impl TxtWriter<'_> {
    fn put(&mut self, table: &str, key_cols: &[&str], keys: &[i32], lang_code: &str, descr: &str, note: &str) -> Result<()> {
        self.put_with(table, key_cols, keys, lang_code, descr, note, &[])
    }

    #[allow(clippy::too_many_arguments)]
    fn put_with(
        &mut self,
        table: &str,
        key_cols: &[&str],
        keys: &[i32],
        lang_code: &str,
        descr: &str,
        note: &str,
        extra: &[(&str, Value)],
    ) -> Result<()> {
        let (lang_id, ok) = self.lang.id_by_code(lang_code);
        if !ok {
            tracing::debug!(table, lang = lang_code, "skipping text row of unknown language");
            return Ok(());
        }
        let mut cols: Vec<&str> = key_cols.to_vec();
        cols.extend(["lang_id", "descr", "note"]);
        cols.extend(extra.iter().map(|(c, _)| *c));
        let marks: Vec<String> = (1..=cols.len()).map(|k| format!("?{k}")).collect();
        let sql = format!("INSERT OR REPLACE INTO {table} ({}) VALUES ({})", cols.join(", "), marks.join(", "));

        let mut values: Vec<Value> = keys.iter().map(|k| Value::Integer(i64::from(*k))).collect();
        values.push(Value::Integer(i64::from(lang_id)));
        values.push(Value::Text(cap(descr, DESCR_MAX_LEN)));
        values.push(if note.is_empty() { Value::Null } else { Value::Text(cap(note, NOTE_MAX_LEN)) });
        values.extend(extra.iter().map(|(_, v)| v.clone()));

        let mut stmt = self.conn.prepare_cached(&sql).with_context(|| format!("failed to prepare {table} insert"))?;
        stmt.execute(params_from_iter(values)).with_context(|| format!("failed to insert into {table}"))?;
        self.count += 1;
        Ok(())
    }
}

/// Store text rows for a model already inserted into this database. Rows of
/// unknown languages or of metadata the model does not have are skipped.
/// Returns the number of rows written.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn write_model_txt(conn: &Connection, meta: &ModelMeta, txt: &ModelTxtMeta, lang: &LangMeta) -> Result<usize> {
    let model_id = meta.model.model_id;
    let mut w = TxtWriter { conn, lang, count: 0 };
    let type_hid = |type_id: i32| meta.type_by_key(type_id).map(|i| meta.types[i].type_dic.type_hid);

    for r in &txt.model_txt {
        w.put("model_dic_txt", &["model_id"], &[model_id], &r.lang_code, &r.descr, &r.note)?;
    }
    for r in &txt.type_txt {
        if let Some(hid) = type_hid(r.type_id) {
            w.put("type_dic_txt", &["type_hid"], &[hid], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.type_enum_txt {
        if let Some(hid) = type_hid(r.type_id) {
            w.put("type_enum_txt", &["type_hid", "enum_id"], &[hid, r.enum_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.param_txt {
        if let Some(hid) = meta.param_hid_by_id(r.param_id) {
            w.put("parameter_dic_txt", &["parameter_hid"], &[hid], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.param_dims_txt {
        if let Some(hid) = meta.param_hid_by_id(r.param_id) {
            w.put(
                "parameter_dims_txt",
                &["parameter_hid", "dim_id"],
                &[hid, r.dim_id],
                &r.lang_code,
                &r.descr,
                &r.note,
            )?;
        }
    }
    for r in &txt.table_txt {
        if let Some(hid) = meta.out_table_hid_by_id(r.table_id) {
            let expr_note =
                if r.expr_note.is_empty() { Value::Null } else { Value::Text(cap(&r.expr_note, NOTE_MAX_LEN)) };
            w.put_with(
                "table_dic_txt",
                &["table_hid"],
                &[hid],
                &r.lang_code,
                &r.descr,
                &r.note,
                &[("expr_descr", Value::Text(cap(&r.expr_descr, DESCR_MAX_LEN))), ("expr_note", expr_note)],
            )?;
        }
    }
    for r in &txt.table_dims_txt {
        if let Some(hid) = meta.out_table_hid_by_id(r.table_id) {
            w.put("table_dims_txt", &["table_hid", "dim_id"], &[hid, r.dim_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.table_acc_txt {
        if let Some(hid) = meta.out_table_hid_by_id(r.table_id) {
            w.put("table_acc_txt", &["table_hid", "acc_id"], &[hid, r.acc_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.table_expr_txt {
        if let Some(hid) = meta.out_table_hid_by_id(r.table_id) {
            w.put("table_expr_txt", &["table_hid", "expr_id"], &[hid, r.expr_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.entity_txt {
        if let Some(idx) = meta.entity_by_key(r.entity_id) {
            let hid = meta.entity[idx].entity.entity_hid;
            w.put("entity_dic_txt", &["entity_hid"], &[hid], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.entity_attr_txt {
        if let Some(idx) = meta.entity_by_key(r.entity_id) {
            let hid = meta.entity[idx].entity.entity_hid;
            w.put("entity_attr_txt", &["entity_hid", "attr_id"], &[hid, r.attr_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.group_txt {
        if meta.group.iter().any(|g| g.group_id == r.group_id) {
            w.put("group_txt", &["model_id", "group_id"], &[model_id, r.group_id], &r.lang_code, &r.descr, &r.note)?;
        }
    }
    for r in &txt.entity_group_txt {
        if meta.entity_group.iter().any(|g| g.entity_id == r.entity_id && g.group_id == r.group_id) {
            w.put(
                "entity_group_txt",
                &["model_id", "model_entity_id", "group_id"],
                &[model_id, r.entity_id, r.group_id],
                &r.lang_code,
                &r.descr,
                &r.note,
            )?;
        }
    }
    Ok(w.count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model_one_txt, seeded_db};

    #[test]
    fn text_round_trips_through_the_database() -> Result<()> {
        let db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;

        let back = read_model_txt(db.conn(), &meta, &lang)?;
        let expected = model_one_txt();
        assert_eq!(back.model_txt.len(), expected.model_txt.len());
        assert_eq!(back.param_txt, expected.param_txt);
        assert_eq!(back.table_txt, expected.table_txt);
        assert_eq!(back.group_txt, expected.group_txt);
        Ok(())
    }

    #[test]
    fn unknown_language_rows_are_skipped() -> Result<()> {
        let db = seeded_db()?;
        let meta = crate::model_db::read_model(db.conn(), 1)?;
        let lang = crate::lang_db::read_lang(db.conn())?;
        let txt = ModelTxtMeta {
            model_txt: vec![ModelTxtRow { model_id: 1, lang_code: "DE".into(), descr: "Modell".into(), note: String::new() }],
            ..ModelTxtMeta::default()
        };
        assert_eq!(write_model_txt(db.conn(), &meta, &txt, &lang)?, 0);
        Ok(())
    }
}

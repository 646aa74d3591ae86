//! Copy from a database into plain CSV: one file per metadata table plus
//! value files, either per run and set directory or all-in-one.

use std::path::Path;

use anyhow::Result;
use dbcopy_core::cell::CellConverter;
use dbcopy_core::csv::{append_csv_file, create_csv_file};
use dbcopy_core::layout::{run_dirs, set_dirs, AllInOneFiles, ALL_RUNS_DIR, ALL_SETS_DIR};
use dbcopy_core::model::ModelMeta;
use dbcopy_core::progress::Context;
use dbcopy_core::run::RunMeta;
use dbcopy_core::workset::WorksetMeta;
use dbcopy_store_sqlite::model_db::{read_model, require_model};
use dbcopy_store_sqlite::run_db::read_run_meta;
use dbcopy_store_sqlite::values::ValueSource;
use dbcopy_store_sqlite::workset_db::read_workset_meta;
use dbcopy_store_sqlite::ModelDb;
use rusqlite::Connection;

use crate::config::{Config, CsvOptions};
use crate::copy::{select_source, ModelDocs};
use crate::files::{create_dir, pack_dir, prepare_output_dir};
use crate::to_text::{csv_converter, stream_csv, write_run_values, write_set_values};

const NULL: &str = "NULL";

fn flag(v: bool) -> String {
    if v { "1" } else { "0" }.to_string()
}

fn nullable(v: Option<i32>) -> String {
    v.map_or_else(|| NULL.to_string(), |v| v.to_string())
}

/// Metadata tables written as `{table}.csv` (or `.tsv`) into one directory.
struct MetaFiles<'a> {
    dir: &'a Path,
    opts: &'a CsvOptions,
}

impl MetaFiles<'_> {
    fn write<T>(&self, table: &str, header: &[&str], rows: &[T], to_row: impl Fn(&T) -> Vec<String>) -> Result<()> {
        let ext = if self.opts.is_tsv { "tsv" } else { "csv" };
        let mut out = create_csv_file(&self.dir.join(format!("{table}.{ext}")), self.opts.is_bom)?;
        out.write_row(header)?;
        for r in rows {
            out.write_row(&to_row(r))?;
        }
        out.flush()?;
        Ok(())
    }

    fn model(&self, docs: &ModelDocs) -> Result<()> {
        let meta = &docs.meta;
        let m = &meta.model;
        self.write(
            "model_dic",
            &["model_id", "model_name", "model_digest", "model_type", "model_ver", "create_dt", "default_lang_code"],
            &[m],
            |m| {
                vec![
                    m.model_id.to_string(),
                    m.name.clone(),
                    m.digest.clone(),
                    m.model_type.to_string(),
                    m.version.clone(),
                    m.create_date_time.clone(),
                    m.default_lang_code.clone(),
                ]
            },
        )?;

        self.write("lang_lst", &["lang_id", "lang_code", "lang_name"], &docs.lang.lang, |e| {
            vec![e.lang.lang_id.to_string(), e.lang.lang_code.clone(), e.lang.name.clone()]
        })?;
        let lang_words: Vec<[String; 3]> = docs
            .lang
            .lang
            .iter()
            .flat_map(|e| e.words.iter().map(|(k, v)| [e.lang.lang_code.clone(), k.clone(), v.clone()]))
            .collect();
        self.write("lang_word", &["lang_code", "word_code", "word_value"], &lang_words, |r| r.to_vec())?;
        let model_words: Vec<[String; 3]> = docs
            .words
            .model_word
            .iter()
            .flat_map(|w| w.words.iter().map(|(k, v)| [w.lang_code.clone(), k.clone(), v.clone()]))
            .collect();
        self.write("model_word", &["model_id", "lang_code", "word_code", "word_value"], &model_words, |r| {
            let mut row = vec![m.model_id.to_string()];
            row.extend(r.iter().cloned());
            row
        })?;

        self.types(meta)?;
        self.params(meta)?;
        self.tables(meta)?;
        self.entities(meta)?;
        self.groups(meta)?;
        self.text(docs)
    }

    fn types(&self, meta: &ModelMeta) -> Result<()> {
        self.write(
            "type_dic",
            &["model_id", "model_type_id", "type_hid", "type_name", "type_digest", "dic_id", "total_enum_id"],
            &meta.types,
            |t| {
                let d = &t.type_dic;
                vec![
                    d.model_id.to_string(),
                    d.type_id.to_string(),
                    d.type_hid.to_string(),
                    d.name.clone(),
                    d.digest.clone(),
                    d.dic_id.to_string(),
                    d.total_enum_id.to_string(),
                ]
            },
        )?;
        let enums: Vec<(i32, i32, i32, String)> = meta
            .types
            .iter()
            .flat_map(|t| {
                t.enum_ids().into_iter().map(move |id| {
                    (t.type_dic.model_id, t.type_dic.type_id, id, t.enum_code_by_id(id).unwrap_or_default())
                })
            })
            .collect();
        self.write("type_enum_lst", &["model_id", "model_type_id", "enum_id", "enum_name"], &enums, |e| {
            vec![e.0.to_string(), e.1.to_string(), e.2.to_string(), e.3.clone()]
        })
    }

    fn params(&self, meta: &ModelMeta) -> Result<()> {
        self.write(
            "parameter_dic",
            &[
                "model_id",
                "model_parameter_id",
                "parameter_hid",
                "parameter_name",
                "parameter_digest",
                "parameter_rank",
                "model_type_id",
                "is_extendable",
                "is_hidden",
                "num_cumulated",
                "db_run_table",
                "db_set_table",
                "import_digest",
            ],
            &meta.param,
            |p| {
                let d = &p.param;
                vec![
                    d.model_id.to_string(),
                    d.param_id.to_string(),
                    d.param_hid.to_string(),
                    d.name.clone(),
                    d.digest.clone(),
                    d.rank.to_string(),
                    d.type_id.to_string(),
                    flag(d.is_extendable),
                    flag(d.is_hidden),
                    d.num_cumulated.to_string(),
                    d.db_run_table.clone(),
                    d.db_set_table.clone(),
                    d.import_digest.clone(),
                ]
            },
        )?;
        let dims: Vec<_> = meta.param.iter().flat_map(|p| &p.dims).collect();
        self.write("parameter_dims", &["model_id", "model_parameter_id", "dim_id", "dim_name", "model_type_id"], &dims, |d| {
            vec![d.model_id.to_string(), d.param_id.to_string(), d.dim_id.to_string(), d.name.clone(), d.type_id.to_string()]
        })?;
        let imports: Vec<_> = meta.param.iter().flat_map(|p| &p.import).collect();
        self.write(
            "parameter_import",
            &["model_id", "model_parameter_id", "from_name", "from_model_name", "is_sample_dim"],
            &imports,
            |i| {
                vec![
                    i.model_id.to_string(),
                    i.param_id.to_string(),
                    i.from_name.clone(),
                    i.from_model_name.clone(),
                    flag(i.is_sample_dim),
                ]
            },
        )
    }

    fn tables(&self, meta: &ModelMeta) -> Result<()> {
        self.write(
            "table_dic",
            &[
                "model_id",
                "model_table_id",
                "table_hid",
                "table_name",
                "table_digest",
                "is_user",
                "table_rank",
                "is_sparse",
                "db_expr_table",
                "db_acc_table",
                "db_acc_all_view",
                "expr_dim_pos",
                "is_hidden",
                "import_digest",
            ],
            &meta.table,
            |t| {
                let d = &t.table;
                vec![
                    d.model_id.to_string(),
                    d.table_id.to_string(),
                    d.table_hid.to_string(),
                    d.name.clone(),
                    d.digest.clone(),
                    flag(d.is_user),
                    d.rank.to_string(),
                    flag(d.is_sparse),
                    d.db_expr_table.clone(),
                    d.db_acc_table.clone(),
                    d.db_acc_all_view.clone(),
                    d.expr_pos.to_string(),
                    flag(d.is_hidden),
                    d.import_digest.clone(),
                ]
            },
        )?;
        let dims: Vec<_> = meta.table.iter().flat_map(|t| &t.dims).collect();
        self.write(
            "table_dims",
            &["model_id", "model_table_id", "dim_id", "dim_name", "model_type_id", "is_total", "dim_size"],
            &dims,
            |d| {
                vec![
                    d.model_id.to_string(),
                    d.table_id.to_string(),
                    d.dim_id.to_string(),
                    d.name.clone(),
                    d.type_id.to_string(),
                    flag(d.is_total),
                    d.dim_size.to_string(),
                ]
            },
        )?;
        let accs: Vec<_> = meta.table.iter().flat_map(|t| &t.acc).collect();
        self.write(
            "table_acc",
            &["model_id", "model_table_id", "acc_id", "acc_name", "is_derived", "acc_src", "acc_sql"],
            &accs,
            |a| {
                vec![
                    a.model_id.to_string(),
                    a.table_id.to_string(),
                    a.acc_id.to_string(),
                    a.name.clone(),
                    flag(a.is_derived),
                    a.src_acc.clone(),
                    a.acc_sql.clone(),
                ]
            },
        )?;
        let exprs: Vec<_> = meta.table.iter().flat_map(|t| &t.expr).collect();
        self.write(
            "table_expr",
            &["model_id", "model_table_id", "expr_id", "expr_name", "expr_decimals", "expr_src", "expr_sql"],
            &exprs,
            |e| {
                vec![
                    e.model_id.to_string(),
                    e.table_id.to_string(),
                    e.expr_id.to_string(),
                    e.name.clone(),
                    e.decimals.to_string(),
                    e.src_expr.clone(),
                    e.expr_sql.clone(),
                ]
            },
        )
    }

    fn entities(&self, meta: &ModelMeta) -> Result<()> {
        self.write(
            "entity_dic",
            &["model_id", "model_entity_id", "entity_hid", "entity_name", "entity_digest", "db_entity_table"],
            &meta.entity,
            |e| {
                let d = &e.entity;
                vec![
                    d.model_id.to_string(),
                    d.entity_id.to_string(),
                    d.entity_hid.to_string(),
                    d.name.clone(),
                    d.digest.clone(),
                    d.db_entity_table.clone(),
                ]
            },
        )?;
        let attrs: Vec<_> = meta.entity.iter().flat_map(|e| &e.attr).collect();
        self.write(
            "entity_attr",
            &["model_id", "model_entity_id", "attr_id", "attr_name", "model_type_id", "is_internal"],
            &attrs,
            |a| {
                vec![
                    a.model_id.to_string(),
                    a.entity_id.to_string(),
                    a.attr_id.to_string(),
                    a.name.clone(),
                    a.type_id.to_string(),
                    flag(a.is_internal),
                ]
            },
        )
    }

    fn groups(&self, meta: &ModelMeta) -> Result<()> {
        self.write("group_lst", &["model_id", "group_id", "is_parameter", "group_name", "is_hidden"], &meta.group, |g| {
            vec![g.model_id.to_string(), g.group_id.to_string(), flag(g.is_param), g.name.clone(), flag(g.is_hidden)]
        })?;
        self.write("group_pc", &["model_id", "group_id", "child_pos", "child_group_id", "leaf_id"], &meta.group_pc, |g| {
            vec![
                g.model_id.to_string(),
                g.group_id.to_string(),
                g.child_pos.to_string(),
                nullable(g.child_group_id),
                nullable(g.leaf_id),
            ]
        })?;
        self.write(
            "entity_group_lst",
            &["model_id", "model_entity_id", "group_id", "group_name", "is_hidden"],
            &meta.entity_group,
            |g| {
                vec![
                    g.model_id.to_string(),
                    g.entity_id.to_string(),
                    g.group_id.to_string(),
                    g.name.clone(),
                    flag(g.is_hidden),
                ]
            },
        )?;
        self.write(
            "entity_group_pc",
            &["model_id", "model_entity_id", "group_id", "child_pos", "child_group_id", "attr_id"],
            &meta.entity_group_pc,
            |g| {
                vec![
                    g.model_id.to_string(),
                    g.entity_id.to_string(),
                    g.group_id.to_string(),
                    g.child_pos.to_string(),
                    nullable(g.child_group_id),
                    nullable(g.attr_id),
                ]
            },
        )
    }

    fn text(&self, docs: &ModelDocs) -> Result<()> {
        let t = &docs.txt;

        self.write("model_dic_txt", &["model_id", "lang_code", "descr", "note"], &t.model_txt, |r| {
            txt_row(&[r.model_id], &r.lang_code, &r.descr, &r.note)
        })?;
        self.write("type_dic_txt", &["model_id", "model_type_id", "lang_code", "descr", "note"], &t.type_txt, |r| {
            txt_row(&[r.model_id, r.type_id], &r.lang_code, &r.descr, &r.note)
        })?;
        self.write(
            "type_enum_txt",
            &["model_id", "model_type_id", "enum_id", "lang_code", "descr", "note"],
            &t.type_enum_txt,
            |r| txt_row(&[r.model_id, r.type_id, r.enum_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write(
            "parameter_dic_txt",
            &["model_id", "model_parameter_id", "lang_code", "descr", "note"],
            &t.param_txt,
            |r| txt_row(&[r.model_id, r.param_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write(
            "parameter_dims_txt",
            &["model_id", "model_parameter_id", "dim_id", "lang_code", "descr", "note"],
            &t.param_dims_txt,
            |r| txt_row(&[r.model_id, r.param_id, r.dim_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write(
            "table_dic_txt",
            &["model_id", "model_table_id", "lang_code", "descr", "note", "expr_descr", "expr_note"],
            &t.table_txt,
            |r| {
                let mut row = txt_row(&[r.model_id, r.table_id], &r.lang_code, &r.descr, &r.note);
                row.push(r.expr_descr.clone());
                row.push(value_or_null(&r.expr_note));
                row
            },
        )?;
        self.write(
            "table_dims_txt",
            &["model_id", "model_table_id", "dim_id", "lang_code", "descr", "note"],
            &t.table_dims_txt,
            |r| txt_row(&[r.model_id, r.table_id, r.dim_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write(
            "table_acc_txt",
            &["model_id", "model_table_id", "acc_id", "lang_code", "descr", "note"],
            &t.table_acc_txt,
            |r| txt_row(&[r.model_id, r.table_id, r.acc_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write(
            "table_expr_txt",
            &["model_id", "model_table_id", "expr_id", "lang_code", "descr", "note"],
            &t.table_expr_txt,
            |r| txt_row(&[r.model_id, r.table_id, r.expr_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write("entity_dic_txt", &["model_id", "model_entity_id", "lang_code", "descr", "note"], &t.entity_txt, |r| {
            txt_row(&[r.model_id, r.entity_id], &r.lang_code, &r.descr, &r.note)
        })?;
        self.write(
            "entity_attr_txt",
            &["model_id", "model_entity_id", "attr_id", "lang_code", "descr", "note"],
            &t.entity_attr_txt,
            |r| txt_row(&[r.model_id, r.entity_id, r.attr_id], &r.lang_code, &r.descr, &r.note),
        )?;
        self.write("group_txt", &["model_id", "group_id", "lang_code", "descr", "note"], &t.group_txt, |r| {
            txt_row(&[r.model_id, r.group_id], &r.lang_code, &r.descr, &r.note)
        })?;
        self.write(
            "entity_group_txt",
            &["model_id", "model_entity_id", "group_id", "lang_code", "descr", "note"],
            &t.entity_group_txt,
            |r| txt_row(&[r.model_id, r.entity_id, r.group_id], &r.lang_code, &r.descr, &r.note),
        )
    }

    fn runs(&self, meta: &ModelMeta, runs: &[RunMeta]) -> Result<()> {
        self.write(
            "run_lst",
            &[
                "run_id",
                "model_id",
                "run_name",
                "sub_count",
                "sub_started",
                "sub_completed",
                "create_dt",
                "status",
                "update_dt",
                "run_digest",
                "value_digest",
                "run_stamp",
            ],
            runs,
            |r| {
                let r = &r.run;
                vec![
                    r.run_id.to_string(),
                    r.model_id.to_string(),
                    r.name.clone(),
                    r.sub_count.to_string(),
                    r.sub_started.to_string(),
                    r.sub_completed.to_string(),
                    r.create_date_time.clone(),
                    r.status.as_str().to_string(),
                    r.update_date_time.clone(),
                    value_or_null(&r.run_digest),
                    value_or_null(&r.value_digest),
                    r.run_stamp.clone(),
                ]
            },
        )?;

        let txt: Vec<_> = runs.iter().flat_map(|r| r.txt.iter().map(move |t| (r.run.run_id, t))).collect();
        self.write("run_txt", &["run_id", "lang_code", "descr", "note"], &txt, |(id, t)| {
            txt_row(&[*id], &t.lang_code, &t.descr, &t.note)
        })?;
        let opts: Vec<_> = runs.iter().flat_map(|r| r.opts.iter().map(move |o| (r.run.run_id, o))).collect();
        self.write("run_option", &["run_id", "option_key", "option_value"], &opts, |(id, (k, v))| {
            vec![id.to_string(), (*k).clone(), (*v).clone()]
        })?;

        let params: Vec<_> = runs.iter().flat_map(|r| r.param.iter().map(move |p| (r.run.run_id, p))).collect();
        self.write(
            "run_parameter",
            &["run_id", "parameter_hid", "base_run_id", "sub_count", "value_digest"],
            &params,
            |(id, p)| {
                vec![
                    id.to_string(),
                    p.param_hid.to_string(),
                    p.base_run_id.to_string(),
                    p.sub_count.to_string(),
                    value_or_null(&p.value_digest),
                ]
            },
        )?;
        let param_txt: Vec<_> = params.iter().flat_map(|(id, p)| p.txt.iter().map(move |t| (*id, p.param_hid, t))).collect();
        self.write("run_parameter_txt", &["run_id", "parameter_hid", "lang_code", "note"], &param_txt, |(id, hid, t)| {
            vec![id.to_string(), hid.to_string(), t.lang_code.clone(), value_or_null(&t.note)]
        })?;

        let tables: Vec<_> = runs.iter().flat_map(|r| r.table.iter().map(move |t| (r.run.run_id, t))).collect();
        self.write("run_table", &["run_id", "table_hid", "base_run_id", "value_digest"], &tables, |(id, t)| {
            vec![id.to_string(), t.table_hid.to_string(), t.base_run_id.to_string(), value_or_null(&t.value_digest)]
        })?;

        let progress: Vec<_> = runs.iter().flat_map(|r| r.progress.iter().map(move |p| (r.run.run_id, p))).collect();
        self.write(
            "run_progress",
            &["run_id", "sub_id", "create_dt", "status", "update_dt", "progress_count", "progress_value"],
            &progress,
            |(id, p)| {
                vec![
                    id.to_string(),
                    p.sub_id.to_string(),
                    p.create_date_time.clone(),
                    p.status.as_str().to_string(),
                    p.update_date_time.clone(),
                    p.count.to_string(),
                    self.opts.double_format.format(p.value),
                ]
            },
        )?;
        tracing::debug!(model = %meta.model.name, runs = runs.len(), "wrote run metadata");
        Ok(())
    }

    fn sets(&self, sets: &[WorksetMeta]) -> Result<()> {
        self.write(
            "workset_lst",
            &["set_id", "base_run_id", "model_id", "set_name", "is_readonly", "update_dt"],
            sets,
            |s| {
                let s = &s.set;
                vec![
                    s.set_id.to_string(),
                    nullable(Some(s.base_run_id).filter(|id| *id > 0)),
                    s.model_id.to_string(),
                    s.name.clone(),
                    flag(s.is_readonly),
                    s.update_date_time.clone(),
                ]
            },
        )?;
        let txt: Vec<_> = sets.iter().flat_map(|s| s.txt.iter().map(move |t| (s.set.set_id, t))).collect();
        self.write("workset_txt", &["set_id", "lang_code", "descr", "note"], &txt, |(id, t)| {
            txt_row(&[*id], &t.lang_code, &t.descr, &t.note)
        })?;
        let params: Vec<_> = sets.iter().flat_map(|s| s.param.iter().map(move |p| (s.set.set_id, p))).collect();
        self.write(
            "workset_parameter",
            &["set_id", "parameter_hid", "sub_count", "default_sub_id"],
            &params,
            |(id, p)| vec![id.to_string(), p.param_hid.to_string(), p.sub_count.to_string(), p.default_sub_id.to_string()],
        )?;
        let param_txt: Vec<_> = params.iter().flat_map(|(id, p)| p.txt.iter().map(move |t| (*id, p.param_hid, t))).collect();
        self.write("workset_parameter_txt", &["set_id", "parameter_hid", "lang_code", "note"], &param_txt, |(id, hid, t)| {
            vec![id.to_string(), hid.to_string(), t.lang_code.clone(), value_or_null(&t.note)]
        })
    }
}

fn txt_row(ids: &[i32], lang_code: &str, descr: &str, note: &str) -> Vec<String> {
    let mut row: Vec<String> = ids.iter().map(ToString::to_string).collect();
    row.extend([lang_code.to_string(), descr.to_string(), value_or_null(note)]);
    row
}

fn value_or_null(v: &str) -> String {
    if v.is_empty() { NULL.to_string() } else { v.to_string() }
}

/// Values of many runs or sets in one file per parameter, table or entity,
/// each row led by the run or set id (or name in code form).
struct AllInOne<'a> {
    conn: &'a Connection,
    meta: &'a ModelMeta,
    opts: &'a CsvOptions,
    files: AllInOneFiles,
    ctx: &'a Context<'a>,
}

impl AllInOne<'_> {
    fn append(&mut self, dir: &Path, conv: &CellConverter<'_>, src: ValueSource, key_col: &str, key: &str) -> Result<()> {
        let path = dir.join(conv.csv_file_name(self.opts.is_tsv));
        let mut out = if self.files.is_first(&path) {
            let mut out = create_csv_file(&path, self.opts.is_bom)?;
            let mut header = vec![key_col.to_string()];
            header.extend(conv.csv_header());
            out.write_row(&header)?;
            out
        } else {
            append_csv_file(&path)?
        };
        stream_csv(self.conn, self.meta, conv, src, &mut out, Some(key), self.ctx)?;
        out.flush()?;
        Ok(())
    }

    fn run(&mut self, dir: &Path, run: &RunMeta, no_microdata: bool) -> Result<()> {
        let (key_col, key) = if self.opts.is_id_csv {
            ("run_id", run.run.run_id.to_string())
        } else {
            ("run_name", run.run.name.clone())
        };
        let src = ValueSource::Run(run.run.run_id);
        let meta = self.meta;
        let opts = *self.opts;
        for rp in &run.param {
            let Some(idx) = meta.param_by_hid(rp.param_hid) else { continue };
            let conv = csv_converter(CellConverter::param(meta, &meta.param[idx].param.name)?, &opts);
            self.append(dir, &conv, src, key_col, &key)?;
        }
        for rt in &run.table {
            let Some(idx) = meta.out_table_by_hid(rt.table_hid) else { continue };
            let name = &meta.table[idx].table.name;
            let conv = csv_converter(CellConverter::expr(meta, name)?, &opts);
            self.append(dir, &conv, src, key_col, &key)?;
            if !opts.no_acc {
                let conv = csv_converter(CellConverter::acc(meta, name)?, &opts);
                self.append(dir, &conv, src, key_col, &key)?;
            }
        }
        if !no_microdata {
            for re in &run.entity {
                let Some(idx) = meta.entity_by_hid(re.entity_hid) else { continue };
                let conv = csv_converter(CellConverter::micro(meta, &meta.entity[idx].entity.name)?, &opts);
                self.append(dir, &conv, src, key_col, &key)?;
            }
        }
        Ok(())
    }

    fn set(&mut self, dir: &Path, ws: &WorksetMeta) -> Result<()> {
        let (key_col, key) = if self.opts.is_id_csv {
            ("set_id", ws.set.set_id.to_string())
        } else {
            ("set_name", ws.set.name.clone())
        };
        let meta = self.meta;
        let opts = *self.opts;
        for wp in &ws.param {
            let Some(idx) = meta.param_by_hid(wp.param_hid) else { continue };
            let conv = csv_converter(CellConverter::param(meta, &meta.param[idx].param.name)?, &opts);
            self.append(dir, &conv, ValueSource::Set(ws.set.set_id), key_col, &key)?;
        }
        Ok(())
    }
}

/// Copy the selected model, run, set or task into CSV files. With
/// `all_in_one` values of every run go into `all_model_runs/` and values of
/// every set into `all_input_sets/`.
///
/// # Errors
/// Returns `NotFound` for a missing model or artifact, `Precondition` for a
/// run that is not completed or a set that is not read-only, and the first
/// failure of reading or writing otherwise.
pub fn db_to_csv(cfg: &Config, all_in_one: bool, ctx: &Context<'_>) -> Result<()> {
    let db = ModelDb::open(&cfg.database, &cfg.database_driver, false)?;
    let conn = db.conn();
    let model_row = require_model(conn, &cfg.model_name, &cfg.model_digest)?;
    let meta = read_model(conn, model_row.model_id)?;
    let docs = ModelDocs::read_db(conn, meta.clone())?;
    let sel = select_source(conn, &meta, &docs.lang, &cfg.artifact, ctx)?;

    let out = cfg.output_dir.as_path();
    prepare_output_dir(out, cfg.keep_output_dir)?;
    let files = MetaFiles { dir: out, opts: &cfg.csv };
    files.model(&docs)?;
    ctx.info(&format!("Model {} {}", meta.model.name, meta.model.digest));

    let run_names: Vec<(i32, String)> = sel.runs.iter().map(|r| (r.run_id, r.name.clone())).collect();
    let set_names: Vec<(i32, String)> = sel.sets.iter().map(|s| (s.set_id, s.name.clone())).collect();
    let runs = sel.runs.into_iter().map(|r| read_run_meta(conn, r, &docs.lang)).collect::<Result<Vec<_>>>()?;
    let sets = sel.sets.into_iter().map(|s| read_workset_meta(conn, s, &docs.lang)).collect::<Result<Vec<_>>>()?;
    files.runs(&meta, &runs)?;
    files.sets(&sets)?;

    if all_in_one {
        let mut all = AllInOne { conn, meta: &meta, opts: &cfg.csv, files: AllInOneFiles::default(), ctx };
        let runs_dir = out.join(ALL_RUNS_DIR);
        create_dir(&runs_dir)?;
        for run in &runs {
            ctx.check_cancel()?;
            ctx.info(&format!("Model run {} {}", run.run.run_id, run.run.name));
            all.run(&runs_dir, run, cfg.no_microdata)?;
        }
        let sets_dir = out.join(ALL_SETS_DIR);
        create_dir(&sets_dir)?;
        for ws in &sets {
            ctx.check_cancel()?;
            ctx.info(&format!("Workset {} {}", ws.set.set_id, ws.set.name));
            all.set(&sets_dir, ws)?;
        }
    } else {
        let dirs = run_dirs(&run_names, cfg.id_names);
        for run in &runs {
            ctx.check_cancel()?;
            ctx.info(&format!("Model run {} {}", run.run.run_id, run.run.name));
            let dir = out.join(dirs.get(run.run.run_id, &run.run.name));
            write_run_values(conn, &meta, run, &dir, &cfg.csv, cfg.no_microdata, ctx)?;
        }
        let dirs = set_dirs(&set_names, cfg.id_names);
        for ws in &sets {
            ctx.check_cancel()?;
            ctx.info(&format!("Workset {} {}", ws.set.set_id, ws.set.name));
            write_set_values(conn, &meta, ws, &out.join(dirs.get(ws.set.set_id, &ws.set.name)), &cfg.csv, ctx)?;
        }
    }

    if cfg.is_zip {
        let zip = pack_dir(out)?;
        ctx.info(&format!("Packed {}", zip.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::progress::MemoryProgress;
    use dbcopy_core::RunStatus;
    use dbcopy_store_sqlite::run_db::find_run;
    use dbcopy_store_sqlite::testing::{seed_run, seeded_db};
    use dbcopy_store_sqlite::RunRef;

    fn run_of(db: &mut ModelDb, meta: &ModelMeta, name: &str) -> Result<RunMeta> {
        let run_id = seed_run(db, meta, name, RunStatus::Success)?;
        let row = match find_run(db.conn(), 1, &RunRef::Id(run_id))? {
            Some(row) => row,
            None => panic!("seeded run not found"),
        };
        let lang = dbcopy_store_sqlite::lang_db::read_lang(db.conn())?;
        read_run_meta(db.conn(), row, &lang)
    }

    #[test]
    fn all_in_one_header_is_written_once() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let first = run_of(&mut db, &meta, "r1")?;
        let second = run_of(&mut db, &meta, "r2")?;
        let tmp = tempfile::tempdir()?;
        let progress = MemoryProgress::default();
        let ctx = Context::new(&progress);
        let opts = CsvOptions { is_id_csv: true, ..CsvOptions::default() };

        let mut all = AllInOne { conn: db.conn(), meta: &meta, opts: &opts, files: AllInOneFiles::default(), ctx: &ctx };
        all.run(tmp.path(), &first, true)?;
        all.run(tmp.path(), &second, true)?;

        let name = &meta.param[0].param.name;
        let body = std::fs::read_to_string(tmp.path().join(format!("{name}.id.csv")))?;
        let lines: Vec<&str> = body.lines().collect();
        assert!(lines[0].starts_with("run_id,sub_id"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("run_id")).count(), 1);
        assert!(lines.iter().any(|l| l.starts_with(&format!("{},", first.run.run_id))));
        assert!(lines.iter().any(|l| l.starts_with(&format!("{},", second.run.run_id))));
        Ok(())
    }

    #[test]
    fn run_list_uses_null_for_missing_digests() -> Result<()> {
        let mut db = seeded_db()?;
        let meta = read_model(db.conn(), 1)?;
        let mut run = run_of(&mut db, &meta, "r1")?;
        run.param[0].value_digest.clear();
        run.run.run_digest.clear();
        run.run.value_digest.clear();
        run.txt[0].note.clear();
        let tmp = tempfile::tempdir()?;
        let opts = CsvOptions::default();

        MetaFiles { dir: tmp.path(), opts: &opts }.runs(&meta, std::slice::from_ref(&run))?;
        let header = std::fs::read_to_string(tmp.path().join("run_lst.csv"))?;
        assert!(header.starts_with(
            "run_id,model_id,run_name,sub_count,sub_started,sub_completed,create_dt,status,update_dt,run_digest,value_digest,run_stamp\n"
        ));
        assert!(header.lines().nth(1).is_some_and(|l| l.contains(",NULL,NULL,")), "run_lst: {header}");
        let params = std::fs::read_to_string(tmp.path().join("run_parameter.csv"))?;
        assert!(params.lines().nth(1).is_some_and(|l| l.ends_with(",NULL")));
        let txt = std::fs::read_to_string(tmp.path().join("run_txt.csv"))?;
        assert!(txt.lines().nth(1).is_some_and(|l| l.ends_with(",NULL")), "run_txt: {txt}");
        Ok(())
    }
}

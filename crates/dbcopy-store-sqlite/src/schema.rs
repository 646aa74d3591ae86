//! openM++ database schema: metadata, run, workset and task tables.
//!
//! Per-model value tables (`*_p_*`, `*_w_*`, `*_v_*`, `*_a_*`, `*_g_*`) are not
//! part of the schema; they are created by [`crate::ddl`] when a model is
//! inserted.

use anyhow::{anyhow, Context, Result};
use dbcopy_core::DbcopyError;
use rusqlite::{params, Connection, OptionalExtension};

/// Schema version written into new databases.
pub const SCHEMA_VERSION: i64 = 4;

/// Oldest schema version this tool can read and write.
pub const MIN_SCHEMA_VERSION: i64 = 3;

const CREATE_COMMON_SQL: &str = r"
CREATE TABLE IF NOT EXISTS omppdb_version (
  version_key   VARCHAR(32) NOT NULL PRIMARY KEY,
  version_value INT         NOT NULL
);

CREATE TABLE IF NOT EXISTS id_lst (
  id_key   VARCHAR(64) NOT NULL PRIMARY KEY,
  id_value INT         NOT NULL
);

CREATE TABLE IF NOT EXISTS lang_lst (
  lang_id   INT          NOT NULL PRIMARY KEY,
  lang_code VARCHAR(32)  NOT NULL UNIQUE,
  lang_name VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS lang_word (
  lang_id    INT          NOT NULL,
  word_code  VARCHAR(255) NOT NULL,
  word_value VARCHAR(255) NOT NULL,
  PRIMARY KEY (lang_id, word_code),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS profile_lst (
  profile_name VARCHAR(255) NOT NULL PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS profile_option (
  profile_name VARCHAR(255)   NOT NULL,
  option_key   VARCHAR(255)   NOT NULL,
  option_value VARCHAR(32000) NOT NULL,
  PRIMARY KEY (profile_name, option_key),
  FOREIGN KEY (profile_name) REFERENCES profile_lst (profile_name)
);
";

const CREATE_MODEL_SQL: &str = r"
CREATE TABLE IF NOT EXISTS model_dic (
  model_id        INT          NOT NULL PRIMARY KEY,
  model_name      VARCHAR(255) NOT NULL,
  model_digest    VARCHAR(32)  NOT NULL UNIQUE,
  model_type      INT          NOT NULL,
  model_ver       VARCHAR(32)  NOT NULL,
  create_dt       VARCHAR(32)  NOT NULL,
  default_lang_id INT          NOT NULL,
  FOREIGN KEY (default_lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS model_dic_txt (
  model_id INT            NOT NULL,
  lang_id  INT            NOT NULL,
  descr    VARCHAR(255)   NOT NULL,
  note     VARCHAR(32000),
  PRIMARY KEY (model_id, lang_id),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS model_word (
  model_id   INT          NOT NULL,
  lang_id    INT          NOT NULL,
  word_code  VARCHAR(255) NOT NULL,
  word_value VARCHAR(255) NOT NULL,
  PRIMARY KEY (model_id, lang_id, word_code),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS type_dic (
  type_hid      INT          NOT NULL PRIMARY KEY,
  type_name     VARCHAR(255) NOT NULL,
  type_digest   VARCHAR(32)  NOT NULL UNIQUE,
  dic_id        INT          NOT NULL,
  total_enum_id INT          NOT NULL
);

CREATE TABLE IF NOT EXISTS model_type_dic (
  model_id      INT NOT NULL,
  model_type_id INT NOT NULL,
  type_hid      INT NOT NULL,
  PRIMARY KEY (model_id, model_type_id),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS type_dic_txt (
  type_hid INT            NOT NULL,
  lang_id  INT            NOT NULL,
  descr    VARCHAR(255)   NOT NULL,
  note     VARCHAR(32000),
  PRIMARY KEY (type_hid, lang_id),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS type_enum_lst (
  type_hid  INT          NOT NULL,
  enum_id   INT          NOT NULL,
  enum_name VARCHAR(255) NOT NULL,
  PRIMARY KEY (type_hid, enum_id),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS type_enum_txt (
  type_hid INT            NOT NULL,
  enum_id  INT            NOT NULL,
  lang_id  INT            NOT NULL,
  descr    VARCHAR(255)   NOT NULL,
  note     VARCHAR(32000),
  PRIMARY KEY (type_hid, enum_id, lang_id),
  FOREIGN KEY (type_hid, enum_id) REFERENCES type_enum_lst (type_hid, enum_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS parameter_dic (
  parameter_hid    INT          NOT NULL PRIMARY KEY,
  parameter_name   VARCHAR(255) NOT NULL,
  parameter_digest VARCHAR(32)  NOT NULL UNIQUE,
  parameter_rank   INT          NOT NULL,
  type_hid         INT          NOT NULL,
  is_extendable    SMALLINT     NOT NULL,
  num_cumulated    INT          NOT NULL,
  db_run_table     VARCHAR(64)  NOT NULL UNIQUE,
  db_set_table     VARCHAR(64)  NOT NULL UNIQUE,
  import_digest    VARCHAR(32)  NOT NULL,
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS model_parameter_dic (
  model_id           INT      NOT NULL,
  model_parameter_id INT      NOT NULL,
  parameter_hid      INT      NOT NULL,
  is_hidden          SMALLINT NOT NULL,
  PRIMARY KEY (model_id, model_parameter_id),
  UNIQUE (model_id, parameter_hid),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (parameter_hid) REFERENCES parameter_dic (parameter_hid)
);

CREATE TABLE IF NOT EXISTS model_parameter_import (
  model_id           INT          NOT NULL,
  model_parameter_id INT          NOT NULL,
  from_name          VARCHAR(255) NOT NULL,
  from_model_name    VARCHAR(255) NOT NULL,
  is_sample_dim      SMALLINT     NOT NULL,
  PRIMARY KEY (model_id, model_parameter_id, from_name, from_model_name),
  FOREIGN KEY (model_id, model_parameter_id) REFERENCES model_parameter_dic (model_id, model_parameter_id)
);

CREATE TABLE IF NOT EXISTS parameter_dic_txt (
  parameter_hid INT            NOT NULL,
  lang_id       INT            NOT NULL,
  descr         VARCHAR(255)   NOT NULL,
  note          VARCHAR(32000),
  PRIMARY KEY (parameter_hid, lang_id),
  FOREIGN KEY (parameter_hid) REFERENCES parameter_dic (parameter_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS parameter_dims (
  parameter_hid INT         NOT NULL,
  dim_id        INT         NOT NULL,
  dim_name      VARCHAR(255) NOT NULL,
  type_hid      INT         NOT NULL,
  PRIMARY KEY (parameter_hid, dim_id),
  FOREIGN KEY (parameter_hid) REFERENCES parameter_dic (parameter_hid),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS parameter_dims_txt (
  parameter_hid INT            NOT NULL,
  dim_id        INT            NOT NULL,
  lang_id       INT            NOT NULL,
  descr         VARCHAR(255)   NOT NULL,
  note          VARCHAR(32000),
  PRIMARY KEY (parameter_hid, dim_id, lang_id),
  FOREIGN KEY (parameter_hid, dim_id) REFERENCES parameter_dims (parameter_hid, dim_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS table_dic (
  table_hid       INT          NOT NULL PRIMARY KEY,
  table_name      VARCHAR(255) NOT NULL,
  table_digest    VARCHAR(32)  NOT NULL UNIQUE,
  table_rank      INT          NOT NULL,
  is_sparse       SMALLINT     NOT NULL,
  db_expr_table   VARCHAR(64)  NOT NULL UNIQUE,
  db_acc_table    VARCHAR(64)  NOT NULL UNIQUE,
  db_acc_all_view VARCHAR(64)  NOT NULL UNIQUE,
  import_digest   VARCHAR(32)  NOT NULL
);

CREATE TABLE IF NOT EXISTS model_table_dic (
  model_id       INT      NOT NULL,
  model_table_id INT      NOT NULL,
  table_hid      INT      NOT NULL,
  is_user        SMALLINT NOT NULL,
  expr_dim_pos   INT      NOT NULL,
  is_hidden      SMALLINT NOT NULL,
  PRIMARY KEY (model_id, model_table_id),
  UNIQUE (model_id, table_hid),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid)
);

CREATE TABLE IF NOT EXISTS table_dic_txt (
  table_hid  INT            NOT NULL,
  lang_id    INT            NOT NULL,
  descr      VARCHAR(255)   NOT NULL,
  note       VARCHAR(32000),
  expr_descr VARCHAR(255)   NOT NULL,
  expr_note  VARCHAR(32000),
  PRIMARY KEY (table_hid, lang_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS table_dims (
  table_hid INT          NOT NULL,
  dim_id    INT          NOT NULL,
  dim_name  VARCHAR(255) NOT NULL,
  type_hid  INT          NOT NULL,
  is_total  SMALLINT     NOT NULL,
  dim_size  INT          NOT NULL,
  PRIMARY KEY (table_hid, dim_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS table_dims_txt (
  table_hid INT            NOT NULL,
  dim_id    INT            NOT NULL,
  lang_id   INT            NOT NULL,
  descr     VARCHAR(255)   NOT NULL,
  note      VARCHAR(32000),
  PRIMARY KEY (table_hid, dim_id, lang_id),
  FOREIGN KEY (table_hid, dim_id) REFERENCES table_dims (table_hid, dim_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS table_acc (
  table_hid  INT            NOT NULL,
  acc_id     INT            NOT NULL,
  acc_name   VARCHAR(255)   NOT NULL,
  is_derived SMALLINT       NOT NULL,
  acc_src    VARCHAR(255)   NOT NULL,
  acc_sql    VARCHAR(32000) NOT NULL,
  PRIMARY KEY (table_hid, acc_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid)
);

CREATE TABLE IF NOT EXISTS table_acc_txt (
  table_hid INT            NOT NULL,
  acc_id    INT            NOT NULL,
  lang_id   INT            NOT NULL,
  descr     VARCHAR(255)   NOT NULL,
  note      VARCHAR(32000),
  PRIMARY KEY (table_hid, acc_id, lang_id),
  FOREIGN KEY (table_hid, acc_id) REFERENCES table_acc (table_hid, acc_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS table_expr (
  table_hid     INT            NOT NULL,
  expr_id       INT            NOT NULL,
  expr_name     VARCHAR(255)   NOT NULL,
  expr_decimals INT            NOT NULL,
  expr_src      VARCHAR(255)   NOT NULL,
  expr_sql      VARCHAR(32000) NOT NULL,
  PRIMARY KEY (table_hid, expr_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid)
);

CREATE TABLE IF NOT EXISTS table_expr_txt (
  table_hid INT            NOT NULL,
  expr_id   INT            NOT NULL,
  lang_id   INT            NOT NULL,
  descr     VARCHAR(255)   NOT NULL,
  note      VARCHAR(32000),
  PRIMARY KEY (table_hid, expr_id, lang_id),
  FOREIGN KEY (table_hid, expr_id) REFERENCES table_expr (table_hid, expr_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS entity_dic (
  entity_hid      INT          NOT NULL PRIMARY KEY,
  entity_name     VARCHAR(255) NOT NULL,
  entity_digest   VARCHAR(32)  NOT NULL UNIQUE,
  db_entity_table VARCHAR(64)  NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS model_entity_dic (
  model_id        INT NOT NULL,
  model_entity_id INT NOT NULL,
  entity_hid      INT NOT NULL,
  PRIMARY KEY (model_id, model_entity_id),
  UNIQUE (model_id, entity_hid),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id),
  FOREIGN KEY (entity_hid) REFERENCES entity_dic (entity_hid)
);

CREATE TABLE IF NOT EXISTS entity_dic_txt (
  entity_hid INT            NOT NULL,
  lang_id    INT            NOT NULL,
  descr      VARCHAR(255)   NOT NULL,
  note       VARCHAR(32000),
  PRIMARY KEY (entity_hid, lang_id),
  FOREIGN KEY (entity_hid) REFERENCES entity_dic (entity_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS entity_attr (
  entity_hid  INT          NOT NULL,
  attr_id     INT          NOT NULL,
  attr_name   VARCHAR(255) NOT NULL,
  type_hid    INT          NOT NULL,
  is_internal SMALLINT     NOT NULL,
  PRIMARY KEY (entity_hid, attr_id),
  FOREIGN KEY (entity_hid) REFERENCES entity_dic (entity_hid),
  FOREIGN KEY (type_hid) REFERENCES type_dic (type_hid)
);

CREATE TABLE IF NOT EXISTS entity_attr_txt (
  entity_hid INT            NOT NULL,
  attr_id    INT            NOT NULL,
  lang_id    INT            NOT NULL,
  descr      VARCHAR(255)   NOT NULL,
  note       VARCHAR(32000),
  PRIMARY KEY (entity_hid, attr_id, lang_id),
  FOREIGN KEY (entity_hid, attr_id) REFERENCES entity_attr (entity_hid, attr_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS group_lst (
  model_id     INT          NOT NULL,
  group_id     INT          NOT NULL,
  is_parameter SMALLINT     NOT NULL,
  group_name   VARCHAR(255) NOT NULL,
  is_hidden    SMALLINT     NOT NULL,
  PRIMARY KEY (model_id, group_id),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id)
);

CREATE TABLE IF NOT EXISTS group_txt (
  model_id INT            NOT NULL,
  group_id INT            NOT NULL,
  lang_id  INT            NOT NULL,
  descr    VARCHAR(255)   NOT NULL,
  note     VARCHAR(32000),
  PRIMARY KEY (model_id, group_id, lang_id),
  FOREIGN KEY (model_id, group_id) REFERENCES group_lst (model_id, group_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS group_pc (
  model_id       INT NOT NULL,
  group_id       INT NOT NULL,
  child_pos      INT NOT NULL,
  child_group_id INT NULL,
  leaf_id        INT NULL,
  PRIMARY KEY (model_id, group_id, child_pos),
  FOREIGN KEY (model_id, group_id) REFERENCES group_lst (model_id, group_id)
);

CREATE TABLE IF NOT EXISTS entity_group_lst (
  model_id        INT          NOT NULL,
  model_entity_id INT          NOT NULL,
  group_id        INT          NOT NULL,
  group_name      VARCHAR(255) NOT NULL,
  is_hidden       SMALLINT     NOT NULL,
  PRIMARY KEY (model_id, model_entity_id, group_id),
  FOREIGN KEY (model_id, model_entity_id) REFERENCES model_entity_dic (model_id, model_entity_id)
);

CREATE TABLE IF NOT EXISTS entity_group_txt (
  model_id        INT            NOT NULL,
  model_entity_id INT            NOT NULL,
  group_id        INT            NOT NULL,
  lang_id         INT            NOT NULL,
  descr           VARCHAR(255)   NOT NULL,
  note            VARCHAR(32000),
  PRIMARY KEY (model_id, model_entity_id, group_id, lang_id),
  FOREIGN KEY (model_id, model_entity_id, group_id) REFERENCES entity_group_lst (model_id, model_entity_id, group_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS entity_group_pc (
  model_id        INT NOT NULL,
  model_entity_id INT NOT NULL,
  group_id        INT NOT NULL,
  child_pos       INT NOT NULL,
  child_group_id  INT NULL,
  attr_id         INT NULL,
  PRIMARY KEY (model_id, model_entity_id, group_id, child_pos),
  FOREIGN KEY (model_id, model_entity_id, group_id) REFERENCES entity_group_lst (model_id, model_entity_id, group_id)
);
";

const CREATE_RUN_SQL: &str = r"
CREATE TABLE IF NOT EXISTS run_lst (
  run_id        INT          NOT NULL PRIMARY KEY,
  model_id      INT          NOT NULL,
  run_name      VARCHAR(255) NOT NULL,
  sub_count     INT          NOT NULL,
  sub_started   INT          NOT NULL,
  sub_completed INT          NOT NULL,
  sub_restart   INT          NOT NULL,
  create_dt     VARCHAR(32)  NOT NULL,
  status        VARCHAR(1)   NOT NULL,
  update_dt     VARCHAR(32)  NOT NULL,
  run_digest    VARCHAR(32)  NULL,
  value_digest  VARCHAR(32)  NULL,
  run_stamp     VARCHAR(32)  NOT NULL,
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id)
);

CREATE INDEX IF NOT EXISTS run_lst_digest_idx ON run_lst (run_digest);

CREATE TABLE IF NOT EXISTS run_txt (
  run_id  INT            NOT NULL,
  lang_id INT            NOT NULL,
  descr   VARCHAR(255)   NOT NULL,
  note    VARCHAR(32000),
  PRIMARY KEY (run_id, lang_id),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS run_option (
  run_id       INT            NOT NULL,
  option_key   VARCHAR(255)   NOT NULL,
  option_value VARCHAR(32000) NOT NULL,
  PRIMARY KEY (run_id, option_key),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id)
);

CREATE TABLE IF NOT EXISTS run_parameter (
  run_id        INT         NOT NULL,
  parameter_hid INT         NOT NULL,
  base_run_id   INT         NOT NULL,
  sub_count     INT         NOT NULL,
  value_digest  VARCHAR(32) NULL,
  PRIMARY KEY (run_id, parameter_hid),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id),
  FOREIGN KEY (parameter_hid) REFERENCES parameter_dic (parameter_hid)
);

CREATE TABLE IF NOT EXISTS run_parameter_txt (
  run_id        INT            NOT NULL,
  parameter_hid INT            NOT NULL,
  lang_id       INT            NOT NULL,
  note          VARCHAR(32000),
  PRIMARY KEY (run_id, parameter_hid, lang_id),
  FOREIGN KEY (run_id, parameter_hid) REFERENCES run_parameter (run_id, parameter_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS run_table (
  run_id       INT         NOT NULL,
  table_hid    INT         NOT NULL,
  base_run_id  INT         NOT NULL,
  value_digest VARCHAR(32) NULL,
  PRIMARY KEY (run_id, table_hid),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id),
  FOREIGN KEY (table_hid) REFERENCES table_dic (table_hid)
);

CREATE TABLE IF NOT EXISTS run_entity (
  run_id       INT         NOT NULL,
  entity_hid   INT         NOT NULL,
  base_run_id  INT         NOT NULL,
  value_digest VARCHAR(32) NULL,
  PRIMARY KEY (run_id, entity_hid),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id),
  FOREIGN KEY (entity_hid) REFERENCES entity_dic (entity_hid)
);

CREATE TABLE IF NOT EXISTS run_progress (
  run_id         INT         NOT NULL,
  sub_id         INT         NOT NULL,
  create_dt      VARCHAR(32) NOT NULL,
  status         VARCHAR(1)  NOT NULL,
  update_dt      VARCHAR(32) NOT NULL,
  progress_count INT         NOT NULL,
  progress_value FLOAT       NOT NULL,
  PRIMARY KEY (run_id, sub_id),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id)
);

CREATE TABLE IF NOT EXISTS workset_lst (
  set_id      INT          NOT NULL PRIMARY KEY,
  base_run_id INT          NULL,
  model_id    INT          NOT NULL,
  set_name    VARCHAR(255) NOT NULL,
  is_readonly SMALLINT     NOT NULL,
  update_dt   VARCHAR(32)  NOT NULL,
  UNIQUE (model_id, set_name),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id)
);

CREATE TABLE IF NOT EXISTS workset_txt (
  set_id  INT            NOT NULL,
  lang_id INT            NOT NULL,
  descr   VARCHAR(255)   NOT NULL,
  note    VARCHAR(32000),
  PRIMARY KEY (set_id, lang_id),
  FOREIGN KEY (set_id) REFERENCES workset_lst (set_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS workset_parameter (
  set_id         INT NOT NULL,
  parameter_hid  INT NOT NULL,
  sub_count      INT NOT NULL,
  default_sub_id INT NOT NULL,
  PRIMARY KEY (set_id, parameter_hid),
  FOREIGN KEY (set_id) REFERENCES workset_lst (set_id),
  FOREIGN KEY (parameter_hid) REFERENCES parameter_dic (parameter_hid)
);

CREATE TABLE IF NOT EXISTS workset_parameter_txt (
  set_id        INT            NOT NULL,
  parameter_hid INT            NOT NULL,
  lang_id       INT            NOT NULL,
  note          VARCHAR(32000),
  PRIMARY KEY (set_id, parameter_hid, lang_id),
  FOREIGN KEY (set_id, parameter_hid) REFERENCES workset_parameter (set_id, parameter_hid),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS task_lst (
  task_id   INT          NOT NULL PRIMARY KEY,
  model_id  INT          NOT NULL,
  task_name VARCHAR(255) NOT NULL,
  UNIQUE (model_id, task_name),
  FOREIGN KEY (model_id) REFERENCES model_dic (model_id)
);

CREATE TABLE IF NOT EXISTS task_txt (
  task_id INT            NOT NULL,
  lang_id INT            NOT NULL,
  descr   VARCHAR(255)   NOT NULL,
  note    VARCHAR(32000),
  PRIMARY KEY (task_id, lang_id),
  FOREIGN KEY (task_id) REFERENCES task_lst (task_id),
  FOREIGN KEY (lang_id) REFERENCES lang_lst (lang_id)
);

CREATE TABLE IF NOT EXISTS task_set (
  task_id INT NOT NULL,
  set_id  INT NOT NULL,
  PRIMARY KEY (task_id, set_id),
  FOREIGN KEY (task_id) REFERENCES task_lst (task_id),
  FOREIGN KEY (set_id) REFERENCES workset_lst (set_id)
);

CREATE TABLE IF NOT EXISTS task_run_lst (
  task_run_id INT          NOT NULL PRIMARY KEY,
  task_id     INT          NOT NULL,
  run_name    VARCHAR(255) NOT NULL,
  sub_count   INT          NOT NULL,
  create_dt   VARCHAR(32)  NOT NULL,
  status      VARCHAR(1)   NOT NULL,
  update_dt   VARCHAR(32)  NOT NULL,
  run_stamp   VARCHAR(32)  NOT NULL,
  FOREIGN KEY (task_id) REFERENCES task_lst (task_id)
);

CREATE TABLE IF NOT EXISTS task_run_set (
  task_run_id INT NOT NULL,
  run_id      INT NOT NULL,
  set_id      INT NOT NULL,
  task_id     INT NOT NULL,
  PRIMARY KEY (task_run_id, run_id),
  FOREIGN KEY (task_run_id) REFERENCES task_run_lst (task_run_id),
  FOREIGN KEY (run_id) REFERENCES run_lst (run_id),
  FOREIGN KEY (set_id) REFERENCES workset_lst (set_id)
);
";

const SEED_SQL: &str = r"
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('openmpp',       0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('lang_id',       0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('model_id',      0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('type_hid',      100);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('parameter_hid', 0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('table_hid',     0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('entity_hid',    0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('run_id_set_id', 100);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('task_id',       0);
INSERT OR IGNORE INTO id_lst (id_key, id_value) VALUES ('task_run_id',   0);
";

/// Create every schema table that does not exist yet and record the schema
/// version of a new database.
///
/// # Errors
/// Returns an error when any DDL statement fails.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_COMMON_SQL).context("failed to create common tables")?;
    conn.execute_batch(CREATE_MODEL_SQL).context("failed to create model metadata tables")?;
    conn.execute_batch(CREATE_RUN_SQL).context("failed to create run, workset and task tables")?;
    conn.execute_batch(SEED_SQL).context("failed to seed id_lst")?;
    conn.execute(
        "INSERT OR IGNORE INTO omppdb_version (version_key, version_value) VALUES ('schema', ?1)",
        params![SCHEMA_VERSION],
    )
    .context("failed to record schema version")?;
    Ok(())
}

/// Schema version stored in the database, `None` when the database has no
/// openM++ schema at all.
///
/// # Errors
/// Returns an error when the version table cannot be read.
pub fn current_schema_version(conn: &Connection) -> Result<Option<i64>> {
    if !table_exists(conn, "omppdb_version")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT version_value FROM omppdb_version WHERE version_key = 'schema'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .context("failed to read schema version")
}

/// Refuse databases created with a schema older than [`MIN_SCHEMA_VERSION`].
///
/// # Errors
/// Returns a `Db` kind error when the schema is missing or too old.
pub fn check_schema_version(conn: &Connection) -> Result<i64> {
    match current_schema_version(conn)? {
        None => Err(anyhow!(DbcopyError::Db(
            "database does not contain openM++ schema".to_string()
        ))),
        Some(v) if v < MIN_SCHEMA_VERSION => Err(anyhow!(DbcopyError::Db(format!(
            "database schema version {v} is not supported, minimal version is {MIN_SCHEMA_VERSION}"
        )))),
        Some(v) => Ok(v),
    }
}

/// # Errors
/// Returns an error when `sqlite_master` cannot be queried.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 LIMIT 1",
            params![table],
            |_| Ok(()),
        )
        .optional()
        .with_context(|| format!("failed to check table {table}"))?
        .is_some();
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcopy_core::{classify, ErrorKind};

    #[test]
    fn create_schema_is_idempotent_and_versioned() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        create_schema(&conn)?;
        assert_eq!(current_schema_version(&conn)?, Some(SCHEMA_VERSION));
        assert_eq!(check_schema_version(&conn)?, SCHEMA_VERSION);
        assert!(table_exists(&conn, "run_parameter")?);
        assert!(table_exists(&conn, "task_run_set")?);
        assert!(!table_exists(&conn, "ageSex_p_2012817")?);
        Ok(())
    }

    #[test]
    fn old_schema_is_a_db_error() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        conn.execute("UPDATE omppdb_version SET version_value = 1 WHERE version_key = 'schema'", [])?;
        let err = match check_schema_version(&conn) {
            Ok(v) => return Err(anyhow!("version {v} accepted")),
            Err(err) => err,
        };
        assert_eq!(classify(err.as_ref()), ErrorKind::Db);
        Ok(())
    }

    #[test]
    fn empty_database_has_no_version() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        assert_eq!(current_schema_version(&conn)?, None);
        assert!(check_schema_version(&conn).is_err());
        Ok(())
    }
}

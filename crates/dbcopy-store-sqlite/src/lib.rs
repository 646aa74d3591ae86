//! `SQLite` persistence of openM++ models, model runs, input sets and tasks.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dbcopy_core::facet::{flag_from_f64, DbFacet};
use dbcopy_core::DbcopyError;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, Transaction};

pub mod ddl;
pub mod edit;
pub mod ids;
pub mod lang_db;
pub mod model_db;
pub mod model_txt_db;
pub mod run_db;
pub mod schema;
pub mod task_db;
pub mod values;
pub mod workset_db;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use run_db::RunRef;
pub use task_db::TaskRef;
pub use workset_db::SetRef;

/// Default busy timeout, in seconds, when the connection string has none.
const DEFAULT_TIMEOUT_SECS: u64 = 86_400;

/// Parsed connection string: a plain path or `Database=path; Timeout=..; OpenMode=..;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub path: PathBuf,
    pub timeout_secs: u64,
    pub is_read_only: bool,
}

impl ConnectionSpec {
    /// # Errors
    /// Returns `InvalidArgument` when the string is empty, has no `Database`
    /// key or holds a malformed timeout.
    pub fn parse(conn_str: &str) -> Result<Self> {
        let text = conn_str.trim();
        if text.is_empty() {
            return Err(DbcopyError::invalid("database connection string is empty").into());
        }
        if !text.contains('=') {
            return Ok(Self { path: PathBuf::from(text), timeout_secs: DEFAULT_TIMEOUT_SECS, is_read_only: false });
        }

        let mut path = None;
        let mut timeout_secs = DEFAULT_TIMEOUT_SECS;
        let mut is_read_only = false;
        for part in text.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(DbcopyError::invalid(format!("invalid connection string part: {part}")).into());
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "database" => path = Some(PathBuf::from(value)),
                "timeout" => {
                    timeout_secs = value
                        .parse()
                        .map_err(|_| DbcopyError::invalid(format!("invalid connection timeout: {value}")))?;
                }
                "openmode" => is_read_only = value.eq_ignore_ascii_case("readonly"),
                _ => {}
            }
        }
        let path = path.ok_or_else(|| {
            DbcopyError::invalid(format!("database path not found in connection string: {conn_str}"))
        })?;
        Ok(Self { path, timeout_secs, is_read_only })
    }

    /// True when both specs point to the same database file.
    #[must_use]
    pub fn is_same_database(&self, other: &Self) -> bool {
        let canon = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        canon(&self.path) == canon(&other.path)
    }
}

/// Open openM++ database.
pub struct ModelDb {
    conn: Connection,
    facet: DbFacet,
    spec: ConnectionSpec,
}

impl ModelDb {
    /// Open an existing database, or create it with a fresh schema when
    /// `create` is set and the file does not exist yet.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an unsupported driver, `NotFound` for a
    /// missing database file and `Db` for a missing or too old schema.
    pub fn open(conn_str: &str, driver: &str, create: bool) -> Result<Self> {
        let facet = DbFacet::from_driver(driver)?;
        if facet != DbFacet::Sqlite {
            return Err(DbcopyError::invalid(format!("database driver {driver} is not supported")).into());
        }
        let spec = ConnectionSpec::parse(conn_str)?;
        if !create && !spec.path.exists() {
            return Err(DbcopyError::not_found(format!("database not found: {}", spec.path.display())).into());
        }

        let conn = Connection::open(&spec.path)
            .with_context(|| format!("failed to open sqlite database at {}", spec.path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(spec.timeout_secs))
            .context("failed to set sqlite busy timeout")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        if create && schema::current_schema_version(&conn)?.is_none() {
            schema::create_schema(&conn)?;
            tracing::debug!(path = %spec.path.display(), "created database schema");
        }
        schema::check_schema_version(&conn)?;

        Ok(Self { conn, facet, spec })
    }

    /// In-memory database with a fresh schema.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").context("failed to configure sqlite pragmas")?;
        schema::create_schema(&conn)?;
        Ok(Self {
            conn,
            facet: DbFacet::Sqlite,
            spec: ConnectionSpec { path: PathBuf::from(":memory:"), timeout_secs: 0, is_read_only: false },
        })
    }

    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn facet(&self) -> DbFacet {
        self.facet
    }

    #[must_use]
    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Start a write transaction, refusing read-only connections.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a read-only connection and a driver
    /// error when the transaction cannot be started.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        if self.spec.is_read_only {
            return Err(DbcopyError::invalid(format!(
                "database {} is opened read-only",
                self.spec.path.display()
            ))
            .into());
        }
        self.conn.transaction().context("failed to start transaction")
    }
}

/// Read a smallint flag column; drivers may hand back a float for it.
pub(crate) fn flag(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    match row.get_ref(idx)? {
        ValueRef::Integer(v) => Ok(v != 0),
        ValueRef::Real(v) => Ok(flag_from_f64(v)),
        ValueRef::Null => Ok(false),
        other => Err(rusqlite::Error::InvalidColumnType(idx, "flag".to_string(), other.data_type())),
    }
}

/// Nullable text column, `NULL` read as empty.
pub(crate) fn text_or_empty(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Map a missing row into a `NotFound` error.
pub(crate) fn required<T>(value: Option<T>, what: impl FnOnce() -> String) -> Result<T> {
    value.ok_or_else(|| anyhow!(DbcopyError::not_found(what())))
}

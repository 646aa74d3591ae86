//! SQL dialect adapter used when generating per-model value tables and SQL literals.

use crate::error::{DbcopyError, Result};

pub const CODE_MAX_LEN: usize = 32;
pub const NAME_MAX_LEN: usize = 255;
pub const DESCR_MAX_LEN: usize = 255;
pub const WORD_MAX_LEN: usize = 255;
pub const OPTION_MAX_LEN: usize = 32_000;
pub const NOTE_MAX_LEN: usize = 32_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DbFacet {
    Sqlite,
    Postgres,
    Mssql,
    Oracle,
    Mysql,
    Db2,
}

impl DbFacet {
    /// Pick the facet from a driver name such as `SQLite` or `odbc:PostgreSQL`.
    pub fn from_driver(driver: &str) -> Result<Self> {
        let lower = driver.trim().to_ascii_lowercase();
        let name = lower.rsplit(':').next().unwrap_or(&lower);
        match name {
            "" | "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "mssql" | "sql server" | "sqlserver" => Ok(Self::Mssql),
            "oracle" => Ok(Self::Oracle),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "db2" => Ok(Self::Db2),
            other => Err(DbcopyError::invalid(format!("unknown database driver: {other}"))),
        }
    }

    #[must_use]
    pub fn bigint_type(self) -> &'static str {
        match self {
            Self::Oracle => "NUMBER(19)",
            _ => "BIGINT",
        }
    }

    #[must_use]
    pub fn float_type(self) -> &'static str {
        match self {
            Self::Sqlite => "FLOAT",
            Self::Postgres | Self::Db2 => "DOUBLE PRECISION",
            Self::Mssql => "FLOAT(53)",
            Self::Oracle => "BINARY_DOUBLE",
            Self::Mysql => "DOUBLE",
        }
    }

    #[must_use]
    pub fn text_type(self, max_chars: usize) -> String {
        match self {
            Self::Sqlite | Self::Mysql | Self::Db2 => format!("VARCHAR({max_chars})"),
            Self::Postgres => {
                if max_chars > 4000 {
                    "TEXT".to_string()
                } else {
                    format!("VARCHAR({max_chars})")
                }
            }
            Self::Mssql => {
                if max_chars > 4000 {
                    "NVARCHAR(MAX)".to_string()
                } else {
                    format!("NVARCHAR({max_chars})")
                }
            }
            Self::Oracle => {
                if max_chars > 2000 {
                    "NCLOB".to_string()
                } else {
                    format!("NVARCHAR2({max_chars})")
                }
            }
        }
    }

    #[must_use]
    pub fn smallint_type(self) -> &'static str {
        match self {
            Self::Oracle => "NUMBER(5)",
            _ => "SMALLINT",
        }
    }

    /// Quote a value as an SQL string literal, truncated to `max_chars` characters.
    #[must_use]
    pub fn quote(self, value: &str, max_chars: usize) -> String {
        let value = truncate_chars(value, max_chars);
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Truncate to at most `max_chars` characters without splitting a code point.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((pos, _)) => &value[..pos],
        None => value,
    }
}

/// Apply a write-boundary size cap to an owned string.
#[must_use]
pub fn cap(value: &str, max_chars: usize) -> String {
    truncate_chars(value, max_chars).to_string()
}

/// Map a driver-returned smallint flag to a boolean.
///
/// Some drivers return smallint columns as floating point values, zero is false.
#[must_use]
pub fn flag_from_f64(value: f64) -> bool {
    value != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_names_select_facet() -> anyhow::Result<()> {
        assert_eq!(DbFacet::from_driver("SQLite")?, DbFacet::Sqlite);
        assert_eq!(DbFacet::from_driver("odbc:PostgreSQL")?, DbFacet::Postgres);
        assert!(DbFacet::from_driver("paradox").is_err());
        Ok(())
    }

    #[test]
    fn quote_doubles_apostrophes_and_caps_length() {
        assert_eq!(DbFacet::Sqlite.quote("it's", 255), "'it''s'");
        assert_eq!(DbFacet::Sqlite.quote("abcdef", 3), "'abc'");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn type_names_follow_dialect() {
        assert_eq!(DbFacet::Sqlite.float_type(), "FLOAT");
        assert_eq!(DbFacet::Mssql.text_type(32_000), "NVARCHAR(MAX)");
        assert_eq!(DbFacet::Oracle.bigint_type(), "NUMBER(19)");
    }

    #[test]
    fn float_flags_treat_nonzero_as_true() {
        assert!(!flag_from_f64(0.0));
        assert!(flag_from_f64(1.0));
        assert!(flag_from_f64(-2.0));
    }
}

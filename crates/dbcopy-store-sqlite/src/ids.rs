//! Id sequences kept in `id_lst`.
//!
//! Every new model, hid, run, workset and task id is taken from a sequence
//! row incremented inside the caller's transaction, so concurrent writers
//! against the same database never receive the same id.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub const MODEL_ID: &str = "model_id";
pub const LANG_ID: &str = "lang_id";
pub const TYPE_HID: &str = "type_hid";
pub const PARAMETER_HID: &str = "parameter_hid";
pub const TABLE_HID: &str = "table_hid";
pub const ENTITY_HID: &str = "entity_hid";
/// Runs and worksets share one sequence.
pub const RUN_ID_SET_ID: &str = "run_id_set_id";
pub const TASK_ID: &str = "task_id";
pub const TASK_RUN_ID: &str = "task_run_id";

/// Reserve `count` ids and return the first one.
///
/// # Errors
/// Returns an error when the sequence row is missing or cannot be updated.
pub fn next_ids(conn: &Connection, key: &str, count: i32) -> Result<i32> {
    if count <= 0 {
        return Err(anyhow!("invalid id count {count} for sequence {key}"));
    }
    let updated = conn
        .execute(
            "UPDATE id_lst SET id_value = id_value + ?1 WHERE id_key = ?2",
            params![count, key],
        )
        .with_context(|| format!("failed to update id sequence {key}"))?;
    if updated != 1 {
        return Err(anyhow!("id sequence {key} not found"));
    }
    let last: i32 = conn
        .query_row("SELECT id_value FROM id_lst WHERE id_key = ?1", params![key], |row| row.get(0))
        .with_context(|| format!("failed to read id sequence {key}"))?;
    Ok(last - count + 1)
}

/// # Errors
/// See [`next_ids`].
pub fn next_id(conn: &Connection, key: &str) -> Result<i32> {
    next_ids(conn, key, 1)
}

/// Move a sequence forward so that it is at least `value`, used after rows
/// were inserted with explicit ids.
///
/// # Errors
/// Returns an error when the sequence cannot be read or updated.
pub fn bump_to(conn: &Connection, key: &str, value: i32) -> Result<()> {
    let current: Option<i32> = conn
        .query_row("SELECT id_value FROM id_lst WHERE id_key = ?1", params![key], |row| row.get(0))
        .optional()
        .with_context(|| format!("failed to read id sequence {key}"))?;
    match current {
        Some(v) if v >= value => Ok(()),
        Some(_) => {
            conn.execute("UPDATE id_lst SET id_value = ?1 WHERE id_key = ?2", params![value, key])
                .with_context(|| format!("failed to update id sequence {key}"))?;
            Ok(())
        }
        None => {
            conn.execute("INSERT INTO id_lst (id_key, id_value) VALUES (?1, ?2)", params![key, value])
                .with_context(|| format!("failed to insert id sequence {key}"))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::create_schema;

    #[test]
    fn sequences_hand_out_consecutive_ranges() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        assert_eq!(next_id(&conn, RUN_ID_SET_ID)?, 101);
        assert_eq!(next_ids(&conn, RUN_ID_SET_ID, 3)?, 102);
        assert_eq!(next_id(&conn, RUN_ID_SET_ID)?, 105);
        assert_eq!(next_id(&conn, TYPE_HID)?, 101);
        assert_eq!(next_id(&conn, MODEL_ID)?, 1);
        Ok(())
    }

    #[test]
    fn bump_never_moves_backwards() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        bump_to(&conn, TASK_ID, 10)?;
        bump_to(&conn, TASK_ID, 4)?;
        assert_eq!(next_id(&conn, TASK_ID)?, 11);
        assert!(next_id(&conn, "no_such_key").is_err());
        Ok(())
    }
}

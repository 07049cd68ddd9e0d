//! `GlobalProperties` key-value store (`spec.md` §3 "Global property").

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;

pub fn get(conn: &Connection, property: &str) -> Result<Option<String>, CoreError> {
    conn.query_row(
        "SELECT value FROM GlobalProperties WHERE property = ?1",
        params![property],
        |row| row.get(0),
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn set(conn: &Connection, property: &str, value: &str) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO GlobalProperties(property, value) VALUES (?1, ?2)
         ON CONFLICT(property) DO UPDATE SET value = excluded.value",
        params![property, value],
    )?;
    Ok(())
}

/// The two incrementally maintained rollups (`spec.md` §3 "The sum of
/// attachment compressed sizes, and the sum of uncompressed sizes").
pub fn total_sizes(conn: &Connection) -> Result<(u64, u64), CoreError> {
    let uncompressed: String = get(conn, "UncompressedSize")?.unwrap_or_else(|| "0".to_string());
    let compressed: String = get(conn, "CompressedSize")?.unwrap_or_else(|| "0".to_string());
    Ok((
        uncompressed.parse().unwrap_or(0),
        compressed.parse().unwrap_or(0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{init_schema, PendingBlobDeletes};
    use std::sync::{Arc, Mutex};

    #[test]
    fn set_get_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();

        set(&conn, "DatabaseVersion", "1").unwrap();
        assert_eq!(get(&conn, "DatabaseVersion").unwrap(), Some("1".to_string()));
    }

    #[test]
    fn total_sizes_starts_at_zero() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();
        assert_eq!(total_sizes(&conn).unwrap(), (0, 0));
    }
}

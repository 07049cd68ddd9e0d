//! Append-only exported-resource log (C9, `spec.md` §4.9, §3 "Export entry").
//!
//! Symmetric to `changes.rs`: monotonic sequence, `(since, limit)` paging
//! capped at 100, whole-log truncation only.

use rusqlite::{params, Connection};

use crate::error::CoreError;
use crate::model::ExportEntry;

const MAX_PAGE: i64 = 100;

pub fn append(
    conn: &Connection,
    public_id: &str,
    remote_modality: &str,
    remote_aet: &str,
    timestamp: &str,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO ExportedResources(publicId, remoteModality, remoteAet, date) VALUES (?1, ?2, ?3, ?4)",
        params![public_id, remote_modality, remote_aet, timestamp],
    )?;
    Ok(())
}

pub fn since(conn: &Connection, since: i64, limit: i64) -> Result<(Vec<ExportEntry>, bool), CoreError> {
    let capped = limit.clamp(1, MAX_PAGE);
    let mut stmt = conn.prepare(
        "SELECT seq, publicId, remoteModality, remoteAet, date FROM ExportedResources WHERE seq > ?1 ORDER BY seq LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![since, capped + 1], row_to_export)?;
    let mut items = rows.collect::<Result<Vec<_>, _>>()?;
    let truncated = items.len() as i64 > capped;
    items.truncate(capped as usize);
    Ok((items, !truncated))
}

pub fn delete_all(conn: &Connection) -> Result<(), CoreError> {
    conn.execute("DELETE FROM ExportedResources", [])?;
    Ok(())
}

fn row_to_export(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportEntry> {
    Ok(ExportEntry {
        seq: row.get(0)?,
        public_id: row.get(1)?,
        remote_modality: row.get(2)?,
        remote_aet: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{init_schema, PendingBlobDeletes};
    use std::sync::{Arc, Mutex};

    #[test]
    fn append_and_page() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();

        append(&conn, "i1", "REMOTE", "REMOTE-AET", "2026-01-01T00:00:00Z").unwrap();
        let (items, done) = since(&conn, 0, 10).unwrap();
        assert_eq!(items.len(), 1);
        assert!(done);
    }
}

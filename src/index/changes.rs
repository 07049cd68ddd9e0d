//! Append-only change log (C9, `spec.md` §4.9, §3 "Change entry").

use rusqlite::{params, Connection};

use crate::error::CoreError;
use crate::model::{ChangeEntry, ChangeKind, ResourceLevel};

const MAX_PAGE: i64 = 100;

pub fn append(
    conn: &Connection,
    kind: ChangeKind,
    internal_id: i64,
    public_id: &str,
    level: ResourceLevel,
    timestamp: &str,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO Changes(changeType, internalId, publicId, resourceType, date) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind.as_db_value(), internal_id, public_id, level.as_db_value(), timestamp],
    )?;
    Ok(())
}

/// Items with `seq > since`, oldest first, capped at `limit` (and at
/// `MAX_PAGE` regardless of the caller's request).
pub fn since(conn: &Connection, since: i64, limit: i64) -> Result<(Vec<ChangeEntry>, bool), CoreError> {
    let capped = limit.clamp(1, MAX_PAGE);
    let mut stmt = conn.prepare(
        "SELECT seq, changeType, publicId, resourceType, date FROM Changes WHERE seq > ?1 ORDER BY seq LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![since, capped + 1], row_to_change)?;
    let mut items = rows.collect::<Result<Vec<_>, _>>()?;
    let truncated = items.len() as i64 > capped;
    items.truncate(capped as usize);
    Ok((items, !truncated))
}

pub fn last(conn: &Connection) -> Result<Option<ChangeEntry>, CoreError> {
    conn.query_row(
        "SELECT seq, changeType, publicId, resourceType, date FROM Changes ORDER BY seq DESC LIMIT 1",
        [],
        row_to_change,
    )
    .optional_or_none()
}

pub fn delete_all(conn: &Connection) -> Result<(), CoreError> {
    conn.execute("DELETE FROM Changes", [])?;
    Ok(())
}

fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEntry> {
    let kind_value: i64 = row.get(1)?;
    let level_value: i64 = row.get(3)?;
    Ok(ChangeEntry {
        seq: row.get(0)?,
        kind: ChangeKind::from_db_value(kind_value)
            .unwrap_or(ChangeKind::ModifiedInstance),
        public_id: row.get(2)?,
        level: ResourceLevel::from_db_value(level_value).unwrap_or(ResourceLevel::Instance),
        timestamp: row.get(4)?,
    })
}

/// Small local helper so `last()` can reuse `rusqlite::Error::QueryReturnedNoRows`
/// as `None` without pulling in `OptionalExtension` at every call site.
trait OptionalOrNone<T> {
    fn optional_or_none(self) -> Result<Option<T>, CoreError>;
}

impl<T> OptionalOrNone<T> for rusqlite::Result<T> {
    fn optional_or_none(self) -> Result<Option<T>, CoreError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CoreError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{init_schema, PendingBlobDeletes};
    use std::sync::{Arc, Mutex};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();
        conn
    }

    #[test]
    fn pagination_never_misses_or_duplicates() {
        let conn = open();
        for i in 0..5 {
            append(
                &conn,
                ChangeKind::NewInstance,
                1,
                &format!("i{i}"),
                ResourceLevel::Instance,
                "2026-01-01T00:00:00Z",
            )
            .unwrap();
        }
        let (first_page, done1) = since(&conn, 0, 3).unwrap();
        assert_eq!(first_page.len(), 3);
        assert!(!done1);
        let max_seq = first_page.last().unwrap().seq;
        let (second_page, done2) = since(&conn, max_seq, 3).unwrap();
        assert_eq!(second_page.len(), 2);
        assert!(done2);
    }

    #[test]
    fn last_returns_none_when_empty() {
        let conn = open();
        assert!(last(&conn).unwrap().is_none());
    }
}

//! Embedded schema script and trigger/function wiring (C2, `spec.md` §4.2).
//!
//! Mirrors Orthanc's own embedded-SQLite approach
//! (`examples/original_source/Core/SQLite`): one schema script applied at
//! startup, size rollups maintained by `AFTER INSERT/DELETE` triggers on
//! `AttachedFiles`, and a scalar function (`SignalFileDeleted`) that lets a
//! trigger notify Rust-side code which blob to remove once the surrounding
//! transaction commits. Orphan-ancestor cleanup (`spec.md` §3 "a series or
//! study with zero children is automatically removed") is handled in
//! `resources.rs` by walking the parent chain after a delete rather than by
//! a second scalar function, since the removal itself has to run more
//! `DELETE` statements that a trigger cannot safely issue against the table
//! it fired on.

use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::CoreError;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS GlobalProperties(
    property  TEXT PRIMARY KEY,
    value     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS Resources(
    internalId  INTEGER PRIMARY KEY AUTOINCREMENT,
    publicId    TEXT NOT NULL,
    level       INTEGER NOT NULL,
    parentId    INTEGER REFERENCES Resources(internalId) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS ResourcesPublicIdLevel ON Resources(publicId, level);
CREATE INDEX IF NOT EXISTS ResourcesParent ON Resources(parentId);

CREATE TABLE IF NOT EXISTS MainDicomTags(
    id          INTEGER NOT NULL REFERENCES Resources(internalId) ON DELETE CASCADE,
    tagGroup    INTEGER NOT NULL,
    tagElement  INTEGER NOT NULL,
    value       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS MainDicomTagsById ON MainDicomTags(id);
CREATE INDEX IF NOT EXISTS MainDicomTagsByValue ON MainDicomTags(tagGroup, tagElement, value);

CREATE TABLE IF NOT EXISTS Metadata(
    id      INTEGER NOT NULL REFERENCES Resources(internalId) ON DELETE CASCADE,
    type    INTEGER NOT NULL,
    value   TEXT NOT NULL,
    PRIMARY KEY(id, type)
);

CREATE TABLE IF NOT EXISTS AttachedFiles(
    id                  INTEGER NOT NULL REFERENCES Resources(internalId) ON DELETE CASCADE,
    fileType            INTEGER NOT NULL,
    uuid                TEXT NOT NULL,
    compressionType     INTEGER NOT NULL,
    uncompressedSize    INTEGER NOT NULL,
    compressedSize      INTEGER NOT NULL,
    uncompressedMd5     TEXT NOT NULL,
    compressedMd5       TEXT NOT NULL,
    PRIMARY KEY(id, fileType)
);

CREATE TABLE IF NOT EXISTS Changes(
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    changeType      INTEGER NOT NULL,
    internalId      INTEGER NOT NULL,
    publicId        TEXT NOT NULL,
    resourceType    INTEGER NOT NULL,
    date            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ExportedResources(
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    publicId        TEXT NOT NULL,
    remoteModality  TEXT NOT NULL,
    remoteAet       TEXT NOT NULL,
    date            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS PatientRecyclingOrder(
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    patientId   INTEGER NOT NULL UNIQUE REFERENCES Resources(internalId) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS PatientProtection(
    patientId   INTEGER PRIMARY KEY REFERENCES Resources(internalId) ON DELETE CASCADE,
    protected   INTEGER NOT NULL
);

CREATE TRIGGER IF NOT EXISTS AttachedFileInserted AFTER INSERT ON AttachedFiles
BEGIN
    UPDATE GlobalProperties
       SET value = CAST(CAST(value AS INTEGER) + NEW.uncompressedSize AS TEXT)
     WHERE property = 'UncompressedSize';
    UPDATE GlobalProperties
       SET value = CAST(CAST(value AS INTEGER) + NEW.compressedSize AS TEXT)
     WHERE property = 'CompressedSize';
END;

CREATE TRIGGER IF NOT EXISTS AttachedFileDeleted AFTER DELETE ON AttachedFiles
BEGIN
    SELECT SignalFileDeleted(OLD.uuid);
    UPDATE GlobalProperties
       SET value = CAST(CAST(value AS INTEGER) - OLD.uncompressedSize AS TEXT)
     WHERE property = 'UncompressedSize';
    UPDATE GlobalProperties
       SET value = CAST(CAST(value AS INTEGER) - OLD.compressedSize AS TEXT)
     WHERE property = 'CompressedSize';
END;
"#;

/// Blob uuids whose owning `AttachedFiles` row was deleted during the
/// current transaction; drained and handed to the blob store strictly
/// after commit (`spec.md` §3 "Lifecycle").
pub type PendingBlobDeletes = Arc<Mutex<Vec<Uuid>>>;

/// Apply the schema script, seed the size-rollup properties and schema
/// version, and register the `SignalFileDeleted` scalar function backed by
/// `pending` so triggers can enqueue blob deletions.
pub fn init_schema(conn: &Connection, pending: PendingBlobDeletes) -> Result<(), CoreError> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO GlobalProperties(property, value) VALUES ('UncompressedSize', '0')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO GlobalProperties(property, value) VALUES ('CompressedSize', '0')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO GlobalProperties(property, value) VALUES ('DatabaseVersion', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    conn.create_scalar_function(
        "SignalFileDeleted",
        1,
        rusqlite::functions::FunctionFlags::SQLITE_UTF8,
        move |ctx| {
            let raw: String = ctx.get(0)?;
            if let Ok(uuid) = Uuid::parse_str(&raw) {
                pending.lock().unwrap().push(uuid);
            }
            Ok(0_i64)
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_and_seeds_rollups() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();
        let value: String = conn
            .query_row(
                "SELECT value FROM GlobalProperties WHERE property = 'UncompressedSize'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "0");
    }

    #[test]
    fn deleting_attachment_enqueues_pending_blob_delete() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending.clone()).unwrap();

        conn.execute(
            "INSERT INTO Resources(publicId, level, parentId) VALUES ('p1', 0, NULL)",
            [],
        )
        .unwrap();
        let uuid = Uuid::new_v4();
        conn.execute(
            "INSERT INTO AttachedFiles(id, fileType, uuid, compressionType, uncompressedSize, compressedSize, uncompressedMd5, compressedMd5)
             VALUES (1, 1, ?1, 0, 10, 10, 'a', 'a')",
            [uuid.to_string()],
        )
        .unwrap();
        conn.execute("DELETE FROM AttachedFiles WHERE id = 1", [])
            .unwrap();

        assert_eq!(pending.lock().unwrap().as_slice(), &[uuid]);
    }
}

//! Resource Index (C2, `spec.md` §4.2): the transactional relational store
//! of the four-level resource tree, attachments, metadata, changes, exports
//! and global properties.

pub mod changes;
pub mod exports;
pub mod modalities;
pub mod properties;
pub mod recycling;
pub mod resources;
mod schema;

pub use modalities::{ModalityEntry, PeerEntry};
pub use recycling::RecyclingOutcome;

use camino::Utf8Path;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::CoreError;
use schema::PendingBlobDeletes;

/// The embedded SQL engine backing the index: one exclusive write
/// connection serialized by a mutex (`spec.md` §5 "process-wide exclusive
/// write lock"), plus a second read-only connection so readers are never
/// blocked by the writer's transaction.
pub struct Index {
    write: Mutex<Connection>,
    read: Mutex<Connection>,
    pending_deletes: PendingBlobDeletes,
}

impl Index {
    pub fn open(path: &Utf8Path) -> Result<Self, CoreError> {
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));

        let write = Connection::open(path)?;
        write.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        schema::init_schema(&write, pending.clone())?;

        let read = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        read.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
            pending_deletes: pending,
        })
    }

    /// Run `f` inside a single write transaction; on `Ok`, commit and return
    /// any blob uuids whose `AttachedFiles` row was deleted during `f`
    /// (drained strictly after commit, per `spec.md` §3 "Lifecycle"). On
    /// `Err`, roll back and leave the pending-delete queue untouched.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, CoreError>,
    ) -> Result<(T, Vec<Uuid>), CoreError> {
        let mut conn = self.write.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        let deletes = std::mem::take(&mut *self.pending_deletes.lock().unwrap());
        Ok((result, deletes))
    }

    /// Run a read-only query against the dedicated read connection.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let conn = self.read.lock().unwrap();
        f(&conn)
    }
}

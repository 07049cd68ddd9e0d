//! DICOM modality and Orthanc-peer tables (`spec.md` §6 "Recognized
//! configuration options": `DicomModalities`, `OrthancPeers`).
//!
//! Either table can be configured in JSON (`config.rs`) or, when
//! `DicomModalitiesInDatabase` is set, persisted here serialized as JSON
//! under a `GlobalProperties` row — mirroring how `spec.md` §3 describes
//! `GlobalProperty` storing "serialized modality/peer tables when
//! DB-backed".

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;

use super::properties;

const MODALITIES_PROPERTY: &str = "DicomModalities";
const PEERS_PROPERTY: &str = "OrthancPeers";

/// A remote DICOM application entity known to this store (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityEntry {
    pub aet: String,
    pub host: String,
    pub port: u16,
    /// Per-manufacturer quirk flag (`spec.md` §4.7 "manufacturer quirk flag").
    pub manufacturer: Option<String>,
}

/// A peer instance of this store, reachable over HTTP (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub fn load_modalities(conn: &Connection) -> Result<HashMap<String, ModalityEntry>, CoreError> {
    load(conn, MODALITIES_PROPERTY)
}

pub fn save_modalities(conn: &Connection, table: &HashMap<String, ModalityEntry>) -> Result<(), CoreError> {
    save(conn, MODALITIES_PROPERTY, table)
}

pub fn load_peers(conn: &Connection) -> Result<HashMap<String, PeerEntry>, CoreError> {
    load(conn, PEERS_PROPERTY)
}

pub fn save_peers(conn: &Connection, table: &HashMap<String, PeerEntry>) -> Result<(), CoreError> {
    save(conn, PEERS_PROPERTY, table)
}

fn load<T: for<'de> Deserialize<'de>>(
    conn: &Connection,
    property: &str,
) -> Result<HashMap<String, T>, CoreError> {
    match properties::get(conn, property)? {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| CoreError::InternalError(format!("corrupt {property} property: {e}"))),
        None => Ok(HashMap::new()),
    }
}

fn save<T: Serialize>(
    conn: &Connection,
    property: &str,
    table: &HashMap<String, T>,
) -> Result<(), CoreError> {
    let json = serde_json::to_string(table)
        .map_err(|e| CoreError::InternalError(format!("cannot serialize {property}: {e}")))?;
    properties::set(conn, property, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{init_schema, PendingBlobDeletes};
    use std::sync::{Arc, Mutex};

    #[test]
    fn modalities_round_trip_through_database_property() {
        let conn = Connection::open_in_memory().unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();

        let mut table = HashMap::new();
        table.insert(
            "REMOTE".to_string(),
            ModalityEntry {
                aet: "REMOTE".to_string(),
                host: "10.0.0.1".to_string(),
                port: 104,
                manufacturer: None,
            },
        );
        save_modalities(&conn, &table).unwrap();
        assert_eq!(load_modalities(&conn).unwrap(), table);
    }
}

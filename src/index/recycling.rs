//! Storage-ceiling recycling (`spec.md` §4.2 "Recycling").
//!
//! The recycling order is a dedicated table rather than an in-memory
//! structure so a crash mid-recycle leaves a resumable, on-disk
//! least-recently-touched order, the same reason Orthanc keeps this table
//! in SQLite rather than process memory.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;
use crate::model::ResourceLevel;

use super::{properties, resources};

/// Move `patient_internal_id` to the most-recently-touched end of the
/// recycling order. Called whenever an instance is ingested under an
/// existing patient, or a patient is newly created.
pub fn touch_patient(conn: &Connection, patient_internal_id: i64) -> Result<(), CoreError> {
    conn.execute(
        "DELETE FROM PatientRecyclingOrder WHERE patientId = ?1",
        params![patient_internal_id],
    )?;
    conn.execute(
        "INSERT INTO PatientRecyclingOrder(patientId) VALUES (?1)",
        params![patient_internal_id],
    )?;
    Ok(())
}

pub fn set_protected(conn: &Connection, patient_internal_id: i64, protected: bool) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO PatientProtection(patientId, protected) VALUES (?1, ?2)
         ON CONFLICT(patientId) DO UPDATE SET protected = excluded.protected",
        params![patient_internal_id, protected as i64],
    )?;
    Ok(())
}

pub fn is_protected(conn: &Connection, patient_internal_id: i64) -> Result<bool, CoreError> {
    conn.query_row(
        "SELECT protected FROM PatientProtection WHERE patientId = ?1",
        params![patient_internal_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.unwrap_or(0) != 0)
    .map_err(CoreError::from)
}

fn least_recently_used_unprotected(conn: &Connection) -> Result<Option<i64>, CoreError> {
    conn.query_row(
        "SELECT patientId FROM PatientRecyclingOrder
          WHERE patientId NOT IN (SELECT patientId FROM PatientProtection WHERE protected = 1)
          ORDER BY seq ASC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
    .map_err(CoreError::from)
}

/// Outcome of a single `recycle_until_under_ceiling` call, consumed by the
/// Ingestion Pipeline to emit `DeletedPatient` change entries (`spec.md`
/// §4.5 step 3g, §8 scenario S6).
#[derive(Debug, Default)]
pub struct RecyclingOutcome {
    pub deleted_patient_public_ids: Vec<String>,
    /// `true` when the ceiling is still exceeded because no further
    /// non-protected patient remained to remove.
    pub storage_full: bool,
}

fn patient_count(conn: &Connection) -> Result<u64, CoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM Resources WHERE level = ?1",
        params![ResourceLevel::Patient.as_db_value()],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .map_err(CoreError::from)
}

/// Repeatedly remove the least-recently-used non-protected patient until
/// both the combined compressed-size rollup is under `ceiling_bytes` and
/// the patient count is under `max_patients` (either limit `None` disables
/// that trigger), or no such patient remains (`spec.md` §4.2 "Recycling",
/// §6 "MaximumStorageSize"/"MaximumPatientCount", Open Question: reject vs.
/// accept beyond the ceiling — this implementation signals `storage_full`
/// and lets the caller decide, rather than silently overflowing).
pub fn recycle_until_within_limits(
    conn: &Connection,
    ceiling_bytes: Option<u64>,
    max_patients: Option<u64>,
) -> Result<RecyclingOutcome, CoreError> {
    let mut outcome = RecyclingOutcome::default();
    loop {
        let over_size = match ceiling_bytes {
            Some(ceiling) => properties::total_sizes(conn)?.1 > ceiling,
            None => false,
        };
        let over_count = match max_patients {
            Some(max) => patient_count(conn)? > max,
            None => false,
        };
        if !over_size && !over_count {
            break;
        }
        let Some(patient_id) = least_recently_used_unprotected(conn)? else {
            outcome.storage_full = true;
            break;
        };
        let Some(patient) = resources::get_resource(conn, patient_id)? else {
            conn.execute(
                "DELETE FROM PatientRecyclingOrder WHERE patientId = ?1",
                params![patient_id],
            )?;
            continue;
        };
        if patient.level != ResourceLevel::Patient {
            conn.execute(
                "DELETE FROM PatientRecyclingOrder WHERE patientId = ?1",
                params![patient_id],
            )?;
            continue;
        }
        resources::delete_resource_cascade(conn, patient_id)?;
        outcome.deleted_patient_public_ids.push(patient.public_id);
    }
    Ok(outcome)
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
    fn protected_patient_is_never_chosen() {
        let conn = open();
        let p1 = resources::create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        let p2 = resources::create_resource(&conn, "P2", ResourceLevel::Patient, None).unwrap();
        touch_patient(&conn, p1).unwrap();
        touch_patient(&conn, p2).unwrap();
        set_protected(&conn, p1, true).unwrap();

        let chosen = least_recently_used_unprotected(&conn).unwrap();
        assert_eq!(chosen, Some(p2));
    }

    #[test]
    fn recycling_stops_when_all_remaining_patients_protected() {
        let conn = open();
        let p1 = resources::create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        touch_patient(&conn, p1).unwrap();
        set_protected(&conn, p1, true).unwrap();
        properties::set(&conn, "CompressedSize", "999999").unwrap();

        let outcome = recycle_until_within_limits(&conn, Some(10), None).unwrap();
        assert!(outcome.storage_full);
        assert!(outcome.deleted_patient_public_ids.is_empty());
    }

    #[test]
    fn recycling_triggers_on_patient_count_alone() {
        let conn = open();
        let p1 = resources::create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        let p2 = resources::create_resource(&conn, "P2", ResourceLevel::Patient, None).unwrap();
        touch_patient(&conn, p1).unwrap();
        touch_patient(&conn, p2).unwrap();

        let outcome = recycle_until_within_limits(&conn, None, Some(1)).unwrap();
        assert_eq!(outcome.deleted_patient_public_ids, vec!["P1".to_string()]);
        assert!(!outcome.storage_full);
    }
}

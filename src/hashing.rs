//! Deterministic resource identifiers derived from DICOM UIDs (`spec.md` §4.4).
//!
//! Grounded on `original_source/OrthancFramework/Sources/DicomFormat/DicomInstanceHasher.cpp`:
//! each level's hash is the SHA-1 of the `"|"`-joined prefix of the identifying chain.

use crate::error::CoreError;
use sha1::{Digest, Sha1};

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Public ids for all four levels of a single DICOM instance.
///
/// `patient` is `SHA1(patientId)`, used only as an internal building block
/// for `study`/`series`/`instance`: per `spec.md` §3 a patient's actual
/// public id is a fresh UUID minted the first time it is seen, never this
/// hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHashes {
    pub patient: String,
    pub study: String,
    pub series: String,
    pub instance: String,
}

/// Derive the four public ids for an instance (`spec.md` §4.4).
///
/// An empty `patient_id` is tolerated. `study_uid`, `series_uid` and
/// `sop_instance_uid` must all be non-empty, or [`CoreError::BadFileFormat`]
/// is returned, matching `DicomInstanceHasher::Setup`.
pub fn hash_instance(
    patient_id: &str,
    study_uid: &str,
    series_uid: &str,
    sop_instance_uid: &str,
) -> Result<InstanceHashes, CoreError> {
    if study_uid.is_empty() || series_uid.is_empty() || sop_instance_uid.is_empty() {
        return Err(CoreError::BadFileFormat(
            "missing StudyInstanceUID, SeriesInstanceUID or SOPInstanceUID".to_string(),
        ));
    }
    let patient = sha1_hex(patient_id);
    let study = sha1_hex(&format!("{patient_id}|{study_uid}"));
    let series = sha1_hex(&format!("{patient_id}|{study_uid}|{series_uid}"));
    let instance =
        sha1_hex(&format!("{patient_id}|{study_uid}|{series_uid}|{sop_instance_uid}"));
    Ok(InstanceHashes {
        patient,
        study,
        series,
        instance,
    })
}

/// Hash only a patient id, for when only the patient level is needed (`spec.md` §3).
pub fn hash_patient(patient_id: &str) -> String {
    sha1_hex(patient_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_determinism_matches_separator_joined_sha1() {
        let hashes = hash_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap();
        assert_eq!(hashes.patient, sha1_hex("P1"));
        assert_eq!(hashes.study, sha1_hex("P1|1.2.3"));
        assert_eq!(hashes.series, sha1_hex("P1|1.2.3|1.2.3.4"));
        assert_eq!(hashes.instance, sha1_hex("P1|1.2.3|1.2.3.4|1.2.3.4.5"));
    }

    #[test]
    fn same_patient_and_study_always_yields_same_study_hash() {
        let a = hash_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap();
        let b = hash_instance("P1", "1.2.3", "1.2.3.9", "1.2.3.9.1").unwrap();
        assert_eq!(a.patient, b.patient);
        assert_eq!(a.study, b.study);
        assert_ne!(a.series, b.series);
    }

    #[test]
    fn empty_patient_id_is_tolerated() {
        let hashes = hash_instance("", "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap();
        assert_eq!(hashes.patient, sha1_hex(""));
    }

    #[test]
    fn empty_study_uid_is_bad_file_format() {
        let err = hash_instance("P1", "", "1.2.3.4", "1.2.3.4.5").unwrap_err();
        assert!(matches!(err, CoreError::BadFileFormat(_)));
    }

    #[test]
    fn empty_series_uid_is_bad_file_format() {
        let err = hash_instance("P1", "1.2.3", "", "1.2.3.4.5").unwrap_err();
        assert!(matches!(err, CoreError::BadFileFormat(_)));
    }

    #[test]
    fn empty_sop_instance_uid_is_bad_file_format() {
        let err = hash_instance("P1", "1.2.3", "1.2.3.4", "").unwrap_err();
        assert!(matches!(err, CoreError::BadFileFormat(_)));
    }
}

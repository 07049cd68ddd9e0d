//! Ingestion Pipeline (C5, `spec.md` §4.5).
//!
//! Grounded on the teacher's `writer.rs`/`chris.rs` store-then-register
//! two-phase flow: the blob is written to disk before the index transaction
//! commits, and blob removals (recycling, overwrite) are collected by the
//! index and only acted on once the transaction is known-good, mirroring
//! `writer.rs`'s "do the work, then act on confirmed-good results" join loop.

use dicom_core::header::Header;
use dicom_dictionary_std::tags;
use dicom_core::Tag;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::blob::{compressor_for, BlobStore};
use crate::checksum::md5_hex;
use crate::dicom_codec::{self, Dataset};
use crate::error::CoreError;
use crate::hashing::{hash_instance, InstanceHashes};
use crate::index::{changes, recycling, resources, Index};
use crate::model::{
    AttachedFile, ChangeKind, CompressionKind, ContentType, IngestStatus, MainDicomTag, MetadataKind, ResourceLevel,
};

/// Everything the pipeline needs beyond the bytes themselves.
pub struct IngestOptions<'a> {
    pub index: &'a Index,
    pub blobs: &'a BlobStore,
    pub compress: bool,
    /// `None` disables the storage ceiling entirely.
    pub storage_ceiling_bytes: Option<u64>,
    /// `None` disables the patient-count ceiling entirely.
    pub max_patient_count: Option<u64>,
    pub source_aet: Option<String>,
    /// When `true`, an instance whose stored MD5 differs from the incoming
    /// one is overwritten in place; otherwise it is rejected (`spec.md`
    /// §4.5 step 3a).
    pub allow_overwrite: bool,
}

pub struct IngestOutcome {
    pub instance_public_id: String,
    pub status: IngestStatus,
    /// Patients removed by storage-ceiling recycling during this ingest
    /// (`spec.md` §8 scenario S6).
    pub recycled_patient_public_ids: Vec<String>,
}

/// `store(bytes) -> (publicInstanceId, status)` (`spec.md` §4.5).
pub fn store(opts: &IngestOptions<'_>, bytes: &[u8]) -> Result<IngestOutcome, CoreError> {
    let dataset = Dataset::parse(bytes)?;
    let patient_id = dataset.patient_id();
    let study_uid = dataset.study_instance_uid()?;
    let series_uid = dataset.series_instance_uid()?;
    let sop_uid = dataset.sop_instance_uid()?;
    let hashes = hash_instance(&patient_id, &study_uid, &series_uid, &sop_uid)?;

    let uncompressed_md5 = md5_hex(bytes);
    let now = now_rfc3339();

    let write_result = write_blobs(opts, &dataset, bytes)?;

    let outcome = opts.index.transaction(|tx| {
        ingest_tx(
            tx,
            opts,
            &dataset,
            &hashes,
            &study_uid,
            &series_uid,
            &sop_uid,
            &write_result,
            &uncompressed_md5,
            &now,
        )
    });

    let (result, deletes) = match outcome {
        Ok(v) => v,
        Err(e) => {
            let _ = opts.blobs.remove(write_result.dicom_blob);
            let _ = opts.blobs.remove(write_result.json_blob);
            return Err(e);
        }
    };

    for uuid in deletes {
        if let Err(e) = opts.blobs.remove(uuid) {
            tracing::warn!(error = %e, %uuid, "failed to remove a blob scheduled for deletion");
        }
    }

    // Freshly written blobs that ended up unused (instance already stored
    // unchanged) are cleaned up here rather than inside the transaction,
    // since the blob store has no transactional rollback of its own.
    if matches!(result.status, IngestStatus::AlreadyStored | IngestStatus::AlreadyStoredConflict) {
        let _ = opts.blobs.remove(write_result.dicom_blob);
        let _ = opts.blobs.remove(write_result.json_blob);
    }

    Ok(IngestOutcome {
        instance_public_id: hashes.instance,
        status: result.status,
        recycled_patient_public_ids: result.recycled_patient_public_ids,
    })
}

struct WrittenBlobs {
    dicom_blob: uuid::Uuid,
    dicom_compression: CompressionKind,
    dicom_uncompressed_size: u64,
    dicom_compressed_size: u64,
    dicom_compressed_md5: String,
    json_blob: uuid::Uuid,
    json_compression: CompressionKind,
    json_uncompressed_size: u64,
    json_compressed_size: u64,
    json_compressed_md5: String,
}

/// Write the DICOM attachment and its DICOM-as-JSON summary to the blob
/// store before the index transaction opens (`spec.md` §4.5 "blob writes
/// precede commit").
fn write_blobs(opts: &IngestOptions<'_>, dataset: &Dataset, bytes: &[u8]) -> Result<WrittenBlobs, CoreError> {
    let kind = compression_kind(opts.compress);
    let compressor = compressor_for(kind);

    let compressed = compressor.compress(bytes)?;
    let dicom_blob = opts.blobs.create(&compressed)?;

    let json_bytes = serde_json::to_vec(&dicom_codec::to_json(
        dataset,
        dicom_codec::JsonFormat::Short,
        dicom_codec::JsonFlags::default(),
    ))
    .map_err(|e| CoreError::InternalError(format!("cannot serialize summary JSON: {e}")))?;
    let json_compressed = compressor.compress(&json_bytes)?;
    let json_blob = opts.blobs.create(&json_compressed)?;

    Ok(WrittenBlobs {
        dicom_blob,
        dicom_compression: kind,
        dicom_uncompressed_size: bytes.len() as u64,
        dicom_compressed_size: compressed.len() as u64,
        dicom_compressed_md5: md5_hex(&compressed),
        json_blob,
        json_compression: kind,
        json_uncompressed_size: json_bytes.len() as u64,
        json_compressed_size: json_compressed.len() as u64,
        json_compressed_md5: md5_hex(&json_compressed),
    })
}

fn compression_kind(compress: bool) -> CompressionKind {
    if compress {
        CompressionKind::ZlibWithSize
    } else {
        CompressionKind::None
    }
}

struct TxResult {
    status: IngestStatus,
    recycled_patient_public_ids: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
fn ingest_tx(
    tx: &rusqlite::Transaction<'_>,
    opts: &IngestOptions<'_>,
    dataset: &Dataset,
    hashes: &InstanceHashes,
    study_uid: &str,
    series_uid: &str,
    sop_uid: &str,
    written: &WrittenBlobs,
    uncompressed_md5: &str,
    now: &str,
) -> Result<TxResult, CoreError> {
    // 3a. Idempotence / conflict check against any existing instance.
    if let Some(existing) = resources::find_resource(tx, &hashes.instance, ResourceLevel::Instance)? {
        let existing_attachment = resources::get_attachment(tx, existing.internal_id, ContentType::Dicom)?;
        let unchanged = existing_attachment
            .as_ref()
            .is_some_and(|a| a.uncompressed_md5 == uncompressed_md5);
        if unchanged {
            return Ok(TxResult {
                status: IngestStatus::AlreadyStored,
                recycled_patient_public_ids: Vec::new(),
            });
        }
        if !opts.allow_overwrite {
            return Ok(TxResult {
                status: IngestStatus::AlreadyStoredConflict,
                recycled_patient_public_ids: Vec::new(),
            });
        }
        // Overwrite: drop the old attachment rows; the AttachedFiles
        // triggers enqueue the old blobs for post-commit deletion and
        // decrement the size rollups.
        tx.execute(
            "DELETE FROM AttachedFiles WHERE id = ?1",
            rusqlite::params![existing.internal_id],
        )?;
    }

    let mut newly_created = Vec::new();

    let patient_id = match resolve_patient_ancestor(
        tx,
        &mut newly_created,
        &hashes.patient,
        &patient_main_tags(dataset),
        opts.allow_overwrite,
    )? {
        Some(id) => id,
        None => {
            return Ok(TxResult {
                status: IngestStatus::AlreadyStoredConflict,
                recycled_patient_public_ids: Vec::new(),
            })
        }
    };
    recycling::touch_patient(tx, patient_id)?;

    let study_id = resolve_ancestor(
        tx,
        &mut newly_created,
        &hashes.study,
        ResourceLevel::Study,
        Some(patient_id),
        &study_main_tags(dataset, study_uid),
    )?;
    let series_id = resolve_ancestor(
        tx,
        &mut newly_created,
        &hashes.series,
        ResourceLevel::Series,
        Some(study_id),
        &series_main_tags(dataset, series_uid),
    )?;
    let instance_id = resolve_ancestor(
        tx,
        &mut newly_created,
        &hashes.instance,
        ResourceLevel::Instance,
        Some(series_id),
        &instance_main_tags(dataset, sop_uid),
    )?;

    resources::add_attachment(
        tx,
        instance_id,
        &AttachedFile {
            content_type: ContentType::Dicom,
            blob_uuid: written.dicom_blob,
            compression: written.dicom_compression,
            uncompressed_size: written.dicom_uncompressed_size,
            compressed_size: written.dicom_compressed_size,
            uncompressed_md5: uncompressed_md5.to_string(),
            compressed_md5: written.dicom_compressed_md5.clone(),
        },
    )?;
    resources::add_attachment(
        tx,
        instance_id,
        &AttachedFile {
            content_type: ContentType::DicomAsJson,
            blob_uuid: written.json_blob,
            compression: written.json_compression,
            uncompressed_size: written.json_uncompressed_size,
            compressed_size: written.json_compressed_size,
            uncompressed_md5: String::new(),
            compressed_md5: written.json_compressed_md5.clone(),
        },
    )?;

    if let Some(aet) = &opts.source_aet {
        resources::set_metadata(tx, instance_id, MetadataKind::SourceAet, aet)?;
    }
    if let Some(index_in_series) = dataset.optional_string(tags::INSTANCE_NUMBER) {
        resources::set_metadata(tx, instance_id, MetadataKind::IndexInSeries, &index_in_series)?;
    }
    resources::set_metadata(tx, instance_id, MetadataKind::LastUpdate, now)?;

    for (level, public_id, internal_id) in &newly_created {
        changes::append(tx, ChangeKind::new_for_level(*level), *internal_id, public_id, *level, now)?;
    }

    let mut recycled = Vec::new();
    if opts.storage_ceiling_bytes.is_some() || opts.max_patient_count.is_some() {
        let outcome = recycling::recycle_until_within_limits(
            tx,
            opts.storage_ceiling_bytes,
            opts.max_patient_count,
        )?;
        for public_id in &outcome.deleted_patient_public_ids {
            changes::append(
                tx,
                ChangeKind::DeletedPatient,
                0,
                public_id,
                ResourceLevel::Patient,
                now,
            )?;
        }
        recycled = outcome.deleted_patient_public_ids;
        if outcome.storage_full && recycled.is_empty() {
            return Ok(TxResult {
                status: IngestStatus::StorageFull,
                recycled_patient_public_ids: Vec::new(),
            });
        }
    }

    Ok(TxResult {
        status: IngestStatus::Success,
        recycled_patient_public_ids: recycled,
    })
}

/// Find an existing ancestor resource by public id, or create it and store
/// its main tags, recording the creation in `newly_created` in ancestor
/// order (`spec.md` §4.5 step 3f "NewPatient first, NewInstance last").
///
/// Study/series/instance public ids are SHA-1 hashes of their own UIDs
/// (`spec.md` §3), so a collision on public id implies identical incoming
/// tags; existing tags are refreshed unconditionally.
fn resolve_ancestor(
    tx: &rusqlite::Transaction<'_>,
    newly_created: &mut Vec<(ResourceLevel, String, i64)>,
    public_id: &str,
    level: ResourceLevel,
    parent_id: Option<i64>,
    tags: &[(u16, u16, String)],
) -> Result<i64, CoreError> {
    if let Some(existing) = resources::find_resource(tx, public_id, level)? {
        resources::set_main_tags(tx, existing.internal_id, tags)?;
        return Ok(existing.internal_id);
    }
    let id = resources::create_resource(tx, public_id, level, parent_id)?;
    resources::set_main_tags(tx, id, tags)?;
    newly_created.push((level, public_id.to_string(), id));
    Ok(id)
}

/// Resolve (or create) the patient ancestor, enforcing `spec.md` §4.2's
/// patient-merge rule: unlike study/series/instance, a patient's public id
/// is a fresh UUID or, here, `SHA1(patientId)` alone — it carries no study/
/// series/SOP UID, so two different patients (different name/birth date)
/// can collide on it. Ingesting against an existing patient whose stored
/// main tags differ from the incoming ones is rejected unless
/// `allow_overwrite` is set; it is never silently overwritten.
///
/// Returns `Ok(None)` on a rejected conflict, `Ok(Some(internal_id))`
/// otherwise.
fn resolve_patient_ancestor(
    tx: &rusqlite::Transaction<'_>,
    newly_created: &mut Vec<(ResourceLevel, String, i64)>,
    public_id: &str,
    tags: &[(u16, u16, String)],
    allow_overwrite: bool,
) -> Result<Option<i64>, CoreError> {
    if let Some(existing) = resources::find_resource(tx, public_id, ResourceLevel::Patient)? {
        let stored = resources::main_tags(tx, existing.internal_id)?;
        if !tags_equal(tags, &stored) {
            if !allow_overwrite {
                return Ok(None);
            }
            resources::set_main_tags(tx, existing.internal_id, tags)?;
        }
        return Ok(Some(existing.internal_id));
    }
    let id = resources::create_resource(tx, public_id, ResourceLevel::Patient, None)?;
    resources::set_main_tags(tx, id, tags)?;
    newly_created.push((ResourceLevel::Patient, public_id.to_string(), id));
    Ok(Some(id))
}

/// Order-independent comparison of incoming `(group, element, value)` main
/// tags against the stored `MainDicomTag` rows for a resource.
fn tags_equal(incoming: &[(u16, u16, String)], stored: &[MainDicomTag]) -> bool {
    if incoming.len() != stored.len() {
        return false;
    }
    incoming.iter().all(|(group, element, value)| {
        stored
            .iter()
            .any(|t| t.group == *group && t.element == *element && &t.value == value)
    })
}

fn row(tag: Tag, value: String) -> (u16, u16, String) {
    (tag.group(), tag.element(), value)
}

fn push_optional(out: &mut Vec<(u16, u16, String)>, dataset: &Dataset, tag: Tag) {
    if let Some(value) = dataset.optional_string(tag) {
        out.push(row(tag, value));
    }
}

fn patient_main_tags(dataset: &Dataset) -> Vec<(u16, u16, String)> {
    let mut out = vec![row(tags::PATIENT_ID, dataset.patient_id())];
    push_optional(&mut out, dataset, tags::PATIENT_NAME);
    push_optional(&mut out, dataset, tags::PATIENT_BIRTH_DATE);
    out
}

fn study_main_tags(dataset: &Dataset, study_uid: &str) -> Vec<(u16, u16, String)> {
    let mut out = vec![row(tags::STUDY_INSTANCE_UID, study_uid.to_string())];
    push_optional(&mut out, dataset, tags::STUDY_DATE);
    push_optional(&mut out, dataset, tags::STUDY_DESCRIPTION);
    push_optional(&mut out, dataset, tags::ACCESSION_NUMBER);
    out
}

fn series_main_tags(dataset: &Dataset, series_uid: &str) -> Vec<(u16, u16, String)> {
    let mut out = vec![row(tags::SERIES_INSTANCE_UID, series_uid.to_string())];
    push_optional(&mut out, dataset, tags::MODALITY);
    push_optional(&mut out, dataset, tags::SERIES_NUMBER);
    out
}

fn instance_main_tags(dataset: &Dataset, sop_uid: &str) -> Vec<(u16, u16, String)> {
    let mut out = vec![row(tags::SOP_INSTANCE_UID, sop_uid.to_string())];
    push_optional(&mut out, dataset, tags::INSTANCE_NUMBER);
    push_optional(&mut out, dataset, tags::NUMBER_OF_FRAMES);
    out
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobStore;
    use camino::Utf8PathBuf;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::mem::InMemDicomObject;
    use dicom_object::FileMetaTableBuilder;

    fn sample_instance(patient: &str, study: &str, series: &str, sop: &str) -> Vec<u8> {
        sample_instance_named(patient, None, study, series, sop)
    }

    fn sample_instance_named(patient: &str, patient_name: Option<&str>, study: &str, series: &str, sop: &str) -> Vec<u8> {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient)));
        if let Some(name) = patient_name {
            obj.put(DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(name)));
        }
        obj.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study)));
        obj.put(DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series)));
        obj.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop)));
        obj.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7")));
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .media_storage_sop_instance_uid(sop)
            .transfer_syntax("1.2.840.10008.1.2.1")
            .build()
            .unwrap();
        let file_obj = obj.with_exact_meta(meta);
        let mut bytes = Vec::new();
        file_obj.write_all(&mut bytes).unwrap();
        bytes
    }

    fn test_env() -> (Index, BlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let index = Index::open(&root.join("index.sqlite")).unwrap();
        let blobs = BlobStore::new(root.join("blobs"));
        (index, blobs, dir)
    }

    #[test]
    fn reingesting_identical_bytes_is_idempotent() {
        let (index, blobs, _dir) = test_env();
        let opts = IngestOptions {
            index: &index,
            blobs: &blobs,
            compress: false,
            storage_ceiling_bytes: None,
            max_patient_count: None,
            source_aet: Some("MODALITY".to_string()),
            allow_overwrite: false,
        };
        let bytes = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");

        let first = store(&opts, &bytes).unwrap();
        assert_eq!(first.status, IngestStatus::Success);

        let second = store(&opts, &bytes).unwrap();
        assert_eq!(second.status, IngestStatus::AlreadyStored);
        assert_eq!(second.instance_public_id, first.instance_public_id);
    }

    #[test]
    fn two_series_under_same_study_create_distinct_series() {
        let (index, blobs, _dir) = test_env();
        let opts = IngestOptions {
            index: &index,
            blobs: &blobs,
            compress: false,
            storage_ceiling_bytes: None,
            max_patient_count: None,
            source_aet: None,
            allow_overwrite: false,
        };
        let a = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let b = sample_instance("P1", "1.2.3", "1.2.3.9", "1.2.3.9.1");
        store(&opts, &a).unwrap();
        store(&opts, &b).unwrap();

        let summary = index
            .read(|conn| resources::resource_summary(conn, &super::hash_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap().study, ResourceLevel::Study))
            .unwrap()
            .unwrap();
        assert_eq!(summary.children_public_ids.len(), 2);
    }

    #[test]
    fn conflicting_patient_tags_are_rejected_by_default() {
        let (index, blobs, _dir) = test_env();
        let opts = IngestOptions {
            index: &index,
            blobs: &blobs,
            compress: false,
            storage_ceiling_bytes: None,
            max_patient_count: None,
            source_aet: None,
            allow_overwrite: false,
        };
        let a = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let b = sample_instance_named("P1", Some("Different^Name"), "9.9.9", "9.9.9.1", "9.9.9.1.1");

        let first = store(&opts, &a).unwrap();
        assert_eq!(first.status, IngestStatus::Success);

        let second = store(&opts, &b).unwrap();
        assert_eq!(second.status, IngestStatus::AlreadyStoredConflict);

        // The conflicting instance must not have been registered.
        let found = index
            .read(|conn| resources::find_resource(conn, &second.instance_public_id, ResourceLevel::Instance))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn conflicting_patient_tags_overwrite_when_allowed() {
        let (index, blobs, _dir) = test_env();
        let opts = IngestOptions {
            index: &index,
            blobs: &blobs,
            compress: false,
            storage_ceiling_bytes: None,
            max_patient_count: None,
            source_aet: None,
            allow_overwrite: true,
        };
        let a = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let b = sample_instance_named("P1", Some("Different^Name"), "9.9.9", "9.9.9.1", "9.9.9.1.1");

        store(&opts, &a).unwrap();
        let second = store(&opts, &b).unwrap();
        assert_eq!(second.status, IngestStatus::Success);

        let patient_id = super::hash_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5").unwrap().patient;
        let stored = index
            .read(|conn| resources::main_tags(conn, resources::find_resource(conn, &patient_id, ResourceLevel::Patient)?.unwrap().internal_id))
            .unwrap();
        assert!(stored.iter().any(|t| t.value == "Different^Name"));
    }
}

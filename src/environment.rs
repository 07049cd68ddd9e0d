//! `ServerEnvironment`: the single struct wiring every component together
//! (`spec.md` §9 "Design Notes", §6 "External Interfaces").
//!
//! Grounded on the teacher's `ChrisPacsStorage` (owns config, a blob/database
//! pair, and is constructed once then shared `Arc`-wrapped across threads):
//! this generalizes that shape to the new core's blob store, index, modality
//! and peer tables, and the reusable SCU connection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::blob::{compressor_for, BlobStore};
use crate::dicom_codec::{self, CharacterEncoding, Dataset, JsonFlags, JsonFormat};
use crate::error::CoreError;
use crate::finder::{find, FindOutcome, FinderQuery};
use crate::ingest::{self, IngestOptions};
use crate::index::{changes, exports, modalities, recycling, resources, Index, ModalityEntry, PeerEntry};
use crate::model::{
    AttachedFile, ChangeEntry, ContentType, ExportEntry, FileInfo, IngestStatus, MetadataKind,
    ResourceLevel, ResourceSummary,
};
use crate::scu::{QrRoot, QueryLevel, ScuConnection, ScuTarget};
use crate::config::Settings;
use crate::dicomrs_options::OurAETitle;

/// HTTP fan-out to another instance of this store (`spec.md` §6 "peerStore:
/// HTTP fan-out; uses basic auth from configuration"). The core only calls
/// this trait; an HTTP client implementing it lives outside the core.
pub trait PeerStoreClient {
    fn store(&self, peer: &PeerEntry, public_id: &str, bytes: &[u8]) -> Result<(), CoreError>;
}

/// Constructed once at startup, then shared `Arc`-wrapped across the SCP
/// thread pool and every public API caller (`spec.md` §9).
pub struct ServerEnvironment {
    pub settings: Settings,
    pub blobs: BlobStore,
    pub index: Index,
    modalities: RwLock<HashMap<String, ModalityEntry>>,
    peers: RwLock<HashMap<String, PeerEntry>>,
    scu: Arc<ScuConnection>,
}

impl ServerEnvironment {
    pub fn new(settings: Settings) -> Result<Arc<Self>, CoreError> {
        let blobs = BlobStore::new(settings.storage_directory.clone());
        let index = Index::open(&settings.index_file_path())?;

        let modality_table = if settings.dicom_modalities_in_database {
            index.read(modalities::load_modalities)?
        } else {
            settings.dicom_modalities.clone()
        };
        let peer_table = if settings.orthanc_peers_in_database {
            index.read(modalities::load_peers)?
        } else {
            settings.orthanc_peers.clone()
        };

        let scu = ScuConnection::new(
            OurAETitle::new(settings.dicom_aet.clone()),
            settings.max_pdu_length as u32,
        );

        Ok(Arc::new(Self {
            settings,
            blobs,
            index,
            modalities: RwLock::new(modality_table),
            peers: RwLock::new(peer_table),
            scu,
        }))
    }

    fn ingest_options(&self, source_aet: Option<String>) -> IngestOptions<'_> {
        IngestOptions {
            index: &self.index,
            blobs: &self.blobs,
            compress: self.settings.storage_compression,
            storage_ceiling_bytes: self.settings.maximum_storage_size_bytes(),
            max_patient_count: self.settings.maximum_patient_count,
            source_aet,
            allow_overwrite: false,
        }
    }

    /// `ingest(bytes) -> (publicInstanceId, status)` (`spec.md` §6).
    pub fn ingest(&self, bytes: &[u8], source_aet: Option<String>) -> Result<(String, IngestStatus), CoreError> {
        let opts = self.ingest_options(source_aet);
        let outcome = ingest::store(&opts, bytes)?;
        if outcome.status == IngestStatus::StorageFull {
            return Err(CoreError::StorageFull);
        }
        Ok((outcome.instance_public_id, outcome.status))
    }

    /// `fromJson(JsonObject) -> Dataset` (`spec.md` §4.3), wired through to
    /// `ingest` so an instance built from a JSON tag map gets the same
    /// identity/idempotence/status contract as a parsed wire instance.
    pub fn ingest_from_json(
        &self,
        value: &serde_json::Value,
        auto_generate_uids: bool,
        source_aet: Option<String>,
    ) -> Result<(String, IngestStatus), CoreError> {
        let obj = dicom_codec::from_json(value, auto_generate_uids)?;
        let sop_class_uid = obj
            .element(dicom_dictionary_std::tags::SOP_CLASS_UID)
            .ok()
            .and_then(|e| e.string().ok().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "1.2.840.10008.5.1.4.1.1.7".to_string());
        let sop_instance_uid = obj
            .element(dicom_dictionary_std::tags::SOP_INSTANCE_UID)
            .ok()
            .and_then(|e| e.string().ok().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::missing_tag(dicom_dictionary_std::tags::SOP_INSTANCE_UID))?;
        let dataset = Dataset::from_inmem(obj, &sop_class_uid, &sop_instance_uid, None)?;
        let bytes = dataset.serialize()?;
        self.ingest(&bytes, source_aet)
    }

    /// `lookupResource(publicId, level) -> ResourceSummary | NotFound` (`spec.md` §6).
    pub fn lookup_resource(
        &self,
        public_id: &str,
        level: ResourceLevel,
    ) -> Result<Option<ResourceSummary>, CoreError> {
        self.index.read(|conn| resources::resource_summary(conn, public_id, level))
    }

    /// `deleteResource(publicId, level) -> ResourceSummary` (`spec.md` §6).
    pub fn delete_resource(&self, public_id: &str, level: ResourceLevel) -> Result<ResourceSummary, CoreError> {
        let (summary, deletes) = self.index.transaction(|tx| {
            let resource = resources::find_resource(tx, public_id, level)?
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))?;
            let summary = resources::resource_summary(tx, public_id, level)?
                .expect("resource just looked up by find_resource");
            resources::delete_resource_cascade(tx, resource.internal_id)?;
            let now = now_rfc3339();
            changes::append(
                tx,
                crate::model::ChangeKind::deleted_for_level(level),
                resource.internal_id,
                public_id,
                level,
                &now,
            )?;
            Ok(summary)
        })?;
        for uuid in deletes {
            if let Err(e) = self.blobs.remove(uuid) {
                tracing::warn!(error = %e, %uuid, "failed to remove a blob scheduled for deletion");
            }
        }
        Ok(summary)
    }

    /// `listResources(level, since?, limit?) -> [publicId]` (`spec.md` §6).
    pub fn list_resources(
        &self,
        level: ResourceLevel,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<String>, CoreError> {
        self.index.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT publicId FROM Resources WHERE level = ?1 AND internalId > ?2 ORDER BY internalId LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![level.as_db_value(), since.unwrap_or(0), limit as i64],
                |row| row.get(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
        })
    }

    fn attachment_for(
        &self,
        public_id: &str,
        level: ResourceLevel,
        content_type: ContentType,
    ) -> Result<AttachedFile, CoreError> {
        self.index.read(|conn| {
            let resource = resources::find_resource(conn, public_id, level)?
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))?;
            resources::get_attachment(conn, resource.internal_id, content_type)?
                .ok_or_else(|| CoreError::InexistentItem(format!("attachment {content_type:?} on {public_id}")))
        })
    }

    /// `readAttachment(publicId, contentType, uncompressed?) -> bytes` (`spec.md` §6).
    pub fn read_attachment(
        &self,
        public_id: &str,
        level: ResourceLevel,
        content_type: ContentType,
        uncompressed: bool,
    ) -> Result<Vec<u8>, CoreError> {
        let attachment = self.attachment_for(public_id, level, content_type)?;
        let raw = self.blobs.read_raw(attachment.blob_uuid)?;
        if uncompressed {
            compressor_for(attachment.compression).uncompress(&raw)
        } else {
            Ok(raw)
        }
    }

    /// `attachmentInfo(publicId, contentType) -> FileInfo` (`spec.md` §6).
    pub fn attachment_info(
        &self,
        public_id: &str,
        level: ResourceLevel,
        content_type: ContentType,
    ) -> Result<FileInfo, CoreError> {
        Ok(self.attachment_for(public_id, level, content_type)?.into())
    }

    /// `toJson(Dataset, format, flags)` (`spec.md` §4.3), rendering an
    /// already-ingested instance's stored DICOM attachment.
    pub fn instance_as_json(
        &self,
        instance_public_id: &str,
        format: JsonFormat,
        flags: JsonFlags,
    ) -> Result<serde_json::Value, CoreError> {
        let bytes = self.read_attachment(instance_public_id, ResourceLevel::Instance, ContentType::Dicom, true)?;
        let dataset = Dataset::parse(&bytes)?;
        Ok(dicom_codec::to_json(&dataset, format, flags))
    }

    /// `detectEncoding(Dataset) -> CharacterEncoding` (`spec.md` §4.3),
    /// applied to an already-ingested instance's stored DICOM attachment.
    pub fn detect_instance_encoding(
        &self,
        instance_public_id: &str,
        default_encoding: CharacterEncoding,
    ) -> Result<CharacterEncoding, CoreError> {
        let bytes = self.read_attachment(instance_public_id, ResourceLevel::Instance, ContentType::Dicom, true)?;
        let dataset = Dataset::parse(&bytes)?;
        Ok(dicom_codec::detect_encoding(dataset.inner(), default_encoding))
    }

    /// `addAttachment(publicId, contentType, bytes) -> ok` (`spec.md` §6).
    pub fn add_attachment(
        &self,
        public_id: &str,
        level: ResourceLevel,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        if matches!(content_type, ContentType::Dicom | ContentType::DicomAsJson) {
            return Err(CoreError::BadRequest(
                "Dicom and DicomAsJson attachments are managed by ingest, not addAttachment".to_string(),
            ));
        }
        let kind = if self.settings.storage_compression {
            crate::model::CompressionKind::ZlibWithSize
        } else {
            crate::model::CompressionKind::None
        };
        let compressor = compressor_for(kind);
        let compressed = compressor.compress(bytes)?;
        let uuid = self.blobs.create(&compressed)?;
        let file = AttachedFile {
            content_type,
            blob_uuid: uuid,
            compression: kind,
            uncompressed_size: bytes.len() as u64,
            compressed_size: compressed.len() as u64,
            uncompressed_md5: crate::checksum::md5_hex(bytes),
            compressed_md5: crate::checksum::md5_hex(&compressed),
        };
        let result = self.index.transaction(|tx| {
            let resource = resources::find_resource(tx, public_id, level)?
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))?;
            resources::add_attachment(tx, resource.internal_id, &file)
        });
        if result.is_err() {
            let _ = self.blobs.remove(uuid);
        }
        let (_, deletes) = result?;
        for uuid in deletes {
            let _ = self.blobs.remove(uuid);
        }
        Ok(())
    }

    fn resource_internal_id(&self, public_id: &str, level: ResourceLevel) -> Result<i64, CoreError> {
        self.index.read(|conn| {
            resources::find_resource(conn, public_id, level)?
                .map(|r| r.internal_id)
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))
        })
    }

    /// `listMetadata(publicId) -> [MetadataType]` (`spec.md` §6).
    pub fn list_metadata(&self, public_id: &str, level: ResourceLevel) -> Result<Vec<MetadataKind>, CoreError> {
        let internal_id = self.resource_internal_id(public_id, level)?;
        self.index.read(|conn| resources::list_metadata(conn, internal_id))
    }

    pub fn get_metadata(
        &self,
        public_id: &str,
        level: ResourceLevel,
        kind: MetadataKind,
    ) -> Result<Option<String>, CoreError> {
        let internal_id = self.resource_internal_id(public_id, level)?;
        self.index.read(|conn| resources::get_metadata(conn, internal_id, kind))
    }

    pub fn set_metadata(
        &self,
        public_id: &str,
        level: ResourceLevel,
        kind: MetadataKind,
        value: &str,
    ) -> Result<(), CoreError> {
        let (_, deletes) = self.index.transaction(|tx| {
            let resource = resources::find_resource(tx, public_id, level)?
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))?;
            resources::set_metadata(tx, resource.internal_id, kind, value)
        })?;
        debug_assert!(deletes.is_empty());
        Ok(())
    }

    /// `deleteMetadata` (deletion only for the user-reserved metadata range, `spec.md` §6).
    pub fn delete_metadata(&self, public_id: &str, level: ResourceLevel, kind: MetadataKind) -> Result<(), CoreError> {
        let (_, deletes) = self.index.transaction(|tx| {
            let resource = resources::find_resource(tx, public_id, level)?
                .ok_or_else(|| CoreError::InexistentItem(format!("{level} {public_id}")))?;
            resources::delete_metadata(tx, resource.internal_id, kind)
        })?;
        debug_assert!(deletes.is_empty());
        Ok(())
    }

    /// `getChanges(since, limit) -> ([ChangeEntry], done?)` (`spec.md` §6).
    pub fn get_changes(&self, since: i64, limit: i64) -> Result<(Vec<ChangeEntry>, bool), CoreError> {
        self.index.read(|conn| changes::since(conn, since, limit))
    }

    pub fn delete_changes(&self) -> Result<(), CoreError> {
        let (_, deletes) = self.index.transaction(|tx| changes::delete_all(tx))?;
        debug_assert!(deletes.is_empty());
        Ok(())
    }

    pub fn get_last_change(&self) -> Result<Option<ChangeEntry>, CoreError> {
        self.index.read(changes::last)
    }

    /// `getExports(since, limit)` (`spec.md` §6, symmetric to `getChanges`).
    pub fn get_exports(&self, since: i64, limit: i64) -> Result<(Vec<ExportEntry>, bool), CoreError> {
        self.index.read(|conn| exports::since(conn, since, limit))
    }

    pub fn delete_exports(&self) -> Result<(), CoreError> {
        let (_, deletes) = self.index.transaction(|tx| exports::delete_all(tx))?;
        debug_assert!(deletes.is_empty());
        Ok(())
    }

    /// `findResources(query) -> ([publicId], truncated)` (`spec.md` §6).
    pub fn find_resources(&self, query: &FinderQuery<'_>) -> Result<FindOutcome, CoreError> {
        find(&self.index, &self.blobs, query)
    }

    pub fn set_patient_protected(&self, public_id: &str, protected: bool) -> Result<(), CoreError> {
        let (_, deletes) = self.index.transaction(|tx| {
            let resource = resources::find_resource(tx, public_id, ResourceLevel::Patient)?
                .ok_or_else(|| CoreError::InexistentItem(format!("Patient {public_id}")))?;
            recycling::set_protected(tx, resource.internal_id, protected)
        })?;
        debug_assert!(deletes.is_empty());
        Ok(())
    }

    pub fn modality(&self, name: &str) -> Option<ModalityEntry> {
        self.modalities.read().unwrap().get(name).cloned()
    }

    pub fn modalities(&self) -> HashMap<String, ModalityEntry> {
        self.modalities.read().unwrap().clone()
    }

    /// Overwrite the in-memory modality table, persisting it back to
    /// `GlobalProperties` when database-backed (`spec.md` §6
    /// "DicomModalitiesInDatabase").
    pub fn set_modalities(&self, table: HashMap<String, ModalityEntry>) -> Result<(), CoreError> {
        if self.settings.dicom_modalities_in_database {
            let (_, deletes) = self.index.transaction(|tx| modalities::save_modalities(tx, &table))?;
            debug_assert!(deletes.is_empty());
        }
        *self.modalities.write().unwrap() = table;
        Ok(())
    }

    pub fn peer(&self, name: &str) -> Option<PeerEntry> {
        self.peers.read().unwrap().get(name).cloned()
    }

    pub fn set_peers(&self, table: HashMap<String, PeerEntry>) -> Result<(), CoreError> {
        if self.settings.orthanc_peers_in_database {
            let (_, deletes) = self.index.transaction(|tx| modalities::save_peers(tx, &table))?;
            debug_assert!(deletes.is_empty());
        }
        *self.peers.write().unwrap() = table;
        Ok(())
    }

    fn instances_under(&self, public_id: &str) -> Result<Vec<(i64, String)>, CoreError> {
        self.index.read(|conn| {
            for level in [
                ResourceLevel::Instance,
                ResourceLevel::Series,
                ResourceLevel::Study,
                ResourceLevel::Patient,
            ] {
                if let Some(resource) = resources::find_resource(conn, public_id, level)? {
                    let ids = resources::descendant_instances(conn, resource.internal_id, level)?;
                    let mut out = Vec::with_capacity(ids.len());
                    for id in ids {
                        if let Some(r) = resources::get_resource(conn, id)? {
                            out.push((id, r.public_id));
                        }
                    }
                    return Ok(out);
                }
            }
            Err(CoreError::InexistentItem(public_id.to_string()))
        })
    }

    fn read_instance_dicom_bytes(&self, instance_internal_id: i64) -> Result<Vec<u8>, CoreError> {
        let attachment = self
            .index
            .read(|conn| resources::get_attachment(conn, instance_internal_id, ContentType::Dicom))?
            .ok_or_else(|| CoreError::InexistentItem("instance has no Dicom attachment".to_string()))?;
        let raw = self.blobs.read_raw(attachment.blob_uuid)?;
        compressor_for(attachment.compression).uncompress(&raw)
    }

    /// `sendToModality(publicIds, remoteName) -> ()` (`spec.md` §6, drives §4.7).
    pub fn send_to_modality(&self, public_ids: &[String], remote_name: &str) -> Result<(), CoreError> {
        let modality = self
            .modality(remote_name)
            .ok_or_else(|| CoreError::InexistentItem(format!("modality {remote_name}")))?;
        let target = ScuTarget::from_modality(&modality);

        for public_id in public_ids {
            for (internal_id, _) in self.instances_under(public_id)? {
                let bytes = self.read_instance_dicom_bytes(internal_id)?;
                let dataset = Dataset::parse(&bytes)?;
                self.scu.store(&target, &dataset)?;
            }
        }
        Ok(())
    }

    /// Query a remote modality at `level` (`spec.md` §4.7 "C-FIND").
    pub fn query_modality(
        &self,
        remote_name: &str,
        level: QueryLevel,
        identifier: dicom_object::mem::InMemDicomObject,
        root: QrRoot,
    ) -> Result<Vec<crate::scu::FindMatch>, CoreError> {
        let modality = self
            .modality(remote_name)
            .ok_or_else(|| CoreError::InexistentItem(format!("modality {remote_name}")))?;
        let target = ScuTarget::from_modality(&modality);
        self.scu.find(&target, level, identifier, root)
    }

    /// `peerStore(publicIds, peerName) -> ()` (`spec.md` §6, HTTP fan-out
    /// over basic auth; the core only calls the caller-supplied client).
    pub fn peer_store(
        &self,
        public_ids: &[String],
        peer_name: &str,
        client: &dyn PeerStoreClient,
    ) -> Result<(), CoreError> {
        let peer = self
            .peer(peer_name)
            .ok_or_else(|| CoreError::InexistentItem(format!("peer {peer_name}")))?;
        let now = now_rfc3339();

        for public_id in public_ids {
            for (internal_id, instance_public_id) in self.instances_under(public_id)? {
                let bytes = self.read_instance_dicom_bytes(internal_id)?;
                client.store(&peer, &instance_public_id, &bytes)?;
                let (_, deletes) = self
                    .index
                    .transaction(|tx| exports::append(tx, &instance_public_id, peer_name, &peer.url, &now))?;
                debug_assert!(deletes.is_empty());
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scu.shutdown();
    }
}

fn now_rfc3339() -> String {
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use dicom_core::header::Header;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::mem::InMemDicomObject;
    use dicom_object::FileMetaTableBuilder;
    use std::collections::HashMap as StdHashMap;

    fn sample_instance(patient: &str, study: &str, series: &str, sop: &str) -> Vec<u8> {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient)));
        obj.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study)));
        obj.put(DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series)));
        obj.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop)));
        obj.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
        ));
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

    fn test_settings(dir: &camino::Utf8Path) -> Settings {
        Settings {
            storage_directory: dir.join("blobs"),
            index_directory: Some(dir.to_path_buf()),
            storage_compression: false,
            maximum_storage_size_mb: None,
            maximum_patient_count: None,
            dicom_port: 4242,
            dicom_aet: "DICOMKEEP".to_string(),
            dicom_check_called_aet: false,
            dicom_check_modality_host: false,
            dicom_scu_timeout: std::time::Duration::from_secs(10),
            dicom_scp_timeout: std::time::Duration::from_secs(30),
            keep_alive: true,
            http_compression_enabled: false,
            dicom_modalities: StdHashMap::new(),
            dicom_modalities_in_database: false,
            orthanc_peers: StdHashMap::new(),
            orthanc_peers_in_database: false,
            strict_aet_comparison: false,
            default_encoding: crate::dicom_codec::CharacterEncoding::IsoIr6,
            temporary_directory: Utf8PathBuf::from("/tmp/dicomkeep-test"),
            default_private_creator: None,
            listener_threads: 4,
            max_pdu_length: 16384,
        }
    }

    #[test]
    fn ingest_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = ServerEnvironment::new(test_settings(&root)).unwrap();

        let bytes = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let (instance_id, status) = env.ingest(&bytes, Some("MODALITY".to_string())).unwrap();
        assert_eq!(status, IngestStatus::Success);

        let summary = env
            .lookup_resource(&instance_id, ResourceLevel::Instance)
            .unwrap()
            .unwrap();
        assert_eq!(summary.public_id, instance_id);
    }

    #[test]
    fn delete_resource_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = ServerEnvironment::new(test_settings(&root)).unwrap();

        let bytes = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let (instance_id, _) = env.ingest(&bytes, None).unwrap();
        env.delete_resource(&instance_id, ResourceLevel::Instance).unwrap();

        assert!(env
            .lookup_resource(&instance_id, ResourceLevel::Instance)
            .unwrap()
            .is_none());
    }

    #[test]
    fn set_and_get_custom_metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = ServerEnvironment::new(test_settings(&root)).unwrap();

        let bytes = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let (instance_id, _) = env.ingest(&bytes, None).unwrap();
        env.set_metadata(&instance_id, ResourceLevel::Instance, MetadataKind::UserDefined(1), "note")
            .unwrap();
        let value = env
            .get_metadata(&instance_id, ResourceLevel::Instance, MetadataKind::UserDefined(1))
            .unwrap();
        assert_eq!(value, Some("note".to_string()));
    }

    #[test]
    fn ingest_from_json_round_trips_through_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = ServerEnvironment::new(test_settings(&root)).unwrap();

        let value = serde_json::json!({
            "00100020": "P1",
            "0020000D": "1.2.3",
            "0020000E": "1.2.3.4",
            "00080018": "1.2.3.4.5",
            "00080016": "1.2.840.10008.5.1.4.1.1.7",
        });
        let (instance_id, status) = env.ingest_from_json(&value, false, None).unwrap();
        assert_eq!(status, IngestStatus::Success);

        let summary = env
            .lookup_resource(&instance_id, ResourceLevel::Instance)
            .unwrap()
            .unwrap();
        assert_eq!(summary.public_id, instance_id);
    }

    #[test]
    fn instance_as_json_and_detect_encoding_read_back_the_stored_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = ServerEnvironment::new(test_settings(&root)).unwrap();

        let bytes = sample_instance("P1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let (instance_id, _) = env.ingest(&bytes, None).unwrap();

        let json = env
            .instance_as_json(&instance_id, crate::dicom_codec::JsonFormat::Short, crate::dicom_codec::JsonFlags::default())
            .unwrap();
        assert_eq!(json["00100020"], serde_json::json!("P1"));

        let encoding = env
            .detect_instance_encoding(&instance_id, crate::dicom_codec::CharacterEncoding::IsoIr6)
            .unwrap();
        assert_eq!(encoding, crate::dicom_codec::CharacterEncoding::IsoIr6);
    }
}

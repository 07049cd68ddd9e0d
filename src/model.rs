//! The four-level resource tree and the records hung off it (`spec.md` §3).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A level in the patient → study → series → instance tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum ResourceLevel {
    Patient = 0,
    Study = 1,
    Series = 2,
    Instance = 3,
}

impl ResourceLevel {
    /// The level directly below this one, if any.
    pub fn child(self) -> Option<Self> {
        match self {
            ResourceLevel::Patient => Some(ResourceLevel::Study),
            ResourceLevel::Study => Some(ResourceLevel::Series),
            ResourceLevel::Series => Some(ResourceLevel::Instance),
            ResourceLevel::Instance => None,
        }
    }

    /// The level directly above this one, if any.
    pub fn parent(self) -> Option<Self> {
        match self {
            ResourceLevel::Patient => None,
            ResourceLevel::Study => Some(ResourceLevel::Patient),
            ResourceLevel::Series => Some(ResourceLevel::Study),
            ResourceLevel::Instance => Some(ResourceLevel::Series),
        }
    }

    pub fn as_db_value(self) -> i64 {
        self as i64
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(ResourceLevel::Patient),
            1 => Some(ResourceLevel::Study),
            2 => Some(ResourceLevel::Series),
            3 => Some(ResourceLevel::Instance),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceLevel::Patient => "Patient",
            ResourceLevel::Study => "Study",
            ResourceLevel::Series => "Series",
            ResourceLevel::Instance => "Instance",
        };
        f.write_str(s)
    }
}

/// Content-type of an attachment (`spec.md` §3 "Attachment").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Dicom,
    DicomAsJson,
    /// The user-defined range, carrying the raw numeric id used by REST clients.
    UserDefined(u16),
}

impl ContentType {
    pub fn as_db_value(self) -> i64 {
        match self {
            ContentType::Dicom => 1,
            ContentType::DicomAsJson => 2,
            ContentType::UserDefined(n) => 1000 + n as i64,
        }
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(ContentType::Dicom),
            2 => Some(ContentType::DicomAsJson),
            n if n >= 1000 => Some(ContentType::UserDefined((n - 1000) as u16)),
            _ => None,
        }
    }
}

/// Compression kind applied to a stored blob (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    ZlibWithSize,
}

impl CompressionKind {
    pub fn as_db_value(self) -> i64 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::ZlibWithSize => 1,
        }
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(CompressionKind::None),
            1 => Some(CompressionKind::ZlibWithSize),
            _ => None,
        }
    }
}

/// Metadata keys attached to a resource (`spec.md` §3 "Metadata").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKind {
    /// AE title of the modality the instance was ingested from.
    SourceAet,
    /// Value of the DICOM instance-number tag when the instance was stored.
    IndexInSeries,
    /// Number of instances the sender announced for this series, if known.
    ExpectedInstances,
    /// Public id of the resource this one was modified from.
    ModifiedFrom,
    /// Public id of the resource this one was anonymized from.
    AnonymizedFrom,
    /// RFC 3339 timestamp of the last metadata/index mutation.
    LastUpdate,
    /// Start of the user-reserved metadata range (deletable via the REST contract).
    UserDefined(u16),
}

impl MetadataKind {
    pub fn as_db_value(self) -> i64 {
        match self {
            MetadataKind::SourceAet => 1,
            MetadataKind::IndexInSeries => 2,
            MetadataKind::ExpectedInstances => 3,
            MetadataKind::ModifiedFrom => 4,
            MetadataKind::AnonymizedFrom => 5,
            MetadataKind::LastUpdate => 6,
            MetadataKind::UserDefined(n) => 1000 + n as i64,
        }
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(MetadataKind::SourceAet),
            2 => Some(MetadataKind::IndexInSeries),
            3 => Some(MetadataKind::ExpectedInstances),
            4 => Some(MetadataKind::ModifiedFrom),
            5 => Some(MetadataKind::AnonymizedFrom),
            6 => Some(MetadataKind::LastUpdate),
            n if n >= 1000 => Some(MetadataKind::UserDefined((n - 1000) as u16)),
            _ => None,
        }
    }

    /// Only metadata in the user-defined range may be deleted via the REST contract.
    pub fn is_user_deletable(self) -> bool {
        matches!(self, MetadataKind::UserDefined(_))
    }
}

/// A node in the four-level tree (`spec.md` §3 "Resource").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub internal_id: i64,
    pub public_id: String,
    pub level: ResourceLevel,
    pub parent_internal_id: Option<i64>,
}

/// A single main DICOM tag row (`spec.md` §3 "Main DICOM tag").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainDicomTag {
    pub group: u16,
    pub element: u16,
    pub value: String,
}

/// A stored attachment descriptor (`spec.md` §3 "Attachment").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub content_type: ContentType,
    pub blob_uuid: uuid::Uuid,
    pub compression: CompressionKind,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub uncompressed_md5: String,
    pub compressed_md5: String,
}

/// Kind of lifecycle event recorded in the change log (`spec.md` §3 "Change entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    NewPatient,
    NewStudy,
    NewSeries,
    NewInstance,
    DeletedPatient,
    DeletedStudy,
    DeletedSeries,
    DeletedInstance,
    ModifiedPatient,
    ModifiedStudy,
    ModifiedSeries,
    ModifiedInstance,
}

impl ChangeKind {
    /// The `New*` kind corresponding to a resource's level.
    pub fn new_for_level(level: ResourceLevel) -> Self {
        match level {
            ResourceLevel::Patient => ChangeKind::NewPatient,
            ResourceLevel::Study => ChangeKind::NewStudy,
            ResourceLevel::Series => ChangeKind::NewSeries,
            ResourceLevel::Instance => ChangeKind::NewInstance,
        }
    }

    /// The `Deleted*` kind corresponding to a resource's level.
    pub fn deleted_for_level(level: ResourceLevel) -> Self {
        match level {
            ResourceLevel::Patient => ChangeKind::DeletedPatient,
            ResourceLevel::Study => ChangeKind::DeletedStudy,
            ResourceLevel::Series => ChangeKind::DeletedSeries,
            ResourceLevel::Instance => ChangeKind::DeletedInstance,
        }
    }

    pub fn as_db_value(self) -> i64 {
        self as i64
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(ChangeKind::NewPatient),
            1 => Some(ChangeKind::NewStudy),
            2 => Some(ChangeKind::NewSeries),
            3 => Some(ChangeKind::NewInstance),
            4 => Some(ChangeKind::DeletedPatient),
            5 => Some(ChangeKind::DeletedStudy),
            6 => Some(ChangeKind::DeletedSeries),
            7 => Some(ChangeKind::DeletedInstance),
            8 => Some(ChangeKind::ModifiedPatient),
            9 => Some(ChangeKind::ModifiedStudy),
            10 => Some(ChangeKind::ModifiedSeries),
            11 => Some(ChangeKind::ModifiedInstance),
            _ => None,
        }
    }
}

/// An append-only change-log row (`spec.md` §3 "Change entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: i64,
    pub kind: ChangeKind,
    pub public_id: String,
    pub level: ResourceLevel,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// An append-only export-log row (`spec.md` §3 "Export entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEntry {
    pub seq: i64,
    pub public_id: String,
    pub remote_modality: String,
    pub remote_aet: String,
    pub timestamp: String,
}

/// Result of a `store()` call into the ingestion pipeline (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    Success,
    AlreadyStored,
    /// Either the instance's MD5 differed from the stored one, or the
    /// patient-level main tags conflicted with an existing patient sharing
    /// the same public id, and overwrite is disabled (`spec.md` §4.2, §4.5
    /// step 3a/3b).
    AlreadyStoredConflict,
    FilteredOut,
    StorageFull,
}

/// Attachment metadata without its bytes (`spec.md` §6 "attachmentInfo").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub content_type: ContentType,
    pub compression: CompressionKind,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub uncompressed_md5: String,
    pub compressed_md5: String,
}

impl From<AttachedFile> for FileInfo {
    fn from(file: AttachedFile) -> Self {
        FileInfo {
            content_type: file.content_type,
            compression: file.compression,
            uncompressed_size: file.uncompressed_size,
            compressed_size: file.compressed_size,
            uncompressed_md5: file.uncompressed_md5,
            compressed_md5: file.compressed_md5,
        }
    }
}

/// A flattened, REST-shaped summary of a resource and its direct children's ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub public_id: String,
    pub level: ResourceLevel,
    pub parent_public_id: Option<String>,
    pub main_tags: Vec<MainDicomTag>,
    pub children_public_ids: Vec<String>,
}

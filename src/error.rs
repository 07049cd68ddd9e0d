//! Stable error kinds surfaced by every public operation of the core.
//!
//! Mirrors the teacher's `ChrisPacsError`/`AssociationError` shape: a flat
//! `thiserror` enum with `#[from]` conversions at the boundaries, so the
//! SCP/SCU layers can map variants to DIMSE status codes and an (external)
//! REST adapter can map them to HTTP statuses without unwinding across any
//! FFI boundary.

use dicom_core::Tag;

/// Stable error identifiers surfaced by every public operation of the core (`spec.md` §7).
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("bad file format: {0}")]
    BadFileFormat(String),

    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),

    #[error("inexistent item: {0}")]
    InexistentItem(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad sequence of calls: {0}")]
    BadSequenceOfCalls(String),

    #[error("bad parameter type: {0}")]
    BadParameterType(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("network protocol error: {0}")]
    NetworkProtocol(String),

    #[error("not enough memory")]
    NotEnoughMemory,

    #[error("storage full: could not reclaim enough room")]
    StorageFull,

    #[error("database transaction could not be serialized, retry")]
    DatabaseCannotSerialize,

    #[error("internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CoreError {
    /// Missing-tag convenience constructor, mirroring the teacher's `MissingRequiredTag`.
    pub fn missing_tag(tag: Tag) -> Self {
        CoreError::BadFileFormat(format!("missing required tag {tag}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

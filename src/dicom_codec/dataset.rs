//! The narrow `Dataset` facade handed to higher layers (`spec.md` §4.3, §9).
//!
//! Higher layers never touch `dicom_object`/`dicom_core` types directly;
//! they go through [`Dataset`]'s accessors. This mirrors the "expose the
//! DICOM library behind a narrow interface" design note: the library's
//! opaque handle (`FileDicomObject<InMemDicomObject>`) is owned here.

use dicom_core::header::Header;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemDicomObject;
use dicom_object::{FileDicomObject, FileMetaTableBuilder};
use dicom_transfer_syntax_registry::entries;
use std::io::Cursor;

use crate::error::CoreError;

const LITTLE_ENDIAN_EXPLICIT: &str = "1.2.840.10008.1.2.1";

/// A parsed DICOM instance, ready to be queried or re-serialized.
pub struct Dataset {
    inner: FileDicomObject<InMemDicomObject>,
}

impl Dataset {
    /// Decode a full DICOM byte stream (preamble + file meta group + data
    /// set) into a tag-indexed [`Dataset`] (`spec.md` §4.3 "parse").
    pub fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.is_empty() {
            return Err(CoreError::BadFileFormat("empty DICOM file".to_string()));
        }
        let inner = dicom_object::from_reader(Cursor::new(bytes))
            .map_err(|e| CoreError::BadFileFormat(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Re-serialize preserving the transfer syntax recorded in the file
    /// meta group at parse time (`spec.md` §4.3 "serialize").
    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::new();
        self.inner
            .write_all(&mut out)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        Ok(out)
    }

    /// Build a [`Dataset`] from a bare data set plus an explicit transfer
    /// syntax and SOP class/instance UID, as needed when constructing an
    /// instance from JSON (`spec.md` §4.3 "fromJson") or from values
    /// received over a DIMSE command.
    pub fn from_inmem(
        obj: InMemDicomObject,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        transfer_syntax: Option<&str>,
    ) -> Result<Self, CoreError> {
        let ts = transfer_syntax.unwrap_or(LITTLE_ENDIAN_EXPLICIT);
        let meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(sop_class_uid)
            .media_storage_sop_instance_uid(sop_instance_uid)
            .transfer_syntax(ts)
            .build()
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        Ok(Self {
            inner: obj.with_exact_meta(meta),
        })
    }

    pub fn inner(&self) -> &InMemDicomObject {
        &self.inner
    }

    /// The transfer syntax UID recorded in this dataset's file meta group.
    pub fn transfer_syntax_uid(&self) -> &str {
        self.inner.meta().transfer_syntax()
    }

    /// Whether this transfer syntax is one of the three "generic"
    /// uncompressed syntaxes (`spec.md` §4.7 "C-STORE" step 3).
    pub fn is_generic_transfer_syntax(&self) -> bool {
        is_generic_transfer_syntax_uid(self.transfer_syntax_uid())
    }

    pub fn sop_class_uid(&self) -> Result<String, CoreError> {
        self.required_string(tags::SOP_CLASS_UID)
    }

    pub fn sop_instance_uid(&self) -> Result<String, CoreError> {
        self.required_string(tags::SOP_INSTANCE_UID)
    }

    pub fn study_instance_uid(&self) -> Result<String, CoreError> {
        self.required_string(tags::STUDY_INSTANCE_UID)
    }

    pub fn series_instance_uid(&self) -> Result<String, CoreError> {
        self.required_string(tags::SERIES_INSTANCE_UID)
    }

    /// An empty `PatientID` is legal (`spec.md` §4.4), so this never fails.
    pub fn patient_id(&self) -> String {
        self.optional_string(tags::PATIENT_ID).unwrap_or_default()
    }

    pub fn optional_string(&self, tag: Tag) -> Option<String> {
        self.inner
            .element(tag)
            .ok()
            .and_then(|e| e.string().map(|s| s.trim().to_string()).ok())
    }

    pub fn required_string(&self, tag: Tag) -> Result<String, CoreError> {
        self.optional_string(tag)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::missing_tag(tag))
    }

    /// Value of a numeric tag, lexically cast; returns `None` (never an
    /// error) on overflow or non-numeric content (`spec.md` §4.3 "VR handling").
    pub fn optional_u32(&self, tag: Tag) -> Option<u32> {
        self.optional_string(tag).and_then(|s| s.parse().ok())
    }

    /// Iterate over every top-level element as `(group, element, string value)`,
    /// skipping sequences and values that cannot be rendered as a string.
    pub fn iter_primitive_elements(&self) -> impl Iterator<Item = (Tag, String)> + '_ {
        self.inner.iter().filter_map(|element| {
            element
                .string()
                .ok()
                .map(|s| (element.header().tag, s.trim().to_string()))
        })
    }
}

/// Whether a transfer syntax UID is one of the three "generic" uncompressed
/// syntaxes: implicit VR LE, explicit VR LE, explicit VR BE.
pub fn is_generic_transfer_syntax_uid(uid: &str) -> bool {
    matches!(
        uid,
        "1.2.840.10008.1.2" | "1.2.840.10008.1.2.1" | "1.2.840.10008.1.2.2"
    )
}

/// Build a minimal empty data set used as a base for DICOM query identifiers.
pub fn new_query_identifier() -> InMemDicomObject {
    InMemDicomObject::new_empty()
}

/// Put a string-valued element with an explicit VR into a data set, as used
/// when building query identifiers and SCU command objects.
pub fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

/// Returns the little-endian-implicit transfer syntax entry, the mandatory
/// encoding for DIMSE command sets.
pub fn implicit_vr_little_endian() -> &'static str {
    entries::IMPLICIT_VR_LITTLE_ENDIAN.uid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_empty_bytes_is_bad_file_format() {
        let err = Dataset::parse(&[]).unwrap_err();
        assert!(matches!(err, CoreError::BadFileFormat(_)));
    }
}

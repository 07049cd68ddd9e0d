//! `toJson`/`fromJson` conversion (`spec.md` §4.3).
//!
//! Hand-rolled rather than delegated to the standard DICOM-JSON model,
//! since Orthanc's `Short`/`Human`/`Full` formats and flag matrix
//! (include-private-tags, include-binary, convert-binary-to-ascii, ...)
//! have no equivalent in the standard model. Grounded on the
//! tag/dictionary-walking style of `other_examples/…Fayazexo-dicom-json…`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dicom_core::header::Header;
use dicom_core::{DataDictionary, Tag, VR};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use dicom_object::mem::InMemDicomObject;
use serde_json::{Map, Value};

use super::dataset::Dataset;
use crate::error::CoreError;

fn alias_of(tag: Tag) -> Option<String> {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias.to_string())
}

/// Rendering of tag keys and values in `toJson` output (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFormat {
    /// `"00100010"` style keys, raw values.
    Short,
    /// Human-readable tag names (`"PatientName"`) where known.
    Human,
    /// Short keys plus VR and nested `{"Value": [...]}`  wrapper, closest
    /// to the standard DICOM JSON model.
    Full,
}

/// Flags controlling `toJson` output (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFlags {
    pub include_private_tags: bool,
    pub include_unknown_tags: bool,
    pub include_binary: bool,
    pub include_pixel_data: bool,
    pub convert_binary_to_ascii: bool,
    pub convert_binary_to_null: bool,
}

fn is_binary_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN
    )
}

fn tag_key(tag: Tag, format: JsonFormat) -> String {
    match format {
        JsonFormat::Human => {
            alias_of(tag).unwrap_or_else(|| format!("{:04X}{:04X}", tag.group(), tag.element()))
        }
        JsonFormat::Short | JsonFormat::Full => {
            format!("{:04X}{:04X}", tag.group(), tag.element())
        }
    }
}

fn is_private_tag(tag: Tag) -> bool {
    tag.group() % 2 == 1
}

fn binary_value_json(bytes: &[u8], flags: JsonFlags) -> Value {
    if flags.convert_binary_to_null {
        Value::Null
    } else if flags.convert_binary_to_ascii {
        Value::String(bytes.iter().map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' }).collect())
    } else {
        let encoded = BASE64.encode(bytes);
        Value::String(format!("data:application/octet-stream;base64,{encoded}"))
    }
}

/// Render a [`Dataset`] as JSON per `spec.md` §4.3 "toJson".
pub fn to_json(dataset: &Dataset, format: JsonFormat, flags: JsonFlags) -> Value {
    let mut map = Map::new();
    for element in dataset.inner().iter() {
        let header = element.header();
        let tag = header.tag;

        if is_private_tag(tag) && !flags.include_private_tags {
            continue;
        }
        if tag == tags::PIXEL_DATA && !flags.include_pixel_data {
            continue;
        }
        let known = alias_of(tag).is_some();
        if !known && !flags.include_unknown_tags && !is_private_tag(tag) {
            continue;
        }

        let vr = header.vr;
        let value = if is_binary_vr(vr) {
            if !flags.include_binary && tag != tags::PIXEL_DATA {
                continue;
            }
            match element.to_bytes() {
                Ok(bytes) => binary_value_json(&bytes, flags),
                Err(_) => Value::Null,
            }
        } else {
            match element.string() {
                Ok(s) => Value::String(s.trim_end_matches('\0').to_string()),
                Err(_) => Value::Null,
            }
        };

        let key = tag_key(tag, format);
        let rendered = match format {
            JsonFormat::Full => {
                let mut entry = Map::new();
                entry.insert("vr".to_string(), Value::String(format!("{vr}")));
                entry.insert("Value".to_string(), Value::Array(vec![value]));
                Value::Object(entry)
            }
            JsonFormat::Short | JsonFormat::Human => value,
        };
        map.insert(key, rendered);
    }
    Value::Object(map)
}

/// Build a [`Dataset`] from a JSON object produced by [`to_json`] in
/// `Short` format (`spec.md` §4.3 "fromJson"). UIDs for any of
/// patient/study/series/instance that are missing are auto-generated when
/// `auto_generate_uids` is set; otherwise a missing required UID is an error.
pub fn from_json(value: &Value, auto_generate_uids: bool) -> Result<InMemDicomObject, CoreError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::BadParameterType("expected a JSON object".to_string()))?;
    let mut dataset = InMemDicomObject::new_empty();
    for (key, v) in obj {
        let tag = parse_tag_key(key).ok_or_else(|| {
            CoreError::ParameterOutOfRange(format!("illegal tag key: {key}"))
        })?;
        let text = match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let vr = vr_for_tag(tag);
        super::dataset::put_str(&mut dataset, tag, vr, &text);
    }
    if auto_generate_uids {
        for tag in [
            tags::STUDY_INSTANCE_UID,
            tags::SERIES_INSTANCE_UID,
            tags::SOP_INSTANCE_UID,
        ] {
            if dataset.element(tag).is_err() {
                let uid = format!("2.25.{}", uuid::Uuid::new_v4().as_u128());
                super::dataset::put_str(&mut dataset, tag, VR::UI, &uid);
            }
        }
    }
    Ok(dataset)
}

fn parse_tag_key(key: &str) -> Option<Tag> {
    if key.len() == 8 && key.chars().all(|c| c.is_ascii_hexdigit()) {
        let group = u16::from_str_radix(&key[0..4], 16).ok()?;
        let element = u16::from_str_radix(&key[4..8], 16).ok()?;
        return Some(Tag(group, element));
    }
    None
}

/// Pick a VR for a tag reconstructed from JSON. Only the handful of tags
/// `fromJson` is actually expected to receive (instance identifiers and
/// main DICOM tags) are special-cased; anything else falls back to `LO`,
/// matching how the teacher's DIMSE command builders hand-pick a VR per
/// tag rather than consult the dictionary at write time.
fn vr_for_tag(tag: Tag) -> VR {
    match tag {
        t if t == tags::SOP_CLASS_UID
            || t == tags::SOP_INSTANCE_UID
            || t == tags::STUDY_INSTANCE_UID
            || t == tags::SERIES_INSTANCE_UID => VR::UI,
        t if t == tags::PATIENT_ID || t == tags::ACCESSION_NUMBER => VR::LO,
        t if t == tags::MODALITY || t == tags::QUERY_RETRIEVE_LEVEL => VR::CS,
        t if t == tags::STUDY_DATE || t == tags::PATIENT_BIRTH_DATE => VR::DA,
        t if t == tags::INSTANCE_NUMBER || t == tags::SERIES_NUMBER => VR::IS,
        _ => VR::LO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_key_short_format_is_eight_hex_digits() {
        assert_eq!(tag_key(tags::PATIENT_ID, JsonFormat::Short), "00100020");
    }

    #[test]
    fn private_tag_detection_is_odd_group() {
        assert!(is_private_tag(Tag(0x0009, 0x0010)));
        assert!(!is_private_tag(Tag(0x0008, 0x0010)));
    }

    #[test]
    fn binary_value_is_emitted_as_base64_data_uri() {
        let value = binary_value_json(b"hello", JsonFlags::default());
        assert_eq!(value, Value::String("data:application/octet-stream;base64,aGVsbG8=".to_string()));
    }
}

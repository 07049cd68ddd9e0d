//! Character set detection (`spec.md` §4.3 "detectEncoding").

use dicom_core::header::Header;
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemDicomObject;
use serde::{Deserialize, Serialize};

/// A DICOM specific character set, as named by the value of tag (0008,0005).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterEncoding {
    IsoIr6,
    IsoIr100,
    Utf8,
    Other,
}

impl CharacterEncoding {
    fn from_declared_value(value: &str) -> Option<Self> {
        match value.trim() {
            "" | "ISO_IR 6" => Some(CharacterEncoding::IsoIr6),
            "ISO_IR 100" => Some(CharacterEncoding::IsoIr100),
            "ISO_IR 192" => Some(CharacterEncoding::Utf8),
            _ => None,
        }
    }
}

/// Detect the character encoding declared by a dataset's (0008,0005)
/// SpecificCharacterSet element, falling back to `default_encoding` when the
/// tag is absent, and to [`CharacterEncoding::IsoIr6`] (lossy ASCII) when the
/// declared value is not recognized.
pub fn detect_encoding(
    obj: &InMemDicomObject,
    default_encoding: CharacterEncoding,
) -> CharacterEncoding {
    match obj.element(tags::SPECIFIC_CHARACTER_SET) {
        Ok(element) => match element.to_str() {
            Ok(value) => {
                CharacterEncoding::from_declared_value(&value).unwrap_or(CharacterEncoding::IsoIr6)
            }
            Err(_) => CharacterEncoding::IsoIr6,
        },
        Err(_) => default_encoding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_absent() {
        let obj = InMemDicomObject::new_empty();
        assert_eq!(
            detect_encoding(&obj, CharacterEncoding::Utf8),
            CharacterEncoding::Utf8
        );
    }

    #[test]
    fn unsupported_declared_value_falls_back_to_ascii() {
        assert_eq!(CharacterEncoding::from_declared_value("GB18030"), None);
    }

    #[test]
    fn recognizes_iso_ir_100() {
        assert_eq!(
            CharacterEncoding::from_declared_value("ISO_IR 100"),
            Some(CharacterEncoding::IsoIr100)
        );
    }
}

//! DICOM Parser/Serializer and JSON rendering (C3, `spec.md` §4.3).

mod charset;
mod dataset;
mod json;

pub use charset::{detect_encoding, CharacterEncoding};
pub use dataset::{
    implicit_vr_little_endian, is_generic_transfer_syntax_uid, new_query_identifier, put_str,
    Dataset,
};
pub use json::{from_json, to_json, JsonFlags, JsonFormat};

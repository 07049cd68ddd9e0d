//! MD5 content checksums for stored attachments (`spec.md` §3 "Attachment":
//! uncompressed/compressed MD5), computed with the same RustCrypto `Digest`
//! idiom the teacher already uses for [`crate::hashing`]'s SHA-1.

use md5::{Digest, Md5};

pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}

//! Content-addressed, sharded filesystem blob store (`spec.md` §4.1).

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::CoreError;

/// Empty inputs bypass the compressor and are written as zero-byte files,
/// so an empty input always round-trips to an empty output regardless of
/// the requested compression.
fn shard_path(root: &Utf8Path, uuid: Uuid) -> Utf8PathBuf {
    let hex = uuid.simple().to_string();
    root.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
}

/// Sharded, UUID-addressed object store, as described in `spec.md` §4.1.
pub struct BlobStore {
    root: Utf8PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Allocate a fresh UUID and write `bytes` atomically under
    /// `root/aa/bb/<uuid>`. Collisions (astronomically unlikely) are
    /// retried with a freshly generated UUID.
    pub fn create(&self, bytes: &[u8]) -> Result<Uuid, CoreError> {
        for _ in 0..8 {
            let uuid = Uuid::new_v4();
            let path = shard_path(&self.root, uuid);
            if path.exists() {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs_err::create_dir_all(parent)?;
            }
            let tmp_path = path.with_extension("tmp");
            fs_err::write(&tmp_path, bytes)?;
            fs_err::rename(&tmp_path, &path)?;
            return Ok(uuid);
        }
        Err(CoreError::InternalError(
            "could not allocate a non-colliding blob UUID after 8 attempts".to_string(),
        ))
    }

    /// Return the raw on-disk contents of `uuid`, with no decompression applied.
    pub fn read_raw(&self, uuid: Uuid) -> Result<Vec<u8>, CoreError> {
        let path = shard_path(&self.root, uuid);
        fs_err::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::InexistentItem(format!("blob {uuid}"))
            } else {
                CoreError::Io(e)
            }
        })
    }

    /// Delete `uuid`'s file, then try to remove each of its two parent
    /// directories, tolerating "directory not empty" errors.
    pub fn remove(&self, uuid: Uuid) -> Result<(), CoreError> {
        let path = shard_path(&self.root, uuid);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(bb) = path.parent() {
            let _ = fs_err::remove_dir(bb);
            if let Some(aa) = bb.parent() {
                let _ = fs_err::remove_dir(aa);
            }
        }
        Ok(())
    }

    /// On-disk size of `uuid`'s file (post-compression).
    pub fn size(&self, uuid: Uuid) -> Result<u64, CoreError> {
        let path = shard_path(&self.root, uuid);
        let metadata = fs_err::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::InexistentItem(format!("blob {uuid}"))
            } else {
                CoreError::Io(e)
            }
        })?;
        Ok(metadata.len())
    }

    /// Recursively enumerate every blob UUID actually stored on disk.
    ///
    /// Only paths matching `root/aa/bb/<uuid>`, where `aa`/`bb` are the
    /// first two hex-digit pairs of a valid UUID's simple form, are
    /// yielded; anything else under `root` (stray files, half-written
    /// `.tmp` siblings) is silently skipped.
    pub fn list(&self) -> Result<HashSet<Uuid>, CoreError> {
        let mut out = HashSet::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for aa_entry in fs_err::read_dir(&self.root)? {
            let aa_entry = aa_entry?;
            let aa_path = aa_entry.path();
            let aa_name = match aa_path.file_name().and_then(|n| n.to_str()) {
                Some(n) if is_hex_pair(n) => n.to_string(),
                _ => continue,
            };
            if !aa_path.is_dir() {
                continue;
            }
            for bb_entry in fs_err::read_dir(&aa_path)? {
                let bb_entry = bb_entry?;
                let bb_path = bb_entry.path();
                let bb_name = match bb_path.file_name().and_then(|n| n.to_str()) {
                    Some(n) if is_hex_pair(n) => n.to_string(),
                    _ => continue,
                };
                if !bb_path.is_dir() {
                    continue;
                }
                for file_entry in fs_err::read_dir(&bb_path)? {
                    let file_entry = file_entry?;
                    let file_path = file_entry.path();
                    let file_name = match file_path.file_name().and_then(|n| n.to_str()) {
                        Some(n) => n,
                        None => continue,
                    };
                    let uuid = match Uuid::parse_str(file_name) {
                        Ok(u) => u,
                        Err(_) => continue,
                    };
                    let hex = uuid.simple().to_string();
                    if hex.starts_with(&aa_name) && hex[2..4] == bb_name {
                        out.insert(uuid);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Total filesystem capacity of the volume backing the blob root.
    ///
    /// Portable `std` has no `statvfs` equivalent; platforms without one
    /// report `u64::MAX` (see `SPEC_FULL.md` Open Questions).
    pub fn capacity(&self) -> u64 {
        u64::MAX
    }

    /// Available filesystem space backing the blob root. See [`Self::capacity`].
    pub fn available(&self) -> u64 {
        u64::MAX
    }
}

fn is_hex_pair(s: &str) -> bool {
    s.len() == 2 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uuid = store.create(b"hello world").unwrap();
        assert_eq!(store.read_raw(uuid).unwrap(), b"hello world");
    }

    #[test]
    fn shard_layout_matches_uuid_prefix() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = BlobStore::new(root.clone());
        let uuid = store.create(b"x").unwrap();
        let hex = uuid.simple().to_string();
        let expected = root.join(&hex[0..2]).join(&hex[2..4]).join(&hex);
        assert!(expected.exists());
    }

    #[test]
    fn list_yields_only_created_blobs() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let a = store.create(b"a").unwrap();
        let b = store.create(b"b").unwrap();
        fs_err::write(dir.path().join("stray.txt"), b"noise").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed, HashSet::from([a, b]));
    }

    #[test]
    fn remove_deletes_file_and_tolerates_nonempty_parents() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let a = store.create(b"a").unwrap();
        let b = store.create(b"b").unwrap();
        store.remove(a).unwrap();
        assert!(store.read_raw(a).is_err());
        // b's shard directories must survive since b is still present.
        assert_eq!(store.read_raw(b).unwrap(), b"b");
    }

    #[test]
    fn size_reports_on_disk_length() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let uuid = store.create(b"0123456789").unwrap();
        assert_eq!(store.size(uuid).unwrap(), 10);
    }

    #[test]
    fn reading_missing_blob_is_inexistent_item() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let err = store.read_raw(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoreError::InexistentItem(_)));
    }
}

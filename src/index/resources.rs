//! Resource tree CRUD, cascade delete, main tags, metadata and attachments
//! (`spec.md` §3, §4.2).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;
use crate::model::{
    AttachedFile, CompressionKind, ContentType, MainDicomTag, MetadataKind, Resource,
    ResourceLevel, ResourceSummary,
};

pub fn find_resource(
    conn: &Connection,
    public_id: &str,
    level: ResourceLevel,
) -> Result<Option<Resource>, CoreError> {
    conn.query_row(
        "SELECT internalId, publicId, level, parentId FROM Resources WHERE publicId = ?1 AND level = ?2",
        params![public_id, level.as_db_value()],
        row_to_resource,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn get_resource(conn: &Connection, internal_id: i64) -> Result<Option<Resource>, CoreError> {
    conn.query_row(
        "SELECT internalId, publicId, level, parentId FROM Resources WHERE internalId = ?1",
        params![internal_id],
        row_to_resource,
    )
    .optional()
    .map_err(CoreError::from)
}

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Resource> {
    let level_value: i64 = row.get(2)?;
    Ok(Resource {
        internal_id: row.get(0)?,
        public_id: row.get(1)?,
        level: ResourceLevel::from_db_value(level_value).unwrap_or(ResourceLevel::Patient),
        parent_internal_id: row.get(3)?,
    })
}

/// Create a new resource row. Returns its freshly assigned internal id.
pub fn create_resource(
    conn: &Connection,
    public_id: &str,
    level: ResourceLevel,
    parent_internal_id: Option<i64>,
) -> Result<i64, CoreError> {
    conn.execute(
        "INSERT INTO Resources(publicId, level, parentId) VALUES (?1, ?2, ?3)",
        params![public_id, level.as_db_value(), parent_internal_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Replace the full set of main tags stored for `internal_id` (delete then
/// insert), so this is safe to call both on first creation and when an
/// ingest overwrites an existing instance.
pub fn set_main_tags(
    conn: &Connection,
    internal_id: i64,
    tags: &[(u16, u16, String)],
) -> Result<(), CoreError> {
    conn.execute("DELETE FROM MainDicomTags WHERE id = ?1", params![internal_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO MainDicomTags(id, tagGroup, tagElement, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (group, element, value) in tags {
        stmt.execute(params![internal_id, group, element, value])?;
    }
    Ok(())
}

pub fn main_tags(conn: &Connection, internal_id: i64) -> Result<Vec<MainDicomTag>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT tagGroup, tagElement, value FROM MainDicomTags WHERE id = ?1 ORDER BY tagGroup, tagElement",
    )?;
    let rows = stmt.query_map(params![internal_id], |row| {
        Ok(MainDicomTag {
            group: row.get(0)?,
            element: row.get(1)?,
            value: row.get(2)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
}

pub fn set_metadata(
    conn: &Connection,
    internal_id: i64,
    kind: MetadataKind,
    value: &str,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO Metadata(id, type, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(id, type) DO UPDATE SET value = excluded.value",
        params![internal_id, kind.as_db_value(), value],
    )?;
    Ok(())
}

pub fn get_metadata(
    conn: &Connection,
    internal_id: i64,
    kind: MetadataKind,
) -> Result<Option<String>, CoreError> {
    conn.query_row(
        "SELECT value FROM Metadata WHERE id = ?1 AND type = ?2",
        params![internal_id, kind.as_db_value()],
        |row| row.get(0),
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn list_metadata(conn: &Connection, internal_id: i64) -> Result<Vec<MetadataKind>, CoreError> {
    let mut stmt = conn.prepare("SELECT type FROM Metadata WHERE id = ?1")?;
    let rows = stmt.query_map(params![internal_id], |row| row.get::<_, i64>(0))?;
    let mut out = Vec::new();
    for value in rows {
        if let Some(kind) = MetadataKind::from_db_value(value?) {
            out.push(kind);
        }
    }
    Ok(out)
}

/// Deletion is only permitted in the user-reserved metadata range
/// (`spec.md` §6 "deletion only for the user-reserved metadata range").
pub fn delete_metadata(
    conn: &Connection,
    internal_id: i64,
    kind: MetadataKind,
) -> Result<(), CoreError> {
    if !kind.is_user_deletable() {
        return Err(CoreError::BadRequest(
            "only user-defined metadata may be deleted".to_string(),
        ));
    }
    conn.execute(
        "DELETE FROM Metadata WHERE id = ?1 AND type = ?2",
        params![internal_id, kind.as_db_value()],
    )?;
    Ok(())
}

pub fn add_attachment(conn: &Connection, internal_id: i64, file: &AttachedFile) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO AttachedFiles(id, fileType, uuid, compressionType, uncompressedSize, compressedSize, uncompressedMd5, compressedMd5)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id, fileType) DO UPDATE SET
           uuid = excluded.uuid,
           compressionType = excluded.compressionType,
           uncompressedSize = excluded.uncompressedSize,
           compressedSize = excluded.compressedSize,
           uncompressedMd5 = excluded.uncompressedMd5,
           compressedMd5 = excluded.compressedMd5",
        params![
            internal_id,
            file.content_type.as_db_value(),
            file.blob_uuid.to_string(),
            file.compression.as_db_value(),
            file.uncompressed_size as i64,
            file.compressed_size as i64,
            file.uncompressed_md5,
            file.compressed_md5,
        ],
    )?;
    Ok(())
}

pub fn get_attachment(
    conn: &Connection,
    internal_id: i64,
    content_type: ContentType,
) -> Result<Option<AttachedFile>, CoreError> {
    conn.query_row(
        "SELECT fileType, uuid, compressionType, uncompressedSize, compressedSize, uncompressedMd5, compressedMd5
         FROM AttachedFiles WHERE id = ?1 AND fileType = ?2",
        params![internal_id, content_type.as_db_value()],
        row_to_attachment,
    )
    .optional()
    .map_err(CoreError::from)
}

fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachedFile> {
    let file_type: i64 = row.get(0)?;
    let uuid_text: String = row.get(1)?;
    let compression: i64 = row.get(2)?;
    Ok(AttachedFile {
        content_type: ContentType::from_db_value(file_type).unwrap_or(ContentType::Dicom),
        blob_uuid: uuid::Uuid::parse_str(&uuid_text).unwrap_or_default(),
        compression: CompressionKind::from_db_value(compression).unwrap_or(CompressionKind::None),
        uncompressed_size: row.get::<_, i64>(3)? as u64,
        compressed_size: row.get::<_, i64>(4)? as u64,
        uncompressed_md5: row.get(5)?,
        compressed_md5: row.get(6)?,
    })
}

pub fn children(conn: &Connection, internal_id: i64) -> Result<Vec<Resource>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT internalId, publicId, level, parentId FROM Resources WHERE parentId = ?1 ORDER BY internalId",
    )?;
    let rows = stmt.query_map(params![internal_id], row_to_resource)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
}

pub fn children_count(conn: &Connection, internal_id: i64) -> Result<i64, CoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM Resources WHERE parentId = ?1",
        params![internal_id],
        |row| row.get(0),
    )
    .map_err(CoreError::from)
}

/// The first child in insertion order, used by the Resource Finder (§4.8)
/// to resolve a representative leaf instance.
pub fn first_child(conn: &Connection, internal_id: i64) -> Result<Option<Resource>, CoreError> {
    conn.query_row(
        "SELECT internalId, publicId, level, parentId FROM Resources WHERE parentId = ?1 ORDER BY internalId LIMIT 1",
        params![internal_id],
        row_to_resource,
    )
    .optional()
    .map_err(CoreError::from)
}

/// Every instance-level descendant of `internal_id` (itself included if it
/// is already an instance), used by `sendToModality`/`peerStore` to resolve
/// a resource at any level down to the instances it covers.
pub fn descendant_instances(
    conn: &Connection,
    internal_id: i64,
    level: ResourceLevel,
) -> Result<Vec<i64>, CoreError> {
    if level == ResourceLevel::Instance {
        return Ok(vec![internal_id]);
    }
    let mut out = Vec::new();
    for child in children(conn, internal_id)? {
        out.extend(descendant_instances(conn, child.internal_id, child.level)?);
    }
    Ok(out)
}

/// Delete `internal_id` (cascading to descendants, tags, metadata and
/// attachments via `ON DELETE CASCADE`, which fires the `AttachedFiles`
/// triggers that enqueue blob deletions and adjust the size rollups), then
/// walk up the parent chain removing any ancestor left with zero children
/// (`spec.md` §3 "A series or study with zero children is automatically
/// removed; removing the last child of a patient removes the patient").
pub fn delete_resource_cascade(conn: &Connection, internal_id: i64) -> Result<(), CoreError> {
    let parent_id = get_resource(conn, internal_id)?.and_then(|r| r.parent_internal_id);
    conn.execute("DELETE FROM Resources WHERE internalId = ?1", params![internal_id])?;

    let mut ancestor = parent_id;
    while let Some(id) = ancestor {
        let remaining = children_count(conn, id)?;
        if remaining > 0 {
            break;
        }
        let grandparent = get_resource(conn, id)?.and_then(|r| r.parent_internal_id);
        conn.execute("DELETE FROM Resources WHERE internalId = ?1", params![id])?;
        ancestor = grandparent;
    }
    Ok(())
}

pub fn resource_summary(
    conn: &Connection,
    public_id: &str,
    level: ResourceLevel,
) -> Result<Option<ResourceSummary>, CoreError> {
    let Some(resource) = find_resource(conn, public_id, level)? else {
        return Ok(None);
    };
    let tags = main_tags(conn, resource.internal_id)?;
    let kids = children(conn, resource.internal_id)?;
    let parent_public_id = match resource.parent_internal_id {
        Some(pid) => get_resource(conn, pid)?.map(|r| r.public_id),
        None => None,
    };
    Ok(Some(ResourceSummary {
        public_id: resource.public_id,
        level: resource.level,
        parent_public_id,
        main_tags: tags,
        children_public_ids: kids.into_iter().map(|r| r.public_id).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{init_schema, PendingBlobDeletes};
    use std::sync::{Arc, Mutex};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let pending: PendingBlobDeletes = Arc::new(Mutex::new(Vec::new()));
        init_schema(&conn, pending).unwrap();
        conn
    }

    #[test]
    fn create_and_find_round_trips() {
        let conn = open();
        let id = create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        let found = find_resource(&conn, "P1", ResourceLevel::Patient).unwrap().unwrap();
        assert_eq!(found.internal_id, id);
        assert_eq!(found.parent_internal_id, None);
    }

    #[test]
    fn deleting_only_child_removes_empty_ancestors() {
        let conn = open();
        let patient = create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        let study = create_resource(&conn, "S1", ResourceLevel::Study, Some(patient)).unwrap();

        delete_resource_cascade(&conn, study).unwrap();

        assert!(get_resource(&conn, patient).unwrap().is_none());
    }

    #[test]
    fn deleting_one_of_two_children_keeps_parent() {
        let conn = open();
        let patient = create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        let study_a = create_resource(&conn, "SA", ResourceLevel::Study, Some(patient)).unwrap();
        let _study_b = create_resource(&conn, "SB", ResourceLevel::Study, Some(patient)).unwrap();

        delete_resource_cascade(&conn, study_a).unwrap();

        assert!(get_resource(&conn, patient).unwrap().is_some());
    }

    #[test]
    fn metadata_delete_rejects_non_user_range() {
        let conn = open();
        let id = create_resource(&conn, "P1", ResourceLevel::Patient, None).unwrap();
        set_metadata(&conn, id, MetadataKind::SourceAet, "MODALITY").unwrap();
        let err = delete_metadata(&conn, id, MetadataKind::SourceAet).unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }
}

//! Resource Finder (C8, `spec.md` §4.8).
//!
//! Grounded on the teacher's `sanitize.rs` compile-once `Regex` idiom for
//! wildcard translation, and on `findscu.rs`'s level-by-level resolution of
//! a query identifier down to a target level.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::blob::{compressor_for, BlobStore};
use crate::error::CoreError;
use crate::index::{resources, Index};
use crate::model::{ContentType, MainDicomTag, ResourceLevel};

/// How a stored tag value is matched against a query constraint
/// (`spec.md` §4.8 "Range and wildcard constraints").
pub enum Matcher {
    Equals { value: String, case_sensitive: bool },
    Range { low: String, high: String },
    Wildcard { pattern: Regex, case_insensitive: bool },
}

impl Matcher {
    pub fn equals(value: impl Into<String>, case_sensitive: bool) -> Self {
        Matcher::Equals {
            value: value.into(),
            case_sensitive,
        }
    }

    pub fn range(low: impl Into<String>, high: impl Into<String>) -> Self {
        Matcher::Range {
            low: low.into(),
            high: high.into(),
        }
    }

    /// Build a matcher from a DICOM wildcard pattern (`*` / `?`).
    pub fn wildcard(pattern: &str, case_sensitive: bool) -> Self {
        let folded = if case_sensitive {
            pattern.to_string()
        } else {
            fold_case(pattern)
        };
        let regex_source = wildcard_to_regex_source(&folded);
        let pattern = Regex::new(&regex_source).unwrap_or_else(|_| Regex::new("^$").unwrap());
        Matcher::Wildcard {
            pattern,
            case_insensitive: !case_sensitive,
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Equals {
                value: expected,
                case_sensitive,
            } => {
                if *case_sensitive {
                    value == expected
                } else {
                    fold_case(value) == fold_case(expected)
                }
            }
            Matcher::Range { low, high } => value >= low.as_str() && value <= high.as_str(),
            Matcher::Wildcard {
                pattern,
                case_insensitive,
            } => {
                if *case_insensitive {
                    pattern.is_match(&fold_case(value))
                } else {
                    pattern.is_match(value)
                }
            }
        }
    }
}

/// Replace `*`/`?` with regex equivalents, escaping every other character.
fn wildcard_to_regex_source(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Uppercase plus a best-effort fold of the Latin-1 Supplement accented
/// letters to their unaccented base, per `spec.md` §4.8 "folds accented
/// characters to a canonical upper case".
fn fold_case(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'À'..='Å' | 'à'..='å' => 'A',
        'Æ' | 'æ' => 'A',
        'Ç' | 'ç' => 'C',
        'È'..='Ë' | 'è'..='ë' => 'E',
        'Ì'..='Ï' | 'ì'..='ï' => 'I',
        'Ñ' | 'ñ' => 'N',
        'Ò'..='Ö' | 'ò'..='ö' | 'Ø' | 'ø' => 'O',
        'Ù'..='Ü' | 'ù'..='ü' => 'U',
        'Ý' | 'ý' | 'ÿ' => 'Y',
        other => other.to_ascii_uppercase(),
    }
}

/// A single `(level, tag, matcher)` constraint, covering both "identifier
/// constraints" and the "main-tag predicate" of `spec.md` §4.8: both are
/// resolved the same way, by intersecting the level's candidate set with
/// resources whose `MainDicomTags` value at that tag matches.
pub struct TagConstraint {
    pub level: ResourceLevel,
    pub tag: (u16, u16),
    pub matcher: Matcher,
}

/// A query against the resource tree (`spec.md` §4.8 "Query").
pub struct FinderQuery<'a> {
    pub target_level: ResourceLevel,
    pub tag_constraints: Vec<TagConstraint>,
    /// Applied to a representative leaf instance's DICOM-as-JSON summary,
    /// only once the target level is reached.
    pub instance_predicate: Option<Box<dyn Fn(&Value) -> bool + 'a>>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct FindOutcome {
    pub public_ids: Vec<String>,
    pub truncated: bool,
}

/// Resolve a [`FinderQuery`] to a truncated list of resource public ids
/// (`spec.md` §4.8 "Algorithm").
pub fn find(index: &Index, blobs: &BlobStore, query: &FinderQuery<'_>) -> Result<FindOutcome, CoreError> {
    index.read(|conn| find_in(conn, blobs, query))
}

fn find_in(
    conn: &rusqlite::Connection,
    blobs: &BlobStore,
    query: &FinderQuery<'_>,
) -> Result<FindOutcome, CoreError> {
    let mut level = ResourceLevel::Patient;
    let mut candidates = all_resources_at_level(conn, level)?;

    loop {
        for constraint in query.tag_constraints.iter().filter(|c| c.level == level) {
            let matching = resources_matching_tag(conn, level, constraint.tag, &constraint.matcher)?;
            candidates = candidates.intersection(&matching).copied().collect();
        }

        if level == query.target_level {
            break;
        }

        let mut children_ids = HashSet::new();
        for id in &candidates {
            for child in resources::children(conn, *id)? {
                children_ids.insert(child.internal_id);
            }
        }
        candidates = children_ids;
        level = level
            .child()
            .expect("loop invariant: level below target always has a child level");
    }

    let mut ordered: Vec<i64> = candidates.into_iter().collect();
    ordered.sort_unstable();

    let mut public_ids = Vec::new();
    let mut truncated = false;
    for id in ordered {
        if public_ids.len() >= query.limit {
            truncated = true;
            break;
        }
        if let Some(predicate) = &query.instance_predicate {
            let Some(leaf_id) = representative_leaf_instance(conn, id, query.target_level)? else {
                continue;
            };
            let Some(json) = load_instance_json(conn, blobs, leaf_id)? else {
                continue;
            };
            if !predicate(&json) {
                continue;
            }
        }
        if let Some(resource) = resources::get_resource(conn, id)? {
            public_ids.push(resource.public_id);
        }
    }

    Ok(FindOutcome { public_ids, truncated })
}

fn all_resources_at_level(conn: &rusqlite::Connection, level: ResourceLevel) -> Result<HashSet<i64>, CoreError> {
    let mut stmt = conn.prepare("SELECT internalId FROM Resources WHERE level = ?1")?;
    let rows = stmt.query_map(rusqlite::params![level.as_db_value()], |row| row.get(0))?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(CoreError::from)
}

fn resources_matching_tag(
    conn: &rusqlite::Connection,
    level: ResourceLevel,
    tag: (u16, u16),
    matcher: &Matcher,
) -> Result<HashSet<i64>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT r.internalId, m.value FROM Resources r
         JOIN MainDicomTags m ON m.id = r.internalId
         WHERE r.level = ?1 AND m.tagGroup = ?2 AND m.tagElement = ?3",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![level.as_db_value(), tag.0, tag.1],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;
    let mut out = HashSet::new();
    for row in rows {
        let (internal_id, value) = row?;
        if matcher.matches(&value) {
            out.insert(internal_id);
        }
    }
    Ok(out)
}

/// Descend first-child repeatedly from `internal_id` (at `from_level`) down
/// to the instance level, per `spec.md` §4.8 "resolve one representative
/// leaf instance (by descending first-child repeatedly)".
fn representative_leaf_instance(
    conn: &rusqlite::Connection,
    internal_id: i64,
    from_level: ResourceLevel,
) -> Result<Option<i64>, CoreError> {
    if from_level == ResourceLevel::Instance {
        return Ok(Some(internal_id));
    }
    let mut current = internal_id;
    let mut level = from_level;
    while level != ResourceLevel::Instance {
        let Some(child) = resources::first_child(conn, current)? else {
            return Ok(None);
        };
        current = child.internal_id;
        level = level.child().expect("not yet at instance level");
    }
    Ok(Some(current))
}

fn load_instance_json(
    conn: &rusqlite::Connection,
    blobs: &BlobStore,
    instance_internal_id: i64,
) -> Result<Option<Value>, CoreError> {
    let Some(attachment) = resources::get_attachment(conn, instance_internal_id, ContentType::DicomAsJson)? else {
        return Ok(None);
    };
    let raw = blobs.read_raw(attachment.blob_uuid)?;
    let bytes = compressor_for(attachment.compression).uncompress(&raw)?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::InternalError(format!("corrupt DICOM-as-JSON attachment: {e}")))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn equals_matcher_is_case_insensitive_by_default() {
        let m = Matcher::equals("HEAD^ROUTINE", false);
        assert!(m.matches("head^routine"));
        assert!(!Matcher::equals("HEAD", true).matches("head"));
    }

    #[test]
    fn wildcard_star_matches_any_suffix() {
        let m = Matcher::wildcard("DOE^*", true);
        assert!(m.matches("DOE^JOHN"));
        assert!(!m.matches("SMITH^JOHN"));
    }

    #[test]
    fn range_matcher_is_inclusive() {
        let m = Matcher::range("20200101", "20201231");
        assert!(m.matches("20200615"));
        assert!(!m.matches("20210101"));
    }

    fn open_index() -> (Index, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("index.sqlite")).unwrap();
        (Index::open(&path).unwrap(), dir)
    }

    #[test]
    fn find_intersects_tag_constraint_with_candidate_set() {
        let (index, _dir) = open_index();
        let (p1, p2) = index
            .transaction(|tx| {
                let p1 = resources::create_resource(tx, "P1", ResourceLevel::Patient, None)?;
                let p2 = resources::create_resource(tx, "P2", ResourceLevel::Patient, None)?;
                resources::set_main_tags(tx, p1, &[(0x0010, 0x0010, "DOE^JOHN".to_string())])?;
                resources::set_main_tags(tx, p2, &[(0x0010, 0x0010, "SMITH^JANE".to_string())])?;
                Ok((p1, p2))
            })
            .unwrap()
            .0;

        let matching = index
            .read(|conn| {
                resources_matching_tag(
                    conn,
                    ResourceLevel::Patient,
                    (0x0010, 0x0010),
                    &Matcher::wildcard("DOE^*", true),
                )
            })
            .unwrap();
        assert_eq!(matching, HashSet::from([p1]));
        let _ = p2;
    }

    #[test]
    fn representative_leaf_descends_to_instance() {
        let (index, _dir) = open_index();
        let (patient, instance) = index
            .transaction(|tx| {
                let patient = resources::create_resource(tx, "P1", ResourceLevel::Patient, None)?;
                let study = resources::create_resource(tx, "S1", ResourceLevel::Study, Some(patient))?;
                let series = resources::create_resource(tx, "SE1", ResourceLevel::Series, Some(study))?;
                let instance =
                    resources::create_resource(tx, "I1", ResourceLevel::Instance, Some(series))?;
                Ok((patient, instance))
            })
            .unwrap()
            .0;

        let leaf = index
            .read(|conn| representative_leaf_instance(conn, patient, ResourceLevel::Patient))
            .unwrap();
        assert_eq!(leaf, Some(instance));
    }
}

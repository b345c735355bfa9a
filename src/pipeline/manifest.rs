//! Reference Manifest Loader: image records written by the autotag stage.
//!
//! Two on-disk formats carry the same `{id, payload, context}` records:
//!
//! * **SQLite** — a single table `image_data(objid, img_path, prev, current,
//!   next, context)`, detected by the `SQLite format 3\0` header.
//! * **Flat text** — one record per line, `<objid> <img_path> <context…>`,
//!   where the context is a JSON object with `prev`/`current`/`next` page
//!   text, a JSON string, or raw text. Blank lines and `#` comments are
//!   skipped.
//!
//! Ids must be object numbers and unique; anything else means the manifest
//! and the document disagree about identity, so it is rejected outright.

use crate::error::AltTagError;
use crate::model::ImageReference;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header of every SQLite 3 database file.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Table the autotag stage writes image records into.
pub const MANIFEST_TABLE: &str = "image_data";

/// On-disk manifest format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Sqlite,
    Text,
}

impl ManifestFormat {
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(SQLITE_MAGIC) {
            ManifestFormat::Sqlite
        } else {
            ManifestFormat::Text
        }
    }
}

/// Load and validate a manifest from a local file of either format.
pub async fn load_manifest(path: &Path) -> Result<Vec<ImageReference>, AltTagError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AltTagError::Scratch {
            path: path.to_path_buf(),
            source: e,
        })?;
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let refs = match ManifestFormat::detect(&bytes) {
        ManifestFormat::Sqlite => {
            // rusqlite is blocking; keep it off the async workers.
            let path: PathBuf = path.to_path_buf();
            let name = source_name.clone();
            tokio::task::spawn_blocking(move || load_sqlite(&path, &name))
                .await
                .map_err(|e| AltTagError::Internal(format!("Manifest task panicked: {}", e)))??
        }
        ManifestFormat::Text => {
            let text = String::from_utf8_lossy(&bytes);
            parse_text(&text, &source_name)?
        }
    };

    info!("Manifest '{}': {} image references", source_name, refs.len());
    Ok(refs)
}

/// Parse the flat text format.
pub fn parse_text(text: &str, source_name: &str) -> Result<Vec<ImageReference>, AltTagError> {
    let mut refs = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let record = line_no + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (raw_id, rest) = split_field(line);
        let (payload, context) = split_field(rest);

        let id = parse_object_id(raw_id).ok_or_else(|| {
            invalid(
                source_name,
                record,
                format!("id '{raw_id}' is not an object number"),
            )
        })?;
        if payload.is_empty() {
            return Err(invalid(source_name, record, format!("object {id} has no payload")));
        }

        refs.push(ImageReference {
            id,
            payload_path: payload.to_string(),
            context: parse_context(context),
        });
    }
    check_unique(&refs, source_name)?;
    Ok(refs)
}

/// Read every row of the `image_data` table in insertion order.
pub fn load_sqlite(path: &Path, source_name: &str) -> Result<Vec<ImageReference>, AltTagError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let sql = format!(
        "SELECT CAST(objid AS TEXT), img_path, COALESCE(context, ''), \
         COALESCE(prev, ''), COALESCE(current, ''), COALESCE(next, '') \
         FROM {MANIFEST_TABLE} ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            [
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ],
        ))
    })?;

    let mut refs = Vec::new();
    for (i, row) in rows.enumerate() {
        let record = i + 1;
        let (raw_id, payload, context, pages) = row?;

        let raw_id = raw_id.unwrap_or_default();
        let id = parse_object_id(&raw_id).ok_or_else(|| {
            invalid(
                source_name,
                record,
                format!("id '{raw_id}' is not an object number"),
            )
        })?;
        let payload = payload
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                invalid(source_name, record, format!("object {id} has no payload"))
            })?;

        let context = if context.trim().is_empty() {
            join_pages(pages.iter().map(String::as_str))
        } else {
            context
        };

        refs.push(ImageReference {
            id,
            payload_path: payload,
            context,
        });
    }
    debug!("Read {} rows from {}", refs.len(), source_name);
    check_unique(&refs, source_name)?;
    Ok(refs)
}

/// Split off the first whitespace-delimited field; the remainder is trimmed.
fn split_field(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

/// Accept `12` as well as an indirect reference spelled `12 0 R`.
fn parse_object_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let number = raw
        .strip_suffix('R')
        .map(|r| r.split_whitespace().next().unwrap_or(""))
        .unwrap_or(raw);
    number.trim().parse::<u32>().ok().filter(|&id| id > 0)
}

/// Decode the context column of a text record.
fn parse_context(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => join_pages(
            ["prev", "current", "next"]
                .iter()
                .filter_map(|k| map.get(*k).and_then(|v| v.as_str())),
        ),
        _ => raw.to_string(),
    }
}

fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    pages
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn check_unique(refs: &[ImageReference], source_name: &str) -> Result<(), AltTagError> {
    let mut seen = HashSet::with_capacity(refs.len());
    for (i, r) in refs.iter().enumerate() {
        if !seen.insert(r.id) {
            return Err(invalid(
                source_name,
                i + 1,
                format!("object {} appears more than once", r.id),
            ));
        }
    }
    Ok(())
}

fn invalid(source_name: &str, record: usize, detail: String) -> AltTagError {
    AltTagError::ManifestInvalid {
        source_name: source_name.to_string(),
        record,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_records() {
        let text = "# autotag output\n\
                    5 fig5.png\n\
                    7 fig7.png {\"prev\": \"\", \"current\": \"A bicycle shop.\", \"next\": \"Prices\"}\n\
                    \n\
                    9 fig9.png plain surrounding text\n";
        let refs = parse_text(text, "images.txt").unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].id, 5);
        assert_eq!(refs[0].context, "");
        assert_eq!(refs[1].context, "A bicycle shop.\nPrices");
        assert_eq!(refs[2].payload_path, "fig9.png");
        assert_eq!(refs[2].context, "plain surrounding text");
    }

    #[test]
    fn parse_text_rejects_bad_id() {
        let err = parse_text("five fig.png\n", "images.txt").unwrap_err();
        match err {
            AltTagError::ManifestInvalid { record, .. } => assert_eq!(record, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_text_rejects_duplicates() {
        let err = parse_text("5 a.png\n5 b.png\n", "images.txt").unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn parse_text_rejects_missing_payload() {
        assert!(parse_text("5\n", "images.txt").is_err());
    }

    #[test]
    fn object_id_forms() {
        assert_eq!(parse_object_id("12"), Some(12));
        assert_eq!(parse_object_id("12 0 R"), Some(12));
        assert_eq!(parse_object_id("0"), None);
        assert_eq!(parse_object_id("-3"), None);
    }

    #[test]
    fn context_json_string() {
        assert_eq!(parse_context("\"quoted\""), "quoted");
    }

    #[test]
    fn detect_format() {
        assert_eq!(ManifestFormat::detect(SQLITE_MAGIC), ManifestFormat::Sqlite);
        assert_eq!(ManifestFormat::detect(b"5 fig.png"), ManifestFormat::Text);
    }

    fn write_db(path: &Path, rows: &[(&str, &str, Option<&str>, &str)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "CREATE TABLE image_data (objid TEXT, img_path TEXT, prev TEXT, current TEXT, next TEXT, context TEXT)",
            [],
        )
        .unwrap();
        for (id, img, context, current) in rows {
            conn.execute(
                "INSERT INTO image_data (objid, img_path, current, context) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, img, current, context],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn load_sqlite_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf_temp_images_data.db");
        write_db(
            &path,
            &[
                ("7", "fig7.png", Some("<IMAGE INTERESTED> fig7.png </IMAGE INTERESTED>"), ""),
                ("5", "fig5.png", None, "page text"),
            ],
        );

        let refs = load_manifest(&path).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, 7);
        assert!(refs[0].context.contains("IMAGE INTERESTED"));
        assert_eq!(refs[1].id, 5);
        assert_eq!(refs[1].context, "page text");
    }

    #[tokio::test]
    async fn load_text_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.txt");
        std::fs::write(&path, "11 fig11.png\n").unwrap();
        let refs = load_manifest(&path).await.unwrap();
        assert_eq!(refs[0].id, 11);
    }

    #[test]
    fn sqlite_rejects_null_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "CREATE TABLE image_data (objid TEXT, img_path TEXT, prev TEXT, current TEXT, next TEXT, context TEXT)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO image_data (img_path) VALUES ('x.png')", [])
            .unwrap();
        drop(conn);
        assert!(matches!(
            load_sqlite(&path, "m.db").unwrap_err(),
            AltTagError::ManifestInvalid { .. }
        ));
    }
}

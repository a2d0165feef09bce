//! Database models.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use agora_core::{CachedImageId, RecordId, RecordKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

/// Parse an RFC 3339 timestamp from a text column.
fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ---------------------------------------------------------------------------
// CachedImage
// ---------------------------------------------------------------------------

/// A remote image mirrored locally, keyed by its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub id: CachedImageId,
    pub source_url: String,
    /// Base name of the stored original, including extension.
    pub file_name: String,
    /// Location of the stored original, relative to the media root.
    pub path: String,
    /// First 16 hex chars of the SHA-256 of the stored bytes.
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedImage {
    pub(crate) const COLS: &'static str =
        "id, source_url, file_name, path, content_hash, width, height, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            source_url: row.get(1)?,
            file_name: row.get(2)?,
            path: row.get(3)?,
            content_hash: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
            created_at: parse_time(row, 7)?,
            updated_at: parse_time(row, 8)?,
        })
    }
}

// ---------------------------------------------------------------------------
// TextRecord
// ---------------------------------------------------------------------------

/// Any record owning a raw/rendered BBCode pair.
///
/// `raw` is authoritative; `rendered` is derived HTML and may lag behind the
/// image cache until the next postprocess pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    pub kind: RecordKind,
    pub id: RecordId,
    pub raw: String,
    pub rendered: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TextRecord {
    /// Build a record of `kind` from a row of `id, raw, rendered, created_at, updated_at`.
    pub fn from_row(kind: RecordKind, row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            kind,
            id: parse_id(row, 0)?,
            raw: row.get(1)?,
            rendered: row.get(2)?,
            created_at: parse_time(row, 3)?,
            updated_at: parse_time(row, 4)?,
        })
    }
}

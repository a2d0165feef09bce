//! Raw/rendered BBCode field operations, uniform across record kinds.
//!
//! Each [`RecordKind`] lives in its own table with `<field>_raw` and
//! `<field>_rendered` columns; the table and column names are fixed per kind,
//! so the SQL built here never interpolates caller-provided text.

use agora_core::{Error, RecordId, RecordKind, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::models::TextRecord;

/// Table backing a record kind.
fn table(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::NewsItem => "news_items",
        RecordKind::ForumPost => "forum_posts",
        RecordKind::ForumUser => "forum_users",
    }
}

fn select_cols(kind: RecordKind) -> String {
    let field = kind.field_name();
    format!("id, {field}_raw, {field}_rendered, created_at, updated_at")
}

/// Insert a new record of `kind` with the given raw and rendered text.
pub fn insert_record(
    conn: &Connection,
    kind: RecordKind,
    raw: &str,
    rendered: &str,
) -> Result<TextRecord> {
    let id = RecordId::new();
    let now = Utc::now();
    let field = kind.field_name();

    let q = format!(
        "INSERT INTO {} (id, {field}_raw, {field}_rendered, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        table(kind)
    );
    conn.execute(
        &q,
        rusqlite::params![id.to_string(), raw, rendered, now.to_rfc3339()],
    )
    .map_err(Error::database)?;

    Ok(TextRecord {
        kind,
        id,
        raw: raw.to_string(),
        rendered: rendered.to_string(),
        created_at: now,
        updated_at: now,
    })
}

/// Get a record by kind and ID.
pub fn get_record(conn: &Connection, kind: RecordKind, id: RecordId) -> Result<Option<TextRecord>> {
    let q = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_cols(kind),
        table(kind)
    );
    conn.query_row(&q, [id.to_string()], |row| TextRecord::from_row(kind, row))
        .optional()
        .map_err(Error::database)
}

/// Overwrite only the rendered projection of a record.
///
/// The raw field and `updated_at` are left untouched; rendering is a derived
/// cache, not an edit.
///
/// # Returns
///
/// * `Ok(true)` - If the record was updated
/// * `Ok(false)` - If the record no longer exists
pub fn update_rendered(
    conn: &Connection,
    kind: RecordKind,
    id: RecordId,
    rendered: &str,
) -> Result<bool> {
    let q = format!(
        "UPDATE {} SET {}_rendered = ?2 WHERE id = ?1",
        table(kind),
        kind.field_name()
    );
    let rows = conn
        .execute(&q, rusqlite::params![id.to_string(), rendered])
        .map_err(Error::database)?;
    Ok(rows > 0)
}

/// Like [`update_rendered`], but only while the raw field still equals
/// `expected_raw`.
///
/// # Returns
///
/// * `Ok(true)` - If the record was updated
/// * `Ok(false)` - If the record no longer exists or its raw text changed
pub fn update_rendered_if_raw(
    conn: &Connection,
    kind: RecordKind,
    id: RecordId,
    expected_raw: &str,
    rendered: &str,
) -> Result<bool> {
    let field = kind.field_name();
    let q = format!(
        "UPDATE {} SET {field}_rendered = ?2 WHERE id = ?1 AND {field}_raw = ?3",
        table(kind)
    );
    let rows = conn
        .execute(&q, rusqlite::params![id.to_string(), rendered, expected_raw])
        .map_err(Error::database)?;
    Ok(rows > 0)
}

/// Overwrite both raw and rendered text, as an edit of the record.
pub fn update_raw(
    conn: &Connection,
    kind: RecordKind,
    id: RecordId,
    raw: &str,
    rendered: &str,
) -> Result<bool> {
    let field = kind.field_name();
    let q = format!(
        "UPDATE {} SET {field}_raw = ?2, {field}_rendered = ?3, updated_at = ?4 WHERE id = ?1",
        table(kind)
    );
    let rows = conn
        .execute(
            &q,
            rusqlite::params![id.to_string(), raw, rendered, Utc::now().to_rfc3339()],
        )
        .map_err(Error::database)?;
    Ok(rows > 0)
}

/// List the IDs of every record of `kind`, oldest first.
pub fn list_record_ids(conn: &Connection, kind: RecordKind) -> Result<Vec<RecordId>> {
    Ok(list_records(conn, kind)?.into_iter().map(|r| r.id).collect())
}

/// List every record of `kind`, oldest first.
pub fn list_records(conn: &Connection, kind: RecordKind) -> Result<Vec<TextRecord>> {
    let q = format!(
        "SELECT {} FROM {} ORDER BY created_at, id",
        select_cols(kind),
        table(kind)
    );
    let mut stmt = conn.prepare(&q).map_err(Error::database)?;
    let rows = stmt
        .query_map([], |row| TextRecord::from_row(kind, row))
        .map_err(Error::database)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::database)?;
    Ok(rows)
}

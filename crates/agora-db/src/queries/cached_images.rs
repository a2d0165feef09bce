//! Cached image CRUD operations.
//!
//! Rows are unique per `source_url`. Inserting a second row for the same URL
//! fails with [`Error::Conflict`], which callers racing on a first-time fetch
//! treat as "someone else already cached it".

use agora_core::{CachedImageId, Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};

use crate::models::CachedImage;

/// Map a rusqlite error, turning unique-constraint violations into conflicts.
fn map_write_error(e: rusqlite::Error, source_url: &str) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            Error::conflict(format!("image already cached for {source_url}"))
        }
        other => Error::database(other),
    }
}

/// Insert a new cached image row.
///
/// Returns [`Error::Conflict`] if a row for the same `source_url` exists.
pub fn insert_cached_image(conn: &Connection, image: &CachedImage) -> Result<()> {
    conn.execute(
        "INSERT INTO cached_images
            (id, source_url, file_name, path, content_hash, width, height, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            image.id.to_string(),
            image.source_url,
            image.file_name,
            image.path,
            image.content_hash,
            image.width,
            image.height,
            image.created_at.to_rfc3339(),
            image.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| map_write_error(e, &image.source_url))?;

    Ok(())
}

/// Get a cached image by ID.
pub fn get_cached_image(conn: &Connection, id: CachedImageId) -> Result<Option<CachedImage>> {
    let q = format!("SELECT {} FROM cached_images WHERE id = ?1", CachedImage::COLS);
    conn.query_row(&q, [id.to_string()], CachedImage::from_row)
        .optional()
        .map_err(Error::database)
}

/// Get the cached image mirrored from `source_url`, if any.
pub fn get_by_source_url(conn: &Connection, source_url: &str) -> Result<Option<CachedImage>> {
    let q = format!(
        "SELECT {} FROM cached_images WHERE source_url = ?1",
        CachedImage::COLS
    );
    conn.query_row(&q, [source_url], CachedImage::from_row)
        .optional()
        .map_err(Error::database)
}

/// Replace the stored asset of an existing row in place.
///
/// Identity (`id`, `source_url`, `created_at`) is preserved.
///
/// # Returns
///
/// * `Ok(true)` - If the row was updated
/// * `Ok(false)` - If no row with that ID exists
#[allow(clippy::too_many_arguments)]
pub fn replace_asset(
    conn: &Connection,
    id: CachedImageId,
    file_name: &str,
    path: &str,
    content_hash: &str,
    width: u32,
    height: u32,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE cached_images
             SET file_name = ?2, path = ?3, content_hash = ?4, width = ?5, height = ?6,
                 updated_at = ?7
             WHERE id = ?1",
            rusqlite::params![
                id.to_string(),
                file_name,
                path,
                content_hash,
                width,
                height,
                updated_at.to_rfc3339(),
            ],
        )
        .map_err(Error::database)?;

    Ok(rows > 0)
}

/// Count cached images.
pub fn count_cached_images(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM cached_images", [], |row| row.get(0))
        .map_err(Error::database)
}

//! Persistence of validated images, keyed by source URL.

use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use agora_core::CachedImageId;
use agora_db::models::CachedImage;
use agora_db::pool::{get_conn, DbPool};
use agora_db::queries::cached_images;
use chrono::Utc;
use tempfile::{NamedTempFile, SpooledTempFile};
use tracing::debug;

use super::error::StoreError;
use super::validator::ValidatedImage;
use super::variants::{hash_reader, image_dir, remove_variants, BBCODE_DIR};

/// Result of caching one source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this URL was cached.
    Created(CachedImage),
    /// The URL was cached before with different bytes; the asset was replaced.
    Replaced(CachedImage),
    /// The URL was cached before with identical bytes; nothing was written.
    Unchanged(CachedImage),
}

impl UpsertOutcome {
    pub fn image(&self) -> &CachedImage {
        match self {
            Self::Created(image) | Self::Replaced(image) | Self::Unchanged(image) => image,
        }
    }

    /// Whether this outcome changed what a render of the owning text would show.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Replaced(_))
    }
}

/// Filesystem and database storage for mirrored images.
#[derive(Clone)]
pub struct ImageCacheStore {
    pool: DbPool,
    media_dir: PathBuf,
}

impl ImageCacheStore {
    pub fn new(pool: DbPool, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            media_dir: media_dir.into(),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Absolute location of a cached image's original file.
    pub fn original_path(&self, image: &CachedImage) -> PathBuf {
        self.media_dir.join(&image.path)
    }

    /// Store `buffer` as the cached copy of `source_url`.
    ///
    /// Runs on the blocking pool; hashing, file writes and SQLite calls are
    /// all synchronous.
    pub async fn upsert(
        &self,
        source_url: &str,
        buffer: SpooledTempFile,
        suggested_name: Option<&str>,
        validated: &ValidatedImage,
    ) -> Result<UpsertOutcome, StoreError> {
        let store = self.clone();
        let source_url = source_url.to_string();
        let suggested_name = suggested_name.map(str::to_string);
        let validated = validated.clone();

        tokio::task::spawn_blocking(move || {
            store.upsert_blocking(&source_url, buffer, suggested_name.as_deref(), &validated)
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }

    fn upsert_blocking(
        &self,
        source_url: &str,
        mut buffer: SpooledTempFile,
        suggested_name: Option<&str>,
        validated: &ValidatedImage,
    ) -> Result<UpsertOutcome, StoreError> {
        buffer.seek(SeekFrom::Start(0))?;
        let content_hash = hash_reader(&mut buffer)?;

        let conn = get_conn(&self.pool)?;
        let file_name = file_name_for(suggested_name, validated.extension);

        if let Some(existing) = cached_images::get_by_source_url(&conn, source_url)? {
            if existing.content_hash == content_hash {
                return Ok(UpsertOutcome::Unchanged(existing));
            }

            let path = relative_path(existing.id, &file_name);
            self.write_original(existing.id, &file_name, &mut buffer)?;

            let now = Utc::now();
            let updated = cached_images::replace_asset(
                &conn,
                existing.id,
                &file_name,
                &path,
                &content_hash,
                validated.width,
                validated.height,
                now,
            )?;
            if !updated {
                return Err(StoreError::Database(agora_core::Error::not_found(
                    "cached image",
                    existing.id,
                )));
            }

            let dir = image_dir(&self.media_dir, existing.id);
            if existing.path != path {
                remove_if_exists(&self.media_dir.join(&existing.path))?;
            }
            remove_variants(&dir)?;

            debug!(url = %source_url, path = %path, "Replaced cached image");
            return Ok(UpsertOutcome::Replaced(CachedImage {
                file_name,
                path,
                content_hash,
                width: validated.width,
                height: validated.height,
                updated_at: now,
                ..existing
            }));
        }

        self.insert_new(&conn, source_url, file_name, content_hash, validated, &mut buffer)
    }

    /// Write a brand-new asset and its row.
    ///
    /// A concurrent writer that inserted the same URL first surfaces as
    /// [`StoreError::Conflict`], and the file written here is removed again.
    fn insert_new(
        &self,
        conn: &rusqlite::Connection,
        source_url: &str,
        file_name: String,
        content_hash: String,
        validated: &ValidatedImage,
        buffer: &mut SpooledTempFile,
    ) -> Result<UpsertOutcome, StoreError> {
        let id = CachedImageId::new();
        let now = Utc::now();
        let image = CachedImage {
            id,
            source_url: source_url.to_string(),
            path: relative_path(id, &file_name),
            file_name,
            content_hash,
            width: validated.width,
            height: validated.height,
            created_at: now,
            updated_at: now,
        };

        self.write_original(id, &image.file_name, buffer)?;
        if let Err(e) = cached_images::insert_cached_image(conn, &image) {
            let dir = image_dir(&self.media_dir, id);
            if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                debug!(path = %dir.display(), error = %cleanup, "Failed to remove orphaned image");
            }
            return Err(e.into());
        }

        debug!(url = %source_url, path = %image.path, "Cached new image");
        Ok(UpsertOutcome::Created(image))
    }

    /// Atomically write `buffer` to `bbcode/{id}/{file_name}`.
    fn write_original(
        &self,
        id: CachedImageId,
        file_name: &str,
        buffer: &mut SpooledTempFile,
    ) -> io::Result<PathBuf> {
        let dir = image_dir(&self.media_dir, id);
        std::fs::create_dir_all(&dir)?;

        buffer.seek(SeekFrom::Start(0))?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        io::copy(buffer, &mut tmp)?;

        let dest = dir.join(file_name);
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(dest)
    }
}

fn relative_path(id: CachedImageId, file_name: &str) -> String {
    format!("{BBCODE_DIR}/{id}/{file_name}")
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

const MAX_FILE_NAME_LEN: usize = 100;

/// Choose the stored file name for an image.
///
/// Uses the sanitized URL base name when there is one and falls back to a
/// timestamp otherwise. Unless the name already ends in an extension for the
/// decoded format, `extension` is appended.
pub(crate) fn file_name_for(suggested: Option<&str>, extension: &str) -> String {
    let base = suggested
        .map(sanitize_file_name)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S%6f").to_string());

    let matches_format = Path::new(&base)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| normalize_extension(&e.to_ascii_lowercase()) == extension)
        .unwrap_or(false);

    if matches_format {
        base
    } else {
        format!("{base}.{extension}")
    }
}

fn normalize_extension(ext: &str) -> &str {
    match ext {
        "jpeg" | "jpe" | "jfif" => "jpg",
        "tif" => "tiff",
        other => other,
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    cleaned
        .trim_start_matches('.')
        .chars()
        .take(MAX_FILE_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_db::pool::init_memory_pool;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn spool(bytes: &[u8]) -> SpooledTempFile {
        let mut spool = SpooledTempFile::new(1024);
        spool.write_all(bytes).unwrap();
        spool
    }

    fn validated() -> ValidatedImage {
        ValidatedImage {
            extension: "png",
            width: 4,
            height: 3,
        }
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(file_name_for(Some("cat.png"), "png"), "cat.png");
        assert_eq!(file_name_for(Some("Cat.JPG"), "jpg"), "Cat.JPG");
        assert_eq!(file_name_for(Some("photo.jpeg"), "jpg"), "photo.jpeg");
    }

    #[test]
    fn test_file_name_extension_follows_content() {
        assert_eq!(file_name_for(Some("photo.jpg"), "png"), "photo.jpg.png");
    }

    #[test]
    fn test_file_name_missing_extension() {
        assert_eq!(file_name_for(Some("image"), "gif"), "image.gif");
        assert_eq!(file_name_for(Some("render.php"), "png"), "render.php.png");
        assert_eq!(file_name_for(Some("trailing."), "png"), "trailing..png");
    }

    #[test]
    fn test_file_name_sanitized() {
        assert_eq!(file_name_for(Some("my cat%20(1).png"), "png"), "my_cat_20_1_.png");
        assert_eq!(file_name_for(Some("..hidden.png"), "png"), "hidden.png");
    }

    #[test]
    fn test_file_name_timestamp_fallback() {
        let name = file_name_for(None, "webp");
        assert!(name.ends_with(".webp"));
        assert_eq!(name.len(), "20260101120000123456.webp".len());
        assert!(name[..20].chars().all(|c| c.is_ascii_digit()));

        assert!(file_name_for(Some("..."), "png").ends_with(".png"));
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageCacheStore::new(init_memory_pool().unwrap(), dir.path());

        let first = store
            .upsert("http://x/a.png", spool(b"one"), Some("a.png"), &validated())
            .await
            .unwrap();
        assert_matches!(&first, UpsertOutcome::Created(_));
        assert!(first.is_fresh());

        let image = first.image();
        assert_eq!(image.path, format!("bbcode/{}/a.png", image.id));
        assert_eq!(std::fs::read(store.original_path(image)).unwrap(), b"one");

        let second = store
            .upsert("http://x/a.png", spool(b"one"), Some("a.png"), &validated())
            .await
            .unwrap();
        assert_matches!(&second, UpsertOutcome::Unchanged(img) if img.id == image.id);
        assert!(!second.is_fresh());
    }

    #[tokio::test]
    async fn test_replace_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageCacheStore::new(init_memory_pool().unwrap(), dir.path());

        let first = store
            .upsert("http://x/a", spool(b"one"), None, &validated())
            .await
            .unwrap();
        let old_path = store.original_path(first.image());

        let variants = image_dir(dir.path(), first.image().id).join("variants");
        std::fs::create_dir_all(&variants).unwrap();
        std::fs::write(variants.join("small.png"), b"stale").unwrap();

        let second = store
            .upsert("http://x/a", spool(b"two"), Some("b.png"), &validated())
            .await
            .unwrap();
        let replaced = match &second {
            UpsertOutcome::Replaced(img) => img,
            other => panic!("expected Replaced, got {other:?}"),
        };

        assert_eq!(replaced.id, first.image().id);
        assert_eq!(replaced.created_at, first.image().created_at);
        assert_ne!(replaced.content_hash, first.image().content_hash);
        assert_eq!(std::fs::read(store.original_path(replaced)).unwrap(), b"two");
        assert!(!old_path.exists());
        assert!(!variants.exists());
    }

    #[tokio::test]
    async fn test_conflict_removes_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_memory_pool().unwrap();
        let store = ImageCacheStore::new(pool.clone(), dir.path());

        store
            .upsert("http://x/a.png", spool(b"one"), None, &validated())
            .await
            .unwrap();

        // A second first-time insert for the same URL, as a racing job would do.
        let conn = pool.get().unwrap();
        let result = store.insert_new(
            &conn,
            "http://x/a.png",
            "a.png".to_string(),
            "ffffffffffffffff".to_string(),
            &validated(),
            &mut spool(b"two"),
        );
        assert_matches!(result, Err(StoreError::Conflict(_)));

        let dirs = std::fs::read_dir(dir.path().join(BBCODE_DIR)).unwrap().count();
        assert_eq!(dirs, 1);
        assert_eq!(cached_images::count_cached_images(&conn).unwrap(), 1);
    }
}

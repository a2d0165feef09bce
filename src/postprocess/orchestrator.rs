//! One postprocess pass over one record.

use std::sync::Arc;

use agora_core::{RecordId, RecordKind};
use agora_db::models::TextRecord;
use agora_db::pool::{get_conn, DbPool};
use agora_db::queries::text_records;
use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::locks::RecordLocks;
use crate::bbcode::{extract_image_urls, BbcodeRenderer, Render};
use crate::config::Config;
use crate::images::{
    FetchError, ImageCacheStore, ImageFetcher, ImageValidator, StoreError, UpsertOutcome,
    ValidationError,
};

/// Job-level failure. Per-URL problems never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PostprocessError {
    #[error("{kind} {id} not found")]
    RecordNotFound { kind: RecordKind, id: RecordId },

    #[error("database error: {0}")]
    Database(#[from] agora_core::Error),

    #[error("re-render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Re-render attempts before leaving a record whose raw text keeps changing
/// to its next pass.
const RERENDER_ATTEMPTS: usize = 3;

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostprocessReport {
    /// Distinct image URLs found in the raw text.
    pub urls: usize,
    /// URLs whose image was created or replaced by this pass.
    pub cached: usize,
    /// URLs already cached with identical bytes.
    pub unchanged: usize,
    /// URLs skipped because a stage failed.
    pub failed: usize,
    /// Whether the rendered field was rewritten.
    pub rerendered: bool,
}

/// A per-URL failure tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
enum ImageFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Validate(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImageFailure {
    fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Validate(_) => "validate",
            Self::Store(_) => "store",
        }
    }
}

/// Mirrors the images of a record and refreshes its rendered text.
pub struct Postprocessor {
    pool: DbPool,
    fetcher: ImageFetcher,
    validator: ImageValidator,
    store: ImageCacheStore,
    renderer: Arc<dyn Render>,
    locks: RecordLocks,
}

impl Postprocessor {
    pub fn new(
        pool: DbPool,
        fetcher: ImageFetcher,
        validator: ImageValidator,
        store: ImageCacheStore,
        renderer: Arc<dyn Render>,
    ) -> Self {
        Self {
            pool,
            fetcher,
            validator,
            store,
            renderer,
            locks: RecordLocks::new(),
        }
    }

    /// Wire up the standard pipeline from configuration.
    pub fn from_config(config: &Config, pool: DbPool) -> anyhow::Result<Self> {
        let fetcher =
            ImageFetcher::new(&config.cache).context("Failed to build image HTTP client")?;
        let validator = ImageValidator::from_config(&config.cache);
        let store = ImageCacheStore::new(pool.clone(), config.storage.media_dir.clone());
        let renderer = Arc::new(BbcodeRenderer::new(pool.clone()));

        Ok(Self::new(pool, fetcher, validator, store, renderer))
    }

    pub fn renderer(&self) -> &Arc<dyn Render> {
        &self.renderer
    }

    pub fn store(&self) -> &ImageCacheStore {
        &self.store
    }

    /// Run one pass over the record `(kind, id)`.
    ///
    /// Holds the record's lock for the whole pass, so concurrent passes over
    /// the same record run one after the other.
    pub async fn postprocess(
        &self,
        kind: RecordKind,
        id: RecordId,
    ) -> Result<PostprocessReport, PostprocessError> {
        let _guard = self.locks.acquire(kind, id).await;

        let record = {
            let conn = get_conn(&self.pool)?;
            text_records::get_record(&conn, kind, id)?
        };
        let Some(record) = record else {
            return Err(PostprocessError::RecordNotFound { kind, id });
        };

        self.postprocess_field(&record).await
    }

    async fn postprocess_field(
        &self,
        record: &TextRecord,
    ) -> Result<PostprocessReport, PostprocessError> {
        let (kind, id) = (record.kind, record.id);
        let urls = extract_image_urls(&record.raw);
        let mut report = PostprocessReport {
            urls: urls.len(),
            ..Default::default()
        };

        if urls.is_empty() {
            debug!(kind = %kind, id = %id, "No images referenced; nothing to do");
            return Ok(report);
        }

        let mut needs_render = false;
        for url in &urls {
            match self.cache_image(url).await {
                Ok(outcome) => {
                    let image = outcome.image();
                    if outcome.is_fresh() {
                        info!(
                            kind = %kind,
                            id = %id,
                            url = %url,
                            path = %self.store.original_path(image).display(),
                            "Cached image"
                        );
                        report.cached += 1;
                        needs_render = true;
                    } else {
                        debug!(kind = %kind, id = %id, url = %url, "Image unchanged");
                        report.unchanged += 1;
                    }
                }
                Err(ImageFailure::Store(StoreError::Conflict(_))) => {
                    info!(kind = %kind, id = %id, url = %url, "Image cached concurrently; skipping");
                    report.unchanged += 1;
                }
                Err(e) => {
                    warn!(
                        kind = %kind,
                        id = %id,
                        url = %url,
                        stage = e.stage(),
                        error = %e,
                        "Failed to cache image; skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        if needs_render {
            report.rerendered = self.rerender(kind, id).await?;
        }

        info!(
            kind = %kind,
            id = %id,
            urls = report.urls,
            cached = report.cached,
            unchanged = report.unchanged,
            failed = report.failed,
            rerendered = report.rerendered,
            "Postprocess finished"
        );

        Ok(report)
    }

    /// Re-render the record on the blocking pool; rendering queries the cache.
    async fn rerender(&self, kind: RecordKind, id: RecordId) -> Result<bool, PostprocessError> {
        let pool = self.pool.clone();
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || rerender_blocking(&pool, renderer.as_ref(), kind, id))
            .await?
    }

    /// Fetch, validate and store one URL.
    async fn cache_image(&self, url: &str) -> Result<UpsertOutcome, ImageFailure> {
        let fetched = self.fetcher.fetch(url).await?;
        let (buffer, validated) = self.validator.validate(fetched.buffer).await?;
        let outcome = self
            .store
            .upsert(url, buffer, fetched.suggested_name.as_deref(), &validated)
            .await?;
        Ok(outcome)
    }
}

/// Render the record's current raw text and store the result.
///
/// The write only lands while that raw text is still current; an edit in
/// between means rendering again from the edited text.
fn rerender_blocking(
    pool: &DbPool,
    renderer: &dyn Render,
    kind: RecordKind,
    id: RecordId,
) -> Result<bool, PostprocessError> {
    for _ in 0..RERENDER_ATTEMPTS {
        let current = {
            let conn = get_conn(pool)?;
            text_records::get_record(&conn, kind, id)?
        };
        let Some(current) = current else {
            warn!(kind = %kind, id = %id, "Record disappeared before re-render");
            return Ok(false);
        };

        let rendered = renderer.render(&current.raw);
        let conn = get_conn(pool)?;
        if text_records::update_rendered_if_raw(&conn, kind, id, &current.raw, &rendered)? {
            return Ok(true);
        }
        debug!(kind = %kind, id = %id, "Raw text changed while rendering; retrying");
    }

    warn!(
        kind = %kind,
        id = %id,
        attempts = RERENDER_ATTEMPTS,
        "Raw text kept changing; leaving re-render to the next pass"
    );
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use agora_db::pool::init_memory_pool;
    use assert_matches::assert_matches;

    fn postprocessor(pool: DbPool, media_dir: &std::path::Path) -> Postprocessor {
        let cache = CacheConfig::default();
        Postprocessor::new(
            pool.clone(),
            ImageFetcher::new(&cache).unwrap(),
            ImageValidator::from_config(&cache),
            ImageCacheStore::new(pool.clone(), media_dir),
            Arc::new(BbcodeRenderer::new(pool)),
        )
    }

    #[tokio::test]
    async fn test_missing_record_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let pp = postprocessor(init_memory_pool().unwrap(), dir.path());
        let id = RecordId::new();

        assert_matches!(
            pp.postprocess(RecordKind::NewsItem, id).await,
            Err(PostprocessError::RecordNotFound { kind: RecordKind::NewsItem, id: missing }) if missing == id
        );
    }

    #[tokio::test]
    async fn test_no_images_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_memory_pool().unwrap();
        let record = {
            let conn = pool.get().unwrap();
            text_records::insert_record(&conn, RecordKind::ForumPost, "plain", "kept").unwrap()
        };
        let pp = postprocessor(pool.clone(), dir.path());

        let report = pp.postprocess(RecordKind::ForumPost, record.id).await.unwrap();
        assert_eq!(report, PostprocessReport::default());

        let conn = pool.get().unwrap();
        let after = text_records::get_record(&conn, RecordKind::ForumPost, record.id)
            .unwrap()
            .unwrap();
        assert_eq!(after.rendered, "kept");
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_memory_pool().unwrap();
        let record = {
            let conn = pool.get().unwrap();
            text_records::insert_record(
                &conn,
                RecordKind::ForumUser,
                "[img]ftp://example.com/a.png[/img]",
                "old",
            )
            .unwrap()
        };
        let pp = postprocessor(pool.clone(), dir.path());

        let report = pp.postprocess(RecordKind::ForumUser, record.id).await.unwrap();
        assert_eq!(report.urls, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.rerendered);

        let conn = pool.get().unwrap();
        let after = text_records::get_record(&conn, RecordKind::ForumUser, record.id)
            .unwrap()
            .unwrap();
        assert_eq!(after.rendered, "old");
    }

    /// Edits the record the first time it is asked to render.
    struct EditingRenderer {
        pool: DbPool,
        edited: std::sync::atomic::AtomicBool,
    }

    impl Render for EditingRenderer {
        fn render(&self, raw: &str) -> String {
            if !self.edited.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let conn = self.pool.get().unwrap();
                let post = text_records::list_records(&conn, RecordKind::ForumPost).unwrap();
                text_records::update_raw(&conn, RecordKind::ForumPost, post[0].id, "NEW", "NEW")
                    .unwrap();
            }
            format!("rendered:{raw}")
        }
    }

    #[test]
    fn test_rerender_follows_concurrent_edit() {
        let pool = init_memory_pool().unwrap();
        let record = {
            let conn = pool.get().unwrap();
            text_records::insert_record(&conn, RecordKind::ForumPost, "OLD", "OLD").unwrap()
        };
        let renderer = EditingRenderer {
            pool: pool.clone(),
            edited: Default::default(),
        };

        assert!(rerender_blocking(&pool, &renderer, RecordKind::ForumPost, record.id).unwrap());

        let conn = pool.get().unwrap();
        let after = text_records::get_record(&conn, RecordKind::ForumPost, record.id)
            .unwrap()
            .unwrap();
        assert_eq!(after.raw, "NEW");
        assert_eq!(after.rendered, "rendered:NEW");
    }

    #[test]
    fn test_rerender_missing_record() {
        let pool = init_memory_pool().unwrap();
        let renderer = BbcodeRenderer::new(pool.clone());
        assert!(!rerender_blocking(&pool, &renderer, RecordKind::NewsItem, RecordId::new()).unwrap());
    }

    #[test]
    fn test_failure_stages() {
        assert_eq!(ImageFailure::from(FetchError::BadStatus(500)).stage(), "fetch");
        assert_eq!(
            ImageFailure::from(ValidationError::Corrupt("x".into())).stage(),
            "validate"
        );
        assert_eq!(
            ImageFailure::from(StoreError::Conflict("x".into())).stage(),
            "store"
        );
    }
}

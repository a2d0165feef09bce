//! Saving text-bearing records.
//!
//! Every save renders the raw text immediately, so the record is displayable
//! at once, and then schedules a postprocess pass to mirror its images.

use agora_core::{RecordId, RecordKind};
use agora_db::models::TextRecord;
use agora_db::pool::{get_conn, DbPool};
use agora_db::queries::text_records;
use anyhow::{Context, Result};
use tracing::warn;

use crate::bbcode::Render;
use crate::postprocess::Dispatch;

/// Insert a new record and schedule its postprocess pass.
pub async fn create_record(
    pool: &DbPool,
    renderer: &dyn Render,
    dispatcher: &dyn Dispatch,
    kind: RecordKind,
    raw: &str,
) -> Result<TextRecord> {
    let record = {
        let conn = get_conn(pool)?;
        text_records::insert_record(&conn, kind, raw, &renderer.render(raw))
            .with_context(|| format!("Failed to create {kind}"))?
    };

    schedule(dispatcher, kind, record.id).await;
    Ok(record)
}

/// Replace a record's raw text and schedule its postprocess pass.
pub async fn edit_record(
    pool: &DbPool,
    renderer: &dyn Render,
    dispatcher: &dyn Dispatch,
    kind: RecordKind,
    id: RecordId,
    raw: &str,
) -> Result<TextRecord> {
    let record = {
        let conn = get_conn(pool)?;
        let found = text_records::update_raw(&conn, kind, id, raw, &renderer.render(raw))
            .with_context(|| format!("Failed to update {kind} {id}"))?;
        if !found {
            anyhow::bail!("{kind} {id} not found");
        }
        text_records::get_record(&conn, kind, id)?
            .with_context(|| format!("{kind} {id} vanished after update"))?
    };

    schedule(dispatcher, kind, id).await;
    Ok(record)
}

/// The save already committed, so a dispatch failure only costs the mirror.
async fn schedule(dispatcher: &dyn Dispatch, kind: RecordKind, id: RecordId) {
    if let Err(e) = dispatcher.dispatch(kind, id).await {
        warn!(kind = %kind, id = %id, error = %e, "Failed to schedule postprocess");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbcode::BbcodeRenderer;
    use crate::postprocess::testing::{ClosedDispatch, RecordingDispatch};
    use agora_db::pool::init_memory_pool;

    #[tokio::test]
    async fn test_create_renders_and_dispatches() {
        let pool = init_memory_pool().unwrap();
        let renderer = BbcodeRenderer::new(pool.clone());
        let dispatch = RecordingDispatch::default();

        let record = create_record(&pool, &renderer, &dispatch, RecordKind::NewsItem, "a\nb")
            .await
            .unwrap();
        assert_eq!(record.rendered, "a<br>b");
        assert_eq!(
            *dispatch.calls.lock().unwrap(),
            vec![(RecordKind::NewsItem, record.id)]
        );
    }

    #[tokio::test]
    async fn test_edit_dispatches_again() {
        let pool = init_memory_pool().unwrap();
        let renderer = BbcodeRenderer::new(pool.clone());
        let dispatch = RecordingDispatch::default();

        let record = create_record(&pool, &renderer, &dispatch, RecordKind::ForumUser, "sig")
            .await
            .unwrap();
        let edited = edit_record(
            &pool,
            &renderer,
            &dispatch,
            RecordKind::ForumUser,
            record.id,
            "new <sig>",
        )
        .await
        .unwrap();

        assert_eq!(edited.raw, "new <sig>");
        assert_eq!(edited.rendered, "new &lt;sig&gt;");
        assert_eq!(dispatch.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_edit_missing_record_fails() {
        let pool = init_memory_pool().unwrap();
        let renderer = BbcodeRenderer::new(pool.clone());
        let dispatch = RecordingDispatch::default();

        let result = edit_record(
            &pool,
            &renderer,
            &dispatch,
            RecordKind::ForumPost,
            RecordId::new(),
            "x",
        )
        .await;
        assert!(result.is_err());
        assert!(dispatch.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_saved_record() {
        let pool = init_memory_pool().unwrap();
        let renderer = BbcodeRenderer::new(pool.clone());

        let record = create_record(&pool, &renderer, &ClosedDispatch, RecordKind::ForumPost, "hi")
            .await
            .unwrap();

        let conn = pool.get().unwrap();
        assert!(text_records::get_record(&conn, RecordKind::ForumPost, record.id)
            .unwrap()
            .is_some());
    }
}

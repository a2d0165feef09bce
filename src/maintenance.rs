//! Bulk operations over every text-bearing record.

use agora_core::{RecordId, RecordKind};
use agora_db::pool::{get_conn, DbPool};
use agora_db::queries::text_records;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::bbcode::{extract_image_urls, find_linked_images, unwrap_linked_images, Render};
use crate::postprocess::Dispatch;

/// An image URL found in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlMatch {
    pub kind: RecordKind,
    pub id: RecordId,
    pub url: String,
}

/// Schedule a postprocess pass for every record of every kind.
///
/// Returns the number of records submitted.
pub async fn trigger_all(pool: &DbPool, dispatcher: &dyn Dispatch) -> Result<usize> {
    let mut submitted = 0;

    for kind in RecordKind::ALL {
        let ids = {
            let conn = get_conn(pool)?;
            text_records::list_record_ids(&conn, kind)
                .with_context(|| format!("Failed to list {kind} records"))?
        };

        for id in ids {
            dispatcher.dispatch(kind, id).await?;
            submitted += 1;
        }
        info!(kind = %kind, "Submitted postprocess jobs");
    }

    Ok(submitted)
}

/// Re-render every record's rendered field from its raw text.
///
/// Each kind is rewritten inside one transaction. Returns the number of
/// records rewritten.
pub fn regenerate_all(pool: &DbPool, renderer: &dyn Render) -> Result<usize> {
    let mut conn = get_conn(pool)?;
    let mut total = 0;

    for kind in RecordKind::ALL {
        let tx = conn
            .transaction()
            .context("Failed to begin transaction")?;

        let records = text_records::list_records(&tx, kind)?;
        for record in &records {
            text_records::update_rendered(&tx, kind, record.id, &renderer.render(&record.raw))?;
        }

        tx.commit().context("Failed to commit regenerated records")?;
        info!(kind = %kind, count = records.len(), "Regenerated rendered text");
        total += records.len();
    }

    Ok(total)
}

/// Find image URLs containing `fragment` across all records.
pub fn find_urls(pool: &DbPool, fragment: &str) -> Result<Vec<UrlMatch>> {
    let conn = get_conn(pool)?;
    let mut matches = Vec::new();

    for kind in RecordKind::ALL {
        for record in text_records::list_records(&conn, kind)? {
            matches.extend(
                extract_image_urls(&record.raw)
                    .into_iter()
                    .filter(|url| url.contains(fragment))
                    .map(|url| UrlMatch {
                        kind,
                        id: record.id,
                        url,
                    }),
            );
        }
    }

    Ok(matches)
}

/// Rewrite `[url=X][img]Y[/img][/url]` to `[img]X[/img]` in every record.
///
/// Rewritten records are saved as edits and scheduled for postprocessing,
/// so the linked images get mirrored. Returns the number of records changed.
pub async fn clean_url_images(
    pool: &DbPool,
    renderer: &dyn Render,
    dispatcher: &dyn Dispatch,
) -> Result<usize> {
    let mut changed = Vec::new();

    {
        let conn = get_conn(pool)?;
        for kind in RecordKind::ALL {
            for record in text_records::list_records(&conn, kind)? {
                let links = find_linked_images(&record.raw);
                if links.is_empty() {
                    continue;
                }

                let raw = unwrap_linked_images(&record.raw);
                text_records::update_raw(&conn, kind, record.id, &raw, &renderer.render(&raw))?;
                info!(kind = %kind, id = %record.id, links = links.len(), "Unwrapped linked images");
                changed.push((kind, record.id));
            }
        }
    }

    for (kind, id) in &changed {
        if let Err(e) = dispatcher.dispatch(*kind, *id).await {
            warn!(kind = %kind, id = %id, error = %e, "Failed to schedule postprocess");
        }
    }

    Ok(changed.len())
}

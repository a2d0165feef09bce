//! Postprocess trigger API.

use agora_core::{RecordId, RecordKind};
use agora_db::queries::text_records;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use super::{error_response, AppContext};

/// Create API routes.
pub fn api_routes() -> Router<AppContext> {
    Router::new().route("/postprocess/:kind/:record_id", post(trigger_postprocess))
}

/// Queue a postprocess pass for one record.
///
/// Returns 202 once the job is queued; the pass itself runs in the background.
async fn trigger_postprocess(
    State(ctx): State<AppContext>,
    Path((kind, record_id)): Path<(String, String)>,
) -> Response {
    let kind = match kind.parse::<RecordKind>() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let Ok(id) = record_id.parse::<RecordId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid record ID");
    };

    let exists = ctx
        .pool
        .get()
        .map_err(|e| e.to_string())
        .and_then(|conn| {
            text_records::get_record(&conn, kind, id).map_err(|e| e.to_string())
        });
    match exists {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, format!("{kind} not found")),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }

    if let Err(e) = ctx.dispatcher.dispatch(kind, id).await {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "queued",
            "kind": kind,
            "id": id,
        })),
    )
        .into_response()
}

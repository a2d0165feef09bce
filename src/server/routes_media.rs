//! Serving of mirrored BBCode images.
//!
//! `GET /media/bbcode/:id/:size` streams the original or a derived size
//! variant. Variants are generated on first request.

use agora_core::CachedImageId;
use agora_db::queries::cached_images;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;

use super::{error_response, AppContext};
use crate::images::{content_type_for, ensure_variant, ImageSize};

/// Create media routes.
pub fn media_routes() -> Router<AppContext> {
    Router::new().route("/bbcode/:image_id/:size", get(serve_image))
}

/// Serve a cached image at the requested size.
async fn serve_image(
    State(ctx): State<AppContext>,
    Path((image_id, size)): Path<(String, String)>,
) -> Response {
    let Ok(id) = image_id.parse::<CachedImageId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid image ID");
    };

    let Ok(size) = size.parse::<ImageSize>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid size. Valid values: original, medium, small",
        );
    };

    let image = match ctx
        .pool
        .get()
        .map_err(|e| e.to_string())
        .and_then(|conn| cached_images::get_cached_image(&conn, id).map_err(|e| e.to_string()))
    {
        Ok(Some(image)) => image,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Image not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let original = ctx.store.original_path(&image);
    if !original.exists() {
        return error_response(StatusCode::NOT_FOUND, "Image file not found on disk");
    }

    let path = match tokio::task::spawn_blocking(move || ensure_variant(&original, size)).await {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            tracing::warn!(image_id = %id, size = %size, error = %e, "Failed to prepare image variant");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to prepare image");
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "Image file not found on disk"),
    };

    let body = Body::from_stream(ReaderStream::new(file));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            // Re-fetches replace assets in place, so this URL is not immutable.
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
        .into_response()
}

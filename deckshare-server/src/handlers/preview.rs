use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use deckshare_core::PreviewOutcome;
use tokio::fs;
use tracing::debug;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

const PREVIEW_CACHE_CONTROL: &str = "private, max-age=300";

/// GET /preview/files/{*path}
///
/// `200 image/jpeg` once generated, `204` when the file cannot be
/// previewed, `504` when generation outlasts the preview timeout.
pub async fn preview(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let Some(thumbnails) = state.thumbnails() else {
        return Err(AppError::not_found("Thumbnails are disabled"));
    };

    let target = state.resolve(&path)?;
    if !fs::metadata(&target).await?.is_file() {
        return Err(AppError::not_found("Not a file"));
    }

    let timeout = state.config().thumbnails.preview_timeout;
    match thumbnails
        .preview(&target, tokio::time::sleep(timeout))
        .await
    {
        PreviewOutcome::Ready(thumbnail) => Ok((
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, PREVIEW_CACHE_CONTROL),
            ],
            thumbnail.jpeg().to_vec(),
        )
            .into_response()),
        PreviewOutcome::Failed(failure) => {
            debug!(path = %target.display(), %failure, "no preview");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        PreviewOutcome::Cancelled => Err(AppError::gateway_timeout(
            "Timed out waiting for the thumbnail",
        )),
        PreviewOutcome::Unavailable => Err(AppError::unavailable(
            "Thumbnail workers are shutting down",
        )),
    }
}

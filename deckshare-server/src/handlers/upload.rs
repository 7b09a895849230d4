use std::path::Path;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use deckshare_core::{ChunkOutcome, UploadChunk, UploadError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const UPLOAD_INCOMPLETE: &str = "Upload-Incomplete";
pub const FILE_CHECKSUM: &str = "X-File-Checksum";

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub path: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub received: u64,
    pub complete: bool,
    /// Share-relative path of the finished file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    pub filehash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /upload?path=<dir>&filename=<name>
pub async fn upload_chunk(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadResponse>> {
    if !state.config().uploads.enabled {
        return Err(AppError::unauthorized("Uploads are disabled"));
    }

    let offset = required_header(&headers, UPLOAD_OFFSET)?
        .parse::<u64>()
        .map_err(|_| AppError::bad_request("Upload-Offset must be a byte count"))?;
    let more = match required_header(&headers, UPLOAD_INCOMPLETE)? {
        "true" => true,
        "false" => false,
        other => {
            return Err(AppError::bad_request(format!(
                "Upload-Incomplete must be true or false, got {other:?}"
            )));
        }
    };
    let checksum = required_header(&headers, FILE_CHECKSUM)?;
    let directory = query
        .path
        .as_deref()
        .filter(|path| !path.is_empty())
        .ok_or(UploadError::MissingField("path"))?;
    let destination = state.resolve(directory)?;

    let outcome = state
        .uploads()
        .receive(UploadChunk {
            checksum,
            offset,
            more,
            destination: &destination,
            file_name: query.filename.as_deref().filter(|name| !name.is_empty()),
            body: &body,
        })
        .await?;

    let response = match outcome {
        ChunkOutcome::Accepted { received } => UploadResponse {
            received,
            complete: false,
            path: None,
        },
        ChunkOutcome::Completed { path, size } => {
            let relative = share_relative(state.config().root(), &path);
            info!(path = %relative, size, "upload completed");
            UploadResponse {
                received: size,
                complete: true,
                path: Some(relative),
            }
        }
    };
    Ok(Json(response))
}

/// GET|POST /cancel_upload?filehash=<checksum>
pub async fn cancel_upload(
    State(state): State<AppState>,
    Query(query): Query<CancelQuery>,
) -> AppResult<Json<CancelResponse>> {
    if !state.config().uploads.enabled {
        return Err(AppError::method_not_allowed("Uploads are disabled"));
    }

    let checksum = query
        .filehash
        .as_deref()
        .filter(|hash| !hash.is_empty())
        .ok_or(UploadError::MissingField("filehash"))?;
    let cancelled = state.uploads().cancel(checksum).await?;
    Ok(Json(CancelResponse { cancelled }))
}

fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> AppResult<&'a str> {
    let value = headers
        .get(name)
        .ok_or(UploadError::MissingField(name))?
        .to_str()
        .map_err(|_| AppError::bad_request(format!("{name} is not valid text")))?
        .trim();
    if value.is_empty() {
        return Err(UploadError::MissingField(name).into());
    }
    Ok(value)
}

fn share_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    format!("/{}", relative.to_string_lossy())
}

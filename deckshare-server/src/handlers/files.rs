use std::{
    path::{Path as FsPath, PathBuf},
    time::UNIX_EPOCH,
};

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use deckshare_core::classify;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Listing flags. Only the literal `true` turns a flag on; any other value
/// leaves it off instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    #[serde(default, deserialize_with = "flag")]
    pub reverse: bool,
    #[serde(default, deserialize_with = "flag")]
    pub hidden: bool,
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(value == "true")
}

/// JSON rendering of one directory under the share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Share-relative path of the directory, always starting with `/`.
    pub path: String,
    pub parent: Option<String>,
    pub entries: Vec<ListingEntry>,
    pub reverse: bool,
    pub show_hidden: bool,
    pub allow_uploads: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Seconds since the Unix epoch.
    pub modified: Option<u64>,
    pub path: String,
    /// Preview URL for images and videos.
    pub thumbnail: Option<String>,
}

/// GET / - send browsers to the share root.
pub async fn root_redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/files/")]).into_response()
}

/// GET /files/
pub async fn browse_root(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
    request: Request,
) -> AppResult<Response> {
    serve_path(&state, "", &query, request).await
}

/// GET /files/{*path} - a directory listing or a file download.
pub async fn browse(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ListingQuery>,
    request: Request,
) -> AppResult<Response> {
    serve_path(&state, &path, &query, request).await
}

async fn serve_path(
    state: &AppState,
    relative: &str,
    query: &ListingQuery,
    request: Request,
) -> AppResult<Response> {
    let target = state.resolve(relative)?;
    let metadata = fs::metadata(&target).await?;

    if metadata.is_dir() {
        let listing = list_directory(state, &target, query).await?;
        prefetch(state, &target, &listing);
        Ok(Json(listing).into_response())
    } else {
        download(&target, request).await
    }
}

async fn list_directory(
    state: &AppState,
    dir: &FsPath,
    query: &ListingQuery,
) -> AppResult<Listing> {
    let segments = share_segments(state.config().root(), dir);
    let base = segments.join("/");
    let display_path = format!("/{base}");
    let parent = (!segments.is_empty())
        .then(|| format!("/{}", segments[..segments.len() - 1].join("/")));

    let mut read_dir = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && !query.hidden {
            continue;
        }

        // follows symlinks; dangling ones are skipped
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(entry = %entry.path().display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };

        let is_dir = metadata.is_dir();
        let path = if base.is_empty() {
            format!("/{name}")
        } else {
            format!("/{base}/{name}")
        };
        let thumbnail = (!is_dir
            && state.thumbnails().is_some()
            && classify(&entry.path()).is_previewable())
        .then(|| preview_url(&segments, &name));

        entries.push(ListingEntry {
            size: if is_dir { 0 } else { metadata.len() },
            is_dir,
            modified: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|age| age.as_secs()),
            path,
            thumbnail,
            name,
        });
    }

    sort_entries(&mut entries, query.reverse);

    Ok(Listing {
        path: display_path,
        parent,
        entries,
        reverse: query.reverse,
        show_hidden: query.hidden,
        allow_uploads: state.config().uploads.enabled,
    })
}

/// Directories first, then case-insensitive name order; `reverse` flips
/// the name order inside each group.
fn sort_entries(entries: &mut [ListingEntry], reverse: bool) {
    entries.sort_by(|a, b| {
        b.is_dir.cmp(&a.is_dir).then_with(|| {
            let by_name = a.name.to_lowercase().cmp(&b.name.to_lowercase());
            if reverse { by_name.reverse() } else { by_name }
        })
    });
}

fn prefetch(state: &AppState, dir: &FsPath, listing: &Listing) {
    let Some(thumbnails) = state.thumbnails() else {
        return;
    };
    let paths: Vec<PathBuf> = listing
        .entries
        .iter()
        .filter(|entry| !entry.is_dir)
        .map(|entry| dir.join(&entry.name))
        .collect();

    match thumbnails.start_batch(paths) {
        Ok(batch) => debug!(batch = batch.id(), dir = %dir.display(), "thumbnail batch started"),
        Err(err) => warn!(error = %err, "thumbnail batch rejected"),
    }
}

async fn download(path: &FsPath, request: Request) -> AppResult<Response> {
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let mut response = response.map(Body::new);

    if response.status().is_success() {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let disposition = HeaderValue::from_str(&content_disposition(&name))
            .map_err(|_| AppError::internal("Invalid file name"))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

/// `attachment` with an ASCII fallback and the RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

fn share_segments(root: &FsPath, dir: &FsPath) -> Vec<String> {
    dir.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn preview_url(segments: &[String], name: &str) -> String {
    let mut url = String::from("/preview/files");
    for segment in segments.iter().map(String::as_str).chain([name]) {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            size: 0,
            is_dir,
            modified: None,
            path: format!("/{name}"),
            thumbnail: None,
        }
    }

    fn names(entries: &[ListingEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn listing_query(uri: &str) -> ListingQuery {
        let uri: axum::http::Uri = uri.parse().unwrap();
        Query::<ListingQuery>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn listing_flags_are_lenient() {
        let on = listing_query("/files/?reverse=true&hidden=true");
        assert!(on.reverse && on.hidden);

        let junk = listing_query("/files/?reverse=foo&hidden=1");
        assert!(!junk.reverse && !junk.hidden);

        let bare = listing_query("/files/?reverse&hidden=");
        assert!(!bare.reverse && !bare.hidden);

        let absent = listing_query("/files/");
        assert!(!absent.reverse && !absent.hidden);
    }

    #[test]
    fn directories_sort_first_case_insensitively() {
        let mut entries = vec![
            entry("beta.png", false),
            entry("Zed", true),
            entry("Alpha.txt", false),
            entry("apps", true),
        ];
        sort_entries(&mut entries, false);
        assert_eq!(names(&entries), ["apps", "Zed", "Alpha.txt", "beta.png"]);

        sort_entries(&mut entries, true);
        assert_eq!(names(&entries), ["Zed", "apps", "beta.png", "Alpha.txt"]);
    }

    #[test]
    fn preview_urls_escape_each_segment() {
        let segments = vec!["My Pictures".to_string()];
        assert_eq!(
            preview_url(&segments, "a#1.png"),
            "/preview/files/My%20Pictures/a%231.png"
        );
    }

    #[test]
    fn disposition_keeps_a_safe_fallback() {
        assert_eq!(
            content_disposition("r\u{e9}sum\u{e9} \"v2\".pdf"),
            "attachment; filename=\"r_sum_ _v2_.pdf\"; \
             filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"
        );
    }
}

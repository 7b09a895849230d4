use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{files, preview, upload},
    infra::{activity::track_activity, app_state::AppState},
};

pub fn create_app(state: AppState) -> Router {
    let max_chunk = state.config().uploads.max_chunk;
    let activity = Arc::clone(state.activity());

    Router::new()
        .route("/", get(files::root_redirect))
        .route("/files", get(files::browse_root))
        .route("/files/", get(files::browse_root))
        .route("/files/{*path}", get(files::browse))
        .route("/preview/files/{*path}", get(preview::preview))
        .route(
            "/upload",
            post(upload::upload_chunk).layer(DefaultBodyLimit::max(max_chunk)),
        )
        .route(
            "/cancel_upload",
            get(upload::cancel_upload).post(upload::cancel_upload),
        )
        .layer(middleware::from_fn_with_state(activity, track_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

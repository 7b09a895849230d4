//! HTTP front of deckshare: directory listings, downloads, thumbnail
//! previews and resumable uploads over the core services.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::{app_context::AppContext, app_state::AppState};
pub use routes::create_app;

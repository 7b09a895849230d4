use std::{fmt, path::PathBuf, sync::Arc};

use deckshare_config::Config;
use deckshare_core::{ThumbnailService, UploadRegistry, media::resolve_within};

use super::{
    activity::ActivityTracker,
    app_context::AppContext,
    errors::{AppError, AppResult},
};

/// Handle cloned into every request.
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn config(&self) -> &Config {
        self.context.config()
    }

    pub fn thumbnails(&self) -> Option<&Arc<ThumbnailService>> {
        self.context.thumbnails()
    }

    pub fn uploads(&self) -> &Arc<UploadRegistry> {
        self.context.uploads()
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        self.context.activity()
    }

    /// Map a request path onto the share, refusing anything that would
    /// land outside it.
    pub fn resolve(&self, relative: &str) -> AppResult<PathBuf> {
        resolve_within(self.config().root(), relative).ok_or_else(|| {
            AppError::bad_request(format!("path {relative:?} is outside the share"))
        })
    }
}

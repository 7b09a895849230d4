use std::{fmt, sync::Arc};

use deckshare_config::Config;
use deckshare_core::{
    MediaCodec, SweepReport, ThumbnailCodec, ThumbnailService, UploadRegistry,
};
use tracing::info;

use super::activity::ActivityTracker;

/// Long-lived services, created once at startup and torn down after the
/// HTTP server stops.
pub struct AppContext {
    config: Arc<Config>,
    thumbnails: Option<Arc<ThumbnailService>>,
    uploads: Arc<UploadRegistry>,
    activity: Arc<ActivityTracker>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("root", &self.config.share.root)
            .field("thumbnails", &self.thumbnails.is_some())
            .field("uploads", &self.uploads)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Wire the default codec. Must run inside the Tokio runtime.
    pub fn new(config: Arc<Config>) -> Self {
        let codec = MediaCodec::new(config.thumbnails.codec_settings());
        Self::with_codec(config, Arc::new(codec))
    }

    pub fn with_codec(
        config: Arc<Config>,
        codec: Arc<dyn ThumbnailCodec>,
    ) -> Self {
        let thumbnails = config.thumbnails.enabled.then(|| {
            Arc::new(ThumbnailService::start(
                codec,
                config.thumbnails.pool_settings(),
                config.thumbnails.failure_policy,
            ))
        });
        let uploads = Arc::new(UploadRegistry::new(config.uploads.max_chunk));

        Self {
            config,
            thumbnails,
            uploads,
            activity: Arc::new(ActivityTracker::new()),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn thumbnails(&self) -> Option<&Arc<ThumbnailService>> {
        self.thumbnails.as_ref()
    }

    pub fn uploads(&self) -> &Arc<UploadRegistry> {
        &self.uploads
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Remove partial uploads nobody is going to finish.
    pub async fn sweep_orphans(&self) -> SweepReport {
        self.uploads.sweep_orphans().await
    }

    /// Final teardown once the HTTP server has stopped: sweep uploads left
    /// behind by requests that were still draining, then stop thumbnail
    /// work.
    pub async fn shutdown(&self) -> SweepReport {
        let report = self.sweep_orphans().await;
        if let Some(thumbnails) = &self.thumbnails {
            thumbnails.shutdown().await;
        }
        info!(
            deleted = report.deleted,
            dropped = report.dropped,
            failed = report.failed,
            "application context shut down"
        );
        report
    }
}

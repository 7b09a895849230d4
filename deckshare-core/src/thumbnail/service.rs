use std::{future::Future, path::Path, sync::Arc};

use tracing::{debug, instrument};

use super::{
    BatchDispatcher, BatchHandle, CacheStats, FailurePolicy, Job, PoolClosed,
    PoolSettings, Request, Thumbnail, ThumbnailCache, ThumbnailCodec,
    ThumbnailOutcome, WaitOutcome, WorkerPool,
};
use crate::{error::ThumbnailFailure, media::classify};

/// Answer to a single preview request.
#[derive(Debug, Clone)]
pub enum PreviewOutcome {
    Ready(Thumbnail),
    /// Definitive failure for this path.
    Failed(ThumbnailFailure),
    /// The caller's cancellation fired first. Generation, if started,
    /// carries on for other readers.
    Cancelled,
    /// The worker pool is shut down.
    Unavailable,
}

impl From<ThumbnailOutcome> for PreviewOutcome {
    fn from(outcome: ThumbnailOutcome) -> Self {
        match outcome {
            Ok(thumbnail) => PreviewOutcome::Ready(thumbnail),
            Err(failure) => PreviewOutcome::Failed(failure),
        }
    }
}

/// Cache, worker pool and batch dispatcher wired together.
#[derive(Debug)]
pub struct ThumbnailService {
    cache: ThumbnailCache,
    pool: Arc<WorkerPool>,
    dispatcher: BatchDispatcher,
}

impl ThumbnailService {
    /// Start the worker pool on the current runtime.
    pub fn start(
        codec: Arc<dyn ThumbnailCodec>,
        pool: PoolSettings,
        policy: FailurePolicy,
    ) -> Self {
        let cache = ThumbnailCache::new(policy);
        let pool = Arc::new(WorkerPool::start(pool, cache.clone(), codec));
        let dispatcher = BatchDispatcher::new(Arc::clone(&pool), cache.clone());
        Self {
            cache,
            pool,
            dispatcher,
        }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Prefetch previews for a directory's entries, superseding the
    /// previous batch.
    pub fn start_batch<I>(&self, paths: I) -> Result<BatchHandle, PoolClosed>
    where
        I: IntoIterator<Item = std::path::PathBuf>,
    {
        self.dispatcher.start_batch(paths)
    }

    /// Serve one preview: a cached outcome, a wait on the in-flight
    /// generation, or an on-demand job when nothing is in flight.
    ///
    /// Unsupported files fail immediately and are not cached. `cancel`
    /// bounds how long this caller waits; it never stops the generation
    /// itself.
    #[instrument(level = "debug", skip(self, cancel), fields(path = %path.display()))]
    pub async fn preview<F>(&self, path: &Path, cancel: F) -> PreviewOutcome
    where
        F: Future<Output = ()>,
    {
        let kind = classify(path);
        if !kind.is_previewable() {
            return PreviewOutcome::Failed(ThumbnailFailure::NotApplicable(
                kind.to_string(),
            ));
        }

        tokio::pin!(cancel);
        loop {
            let handle = match self.cache.request(path) {
                Request::Ready(outcome) => return outcome.into(),
                Request::Waiting(handle) => handle,
                Request::Owner(ticket) => {
                    tokio::select! {
                        biased;
                        () = cancel.as_mut() => {
                            // Dropping the unsent ticket releases the path
                            return PreviewOutcome::Cancelled;
                        }
                        sent = self.pool.submit(Job::Owned(ticket)) => {
                            if sent.is_err() {
                                return PreviewOutcome::Unavailable;
                            }
                        }
                    }
                    debug!("on-demand thumbnail job queued");
                    continue;
                }
            };

            match handle.wait(cancel.as_mut()).await {
                WaitOutcome::Ready(outcome) => return outcome.into(),
                WaitOutcome::Cancelled => return PreviewOutcome::Cancelled,
                WaitOutcome::Abandoned => {
                    debug!("owner gave up, retrying");
                }
            }
        }
    }

    /// Stop batches, drain queued jobs and join the workers.
    pub async fn shutdown(&self) {
        self.dispatcher.cancel_current();
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use super::*;
    use crate::thumbnail::testing::CountingCodec;

    fn service(codec: Arc<CountingCodec>) -> ThumbnailService {
        ThumbnailService::start(
            codec,
            PoolSettings::default(),
            FailurePolicy::Sticky,
        )
    }

    #[tokio::test]
    async fn concurrent_previews_share_one_generation() {
        let (codec, mut started) = CountingCodec::gated();
        let codec = Arc::new(codec);
        let service = Arc::new(service(codec.clone()));
        let path = PathBuf::from("/share/photo.jpg");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                let path = path.clone();
                tokio::spawn(async move {
                    service.preview(&path, std::future::pending()).await
                })
            })
            .collect();

        assert_eq!(started.recv().await.unwrap(), path);
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.stats().waiters < 16 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        codec.release();

        let mut bodies = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                PreviewOutcome::Ready(thumb) => bodies.push(thumb),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(codec.calls_for(&path), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn timed_out_waiter_leaves_generation_running() {
        let (codec, mut started) = CountingCodec::gated();
        let codec = Arc::new(codec);
        let service = service(codec.clone());
        let path = Path::new("/share/clip.mp4");

        let early = service
            .preview(path, tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(matches!(early, PreviewOutcome::Cancelled));
        assert_eq!(started.recv().await.unwrap(), path);
        assert!(service.cache().is_pending(path));

        codec.release();
        let late = service.preview(path, std::future::pending()).await;
        assert!(matches!(late, PreviewOutcome::Ready(_)));
        assert_eq!(codec.calls_for(path), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn decode_failures_are_cached() {
        let codec = Arc::new(CountingCodec::failing());
        let service = service(codec.clone());
        let path = Path::new("/share/broken.png");

        for _ in 0..3 {
            let outcome = service.preview(path, std::future::pending()).await;
            assert!(matches!(
                outcome,
                PreviewOutcome::Failed(ThumbnailFailure::Decode(_))
            ));
        }
        assert_eq!(codec.calls_for(path), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_files_fail_without_caching() {
        let codec = Arc::new(CountingCodec::default());
        let service = service(codec.clone());

        let outcome = service
            .preview(Path::new("/share/notes.txt"), std::future::pending())
            .await;
        assert!(matches!(
            outcome,
            PreviewOutcome::Failed(ThumbnailFailure::NotApplicable(_))
        ));
        assert!(service.cache().is_empty());
        assert_eq!(codec.total_calls(), 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn preview_after_shutdown_is_unavailable() {
        let service = service(Arc::new(CountingCodec::default()));
        service.shutdown().await;

        let outcome = service
            .preview(Path::new("/share/a.png"), std::future::pending())
            .await;
        assert!(matches!(outcome, PreviewOutcome::Unavailable));
        assert!(!service.cache().is_pending(Path::new("/share/a.png")));
    }
}

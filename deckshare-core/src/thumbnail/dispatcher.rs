use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Job, PoolClosed, ThumbnailCache, WorkerPool};
use crate::media::classify;

/// Tally of one batch, available once its enqueue task has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch: u64,
    /// Previewable paths handed to the batch.
    pub candidates: usize,
    /// Paths placed on the worker queue.
    pub enqueued: usize,
    /// Paths skipped because the cache already had them.
    pub skipped: usize,
    /// A newer batch cancelled this one before it finished enqueueing.
    pub superseded: bool,
    /// The enqueue task panicked or was aborted; counts are unknown.
    pub aborted: bool,
}

/// Handle to a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: u64,
    token: CancellationToken,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the batch to stop enqueueing. Jobs already queued keep
    /// running after this returns.
    pub async fn join(self) -> BatchReport {
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    batch = self.id,
                    error = %err,
                    "thumbnail batch task died"
                );
                BatchReport {
                    batch: self.id,
                    aborted: true,
                    ..BatchReport::default()
                }
            }
        }
    }
}

/// Feeds directory listings into the worker pool, one batch at a time.
///
/// Starting a batch cancels the previous one: paths it had not yet enqueued
/// are dropped, while jobs already queued or running complete and still
/// populate the cache.
pub struct BatchDispatcher {
    pool: Arc<WorkerPool>,
    cache: ThumbnailCache,
    current: Mutex<CancellationToken>,
    next_id: AtomicU64,
}

impl fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("batches", &self.next_id.load(Ordering::Relaxed))
            .field("current_cancelled", &self.current.lock().is_cancelled())
            .finish()
    }
}

impl BatchDispatcher {
    pub fn new(pool: Arc<WorkerPool>, cache: ThumbnailCache) -> Self {
        let idle = CancellationToken::new();
        idle.cancel();
        Self {
            pool,
            cache,
            current: Mutex::new(idle),
            next_id: AtomicU64::new(0),
        }
    }

    /// Cancel whatever batch is running and start one over `paths`.
    ///
    /// Non-previewable paths are filtered out and paths the cache already
    /// holds, settled or pending, are skipped. Enqueueing happens on a
    /// spawned task so the caller never waits on queue capacity.
    pub fn start_batch<I>(&self, paths: I) -> Result<BatchHandle, PoolClosed>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let sender = self.pool.sender()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock();
            current.cancel();
            *current = token.clone();
        }

        let mut report = BatchReport {
            batch: id,
            ..BatchReport::default()
        };
        let mut pending = Vec::new();
        for path in paths {
            if !classify(&path).is_previewable() {
                continue;
            }
            report.candidates += 1;
            if self.cache.peek(&path).is_some() || self.cache.is_pending(&path)
            {
                report.skipped += 1;
            } else {
                pending.push(path);
            }
        }

        debug!(
            batch = id,
            candidates = report.candidates,
            to_enqueue = pending.len(),
            "thumbnail batch started"
        );

        let task_token = token.clone();
        let task = tokio::spawn(async move {
            for path in pending {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => {
                        report.superseded = true;
                        break;
                    }
                    sent = sender.send(Job::Prefetch(path)) => {
                        if sent.is_err() {
                            break;
                        }
                        report.enqueued += 1;
                    }
                }
            }

            if report.superseded {
                info!(
                    batch = report.batch,
                    enqueued = report.enqueued,
                    "thumbnail batch superseded"
                );
            } else {
                debug!(
                    batch = report.batch,
                    enqueued = report.enqueued,
                    skipped = report.skipped,
                    "thumbnail batch fully enqueued"
                );
            }
            report
        });

        Ok(BatchHandle { id, token, task })
    }

    /// Cancel the running batch, if any, without starting another.
    pub fn cancel_current(&self) {
        self.current.lock().cancel();
    }
}

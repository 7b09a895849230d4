use std::{fmt, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    GenerationTicket, PoolSettings, Request, ThumbnailCache, ThumbnailCodec,
    ThumbnailOutcome,
};
use crate::{
    error::{CodecError, ThumbnailFailure},
    media::classify,
};

/// Work accepted by the pool.
#[derive(Debug)]
pub enum Job {
    /// Prefetch: the worker claims the path itself and skips it when the
    /// cache already has it settled or in flight.
    Prefetch(PathBuf),
    /// On-demand: the submitter already owns the path.
    Owned(GenerationTicket),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("thumbnail worker pool is shut down")]
pub struct PoolClosed;

/// Fixed set of workers draining one bounded job queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    settings: PoolSettings,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("settings", &self.settings)
            .field("queued", &self.queued())
            .field("open", &self.sender.lock().is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn the workers on the current runtime.
    pub fn start(
        settings: PoolSettings,
        cache: ThumbnailCache,
        codec: Arc<dyn ThumbnailCodec>,
    ) -> Self {
        let workers_count = settings.workers.max(1);
        let (sender, receiver) = mpsc::channel(settings.queue_depth.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let workers = (0..workers_count)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    cache.clone(),
                    Arc::clone(&codec),
                ))
            })
            .collect();

        info!(
            workers = workers_count,
            queue_depth = settings.queue_depth.max(1),
            "thumbnail worker pool started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            settings,
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// A handle for enqueueing; fails once the pool is closed.
    pub fn sender(&self) -> Result<mpsc::Sender<Job>, PoolClosed> {
        self.sender.lock().clone().ok_or(PoolClosed)
    }

    /// Enqueue `job`, waiting for queue capacity.
    pub async fn submit(&self, job: Job) -> Result<(), PoolClosed> {
        let sender = self.sender()?;
        sender.send(job).await.map_err(|_| PoolClosed)
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Stop accepting jobs. Workers finish what is queued, then exit.
    pub fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!("thumbnail worker pool closed");
        }
    }

    /// Close the pool and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        for result in futures::future::join_all(workers).await {
            if let Err(err) = result {
                warn!(error = %err, "thumbnail worker ended abnormally");
            }
        }
        info!("thumbnail worker pool stopped");
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    cache: ThumbnailCache,
    codec: Arc<dyn ThumbnailCodec>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let ticket = match job {
            Job::Owned(ticket) => ticket,
            Job::Prefetch(path) => match cache.request(&path) {
                Request::Owner(ticket) => ticket,
                Request::Ready(_) | Request::Waiting(_) => {
                    debug!(worker = id, path = %path.display(), "already cached or in flight, skipping");
                    continue;
                }
            },
        };

        let outcome = generate(id, Arc::clone(&codec), ticket.path().into()).await;
        cache.publish(ticket, outcome);
    }
    debug!(worker = id, "thumbnail worker exiting");
}

/// Run the codec on the blocking pool and fold every failure, panics
/// included, into the cache's failure type.
async fn generate(
    worker: usize,
    codec: Arc<dyn ThumbnailCodec>,
    path: PathBuf,
) -> ThumbnailOutcome {
    let kind = classify(&path);
    let shown = path.display().to_string();

    let joined =
        tokio::task::spawn_blocking(move || codec.generate(&path, kind)).await;

    match joined {
        Ok(Ok(thumbnail)) => {
            debug!(worker, path = %shown, %kind, ?thumbnail, "thumbnail generated");
            Ok(thumbnail)
        }
        Ok(Err(err @ CodecError::NotApplicable { .. })) => {
            debug!(worker, path = %shown, "no preview for file kind");
            Err(err.into())
        }
        Ok(Err(err)) => {
            warn!(worker, path = %shown, %kind, error = %err, "thumbnail generation failed");
            Err(err.into())
        }
        Err(err) if err.is_panic() => {
            warn!(worker, path = %shown, "thumbnail codec panicked, file is likely corrupt");
            Err(ThumbnailFailure::Decode(
                "decoder panicked, file may be corrupt".to_string(),
            ))
        }
        Err(err) => Err(ThumbnailFailure::Internal(err.to_string())),
    }
}

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{FailurePolicy, ThumbnailOutcome};
use crate::media::normalize;

enum Entry {
    Pending {
        waiters: Vec<oneshot::Sender<ThumbnailOutcome>>,
    },
    Ready {
        outcome: ThumbnailOutcome,
        at: Instant,
    },
}

struct CacheInner {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    policy: FailurePolicy,
    // Diagnostics: singleflight owners/waiters and ready hits
    owners: AtomicU64,
    waiters: AtomicU64,
    hits: AtomicU64,
}

/// Singleflight thumbnail cache keyed by normalized absolute path.
///
/// The first caller to [`request`](Self::request) a path becomes its owner
/// and holds a [`GenerationTicket`]; everyone else either gets the stored
/// outcome or a [`ResultHandle`] that resolves when the owner publishes.
/// All state transitions happen under one mutex whose critical sections
/// are map operations and waiter-list pushes only.
#[derive(Clone)]
pub struct ThumbnailCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .entries
            .try_lock()
            .map(|guard| guard.len())
            .unwrap_or(0);

        f.debug_struct("ThumbnailCache")
            .field("entries", &entries)
            .field("policy", &self.inner.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Result of asking the cache for a path.
#[derive(Debug)]
pub enum Request {
    /// The path is settled; no generation needed.
    Ready(ThumbnailOutcome),
    /// Nobody is generating this path yet; the caller must publish.
    Owner(GenerationTicket),
    /// Another owner is generating; wait on the handle.
    Waiting(ResultHandle),
}

/// How a wait on a [`ResultHandle`] ended.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Ready(ThumbnailOutcome),
    /// The waiter's own cancellation or deadline fired first.
    Cancelled,
    /// The owner dropped its ticket without publishing; re-request to
    /// take over generation.
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub owners: u64,
    pub waiters: u64,
    pub hits: u64,
}

impl ThumbnailCache {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                policy,
                owners: AtomicU64::new(0),
                waiters: AtomicU64::new(0),
                hits: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    pub fn request(&self, path: &Path) -> Request {
        let key = normalize(path);
        let mut entries = self.inner.entries.lock();

        match entries.get_mut(&key) {
            Some(Entry::Ready { outcome, at })
                if !self.inner.policy.should_retry(outcome, *at) =>
            {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Request::Ready(outcome.clone());
            }
            Some(Entry::Pending { waiters }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                drop(entries);

                let waiting =
                    self.inner.waiters.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(path = %key.display(), waiters = waiting, "singleflight wait");
                return Request::Waiting(ResultHandle { path: key, rx });
            }
            // Absent, or a failure whose retry interval has elapsed
            _ => {}
        }

        entries.insert(
            key.clone(),
            Entry::Pending {
                waiters: Vec::new(),
            },
        );
        drop(entries);

        let owners = self.inner.owners.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(path = %key.display(), owners, "singleflight lead");
        Request::Owner(GenerationTicket {
            path: key,
            cache: Some(Arc::clone(&self.inner)),
        })
    }

    /// The settled outcome for `path`, if any. Never registers a waiter or
    /// claims ownership.
    pub fn peek(&self, path: &Path) -> Option<ThumbnailOutcome> {
        let key = normalize(path);
        match self.inner.entries.lock().get(&key) {
            Some(Entry::Ready { outcome, .. }) => Some(outcome.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        let key = normalize(path);
        matches!(
            self.inner.entries.lock().get(&key),
            Some(Entry::Pending { .. })
        )
    }

    /// Settle the ticket's path and wake every registered waiter with the
    /// same outcome. Returns the number of waiters that were still
    /// listening.
    pub fn publish(
        &self,
        mut ticket: GenerationTicket,
        outcome: ThumbnailOutcome,
    ) -> usize {
        debug_assert!(
            ticket
                .cache
                .as_ref()
                .is_some_and(|inner| Arc::ptr_eq(inner, &self.inner)),
            "ticket published to a foreign cache"
        );
        ticket.cache = None;
        let path = std::mem::take(&mut ticket.path);

        let waiters = {
            let mut entries = self.inner.entries.lock();
            let previous = entries.insert(
                path.clone(),
                Entry::Ready {
                    outcome: outcome.clone(),
                    at: Instant::now(),
                },
            );
            match previous {
                Some(Entry::Pending { waiters }) => waiters,
                _ => Vec::new(),
            }
        };

        let registered = waiters.len();
        let delivered = waiters
            .into_iter()
            .map(|tx| tx.send(outcome.clone()).is_ok())
            .filter(|sent| *sent)
            .count();

        debug!(
            path = %path.display(),
            ok = outcome.is_ok(),
            registered,
            delivered,
            "singleflight complete"
        );
        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            owners: self.inner.owners.load(Ordering::Relaxed),
            waiters: self.inner.waiters.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
        }
    }
}

impl FailurePolicy {
    fn should_retry(&self, outcome: &ThumbnailOutcome, at: Instant) -> bool {
        match (self, outcome) {
            (FailurePolicy::RetryAfter(interval), Err(_)) => {
                at.elapsed() >= *interval
            }
            _ => false,
        }
    }
}

/// Proof of ownership of one pending path. Must be handed back through
/// [`ThumbnailCache::publish`]; dropping it unpublished releases the path
/// and wakes waiters with [`WaitOutcome::Abandoned`].
pub struct GenerationTicket {
    path: PathBuf,
    cache: Option<Arc<CacheInner>>,
}

impl GenerationTicket {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for GenerationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationTicket")
            .field("path", &self.path)
            .field("armed", &self.cache.is_some())
            .finish()
    }
}

impl Drop for GenerationTicket {
    fn drop(&mut self) {
        let Some(inner) = self.cache.take() else {
            return;
        };
        let mut entries = inner.entries.lock();
        if matches!(entries.get(&self.path), Some(Entry::Pending { .. })) {
            // Dropping the senders resolves every waiter as abandoned
            entries.remove(&self.path);
            drop(entries);
            debug!(path = %self.path.display(), "singleflight abandoned");
        }
    }
}

/// A registered interest in a pending path.
#[derive(Debug)]
pub struct ResultHandle {
    path: PathBuf,
    rx: oneshot::Receiver<ThumbnailOutcome>,
}

impl ResultHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the owner publishes or `cancel` completes, whichever is
    /// first. Giving up only affects this handle.
    pub async fn wait<F>(self, cancel: F) -> WaitOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            received = self.rx => match received {
                Ok(outcome) => WaitOutcome::Ready(outcome),
                Err(_) => WaitOutcome::Abandoned,
            },
            () = cancel => WaitOutcome::Cancelled,
        }
    }

    pub async fn wait_timeout(self, timeout: Duration) -> WaitOutcome {
        self.wait(tokio::time::sleep(timeout)).await
    }
}

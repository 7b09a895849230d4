//! Thumbnail generation-and-cache pipeline.
//!
//! A directory view hands its entries to the [`BatchDispatcher`], which
//! feeds the bounded [`WorkerPool`]. Workers claim paths in the
//! [`ThumbnailCache`], run the [`ThumbnailCodec`] on the blocking pool and
//! publish the outcome. Preview requests go through
//! [`ThumbnailService::preview`], which reads or waits on the cache and
//! falls back to an on-demand job when nothing is in flight.

mod cache;
mod codec;
mod dispatcher;
mod pool;
mod service;
#[cfg(test)]
pub(crate) mod testing;

use std::{fmt, sync::Arc, time::Duration};

pub use cache::{
    CacheStats, GenerationTicket, Request, ResultHandle, ThumbnailCache,
    WaitOutcome,
};
pub use codec::{MediaCodec, ThumbnailCodec};
pub use dispatcher::{BatchDispatcher, BatchHandle, BatchReport};
pub use pool::{Job, PoolClosed, WorkerPool};
pub use service::{PreviewOutcome, ThumbnailService};

use crate::error::ThumbnailFailure;

/// What the cache stores per path and hands to every reader.
pub type ThumbnailOutcome = Result<Thumbnail, ThumbnailFailure>;

/// An encoded JPEG preview.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    jpeg: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl Thumbnail {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            jpeg: jpeg.into(),
            width,
            height,
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// What the cache does with a failed generation on later requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep the failure forever; a broken file is decoded once.
    #[default]
    Sticky,
    /// Treat a failure older than the interval as absent, so the next
    /// request starts a fresh generation.
    RetryAfter(Duration),
}

/// Tunables for the codec adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSettings {
    /// Images are fit into a `box_size` x `box_size` square.
    pub box_size: u32,
    /// Video frames are scaled to this width, height proportional.
    pub video_width: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            box_size: 128,
            video_width: 128,
            jpeg_quality: 75,
        }
    }
}

/// Sizing of the worker pool and its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 4,
        }
    }
}

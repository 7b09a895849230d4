//! Core of the deckshare file server: the thumbnail pipeline and the
//! resumable upload registry. HTTP glue lives in `deckshare-server`.

pub mod error;
pub mod media;
pub mod thumbnail;
pub mod upload;

pub use error::{CodecError, ThumbnailFailure, UploadError, UploadResult};
pub use media::{MediaKind, classify};
pub use thumbnail::{
    FailurePolicy, MediaCodec, PoolSettings, PreviewOutcome, Thumbnail,
    ThumbnailCodec, ThumbnailService, ThumbnailSettings,
};
pub use upload::{ChunkOutcome, SweepReport, UploadChunk, UploadRegistry};

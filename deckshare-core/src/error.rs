use std::path::PathBuf;

use thiserror::Error;

use crate::media::MediaKind;

/// Errors raised by a [`ThumbnailCodec`](crate::thumbnail::ThumbnailCodec)
/// while producing a preview.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("no preview available for {kind} file {path}")]
    NotApplicable { path: PathBuf, kind: MediaKind },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Codec unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failure stored in the thumbnail cache. Cloned to every waiter,
/// so it only carries a rendered message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailFailure {
    #[error("not applicable: {0}")]
    NotApplicable(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("codec unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for ThumbnailFailure {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::NotApplicable { .. } => {
                Self::NotApplicable(err.to_string())
            }
            CodecError::Unavailable(msg) => Self::Unavailable(msg),
            CodecError::Io(_) | CodecError::Image(_) | CodecError::Decode(_) => {
                Self::Decode(err.to_string())
            }
            #[cfg(feature = "ffmpeg")]
            CodecError::Ffmpeg(_) => Self::Decode(err.to_string()),
        }
    }
}

/// Errors raised by the [`UploadRegistry`](crate::upload::UploadRegistry).
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("missing param: {0}")]
    MissingField(&'static str),

    #[error("invalid checksum {0:?}: expected 64 hex characters")]
    InvalidChecksum(String),

    #[error("invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("directory path {} does not exist", .0.display())]
    DestinationMissing(PathBuf),

    #[error("no upload in progress for checksum {0}")]
    UnknownUpload(String),

    #[error("chunk offset {got} does not match {expected} bytes received")]
    OffsetMismatch { expected: u64, got: u64 },

    #[error("chunk of {size} bytes exceeds the {limit} byte limit")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Protocol violations are the caller's fault and never mutate state.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_)
                | Self::InvalidChecksum(_)
                | Self::InvalidFileName(_)
                | Self::DestinationMissing(_)
                | Self::UnknownUpload(_)
                | Self::OffsetMismatch { .. }
                | Self::ChunkTooLarge { .. }
        )
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

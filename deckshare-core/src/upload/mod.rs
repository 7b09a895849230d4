//! Checksum-addressed resumable uploads.
//!
//! A client sends a file as contiguous chunks tagged with the SHA-256 of
//! the whole file. Chunks accumulate in a temp file named by that checksum
//! inside the destination directory; the terminal chunk verifies the digest
//! and renames the temp file into place.

mod checksum;
mod registry;

pub use checksum::{parse_checksum, sha256_file, validate_file_name};
pub use registry::{
    ChunkOutcome, DEFAULT_MAX_CHUNK, SweepReport, UploadChunk, UploadRegistry,
};

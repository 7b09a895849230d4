//! Media classification and path handling shared by the thumbnail and
//! upload subsystems.

mod kind;
mod paths;

pub use kind::{MediaKind, classify};
pub use paths::{normalize, resolve_within};

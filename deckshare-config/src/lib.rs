//! Configuration for the deckshare server.
//!
//! Values are layered, lowest to highest: built-in defaults, a TOML file,
//! `DECKSHARE_*` environment variables (optionally from a `.env` file) and
//! finally explicit overrides such as command-line flags.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    Config, ConfigMetadata, ConfigOverrides, ServerConfig, ShareConfig,
    ThumbnailConfig, TlsConfig, UploadConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};

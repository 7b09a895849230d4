use std::path::PathBuf;

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("share root {} does not exist or is not a directory", .0.display())]
    InvalidShareRoot(PathBuf),
    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },
    #[error("jpeg_quality must be between 1 and 100, got {0}")]
    JpegQuality(u8),
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if !config.share.root.is_dir() {
        return Err(ConfigGuardRailError::InvalidShareRoot(
            config.share.root.clone(),
        ));
    }

    let thumbnails = &config.thumbnails;
    for (field, value) in [
        ("thumbnails.workers", thumbnails.workers),
        ("thumbnails.queue_depth", thumbnails.queue_depth),
        ("thumbnails.box_size", thumbnails.box_size as usize),
        ("thumbnails.video_width", thumbnails.video_width as usize),
        ("uploads.max_chunk", config.uploads.max_chunk),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroLimit { field });
        }
    }
    if !(1..=100).contains(&thumbnails.jpeg_quality) {
        return Err(ConfigGuardRailError::JpegQuality(thumbnails.jpeg_quality));
    }

    if config.server.port < 8000 {
        warnings.push_with_hint(
            format!("port {} is below 8000", config.server.port),
            "Low ports usually need elevated privileges; prefer 8000 or above",
        );
    }

    if config.tls.is_partial() {
        warnings.push_with_hint(
            "only one of tls.cert and tls.key is set; serving plain HTTP",
            "Set both DECKSHARE_TLS_CERT and DECKSHARE_TLS_KEY to enable HTTPS",
        );
    }

    if config.uploads.enabled && config.tls.pem_files().is_none() {
        warnings.push(
            "uploads are enabled without TLS; file contents travel in clear text",
        );
    }

    if !config.uploads.enabled && config.uploads.sweep_interval.is_some() {
        warnings.push("uploads.sweep_interval is set but uploads are disabled");
    }

    Ok(warnings)
}

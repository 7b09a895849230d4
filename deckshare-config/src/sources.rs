use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw configuration as written in a TOML file. Durations are kept as
/// strings and parsed with `humantime` during composition.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub share: FileShareConfig,
    #[serde(default)]
    pub thumbnails: FileThumbnailConfig,
    #[serde(default)]
    pub uploads: FileUploadConfig,
    #[serde(default)]
    pub tls: FileTlsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileShareConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileThumbnailConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_timeout: Option<String>,
    /// Unset keeps failures forever; a duration retries them after that
    /// long.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_failures_after: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileUploadConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileTlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub idle_timeout: Option<String>,
    pub root: Option<PathBuf>,
    pub thumbnails_enabled: Option<bool>,
    pub workers: Option<usize>,
    pub queue_depth: Option<usize>,
    pub box_size: Option<u32>,
    pub video_width: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub preview_timeout: Option<String>,
    pub retry_failures_after: Option<String>,
    pub uploads_enabled: Option<bool>,
    pub max_chunk: Option<usize>,
    pub sweep_interval: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Variables that were set but could not be parsed.
    pub rejected: Vec<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = EnvReader {
            lookup,
            rejected: Vec::new(),
        };

        let mut env = Self {
            config_path: reader.path("DECKSHARE_CONFIG"),
            host: reader.string("DECKSHARE_HOST"),
            port: reader.parsed("DECKSHARE_PORT"),
            idle_timeout: reader.string("DECKSHARE_IDLE_TIMEOUT"),
            root: reader.path("DECKSHARE_ROOT"),
            thumbnails_enabled: reader.bool("DECKSHARE_THUMBNAILS"),
            workers: reader.parsed("DECKSHARE_THUMBNAIL_WORKERS"),
            queue_depth: reader.parsed("DECKSHARE_THUMBNAIL_QUEUE_DEPTH"),
            box_size: reader.parsed("DECKSHARE_THUMBNAIL_BOX_SIZE"),
            video_width: reader.parsed("DECKSHARE_THUMBNAIL_VIDEO_WIDTH"),
            jpeg_quality: reader.parsed("DECKSHARE_THUMBNAIL_JPEG_QUALITY"),
            preview_timeout: reader.string("DECKSHARE_PREVIEW_TIMEOUT"),
            retry_failures_after: reader
                .string("DECKSHARE_THUMBNAIL_RETRY_FAILURES_AFTER"),
            uploads_enabled: reader.bool("DECKSHARE_UPLOADS"),
            max_chunk: reader.parsed("DECKSHARE_UPLOAD_MAX_CHUNK"),
            sweep_interval: reader.string("DECKSHARE_UPLOAD_SWEEP_INTERVAL"),
            tls_cert: reader.path("DECKSHARE_TLS_CERT"),
            tls_key: reader.path("DECKSHARE_TLS_KEY"),
            log_file: reader.path("DECKSHARE_LOG_FILE"),
            rejected: Vec::new(),
        };
        env.rejected = reader.rejected;
        env
    }
}

struct EnvReader<F> {
    lookup: F,
    rejected: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.string(name).map(PathBuf::from)
    }

    fn parsed<T: std::str::FromStr>(&mut self, name: &str) -> Option<T> {
        let raw = self.string(name)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.rejected.push(format!("{name}={raw}"));
                None
            }
        }
    }

    fn bool(&mut self, name: &str) -> Option<bool> {
        let raw = self.string(name)?;
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.rejected.push(format!("{name}={raw}"));
                None
            }
        }
    }
}

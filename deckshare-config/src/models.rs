use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use deckshare_core::{FailurePolicy, PoolSettings, ThumbnailSettings};

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub share: ShareConfig,
    pub thumbnails: ThumbnailConfig,
    pub uploads: UploadConfig,
    pub tls: TlsConfig,
    /// Write logs here instead of stdout.
    pub log_file: Option<PathBuf>,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Defaults around a share root, before any file or environment layer.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            share: ShareConfig { root: root.into() },
            thumbnails: ThumbnailConfig::default(),
            uploads: UploadConfig::default(),
            tls: TlsConfig::default(),
            log_file: None,
            metadata: ConfigMetadata::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.share.root
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shut down after this long without requests. `None` disables it.
    pub idle_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.bind_addr().parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Everything served or written lives under this directory.
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    pub workers: usize,
    pub queue_depth: usize,
    pub box_size: u32,
    pub video_width: u32,
    pub jpeg_quality: u8,
    /// How long a preview request may wait for generation.
    pub preview_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl ThumbnailConfig {
    pub fn codec_settings(&self) -> ThumbnailSettings {
        ThumbnailSettings {
            box_size: self.box_size,
            video_width: self.video_width,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            workers: self.workers,
            queue_depth: self.queue_depth,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let codec = ThumbnailSettings::default();
        let pool = PoolSettings::default();
        Self {
            enabled: true,
            workers: pool.workers,
            queue_depth: pool.queue_depth,
            box_size: codec.box_size,
            video_width: codec.video_width,
            jpeg_quality: codec.jpeg_quality,
            preview_timeout: Duration::from_secs(30),
            failure_policy: FailurePolicy::Sticky,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub enabled: bool,
    /// Largest accepted chunk body, in bytes.
    pub max_chunk: usize,
    /// Run the orphan sweep periodically, not only at shutdown.
    pub sweep_interval: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_chunk: deckshare_core::upload::DEFAULT_MAX_CHUNK,
            sweep_interval: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    /// Certificate and key, only when both are configured.
    pub fn pem_files(&self) -> Option<(&Path, &Path)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.cert.is_some() != self.key.is_some()
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

/// Highest-precedence layer, typically built from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub idle_timeout: Option<Duration>,
    pub uploads: Option<bool>,
    pub thumbnails: Option<bool>,
    pub workers: Option<usize>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

use std::{fs, path::PathBuf, time::Duration};

use deckshare_core::FailurePolicy;
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, ConfigOverrides, ServerConfig, ShareConfig,
        ThumbnailConfig, TlsConfig, UploadConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["deckshare.toml", "config/deckshare.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Use these instead of the process environment; no `.env` is read.
    pub env: Option<EnvConfig>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {}", path.display())]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no share root configured; pass --root or set DECKSHARE_ROOT")]
    MissingShareRoot,
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.options.overrides = overrides;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env, env_file_loaded) = match &self.options.env {
            Some(env) => (env.clone(), false),
            None => {
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (file_config, config_path) = self.load_file_config(&env)?;

        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No deckshare.toml detected; using defaults and environment",
                "Create deckshare.toml or pass --config to persist settings",
            );
        }
        for rejected in &env.rejected {
            warnings.push(format!("ignoring unparsable variable {rejected}"));
        }

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let config = compose(
            file_config.unwrap_or_default(),
            env,
            &self.options.overrides,
            metadata,
        )?;

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let result = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path),
            None => dotenvy::dotenv().map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    overrides: &ConfigOverrides,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        share: file_share,
        thumbnails: file_thumbs,
        uploads: file_uploads,
        tls: file_tls,
        log_file: file_log,
    } = file;
    let server_defaults = ServerConfig::default();
    let thumb_defaults = ThumbnailConfig::default();
    let upload_defaults = UploadConfig::default();

    let root = overrides
        .root
        .clone()
        .or(env.root)
        .or(file_share.root)
        .ok_or(ConfigLoadError::MissingShareRoot)?;

    let idle_timeout = match overrides.idle_timeout {
        Some(timeout) => Some(timeout),
        None => parse_duration(
            "server.idle_timeout",
            env.idle_timeout.or(file_server.idle_timeout),
        )?
        .or(server_defaults.idle_timeout),
    }
    .filter(|timeout| !timeout.is_zero());

    let server = ServerConfig {
        host: overrides
            .host
            .clone()
            .or(env.host)
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: overrides
            .port
            .or(env.port)
            .or(file_server.port)
            .unwrap_or(server_defaults.port),
        idle_timeout,
    };

    let failure_policy = match parse_duration(
        "thumbnails.retry_failures_after",
        env.retry_failures_after.or(file_thumbs.retry_failures_after),
    )? {
        Some(interval) => FailurePolicy::RetryAfter(interval),
        None => FailurePolicy::Sticky,
    };

    let thumbnails = ThumbnailConfig {
        enabled: overrides
            .thumbnails
            .or(env.thumbnails_enabled)
            .or(file_thumbs.enabled)
            .unwrap_or(thumb_defaults.enabled),
        workers: overrides
            .workers
            .or(env.workers)
            .or(file_thumbs.workers)
            .unwrap_or(thumb_defaults.workers),
        queue_depth: env
            .queue_depth
            .or(file_thumbs.queue_depth)
            .unwrap_or(thumb_defaults.queue_depth),
        box_size: env
            .box_size
            .or(file_thumbs.box_size)
            .unwrap_or(thumb_defaults.box_size),
        video_width: env
            .video_width
            .or(file_thumbs.video_width)
            .unwrap_or(thumb_defaults.video_width),
        jpeg_quality: env
            .jpeg_quality
            .or(file_thumbs.jpeg_quality)
            .unwrap_or(thumb_defaults.jpeg_quality),
        preview_timeout: parse_duration(
            "thumbnails.preview_timeout",
            env.preview_timeout.or(file_thumbs.preview_timeout),
        )?
        .unwrap_or(thumb_defaults.preview_timeout),
        failure_policy,
    };

    let uploads = UploadConfig {
        enabled: overrides
            .uploads
            .or(env.uploads_enabled)
            .or(file_uploads.enabled)
            .unwrap_or(upload_defaults.enabled),
        max_chunk: env
            .max_chunk
            .or(file_uploads.max_chunk)
            .unwrap_or(upload_defaults.max_chunk),
        sweep_interval: parse_duration(
            "uploads.sweep_interval",
            env.sweep_interval.or(file_uploads.sweep_interval),
        )?
        .filter(|interval| !interval.is_zero()),
    };

    let tls = TlsConfig {
        cert: overrides.cert.clone().or(env.tls_cert).or(file_tls.cert),
        key: overrides.key.clone().or(env.tls_key).or(file_tls.key),
    };

    Ok(Config {
        server,
        share: ShareConfig {
            root: absolutize(root),
        },
        thumbnails,
        uploads,
        tls,
        log_file: overrides.log_file.clone().or(env.log_file).or(file_log),
        metadata,
    })
}

fn parse_duration(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    value
        .map(|raw| {
            humantime::parse_duration(raw.trim()).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    field,
                    value: raw.clone(),
                    source,
                }
            })
        })
        .transpose()
}

/// Canonical root when it exists, so request paths can be checked with a
/// plain prefix test; validation reports it otherwise.
fn absolutize(root: PathBuf) -> PathBuf {
    fs::canonicalize(&root).unwrap_or(root)
}

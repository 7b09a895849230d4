use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use deckshare_config::{Config, ConfigLoader, ConfigOverrides, ConfigWarnings};
use deckshare_server::{
    AppContext, AppState, create_app,
    infra::{shutdown, tls::load_rustls},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "deckshare-server")]
#[command(
    about = "Share a directory over HTTP(S) with thumbnail previews and resumable uploads"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct ServeArgs {
    /// Directory to share
    #[arg(short = 'f', long = "root")]
    root: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Shut down after this many idle seconds; 0 disables
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Accept uploads into the share
    #[arg(long, default_value_t = false)]
    uploads: bool,

    /// Disable thumbnail generation
    #[arg(long, default_value_t = false)]
    no_thumbnails: bool,

    /// Number of thumbnail workers
    #[arg(long)]
    workers: Option<usize>,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl ServeArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            root: self.root.clone(),
            host: self.host.clone(),
            port: self.port,
            idle_timeout: self.timeout.map(Duration::from_secs),
            uploads: self.uploads.then_some(true),
            thumbnails: self.no_thumbnails.then_some(false),
            workers: self.workers,
            cert: self.cert.clone(),
            key: self.key.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve and validate the configuration, print warnings and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = load_config(&cli.serve)?;
    init_tracing(config.log_file.as_deref())?;
    log_config(&config, &warnings);

    match cli.command {
        Some(Command::Check) => {
            info!(root = %config.root().display(), "configuration ok");
            Ok(())
        }
        None => run_server(Arc::new(config)).await,
    }
}

fn load_config(args: &ServeArgs) -> anyhow::Result<(Config, ConfigWarnings)> {
    let mut loader = ConfigLoader::new().with_overrides(args.overrides());
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let load = loader.load().context("failed to load configuration")?;
    Ok((load.config, load.warnings))
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=warn".into());

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| {
                    format!("failed to open log file {}", path.display())
                })?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

fn log_config(config: &Config, warnings: &ConfigWarnings) {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }
}

fn determine_server_mode(config: &Config) -> anyhow::Result<ServerMode> {
    let addr = config.server.socket_addr().with_context(|| {
        format!("invalid listen address {}", config.server.bind_addr())
    })?;

    Ok(match config.tls.pem_files() {
        Some((cert, key)) => ServerMode::Https {
            addr,
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
        },
        None => ServerMode::Http { addr },
    })
}

#[derive(Debug)]
enum ServerMode {
    Https {
        addr: SocketAddr,
        cert: PathBuf,
        key: PathBuf,
    },
    Http {
        addr: SocketAddr,
    },
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let mode = determine_server_mode(&config)?;
    let context = Arc::new(AppContext::new(Arc::clone(&config)));
    let router = create_app(AppState::new(Arc::clone(&context)));

    let token = CancellationToken::new();
    shutdown::spawn_ctrl_c(token.clone());
    match config.server.idle_timeout {
        Some(timeout) => {
            info!(timeout = ?timeout, "idle shutdown armed");
            shutdown::spawn_idle_watchdog(
                Arc::clone(context.activity()),
                timeout,
                token.clone(),
            );
        }
        None => info!("idle shutdown disabled"),
    }
    if let (true, Some(every)) =
        (config.uploads.enabled, config.uploads.sweep_interval)
    {
        shutdown::spawn_periodic_sweep(
            Arc::clone(context.uploads()),
            every,
            token.clone(),
        );
    }

    let stopping = shutdown_signal(token, Arc::clone(&context));
    match mode {
        ServerMode::Https { addr, cert, key } => {
            info!(%addr, cert = %cert.display(), "starting deckshare (HTTPS)");
            let rustls_config = load_rustls(&cert, &key).await?;
            let handle = axum_server::Handle::new();
            let drain = handle.clone();
            tokio::spawn(async move {
                stopping.await;
                drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
            });
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        ServerMode::Http { addr } => {
            info!(%addr, "starting deckshare (HTTP)");
            if config.uploads.enabled {
                warn!("uploads are served over plain HTTP; configure --cert and --key for HTTPS");
            }
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(stopping)
                .await
                .context("HTTP server failed")?;
        }
    }

    context.shutdown().await;
    info!("deckshare stopped");
    Ok(())
}

/// Resolves once shutdown was requested and abandoned uploads are swept.
async fn shutdown_signal(token: CancellationToken, context: Arc<AppContext>) {
    token.cancelled().await;
    let report = context.sweep_orphans().await;
    info!(
        deleted = report.deleted,
        dropped = report.dropped,
        failed = report.failed,
        "orphaned uploads swept"
    );
}

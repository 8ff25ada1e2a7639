//! Larder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use larder_core::config::AppConfig;
use larder_core::repo::RepoConfigStore;
use larder_server::{AppState, create_router};
use larder_storage::{BlobStore, FsBlobStore, PathIndex};
use larder_upstream::{DEFAULT_CLEANUP_INTERVAL, TokenCache, default_client, spawn_pruner};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight requests get to drain after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Larder - a pull-through cache for artifact registries
#[derive(Parser, Debug)]
#[command(name = "larderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// HTTP listen address (e.g. ":5000", "127.0.0.1:8080"); overrides
    /// server.listen from the configuration file
    #[arg(long = "http-listen-addr")]
    http_listen_addr: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Environment (development|production)
    #[arg(long, env = "APP_ENV", default_value = "")]
    env: String,

    /// Path to TLS certificate file (PEM)
    #[arg(long = "tls-cert")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM)
    #[arg(long = "tls-key")]
    tls_key: Option<PathBuf>,

    /// Override server.public_url from the configuration file
    #[arg(long = "publicurl")]
    public_url: Option<String>,

    /// Configuration file (overrides --config)
    config_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dev_mode = args.env.is_empty() || args.env == "development";

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if dev_mode {
                    "debug,tower_http=info,hyper_util=info".into()
                } else {
                    "info,tower_http=info".into()
                }
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("larder v{}", env!("CARGO_PKG_VERSION"));

    // Positional argument overrides --config.
    let config_path = args.config_path.as_ref().unwrap_or(&args.config);
    let mut config =
        AppConfig::load(std::path::Path::new(config_path)).context("failed to load configuration")?;
    if let Some(public_url) = &args.public_url {
        config.server.public_url = public_url.clone();
    }
    tracing::info!(config_path = %config_path, remotes = config.remotes.len(), "configuration loaded");

    match (&args.tls_cert, &args.tls_key) {
        (None, None) => {}
        (Some(_), Some(_)) => {
            tracing::warn!(
                "TLS termination is delegated to a fronting proxy; --tls-cert/--tls-key are accepted but not served"
            );
        }
        _ => anyhow::bail!("--tls-cert and --tls-key must be provided together"),
    }

    // Repo store, populated from configuration.
    let repos = Arc::new(RepoConfigStore::new());
    for repo in config.repo_configs() {
        tracing::info!(
            remote = %repo.repo_key,
            remote_url = %repo.remote_url,
            package_type = ?repo.package_type,
            has_creds = repo.has_credentials(),
            "configured remote"
        );
        repos.add(repo);
    }

    // Storage: blobs at the cache root, path index and spool beside them.
    let blobs: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::new(&config.cache.path)
            .await
            .context("failed to initialize blob store")?,
    );
    let index = Arc::new(
        PathIndex::new(config.cache.path.join("index"))
            .await
            .context("failed to initialize path index")?,
    );
    tracing::info!(cache_path = %config.cache.path.display(), "blob store initialized");

    // Shared upstream transport and token cache, one per process.
    let http = default_client().context("failed to build upstream HTTP client")?;
    let tokens = Arc::new(TokenCache::new());
    let shutdown = CancellationToken::new();
    let pruner = spawn_pruner(tokens.clone(), DEFAULT_CLEANUP_INTERVAL, shutdown.clone());

    let listen = args
        .http_listen_addr
        .clone()
        .unwrap_or_else(|| config.server.listen.clone());
    let state = AppState::new(config, blobs, index, repos, tokens, http);
    let app = create_router(state);

    let addr: SocketAddr = normalize_listen_addr(&listen)
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("listening on {addr}");

    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutting down server");
    // Idempotent: the pruner and the accept loop share this token.
    shutdown.cancel();

    let result = tokio::time::timeout(DRAIN_DEADLINE, server).await;
    let _ = pruner.await;
    match result {
        Ok(joined) => {
            joined.context("server task panicked")??;
            tracing::info!("server exiting");
            Ok(())
        }
        Err(_) => {
            tracing::error!(
                deadline_secs = DRAIN_DEADLINE.as_secs(),
                "drain deadline exceeded, forcing shutdown"
            );
            anyhow::bail!("graceful shutdown exceeded the drain deadline");
        }
    }
}

/// Accept Go-style ":5000" listen addresses.
fn normalize_listen_addr(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Arbor daemon binary.

use anyhow::{Context, Result};
use arbor_core::config::AppConfig;
use arbor_metadata::StreamOptions;
use arbor_pipeline::Pipeline;
use arbor_server::{AppState, BackgroundTasks, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long consumers get to finish their in-flight batch on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Arbor - cascade deletion and data materialization pipeline
#[derive(Parser, Debug)]
#[command(name = "arbord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "ARBOR_CONFIG",
        default_value = "config/arbor.toml"
    )]
    config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// The TOML file if present, then `ARBOR_*` variables
/// (`__` separates nested keys, e.g. `ARBOR_BLOB__INLINE_THRESHOLD_BYTES`).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("ARBOR_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Arbor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    if args.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    arbor_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let blobs = arbor_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    blobs
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = blobs.backend_name(), "Blob store ready");

    let store = arbor_metadata::from_config(&config.metadata, StreamOptions::from_app_config(&config))
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Document store ready");

    let pipeline = Pipeline::new(&config, store, blobs);
    let cancel = CancellationToken::new();
    let background = BackgroundTasks::spawn(&pipeline, &config.sweep, &cancel);

    let state = AppState::new(config.clone(), pipeline);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    tracing::info!("HTTP server stopped, waiting for background tasks");
    cancel.cancel();
    background.join(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_reads_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[blob]\ninline_threshold_bytes = 1024\n\n[stream]\nshards = 2\ntables = [\"workspace\", \"path\", \"data\"]"
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.blob.inline_threshold_bytes, 1024);
        assert_eq!(config.stream.shards, 2);
        assert_eq!(config.stream.tables.len(), 3);
        assert_eq!(
            config.cascade.concurrency,
            AppConfig::default().cascade.concurrency
        );
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[blob]\ninline_threshold_bytes = 0").unwrap();

        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid configuration"));
    }

    #[test]
    fn load_config_without_file_uses_defaults() {
        let config = load_config("/nonexistent/arbor.toml").unwrap();
        assert_eq!(config.server.bind, AppConfig::default().server.bind);
    }
}

//! Stowage server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use stowage_core::config::AppConfig;
use stowage_server::bootstrap::build_state;
use stowage_server::create_router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stowage - resumable chunked uploads into named stores
#[derive(Parser, Debug)]
#[command(name = "stowaged")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STOWAGE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Merge the optional TOML file with `STOWAGE_*` environment overrides.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STOWAGE_") && key != "STOWAGE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: stowaged --config /path/to/config.toml\n  \
             2. Environment variables: STOWAGE_SERVER__BIND=0.0.0.0:8080 stowaged\n\n\
             See config/server.example.toml for example configuration.\n\
             Set STOWAGE_CONFIG env var to specify a default config file path."
        );
    }

    figment
        .merge(Env::prefixed("STOWAGE_").split("__"))
        .extract()
        .context("failed to load configuration")
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

    tracing::info!("Stowage v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    stowage_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let bind = config.server.bind.clone();
    let state = build_state(config).await?;
    tracing::info!(
        stores = ?state.registry.names().collect::<Vec<_>>(),
        staging = %state.staging.dir().display(),
        "Stores ready"
    );

    let router = create_router(state);

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind:?}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

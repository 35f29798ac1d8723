use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lfsvault_server::api::{self, AppState};
use lfsvault_server::config::LfsConfig;
use lfsvault_store::BlobStore;
use lfsvault_token::TokenStore;

/// lfsvault Git LFS HTTP server.
#[derive(Parser, Debug)]
#[command(name = "lfsvault-server", about = "Git LFS server for gitolite-governed repositories")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "lfsvault.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber from RUST_LOG or default to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = LfsConfig::load(&cli.config)?;

    let repos = config.repo_set()?;
    if repos.is_empty() {
        tracing::warn!("repository allowlist is empty, every request will be answered 404");
    }

    let store = BlobStore::new(config.store_config()?);
    let tokens = Arc::new(TokenStore::new(&config.token_config())?);
    info!(tokens = %tokens.directory().display(), data = %config.storage.data_dir.display(), "stores initialized");

    let state = AppState {
        store,
        tokens,
        external_url: config.server.external_url.clone(),
    };
    let app = api::router(state);

    // Resolve the bind address (CLI overrides take precedence).
    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "lfsvault-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("lfsvault-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}

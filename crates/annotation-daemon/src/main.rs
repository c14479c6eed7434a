//! annotation-daemon: Relay for collaborative document annotations.
//!
//! Accepts annotation changes over WebSocket, stores the latest state of each
//! annotation in SQLite, forwards every change to the other clients on the
//! same document, and serves document history over HTTP for joining clients.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use annotation_daemon::{http, Config, Overrides, RelayServer, ServerContext, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "annotation-daemon")]
#[command(about = "Collaborative annotation relay")]
struct Args {
    /// Path to a JSON config file (created with defaults if missing)
    #[arg(short, long, env = "ANNOTATION_CONFIG")]
    config: Option<PathBuf>,

    /// Address for WebSocket connections
    #[arg(short, long, env = "ANNOTATION_LISTEN")]
    listen: Option<String>,

    /// Address for the HTTP history endpoint
    #[arg(long, env = "ANNOTATION_HTTP_LISTEN")]
    http_listen: Option<String>,

    /// SQLite database file
    #[arg(short, long, env = "ANNOTATION_DATABASE")]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,annotation_daemon=debug,annotation_core=debug"
    } else {
        "info,annotation_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting annotation-daemon");

    let config = Config::load(args.config.as_deref())?.with_overrides(Overrides {
        ws_listen: args.listen,
        http_listen: args.http_listen,
        database: args.database,
    });
    info!("Database: {:?}", config.database);

    // A store we cannot open is the one fatal error
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to initialize store at {:?}", config.database))?;

    let ctx = Arc::new(ServerContext::from_config(Arc::new(store), &config));

    let relay = RelayServer::new(ctx.clone());
    let ws_listener = RelayServer::bind(&config.ws_listen).await?;

    let http_listener = tokio::net::TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http_listen))?;
    info!("History endpoint listening on {}", config.http_listen);

    let history = axum::serve(http_listener, http::router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    info!("Relay running. Press Ctrl+C to stop.");

    tokio::select! {
        () = relay.run(ws_listener) => {}
        result = history => {
            result.context("HTTP server failed")?;
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}

//! netfaultd: the control-service binary.
//!
//! Binds the control service on `localhost:<port>` with the built-in
//! default topology and serves until interrupted. Log filtering comes from
//! `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::Parser;
use netfault::cli::Cli;
use netfault::control::ControlServer;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = format!("127.0.0.1:{}", cli.port);
    let server = ControlServer::bind(&addr)
        .await
        .with_context(|| format!("failed to bind control service on {addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    server
        .run(shutdown_rx)
        .await
        .context("control service failed")?;
    Ok(())
}

// Byne server: hands out odd/even numbers and remembers the last one per client.

mod router;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use byne_core::{Endpoint, ServerCore};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Byne challenge server.
#[derive(Debug, Parser)]
#[command(name = "byne-server", version, about)]
struct Args {
    /// Log file (appended to)
    log_file: PathBuf,
    /// Endpoint to bind (tcp://host:port, `*` for all interfaces)
    endpoint: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = open_log(&args.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(log))
        .init();

    let endpoint: Endpoint = args.endpoint.parse().context("invalid endpoint")?;
    let core = Arc::new(tokio::sync::Mutex::new(ServerCore::new()));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = TcpListener::bind(endpoint.bind_addr())
            .await
            .with_context(|| format!("cannot bind {}", endpoint))?;
        info!(%endpoint, "server started");
        tokio::select! {
            r = router::run_router(listener, core.clone()) => r.context("router failed")?,
            r = shutdown_signal() => r.context("cannot listen for shutdown signals")?,
        }
        info!(clients = core.lock().await.client_count(), "server stopped");
        anyhow::Ok(())
    })
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

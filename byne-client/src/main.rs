// Byne client: periodic increments, increment refresh, primary/backup failover.

mod config;
mod dispatch;
mod queue;
mod timers;
mod transport;

use anyhow::Context;
use byne_core::Failover;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::dispatch::Dispatcher;
use crate::transport::TcpChannel;

fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = config::load(&args).context("invalid client configuration")?;
    info!(
        client = %settings.identity,
        parity = %settings.parity,
        primary = %settings.endpoints.primary(),
        backup = %settings.endpoints.backup(),
        timeout_secs = settings.primary_timeout.as_secs(),
        "starting"
    );

    let channel = TcpChannel::connect(settings.endpoints.primary().clone(), settings.identity.clone());
    let failover = Failover::new(
        settings.endpoints.clone(),
        settings.primary_timeout,
        settings.backup_timeout,
    );
    let mut dispatcher = Dispatcher::new(
        channel,
        settings.parity,
        failover,
        settings.cadence,
        settings.stall,
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "cannot listen for shutdown signals");
            }
            signal.cancel();
        });

        tokio::select! {
            _ = shutdown.cancelled() => return anyhow::Ok(()),
            r = dispatcher.handshake() => {
                r.context("handshake failed")?;
            }
        }
        dispatcher.run(shutdown).await.context("dispatch loop failed")?;

        let value = dispatcher.session().lock().await.working_value();
        info!(
            value,
            state = ?dispatcher.failover().state(),
            "stopped"
        );
        anyhow::Ok(())
    })
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

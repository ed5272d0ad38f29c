pub mod config;
pub mod control_loop;
pub mod error;
pub mod nominal;
pub mod pump;
pub mod regler;
pub mod sensors;
pub mod settings;
pub mod state;
pub mod status;
#[cfg(test)]
mod test_broker;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Args;
use crate::control_loop::ControlLoop;
use crate::regler::Regler;
use crate::settings::{Settings, SettingsStore};
use crate::status::SharedStatus;

fn init_logging(args: &Args) {
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match OpenOptions::new().create(true).append(true).open(&args.log) {
        Ok(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
        Err(e) => {
            builder.with_writer(std::io::stderr).init();
            warn!("cannot open log file {}: {e}, logging to stderr", args.log.display());
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot listen for SIGTERM: {e}");
            return wait_for_ctrl_c().await;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

async fn forward_interrupt(shutdown: watch::Sender<bool>) {
    wait_for_signal().await;
    info!("interrupt received");
    shutdown.send_replace(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    info!("starting regler {}", env!("CARGO_PKG_VERSION"));

    let topics = args.topics();
    let options = args
        .mqtt_options(&topics)
        .with_context(|| format!("bad broker uri {:?}", args.uri))?;
    let (store, settings) = SettingsStore::open(&args.settings, Settings::default())
        .with_context(|| format!("cannot read settings from {}", args.settings.display()))?;
    let regler = Regler::new(topics, store, settings);

    let status_view = SharedStatus::default();
    if let Some(addr) = args.status_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind status server to {addr}"))?;
        let view = status_view.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(listener, view).await {
                error!("status server stopped: {e}");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_interrupt(shutdown_tx));

    ControlLoop::new(
        regler,
        options,
        args.tick_interval(),
        args.retry_delay(),
        status_view,
        shutdown_rx,
    )
    .run()
    .await?;
    Ok(())
}

//! golb
//!
//! Weighted round-robin reverse proxy for functions. Weights are read from
//! etcd at startup and kept current through a watch.

#![deny(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use golb_store::EtcdStore;
use tokio::net::TcpListener;
use tokio::sync::watch;

mod app;
mod bootstrap;
mod config;
mod connection_pool;
mod error;
mod forward;
mod handler;
mod server;
mod telemetry;
mod updater;

#[cfg(test)]
mod test_support;

use config::Config;

/// Entry point: reads the configuration, connects to etcd and serves until
/// SIGINT/SIGTERM or until the weight feed is lost.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(&config.mode)?;
    tracing::info!(zone = %config.zone, "start golb in zone");

    let store = EtcdStore::connect(&config.etcd_host)
        .await
        .with_context(|| format!("connecting to etcd at {}", config.etcd_host))?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let store = Arc::new(store);
    let outcome = app::run(&config, store.clone(), listener, shutdown_rx).await;
    store.close().await;
    outcome.context("golb stopped")?;

    tracing::info!("shut down");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
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
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("received stop");
}

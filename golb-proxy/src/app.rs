//! Wiring of handler, bootstrap, update pipeline and server.

use std::sync::Arc;

use golb_core::domain::assignment::zone_prefix;
use golb_core::RoutingTable;
use golb_store::{EventStream, WeightStore};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::bootstrap::load_function_state;
use crate::config::Config;
use crate::error::ProxyError;
use crate::forward::{Forwarder, NodeHeaders};
use crate::handler::{DummyHandler, Handler, HandlerKind, WrrHandler};
use crate::server;
use crate::updater::WeightUpdater;

/// Builds the handler selected by `config`.
pub fn build_handler(config: &Config) -> Result<Handler, ProxyError> {
    let node_name = config.node_name();
    let span = tracing::info_span!("handler", zone = %config.zone, node = %node_name);

    let handler = match config.handler_type {
        HandlerKind::Dummy => Handler::Dummy(DummyHandler::new(config.zone.clone(), span)),
        HandlerKind::WeightedRoundRobin => {
            let gateways = config.gateway_set();
            tracing::info!(gateways = ?gateways.fragments(), "read gateways");
            let table = Arc::new(RoutingTable::new(config.zone.clone(), gateways));
            let forwarder = Forwarder::new(NodeHeaders::new(&node_name)?, config.upstream_timeout());
            Handler::WeightedRoundRobin(WrrHandler::new(table, forwarder, span))
        }
    };
    tracing::info!(handler = ?config.handler_type, "instantiated handler");
    Ok(handler)
}

/// Seeds `handler` from the store and subscribes to later changes.
///
/// The watch starts right after the revision the state was read at, so no
/// change is lost in between.
pub async fn seed_and_watch(
    handler: &Handler,
    store: &dyn WeightStore,
) -> Result<EventStream, ProxyError> {
    let zone = handler.zone();
    let (state, revision) = load_function_state(store, zone).await?;
    handler.seed(&state);

    let events = store
        .watch_prefix(&zone_prefix(zone), Some(revision + 1))
        .await?;
    Ok(events)
}

/// Serves on `listener` and applies weight updates until `shutdown` fires
/// or the update stream fails.
pub async fn run(
    config: &Config,
    store: Arc<dyn WeightStore>,
    listener: TcpListener,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ProxyError> {
    let handler = Arc::new(build_handler(config)?);
    let events = seed_and_watch(&handler, store.as_ref()).await?;

    let updater = WeightUpdater::new(
        config.zone.clone(),
        Arc::clone(&handler),
        tracing::info_span!("weight_updater", zone = %config.zone),
    );

    let serve_shutdown = shutdown.clone();
    let serving = async move {
        server::serve(listener, handler, serve_shutdown).await;
        Ok::<_, ProxyError>(())
    };
    tokio::try_join!(serving, updater.run(events, shutdown))?;
    Ok(())
}

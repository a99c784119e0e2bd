//! Weight update pipeline.
//!
//! Consumes the store's change feed in order and applies each change to the
//! handler. Bad events are logged and skipped; only a broken feed stops it.

use std::sync::Arc;

use golb_core::domain::assignment::parse_function_key;
use golb_core::ChangeEvent;
use golb_store::{EventStream, KeyValue, StoreEvent};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{Instrument, Span};

use crate::error::ProxyError;
use crate::handler::Handler;

/// Decodes a stored key/value pair into a change event.
pub fn decode(kv: &KeyValue) -> golb_core::Result<ChangeEvent> {
    let key = kv
        .key_str()
        .map_err(|e| golb_core::Error::MalformedChangeEvent(format!("key is not UTF-8: {e}")))?;
    let value = kv.value_str().map_err(|e| {
        golb_core::Error::MalformedChangeEvent(format!("value of {key} is not UTF-8: {e}"))
    })?;
    ChangeEvent::decode(key, value)
}

/// Applies store events for one zone to a handler.
#[derive(Debug)]
pub struct WeightUpdater {
    zone: String,
    handler: Arc<Handler>,
    span: Span,
}

impl WeightUpdater {
    /// Creates an updater for `zone`.
    pub fn new(zone: impl Into<String>, handler: Arc<Handler>, span: Span) -> Self {
        Self {
            zone: zone.into(),
            handler,
            span,
        }
    }

    /// Applies events until the stream fails or `shutdown` fires.
    ///
    /// Returning drops `events`, which cancels the underlying watch.
    pub async fn run(
        &self,
        mut events: EventStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProxyError> {
        async {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("weight updater stopping");
                        return Ok(());
                    }
                    next = events.next() => match next {
                        Some(Ok(event)) => self.apply(event),
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "weight update stream failed");
                            return Err(ProxyError::from(e));
                        }
                        None => {
                            tracing::error!("weight update stream ended");
                            return Err(ProxyError::WatchEnded);
                        }
                    }
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Applies a single event.
    pub fn apply(&self, event: StoreEvent) {
        match event {
            StoreEvent::Put(kv) => match decode(&kv) {
                Ok(update) if update.zone != self.zone => {
                    tracing::debug!(zone = %update.zone, "ignoring update for other zone");
                }
                Ok(update) => {
                    tracing::debug!(function = %update.function, "put");
                    self.handler.handle_weight_update(update);
                    tracing::debug!("updated");
                }
                Err(e) => tracing::error!(error = %e, "dropping weight update"),
            },
            StoreEvent::Delete { key } => {
                let key = String::from_utf8_lossy(&key);
                match parse_function_key(&key) {
                    Ok((zone, function)) if zone == self.zone => {
                        self.handler.handle_function_removed(&function);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "dropping delete"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use golb_core::{GatewaySet, RoutingTable, SharedRoutingTable};
    use golb_store::{MemoryStore, WeightStore};

    use super::*;
    use crate::forward::{Forwarder, NodeHeaders};
    use crate::handler::WrrHandler;

    fn setup() -> (SharedRoutingTable, Arc<Handler>, WeightUpdater) {
        let table = Arc::new(RoutingTable::new("z1", GatewaySet::new(["10.0."])));
        let forwarder = Forwarder::new(NodeHeaders::new("node-1").unwrap(), None);
        let handler = Arc::new(Handler::WeightedRoundRobin(WrrHandler::new(
            Arc::clone(&table),
            forwarder,
            Span::none(),
        )));
        let updater = WeightUpdater::new("z1", Arc::clone(&handler), Span::none());
        (table, handler, updater)
    }

    fn put(key: &str, value: &str) -> StoreEvent {
        StoreEvent::Put(KeyValue::new(key, value))
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let kv = KeyValue::new(vec![0xff], "{}");
        assert!(matches!(
            decode(&kv),
            Err(golb_core::Error::MalformedChangeEvent(_))
        ));
    }

    #[test]
    fn test_apply_valid_update() {
        let (table, _, updater) = setup();
        updater.apply(put(
            "golb/function/z1/nginx",
            r#"{"ips": ["10.0.0.1", "192.168.1.5"], "weights": [1, 4]}"#,
        ));

        let route = table.get("nginx").unwrap();
        assert_eq!(route.all().targets(), ["10.0.0.1", "192.168.1.5"]);
        assert_eq!(route.direct().unwrap().targets(), ["192.168.1.5"]);
    }

    #[test]
    fn test_malformed_payload_keeps_previous_scheduler() {
        let (table, _, updater) = setup();
        updater.apply(put(
            "golb/function/z1/nginx",
            r#"{"ips": ["192.168.1.5"], "weights": [1]}"#,
        ));
        updater.apply(put("golb/function/z1/nginx", "{not json"));
        updater.apply(put("golb/function/z1/nginx/extra", r#"{"ips": [], "weights": []}"#));

        assert_eq!(table.get("nginx").unwrap().all().targets(), ["192.168.1.5"]);

        updater.apply(put(
            "golb/function/z1/nginx",
            r#"{"ips": ["192.168.1.6"], "weights": [2]}"#,
        ));
        assert_eq!(table.get("nginx").unwrap().all().targets(), ["192.168.1.6"]);
    }

    #[test]
    fn test_other_zone_is_ignored() {
        let (table, _, updater) = setup();
        updater.apply(put(
            "golb/function/z10/nginx",
            r#"{"ips": ["192.168.1.5"], "weights": [1]}"#,
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_delete_removes_function() {
        let (table, _, updater) = setup();
        updater.apply(put(
            "golb/function/z1/nginx",
            r#"{"ips": ["192.168.1.5"], "weights": [1]}"#,
        ));
        updater.apply(StoreEvent::Delete {
            key: b"golb/function/z1/nginx".to_vec(),
        });
        assert!(table.get("nginx").is_none());
    }

    #[tokio::test]
    async fn test_run_applies_stream_until_closed() {
        let (table, _, updater) = setup();
        let store = MemoryStore::new();
        let events = store.watch_prefix("golb/function/z1", None).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        store.put("golb/function/z1/a", r#"{"ips": ["192.168.1.5"], "weights": [1]}"#);
        store.put("golb/function/z1/b", "garbage");
        store.put("golb/function/z1/c", r#"{"ips": ["192.168.1.7"], "weights": [3]}"#);
        store.close_watches("connection lost");

        let res = updater.run(events, rx).await;
        assert!(matches!(res, Err(ProxyError::Store(_))));
        assert!(table.get("a").is_some());
        assert!(table.get("b").is_none());
        assert!(table.get("c").is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_and_cancels_watch() {
        let (_, _, updater) = setup();
        let store = MemoryStore::new();
        let events = store.watch_prefix("golb/function/z1", None).await.unwrap();
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(async move { updater.run(events, rx).await });
        tx.send(true).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
        assert_eq!(store.active_watches(), 0);
    }
}

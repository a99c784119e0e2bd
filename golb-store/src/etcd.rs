//! etcd-backed store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, WatchOptions, WatchResponse};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::{EventStream, KeyValue, Snapshot, StoreError, StoreEvent, WeightStore};

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const GET_TIMEOUT: Duration = Duration::from_secs(2);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);
const WATCH_BUFFER: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for a single etcd endpoint.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoint: String,
    pumps: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EtcdStore {
    /// Connects to `endpoint` (`host:port`).
    pub async fn connect(endpoint: &str) -> Result<Self, StoreError> {
        tracing::info!(endpoint, "connecting to etcd");
        let options = ConnectOptions::new()
            .with_connect_timeout(DIAL_TIMEOUT)
            .with_keep_alive(KEEP_ALIVE_INTERVAL, KEEP_ALIVE_TIMEOUT);
        let client = Client::connect([endpoint], Some(options)).await?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            pumps: Arc::default(),
        })
    }

    /// Waits for the watch tasks to cancel their watches.
    ///
    /// A watch is cancelled once its stream is dropped; call this after
    /// dropping every stream so the cancellation reaches etcd before exit.
    pub async fn close(&self) {
        let pumps = std::mem::take(&mut *self.pumps.lock());
        let drained = async {
            for pump in pumps {
                let _ = pump.await;
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, drained).await.is_err() {
            tracing::warn!(endpoint = self.endpoint(), "watches still open at close");
        }
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl WeightStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let mut client = self.client.clone();
        let resp = tokio::time::timeout(
            GET_TIMEOUT,
            client.get(prefix, Some(GetOptions::new().with_prefix())),
        )
        .await
        .map_err(|_| StoreError::Timeout(GET_TIMEOUT))??;

        let revision = resp.header().map_or(0, |h| h.revision());
        let entries = resp
            .kvs()
            .iter()
            .map(|kv| KeyValue::new(kv.key(), kv.value()))
            .collect();

        Ok(Snapshot { revision, entries })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<EventStream, StoreError> {
        let mut options = WatchOptions::new().with_prefix();
        if let Some(revision) = start_revision {
            options = options.with_start_revision(revision);
        }

        let mut client = self.client.clone();
        let (mut watcher, mut stream) = client.watch(prefix, Some(options)).await?;
        tracing::debug!(endpoint = self.endpoint(), prefix, ?start_revision, "watch established");

        let (tx, rx) = mpsc::channel::<Result<StoreEvent, StoreError>>(WATCH_BUFFER);
        let prefix = prefix.to_string();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        if let Err(e) = watcher.cancel().await {
                            tracing::debug!(prefix = %prefix, error = %e, "watch cancel failed");
                        }
                        tracing::debug!(prefix = %prefix, "watch cancelled");
                        return;
                    }
                    message = stream.message() => match message {
                        Ok(Some(resp)) if resp.canceled() => {
                            let reason = resp.cancel_reason().to_string();
                            let _ = tx.send(Err(StoreError::WatchClosed { prefix, reason })).await;
                            return;
                        }
                        Ok(Some(resp)) => {
                            for event in convert(&resp) {
                                if tx.send(Ok(event)).await.is_err() {
                                    let _ = watcher.cancel().await;
                                    return;
                                }
                            }
                        }
                        Ok(None) => {
                            let reason = "stream ended".to_string();
                            let _ = tx.send(Err(StoreError::WatchClosed { prefix, reason })).await;
                            return;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                    }
                }
            }
        });

        let mut pumps = self.pumps.lock();
        pumps.retain(|pump| !pump.is_finished());
        pumps.push(pump);
        drop(pumps);

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn convert(resp: &WatchResponse) -> Vec<StoreEvent> {
    resp.events()
        .iter()
        .filter_map(|event| {
            let kv = event.kv()?;
            Some(match event.event_type() {
                EventType::Put => StoreEvent::Put(KeyValue::new(kv.key(), kv.value())),
                EventType::Delete => StoreEvent::Delete {
                    key: kv.key().to_vec(),
                },
            })
        })
        .collect()
}

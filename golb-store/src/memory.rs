//! In-process store with etcd-like revisions and prefix watches.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{EventStream, KeyValue, Snapshot, StoreError, StoreEvent, WeightStore};

type Sender = mpsc::UnboundedSender<Result<StoreEvent, StoreError>>;

#[derive(Default)]
struct Inner {
    revision: i64,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    history: Vec<(i64, StoreEvent)>,
    watchers: Vec<(Vec<u8>, Sender)>,
}

impl Inner {
    fn record(&mut self, event: StoreEvent) -> i64 {
        self.revision += 1;
        let key = match &event {
            StoreEvent::Put(kv) => kv.key.clone(),
            StoreEvent::Delete { key } => key.clone(),
        };

        self.watchers
            .retain(|(prefix, tx)| !key.starts_with(prefix) || tx.send(Ok(event.clone())).is_ok());
        self.history.push((self.revision, event));
        self.revision
    }
}

/// A cloneable in-memory [`WeightStore`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under `key`, returning the new revision.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> i64 {
        let kv = KeyValue::new(key, value);
        let mut inner = self.inner.lock();
        inner.data.insert(kv.key.clone(), kv.value.clone());
        inner.record(StoreEvent::Put(kv))
    }

    /// Deletes `key`, returning the new revision if it existed.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Option<i64> {
        let key = key.into();
        let mut inner = self.inner.lock();
        inner.data.remove(&key)?;
        Some(inner.record(StoreEvent::Delete { key }))
    }

    /// Current revision.
    pub fn revision(&self) -> i64 {
        self.inner.lock().revision
    }

    /// Ends every open watch with `reason`, as a lost connection would.
    pub fn close_watches(&self, reason: &str) {
        let watchers = std::mem::take(&mut self.inner.lock().watchers);
        for (prefix, tx) in watchers {
            let _ = tx.send(Err(StoreError::WatchClosed {
                prefix: String::from_utf8_lossy(&prefix).into_owned(),
                reason: reason.to_string(),
            }));
        }
    }

    /// Number of watches whose stream is still alive.
    pub fn active_watches(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|(_, tx)| !tx.is_closed());
        inner.watchers.len()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("revision", &inner.revision)
            .field("keys", &inner.data.len())
            .finish()
    }
}

#[async_trait]
impl WeightStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let inner = self.inner.lock();
        let entries = inner
            .data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix.as_bytes()))
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect();

        Ok(Snapshot {
            revision: inner.revision,
            entries,
        })
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<EventStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = prefix.as_bytes().to_vec();

        let mut inner = self.inner.lock();
        if let Some(start) = start_revision {
            for (_, event) in inner.history.iter().filter(|(rev, _)| *rev >= start) {
                let key = match event {
                    StoreEvent::Put(kv) => &kv.key,
                    StoreEvent::Delete { key } => key,
                };
                if key.starts_with(&prefix) {
                    let _ = tx.send(Ok(event.clone()));
                }
            }
        }
        inner.watchers.push((prefix, tx));

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

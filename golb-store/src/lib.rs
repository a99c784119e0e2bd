//! golb coordination store
//!
//! Reads and watches the weight assignments that the control plane writes
//! into etcd. The [`WeightStore`] trait is the seam between the proxy and the
//! store; [`EtcdStore`] is the production implementation and [`MemoryStore`]
//! an in-process one for tests and local runs.

use std::pin::Pin;
use std::str::Utf8Error;

use async_trait::async_trait;
use tokio_stream::Stream;

mod error;
mod etcd;
mod memory;

pub use error::StoreError;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// A raw key/value pair as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Creates a pair from anything convertible to bytes.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key as UTF-8.
    pub fn key_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.key)
    }

    /// Value as UTF-8.
    pub fn value_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.value)
    }
}

/// Result of a prefix read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Store revision the read was served at.
    pub revision: i64,
    /// Every pair under the prefix, ordered by key.
    pub entries: Vec<KeyValue>,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A key was created or overwritten.
    Put(KeyValue),
    /// A key was deleted.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// Stream of watch events. An `Err` item or the end of the stream means the
/// subscription is gone; dropping the stream cancels the watch.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StoreEvent, StoreError>> + Send>>;

/// Read and watch access to the coordination store.
#[async_trait]
pub trait WeightStore: Send + Sync {
    /// Reads every pair whose key starts with `prefix`.
    async fn get_prefix(&self, prefix: &str) -> Result<Snapshot, StoreError>;

    /// Subscribes to changes under `prefix`, starting at `start_revision`
    /// when given, otherwise at the current revision.
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<EventStream, StoreError>;
}

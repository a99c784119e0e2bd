//! Store error types.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The etcd client reported an error (connect, request or stream).
    #[error("coordination store unavailable: {0}")]
    Unavailable(#[from] etcd_client::Error),

    /// A read did not complete in time.
    #[error("coordination store did not answer within {0:?}")]
    Timeout(Duration),

    /// The server ended or cancelled the watch.
    #[error("watch on {prefix} closed: {reason}")]
    WatchClosed {
        /// Watched prefix.
        prefix: String,
        /// Reason reported by the store.
        reason: String,
    },
}

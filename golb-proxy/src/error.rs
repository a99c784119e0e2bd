//! Proxy error types.

use std::time::Duration;

use golb_store::StoreError;
use thiserror::Error;

/// Errors raised by the proxy binary.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The node name cannot be used in the `X-Forwarded-Host-<node>` header.
    #[error("invalid node name {0:?}: not usable in a header name")]
    InvalidNodeName(String),

    /// The log sink could not be installed.
    #[error("logging setup failed: {0}")]
    Telemetry(String),

    /// Coordination store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The watch stream ended without an error.
    #[error("weight update stream ended")]
    WatchEnded,

    /// Socket level failure (listener bind or accept).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The selected target is not a valid `host[:port]` authority.
    #[error("invalid upstream address: {0}")]
    InvalidTarget(String),

    /// Connecting to the target failed.
    #[error("connecting to {target} failed: {source}")]
    Connect {
        /// Target authority.
        target: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The HTTP exchange with the target failed.
    #[error("forwarding to {target} failed: {source}")]
    Upstream {
        /// Target authority.
        target: String,
        /// Underlying error.
        source: hyper::Error,
    },

    /// The target did not answer in time.
    #[error("{target} did not answer within {timeout:?}")]
    UpstreamTimeout {
        /// Target authority.
        target: String,
        /// Configured deadline.
        timeout: Duration,
    },
}

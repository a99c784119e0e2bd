//! Error taxonomy shared by the scheduler, the routing table and the dispatcher.

use thiserror::Error;

/// Convenience alias for results carrying a core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building schedulers, decoding change events or routing requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The weight assignment cannot back a scheduler (empty, misaligned or zero weights).
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// A change event whose key or payload could not be decoded.
    #[error("malformed change event: {0}")]
    MalformedChangeEvent(String),

    /// No scheduler is registered for the requested function.
    #[error("no servers found for function: {function}")]
    UnknownFunction {
        /// Name of the function extracted from the request path.
        function: String,
    },

    /// The function exists, but all of its targets are gateways.
    #[error("no direct servers found for function: {function}")]
    NoDirectTarget {
        /// Name of the function extracted from the request path.
        function: String,
    },

    /// The request path is not `/function/<name>[/<rest>]`.
    #[error("invalid URL format: {0}")]
    MalformedPath(String),
}

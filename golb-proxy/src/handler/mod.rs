//! Request handlers.
//!
//! The handler kind is chosen once at startup. Every kind can serve requests
//! and accept weight updates.

use clap::ValueEnum;
use golb_core::{ChangeEvent, FunctionState};
use hyper::body::Incoming;
use hyper::{Request, Response};

use crate::forward::ProxyBody;

mod dummy;
mod wrr;

pub use dummy::DummyHandler;
pub use wrr::WrrHandler;

/// Handler variants selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HandlerKind {
    /// Answers every request locally; weight updates are only logged.
    Dummy,
    /// Weighted round-robin reverse proxy.
    #[value(name = "wrr", alias = "weighted-round-robin")]
    WeightedRoundRobin,
}

/// The active request handler.
#[derive(Debug)]
pub enum Handler {
    /// See [`DummyHandler`].
    Dummy(DummyHandler),
    /// See [`WrrHandler`].
    WeightedRoundRobin(WrrHandler),
}

impl Handler {
    /// Serves one request.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        match self {
            Handler::Dummy(h) => h.handle(&req),
            Handler::WeightedRoundRobin(h) => h.handle(req).await,
        }
    }

    /// Applies a new weight assignment for one function.
    pub fn handle_weight_update(&self, update: ChangeEvent) {
        match self {
            Handler::Dummy(h) => h.handle_weight_update(&update),
            Handler::WeightedRoundRobin(h) => h.handle_weight_update(update),
        }
    }

    /// Forgets a function whose key was deleted.
    pub fn handle_function_removed(&self, function: &str) {
        match self {
            Handler::Dummy(h) => h.handle_function_removed(function),
            Handler::WeightedRoundRobin(h) => h.handle_function_removed(function),
        }
    }

    /// Loads the state read at startup.
    pub fn seed(&self, state: &FunctionState) {
        match self {
            Handler::Dummy(h) => h.seed(state),
            Handler::WeightedRoundRobin(h) => h.seed(state),
        }
    }

    /// Zone served by this handler.
    pub fn zone(&self) -> &str {
        match self {
            Handler::Dummy(h) => h.zone(),
            Handler::WeightedRoundRobin(h) => h.table().zone(),
        }
    }
}

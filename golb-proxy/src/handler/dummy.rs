//! A handler that answers locally without forwarding.

use golb_core::{ChangeEvent, FunctionState};
use hyper::{header, Request, Response, StatusCode};
use tracing::Span;

use crate::forward::{text_response, ProxyBody};

/// Echoes the request target back to the caller.
#[derive(Debug)]
pub struct DummyHandler {
    zone: String,
    span: Span,
}

impl DummyHandler {
    /// Creates a dummy handler for `zone` logging within `span`.
    pub fn new(zone: impl Into<String>, span: Span) -> Self {
        Self {
            zone: zone.into(),
            span,
        }
    }

    /// Zone this handler was started for.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Answers `200` describing the request.
    pub fn handle<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        let _enter = self.span.enter();
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .unwrap_or_default();

        let url_host = format!("URL: {}, Host: {}", req.uri(), host);
        tracing::info!("{url_host}");
        text_response(StatusCode::OK, format!("Dummy response, {url_host}"))
    }

    /// Logs the update.
    pub fn handle_weight_update(&self, update: &ChangeEvent) {
        let _enter = self.span.enter();
        tracing::info!(
            function = %update.function,
            ips = ?update.weights.ips,
            weights = ?update.weights.weights,
            "got weight update"
        );
    }

    /// Logs the removal.
    pub fn handle_function_removed(&self, function: &str) {
        let _enter = self.span.enter();
        tracing::info!(function, "function removed");
    }

    /// Logs the loaded state.
    pub fn seed(&self, state: &FunctionState) {
        let _enter = self.span.enter();
        tracing::info!(functions = state.functions.len(), "loaded function state");
    }
}

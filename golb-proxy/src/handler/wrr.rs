//! Weighted round-robin dispatcher.

use golb_core::load_balancer::selector::select_target;
use golb_core::{ChangeEvent, FunctionPath, FunctionState, SharedRoutingTable};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tracing::{Instrument, Span};

use crate::forward::{error_response, text_response, Forwarder, ProxyBody, X_FORWARDED_FOR};

/// Routes `/function/<name>[/<rest>]` requests to the function's targets.
#[derive(Debug)]
pub struct WrrHandler {
    table: SharedRoutingTable,
    forwarder: Forwarder,
    span: Span,
}

impl WrrHandler {
    /// Creates a dispatcher over `table`.
    pub fn new(table: SharedRoutingTable, forwarder: Forwarder, span: Span) -> Self {
        Self {
            table,
            forwarder,
            span,
        }
    }

    /// The routing table this handler reads.
    pub fn table(&self) -> &SharedRoutingTable {
        &self.table
    }

    /// Picks a target and forwards `req` to it.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        async {
            let (target, path_and_query) = match self.route(&req) {
                Ok(route) => route,
                Err(e) => {
                    let text = format!("error selecting server: {e} - in {}", self.table.zone());
                    tracing::info!("{text}");
                    return text_response(StatusCode::NOT_FOUND, text);
                }
            };

            match self.forwarder.forward(&target, &path_and_query, req).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(upstream = %target, error = %e, "forwarding failed");
                    error_response(&e)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Resolves the target and the path to send it.
    ///
    /// Gateways receive the bare function root; instances receive the
    /// trailing segment. The query string is kept in both cases.
    fn route<B>(&self, req: &Request<B>) -> golb_core::Result<(String, String)> {
        let path = FunctionPath::parse(req.uri().path())?;
        let forwarded = req
            .headers()
            .get(X_FORWARDED_FOR)
            .is_some_and(|v| !v.is_empty());

        let target = select_target(&self.table, path.function, forwarded)?;

        let mut path_and_query = if self.table.gateways().is_gateway(&target) {
            path.gateway_path()
        } else {
            path.instance_path()
        };
        if let Some(query) = req.uri().query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        tracing::debug!(function = path.function, forwarded, upstream = %target, "selected target");
        Ok((target, path_and_query))
    }

    /// Rebuilds the function's schedulers; invalid updates keep the old ones.
    pub fn handle_weight_update(&self, update: ChangeEvent) {
        let _enter = self.span.enter();
        tracing::debug!(
            function = %update.function,
            ips = ?update.weights.ips,
            weights = ?update.weights.weights,
            "WRR - got weight update"
        );

        if let Err(e) = self.table.apply(&update.function, update.weights) {
            tracing::error!(function = %update.function, error = %e, "rejected weight update");
        }
    }

    /// Drops the function's schedulers.
    pub fn handle_function_removed(&self, function: &str) {
        let _enter = self.span.enter();
        if self.table.remove(function) {
            tracing::info!(function, "function removed");
        }
    }

    /// Builds schedulers for every function of the startup state.
    pub fn seed(&self, state: &FunctionState) {
        let _enter = self.span.enter();
        let applied = self.table.seed(state);
        tracing::info!(
            applied,
            total = state.functions.len(),
            "loaded function state"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use golb_core::{GatewaySet, RoutingTable, WeightAssignment};

    use super::*;
    use crate::forward::{NodeHeaders, X_FINAL_HOST};
    use crate::handler::Handler;
    use crate::test_support::{spawn_backend, spawn_backend_with_delay, spawn_proxy};

    fn wrr(gateways: GatewaySet) -> WrrHandler {
        wrr_with_timeout(gateways, Duration::from_secs(5))
    }

    fn wrr_with_timeout(gateways: GatewaySet, timeout: Duration) -> WrrHandler {
        let table = Arc::new(RoutingTable::new("zone-a", gateways));
        let headers = NodeHeaders::new("node-1").unwrap();
        WrrHandler::new(table, Forwarder::new(headers, Some(timeout)), Span::none())
    }

    fn handler(gateways: GatewaySet) -> Arc<Handler> {
        Arc::new(Handler::WeightedRoundRobin(wrr(gateways)))
    }

    fn update(handler: &Handler, function: &str, ips: &[String], weights: Vec<u32>) {
        handler.handle_weight_update(ChangeEvent {
            zone: "zone-a".into(),
            function: function.into(),
            weights: WeightAssignment::new(ips.iter().cloned(), weights),
        });
    }

    #[test]
    fn test_route_selects_direct_scheduler_when_forwarded() {
        let handler = wrr(GatewaySet::new(["10.0."]));
        handler
            .table()
            .apply(
                "nginx",
                WeightAssignment::new(["10.0.0.1", "192.168.1.5"], vec![4, 1]),
            )
            .unwrap();

        for _ in 0..10 {
            let req = Request::builder()
                .uri("/function/nginx/extra?x=1")
                .header(X_FORWARDED_FOR, "other-node")
                .body(())
                .unwrap();
            let (target, path) = handler.route(&req).unwrap();
            assert_eq!(target, "192.168.1.5");
            assert_eq!(path, "/extra?x=1");
        }

        let req = Request::builder()
            .uri("/function/nginx/extra")
            .body(())
            .unwrap();
        let (target, path) = handler.route(&req).unwrap();
        assert_eq!(target, "10.0.0.1");
        assert_eq!(path, "/function/nginx");
    }

    #[tokio::test]
    async fn test_unknown_function_returns_404_with_zone() {
        let proxy = spawn_proxy(handler(GatewaySet::default())).await;

        let resp = reqwest::get(format!("http://{}/function/nginx", proxy.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body = resp.text().await.unwrap();
        assert!(body.contains("nginx"), "{body}");
        assert!(body.contains("zone-a"), "{body}");
    }

    #[tokio::test]
    async fn test_malformed_path_returns_404() {
        let proxy = spawn_proxy(handler(GatewaySet::default())).await;

        let resp = reqwest::get(format!("http://{}/api/nginx", proxy.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert!(resp.text().await.unwrap().contains("zone-a"));
    }

    #[tokio::test]
    async fn test_forwards_trailing_path_and_stamps_headers() {
        let backend = spawn_backend().await;
        let handler = handler(GatewaySet::default());
        update(&handler, "echo", &[backend.to_string()], vec![1]);
        let proxy = spawn_proxy(handler).await;

        let resp = reqwest::get(format!("http://{}/function/echo/hello?x=1", proxy.addr))
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let headers = resp.headers().clone();
        assert_eq!(headers[X_FORWARDED_FOR.as_str()], "node-1");
        assert_eq!(headers[X_FINAL_HOST.as_str()], backend.to_string().as_str());
        assert!(headers.contains_key("x-forwarded-host-node-1"));

        let body = resp.text().await.unwrap();
        assert!(body.contains("path=/hello?x=1"), "{body}");
        assert!(body.contains("forwarded-for=node-1"), "{body}");
        assert!(body.contains(&format!("final-host={backend}")), "{body}");
        assert!(body.contains(&format!("host={backend}")), "{body}");
        assert!(body.contains("marker=true"), "{body}");
    }

    #[tokio::test]
    async fn test_gateway_receives_function_root() {
        let gateway = spawn_backend().await;
        let instance = spawn_backend().await;
        let handler = handler(GatewaySet::new([gateway.to_string()]));
        update(
            &handler,
            "echo",
            &[gateway.to_string(), instance.to_string()],
            vec![1, 1],
        );
        let proxy = spawn_proxy(handler).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/function/echo/hello", proxy.addr);

        // Fresh cycle with equal weights: gateway first, then the instance.
        let first = client.get(&url).send().await.unwrap().text().await.unwrap();
        assert!(first.contains("path=/function/echo"), "{first}");
        assert!(!first.contains("/hello"), "{first}");

        let second = client.get(&url).send().await.unwrap().text().await.unwrap();
        assert!(second.contains("path=/hello"), "{second}");
    }

    #[tokio::test]
    async fn test_forwarded_request_skips_gateway() {
        let gateway = spawn_backend().await;
        let instance = spawn_backend().await;
        let handler = handler(GatewaySet::new([gateway.to_string()]));
        update(
            &handler,
            "echo",
            &[gateway.to_string(), instance.to_string()],
            vec![5, 1],
        );
        let proxy = spawn_proxy(handler).await;
        let client = reqwest::Client::new();

        for _ in 0..4 {
            let resp = client
                .get(format!("http://{}/function/echo/extra", proxy.addr))
                .header("X-Forwarded-For", "gateway-node")
                .send()
                .await
                .unwrap();
            assert_eq!(
                resp.headers()[X_FINAL_HOST.as_str()],
                instance.to_string().as_str()
            );
        }
    }

    #[tokio::test]
    async fn test_sequential_requests_reuse_upstream_connection() {
        let backend = spawn_backend().await;
        let handler = handler(GatewaySet::default());
        update(&handler, "echo", &[backend.to_string()], vec![1]);
        let proxy = spawn_proxy(handler).await;
        let client = reqwest::Client::new();

        let mut peers = std::collections::HashSet::new();
        for _ in 0..4 {
            let body = client
                .get(format!("http://{}/function/echo", proxy.addr))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            let peer = body.rsplit("peer=").next().unwrap().to_string();
            peers.insert(peer);
        }
        assert!(peers.len() < 4, "no upstream connection was reused: {peers:?}");
    }

    #[tokio::test]
    async fn test_slow_target_returns_504() {
        let backend = spawn_backend_with_delay(Duration::from_millis(500)).await;
        let handler = Arc::new(Handler::WeightedRoundRobin(wrr_with_timeout(
            GatewaySet::default(),
            Duration::from_millis(50),
        )));
        update(&handler, "slow", &[backend.to_string()], vec![1]);
        let proxy = spawn_proxy(handler).await;

        let resp = reqwest::get(format!("http://{}/function/slow", proxy.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), 504);
        assert!(resp.text().await.unwrap().contains("did not answer"));
    }

    #[tokio::test]
    async fn test_unreachable_target_returns_502() {
        // Bind and drop to get a port nobody listens on.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let handler = handler(GatewaySet::default());
        update(&handler, "gone", &[addr.to_string()], vec![1]);
        let proxy = spawn_proxy(handler).await;

        let resp = reqwest::get(format!("http://{}/function/gone", proxy.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_serving_previous_targets() {
        let backend = spawn_backend().await;
        let handler = handler(GatewaySet::default());
        update(&handler, "echo", &[backend.to_string()], vec![1]);
        update(&handler, "echo", &[backend.to_string()], vec![0]);
        let proxy = spawn_proxy(handler).await;

        let resp = reqwest::get(format!("http://{}/function/echo", proxy.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
}

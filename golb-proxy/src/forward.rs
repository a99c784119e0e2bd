//! Request rewriting and upstream forwarding.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::{Authority, Uri};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::connection_pool::ConnectionPool;
use crate::error::ProxyError;

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Header marking a request as already forwarded by a golb node.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
/// Header reporting the resolved backend.
pub const X_FINAL_HOST: HeaderName = HeaderName::from_static("x-final-host");

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Builds a plain-text response.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(body.into()).map_err(|never| match never {}).boxed());
    *response.status_mut() = status;
    response
}

/// Per-node headers stamped on forwarded requests and their responses.
#[derive(Debug, Clone)]
pub struct NodeHeaders {
    node_name: HeaderValue,
    forward_marker: HeaderName,
}

impl NodeHeaders {
    /// Validates `node_name` for use in header names and values.
    pub fn new(node_name: &str) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidNodeName(node_name.to_string());
        let forward_marker = HeaderName::from_bytes(format!("X-Forwarded-Host-{node_name}").as_bytes())
            .map_err(|_| invalid())?;
        let node_name = HeaderValue::from_str(node_name).map_err(|_| invalid())?;

        Ok(Self {
            node_name,
            forward_marker,
        })
    }

    /// Name of the `X-Forwarded-Host-<node>` header.
    pub fn forward_marker(&self) -> &HeaderName {
        &self.forward_marker
    }

    /// Sets the node marker, the timestamp and the final host on `headers`.
    pub fn stamp(&self, headers: &mut HeaderMap, final_host: &HeaderValue) {
        headers.insert(X_FORWARDED_FOR, self.node_name.clone());
        if let Ok(now) = HeaderValue::from_str(&unix_timestamp()) {
            headers.insert(self.forward_marker().clone(), now);
        }
        headers.insert(X_FINAL_HOST, final_host.clone());
    }
}

/// Seconds since the epoch with sub-microsecond precision.
fn unix_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    format!("{secs:.7}")
}

/// Removes hop-by-hop headers, including those listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Normalizes a target to `host:port`, defaulting to port 80.
fn target_authority(target: &str) -> Result<String, ProxyError> {
    let authority: Authority = target
        .parse()
        .map_err(|_| ProxyError::InvalidTarget(target.to_string()))?;
    Ok(format!(
        "{}:{}",
        authority.host(),
        authority.port_u16().unwrap_or(80)
    ))
}

/// Sends rewritten requests to their targets over plain HTTP/1.1.
#[derive(Debug, Clone)]
pub struct Forwarder {
    pool: ConnectionPool,
    timeout: Option<Duration>,
    headers: NodeHeaders,
}

impl Forwarder {
    /// Creates a forwarder; `timeout` bounds the wait for response headers.
    pub fn new(headers: NodeHeaders, timeout: Option<Duration>) -> Self {
        Self {
            pool: ConnectionPool::new(),
            timeout,
            headers,
        }
    }

    /// Forwards `req` to `target` at `path_and_query` and streams back the response.
    ///
    /// The request and the response are stamped with this node's headers.
    pub async fn forward(
        &self,
        target: &str,
        path_and_query: &str,
        mut req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let authority = target_authority(target)?;
        let final_host =
            HeaderValue::from_str(target).map_err(|_| ProxyError::InvalidTarget(target.to_string()))?;

        *req.uri_mut() = Uri::builder()
            .path_and_query(path_and_query)
            .build()
            .map_err(|_| ProxyError::InvalidTarget(format!("{target}{path_and_query}")))?;

        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        headers.insert(header::HOST, final_host.clone());
        self.headers.stamp(headers, &final_host);

        tracing::debug!(upstream = target, path = path_and_query, "forwarding request");

        let exchange = self.send(&authority, req);
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| ProxyError::UpstreamTimeout {
                    target: target.to_string(),
                    timeout,
                })??,
            None => exchange.await?,
        };

        let mut response = response.map(|body| body.boxed());
        let headers = response.headers_mut();
        strip_hop_by_hop(headers);
        self.headers.stamp(headers, &final_host);
        Ok(response)
    }

    async fn send(
        &self,
        authority: &str,
        req: Request<Incoming>,
    ) -> Result<Response<Incoming>, ProxyError> {
        let mut sender = match self.pool.try_pop(authority) {
            Some(sender) => sender,
            None => self.connect(authority).await?,
        };

        let response = sender
            .send_request(req)
            .await
            .map_err(|source| ProxyError::Upstream {
                target: authority.to_string(),
                source,
            })?;

        self.pool.push(authority, sender);
        Ok(response)
    }

    async fn connect(
        &self,
        authority: &str,
    ) -> Result<hyper::client::conn::http1::SendRequest<Incoming>, ProxyError> {
        tracing::debug!(
            upstream = %authority,
            pooled = self.pool.idle_count(authority),
            "opening upstream connection"
        );
        let stream = TcpStream::connect(authority)
            .await
            .map_err(|source| ProxyError::Connect {
                target: authority.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(upstream = %authority, error = %e, "cannot set TCP_NODELAY");
        }

        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| ProxyError::Upstream {
                target: authority.to_string(),
                source,
            })?;

        let upstream = authority.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(upstream = %upstream, error = %e, "upstream connection closed");
            }
        });

        Ok(sender)
    }
}

/// Maps a forwarding failure to the response sent to the caller.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let status = match err {
        ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    text_response(status, err.to_string())
}

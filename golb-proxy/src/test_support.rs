//! Loopback servers for handler tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::handler::Handler;
use crate::server;

/// A proxy serving on a loopback port; stops when dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    _shutdown: watch::Sender<bool>,
}

pub async fn spawn_proxy(handler: Arc<Handler>) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = watch::channel(false);

    tokio::spawn(server::serve(listener, handler, rx));
    TestProxy {
        addr,
        _shutdown: tx,
    }
}

/// Backend describing what it received: path, forwarding headers, host and
/// the peer address of the connection.
pub async fn spawn_backend() -> SocketAddr {
    spawn_backend_with_delay(Duration::ZERO).await
}

/// Like [`spawn_backend`], answering each request only after `delay`.
pub async fn spawn_backend_with_delay(delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let service = service_fn(move |req| describe(req, peer, delay));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

async fn describe(
    req: Request<Incoming>,
    peer: SocketAddr,
    delay: Duration,
) -> Result<Response<Full<Bytes>>, Infallible> {
    tokio::time::sleep(delay).await;
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    let marker = req
        .headers()
        .keys()
        .any(|k| k.as_str().starts_with("x-forwarded-host-"));

    let body = format!(
        "path={} forwarded-for={} final-host={} host={} marker={} peer={}",
        req.uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str()),
        header("x-forwarded-for"),
        header("x-final-host"),
        header("host"),
        marker,
        peer,
    );
    Ok(Response::new(Full::new(Bytes::from(body))))
}

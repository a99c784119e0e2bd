//! Lock-free hot pool implementation using DashMap and SegQueue.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;

/// A lock-free pool of idle HTTP/1.1 upstream connections, keyed by target authority.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    /// Maps a `host:port` authority to a lock-free queue of idle senders.
    idle_connections: Arc<DashMap<String, Arc<SegQueue<SendRequest<Incoming>>>>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops a sender to `authority` that can take a request right now.
    ///
    /// Closed senders are dropped. Senders still busy streaming a previous
    /// response are put back for later.
    pub fn try_pop(&self, authority: &str) -> Option<SendRequest<Incoming>> {
        let queue = self.idle_connections.get(authority)?.value().clone();

        let mut busy = Vec::new();
        let mut found = None;
        while let Some(sender) = queue.pop() {
            if sender.is_closed() {
                continue;
            }
            if sender.is_ready() {
                found = Some(sender);
                break;
            }
            busy.push(sender);
        }

        for sender in busy {
            queue.push(sender);
        }
        found
    }

    /// Pushes a sender back into the pool for reuse.
    pub fn push(&self, authority: &str, sender: SendRequest<Incoming>) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle_connections
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        queue.push(sender);
    }

    /// Number of pooled senders for `authority`, closed ones included.
    pub fn idle_count(&self, authority: &str) -> usize {
        self.idle_connections
            .get(authority)
            .map_or(0, |queue| queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pool() {
        let pool = ConnectionPool::new();
        assert!(pool.try_pop("127.0.0.1:80").is_none());
        assert_eq!(pool.idle_count("127.0.0.1:80"), 0);
    }
}

//! Connection pooling by authority
//!
//! The proxy core keeps one HTTP/2 connection per upstream authority.
//! The pool hands back a healthy pooled connection or dials a new one
//! through a caller-supplied factory (transport establishment stays
//! outside the engine). Faulted connections are evicted so the next
//! checkout opens a fresh one.

use crate::h2::config::ConnectionConfig;
use crate::h2::connection::Connection;
use crate::h2::error::Result;
use crate::transport::{Authority, Transport};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Pool of HTTP/2 connections keyed by authority
#[derive(Default)]
pub struct ConnectionPool {
    connections: Mutex<HashMap<Authority, Arc<Connection>>>,
}

impl ConnectionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        ConnectionPool::default()
    }

    /// Get the pooled connection for `authority`, dialing through
    /// `dial` when none exists or the pooled one has faulted
    ///
    /// The dial factory produces the established transport (TCP or
    /// TLS); the pool performs the HTTP/2 handshake on top of it.
    pub async fn checkout<T, F, Fut>(
        &self,
        authority: Authority,
        config: ConnectionConfig,
        dial: F,
    ) -> Result<Arc<Connection>>
    where
        T: Transport,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(&authority) {
            if !existing.is_faulted() {
                return Ok(existing.clone());
            }
            debug!(%authority, "evicting faulted connection");
            connections.remove(&authority);
        }

        let transport = dial().await?;
        let connection = Arc::new(Connection::connect(transport, config).await?);
        debug!(%authority, "connection pooled");
        connections.insert(authority, connection.clone());
        Ok(connection)
    }

    /// Drop the pooled connection for `authority`, if any
    pub async fn remove(&self, authority: &Authority) -> Option<Arc<Connection>> {
        self.connections.lock().await.remove(authority)
    }

    /// Evict every faulted connection
    pub async fn sweep(&self) {
        let mut connections = self.connections.lock().await;
        connections.retain(|authority, connection| {
            let healthy = !connection.is_faulted();
            if !healthy {
                debug!(%authority, "swept faulted connection");
            }
            healthy
        });
    }

    /// Number of pooled connections
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether the pool is empty
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

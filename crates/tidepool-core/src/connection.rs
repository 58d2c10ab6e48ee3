//! Connection and factory traits implemented by database drivers

use crate::{ConnectionConfig, QueryResult, Result, Value};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A single database session
///
/// A connection is constructed unconnected by a [`ConnectionFactory`] and
/// becomes usable once [`connect`](Connection::connect) succeeds. The pool
/// owns which logical state a connection is in; the implementation owns the
/// socket and protocol.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Perform the handshake (open the socket, authenticate)
    ///
    /// `timeout` is the pool's acquire timeout. The pool also enforces it
    /// externally, so implementations may treat it as a hint.
    async fn connect(&self, timeout: Duration) -> Result<()>;

    /// Execute a query with bound values
    async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult>;

    /// Gracefully end the session
    async fn release(&self) -> Result<()>;

    /// Tear the session down immediately
    async fn destroy(&self) -> Result<()>;
}

/// Factory for constructing new, not yet connected, connections
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Construct a connection from the pool's connection configuration
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn Connection>;
}

impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    fn create(&self, config: &ConnectionConfig) -> Arc<dyn Connection> {
        (**self).create(config)
    }
}

//! Tidepool Pool - Adaptive client-side connection pooling
//!
//! This crate manages a bounded set of database connections: admission
//! control with a FIFO query queue, proactive buffering of ready connections,
//! and decay-based scale-down of idle ones.

pub mod logging;
pub mod pool;

pub use pool::{ConnectionId, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use tidepool_core::{
    Connection, ConnectionConfig, ConnectionFactory, QueryResult, Result, TidepoolError, Value,
};

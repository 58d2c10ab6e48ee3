//! Adaptive connection pooling
//!
//! The pool hands out connections to queries, queues queries when every
//! connection is busy and the pool is at its limit, keeps a buffer of spare
//! connected connections after each claim, and periodically destroys
//! connections that have been idle too long.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_pool::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .with_max_connections(20)
//!     .with_connection_buffer(3)
//!     .with_queue_limit(100);
//!
//! let pool = ConnectionPool::new(config, driver_factory)?;
//! let result = pool.query("SELECT * FROM users WHERE id = ?", &[Value::Int(7)]).await?;
//! pool.end().await?;
//! ```

mod buffer;
mod config;
mod decay;
mod pool;
mod queue;
mod registry;
mod stats;


pub use config::PoolConfig;
pub use pool::ConnectionPool;
pub use registry::{ConnectionId, PooledConnection};
pub use stats::PoolStats;

//! Tidepool Core - Collaborator abstractions for the tidepool connection pool
//!
//! This crate defines the seams the pool talks through and the types that
//! cross them:
//!
//! - `Connection` - Trait for a single database session (handshake, query, teardown)
//! - `ConnectionFactory` - Trait for constructing unconnected sessions
//! - `ConnectionConfig` - Opaque configuration handed to the factory
//! - `Value` and `QueryResult`, carried between callers and connections untouched
//! - `TidepoolError` - The error type shared by the pool and its collaborators

mod config;
mod connection;
mod error;
mod types;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use types::*;

//! Error types for tidepool

use thiserror::Error;

/// Core error type for pool and connection operations
#[derive(Error, Debug)]
pub enum TidepoolError {
    /// The pool has been ended or destroyed
    #[error("Pool is closed")]
    PoolClosed,

    /// No free connection, the pool is at its limit, and there is no queue to wait in
    #[error("Capacity exceeded: all {limit} connections are busy")]
    CapacityExceeded { limit: usize },

    /// The query queue is at capacity
    #[error("Queue full: {limit} queries already waiting")]
    QueueFull { limit: usize },

    /// Handshake failure or timeout while establishing a connection
    #[error("Connection error: {0}")]
    Connect(#[source] Box<TidepoolError>),

    /// Query execution failure reported by the connection
    #[error("Query error: {0}")]
    Query(#[source] Box<TidepoolError>),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TidepoolError {
    /// Wrap a collaborator error raised while connecting
    pub fn connect(source: TidepoolError) -> Self {
        TidepoolError::Connect(Box::new(source))
    }

    /// Wrap a collaborator error raised while running a query
    pub fn query(source: TidepoolError) -> Self {
        TidepoolError::Query(Box::new(source))
    }

    /// Check if this error was caused by the pool being closed
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, TidepoolError::PoolClosed)
    }
}

/// Result type alias for tidepool operations
pub type Result<T> = std::result::Result<T, TidepoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connect_error_keeps_source() {
        let err = TidepoolError::connect(TidepoolError::Timeout("handshake took 10s".into()));
        assert_eq!(
            err.to_string(),
            "Connection error: Timeout: handshake took 10s"
        );
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Timeout: handshake took 10s");
    }

    #[test]
    fn test_limit_errors_display() {
        assert_eq!(
            TidepoolError::QueueFull { limit: 3 }.to_string(),
            "Queue full: 3 queries already waiting"
        );
        assert_eq!(
            TidepoolError::CapacityExceeded { limit: 10 }.to_string(),
            "Capacity exceeded: all 10 connections are busy"
        );
        assert!(TidepoolError::PoolClosed.is_pool_closed());
        assert!(!TidepoolError::Other("x".into()).is_pool_closed());
    }
}

//! FIFO backlog of queries waiting for a connection

use std::collections::VecDeque;

use tidepool_core::{QueryResult, Result, TidepoolError, Value};
use tokio::sync::oneshot;

/// A query waiting to be dispatched, with the channel that settles its caller
pub(crate) struct QueuedQuery {
    pub sql: String,
    pub values: Vec<Value>,
    responder: oneshot::Sender<Result<QueryResult>>,
}

impl QueuedQuery {
    /// Create a query and the receiver its caller awaits
    pub fn new(sql: &str, values: &[Value]) -> (Self, oneshot::Receiver<Result<QueryResult>>) {
        let (responder, receiver) = oneshot::channel();
        let query = Self {
            sql: sql.to_string(),
            values: values.to_vec(),
            responder,
        };
        (query, receiver)
    }

    /// Whether the caller has stopped waiting for the result
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    /// Settle the caller with the query outcome
    pub fn settle(self, result: Result<QueryResult>) {
        if self.responder.send(result).is_err() {
            tracing::debug!("query result dropped, caller no longer waiting");
        }
    }
}

/// Bounded FIFO queue of [`QueuedQuery`]
pub(crate) struct QueryQueue {
    entries: VecDeque<QueuedQuery>,
    limit: Option<usize>,
}

impl QueryQueue {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Append a query, or reject it if the queue is at capacity
    ///
    /// A limit of zero means the pool does not queue at all, which surfaces
    /// as a capacity error rather than a full queue.
    pub fn push(&mut self, query: QueuedQuery, max_connections: usize) -> Result<()> {
        match self.limit {
            Some(0) => Err(TidepoolError::CapacityExceeded {
                limit: max_connections,
            }),
            Some(limit) if self.entries.len() >= limit => Err(TidepoolError::QueueFull { limit }),
            _ => {
                self.entries.push_back(query);
                Ok(())
            }
        }
    }

    /// Take the oldest query whose caller is still waiting
    pub fn pop(&mut self) -> Option<QueuedQuery> {
        while let Some(query) = self.entries.pop_front() {
            if !query.is_abandoned() {
                return Some(query);
            }
            tracing::debug!("skipping abandoned queued query");
        }
        None
    }

    /// Drop every waiting query; their callers observe a closed pool
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = QueryQueue::new(None);
        let (a, _rx_a) = QueuedQuery::new("SELECT 'a'", &[]);
        let (b, _rx_b) = QueuedQuery::new("SELECT 'b'", &[]);
        queue.push(a, 1).expect("push a");
        queue.push(b, 1).expect("push b");

        assert_eq!(queue.pop().map(|q| q.sql), Some("SELECT 'a'".to_string()));
        assert_eq!(queue.pop().map(|q| q.sql), Some("SELECT 'b'".to_string()));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_queue_limit() {
        let mut queue = QueryQueue::new(Some(1));
        let (a, _rx_a) = QueuedQuery::new("SELECT 1", &[]);
        let (b, _rx_b) = QueuedQuery::new("SELECT 2", &[]);
        queue.push(a, 4).expect("push");

        let err = queue.push(b, 4).unwrap_err();
        assert!(matches!(err, TidepoolError::QueueFull { limit: 1 }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_limit_is_capacity_error() {
        let mut queue = QueryQueue::new(Some(0));
        let (a, _rx) = QueuedQuery::new("SELECT 1", &[]);

        let err = queue.push(a, 4).unwrap_err();
        assert!(matches!(err, TidepoolError::CapacityExceeded { limit: 4 }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_skips_abandoned() {
        let mut queue = QueryQueue::new(None);
        let (a, rx_a) = QueuedQuery::new("SELECT 'a'", &[]);
        let (b, _rx_b) = QueuedQuery::new("SELECT 'b'", &[]);
        queue.push(a, 1).expect("push a");
        queue.push(b, 1).expect("push b");
        drop(rx_a);

        assert_eq!(queue.pop().map(|q| q.sql), Some("SELECT 'b'".to_string()));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_clear_settles_waiters_as_closed() {
        let mut queue = QueryQueue::new(None);
        let (a, rx) = QueuedQuery::new("SELECT 1", &[Value::Int(1)]);
        queue.push(a, 1).expect("push");

        assert_eq!(queue.clear(), 1);
        assert!(rx.await.is_err());
    }
}

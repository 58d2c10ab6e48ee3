//! Connection membership bookkeeping
//!
//! Every connection the pool creates lives in `all` until it is removed, and
//! in exactly one of `busy` / `free` while it is registered. Moves between the
//! two subsets are single operations so no caller can observe a connection
//! that is in neither.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tidepool_core::{Connection, QueryResult, Result, TidepoolError, Value};

/// Identity of a pooled connection, unique within the process
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection owned by the pool
///
/// Handed out by [`ConnectionPool::get_connection`](super::ConnectionPool::get_connection)
/// and given back with [`ConnectionPool::release_connection`](super::ConnectionPool::release_connection).
pub struct PooledConnection {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_query_at: Mutex<Option<Instant>>,
}

impl PooledConnection {
    pub(crate) fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            connection,
            created_at: Instant::now(),
            last_query_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the underlying driver connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the last query on this connection completed, if any has
    pub fn last_query_at(&self) -> Option<Instant> {
        *self.last_query_at.lock()
    }

    /// Run a query on this connection, recording its completion time
    ///
    /// Failures from the driver are wrapped in [`TidepoolError::Query`].
    pub async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult> {
        let result = self.connection.query(sql, values).await;
        self.touch();
        result.map_err(TidepoolError::query)
    }

    pub(crate) fn touch(&self) {
        *self.last_query_at.lock() = Some(Instant::now());
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_query_at", &self.last_query_at())
            .finish()
    }
}

/// Membership sets for every connection the pool knows about
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    all: HashMap<ConnectionId, Arc<PooledConnection>>,
    busy: HashSet<ConnectionId>,
    /// Ordered by the time each connection became free
    free: IndexSet<ConnectionId>,
    /// Busy connections whose handshake has not finished
    connecting: HashSet<ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in `all`
    ///
    /// Limits are not checked here; callers verify `total() < max` first.
    pub fn create(&mut self, connection: Arc<dyn Connection>) -> Arc<PooledConnection> {
        let entry = Arc::new(PooledConnection::new(connection));
        self.all.insert(entry.id, Arc::clone(&entry));
        entry
    }

    /// Register a new connection that is about to connect
    pub fn create_busy(&mut self, connection: Arc<dyn Connection>) -> Arc<PooledConnection> {
        let entry = self.create(connection);
        self.mark_busy(entry.id);
        self.connecting.insert(entry.id);
        entry
    }

    /// Record a finished handshake; false if the connection was removed meanwhile
    pub fn mark_connected(&mut self, id: ConnectionId) -> bool {
        self.connecting.remove(&id);
        self.all.contains_key(&id)
    }

    /// Move a connection into `busy`; no-op for unknown connections
    pub fn mark_busy(&mut self, id: ConnectionId) -> bool {
        if !self.all.contains_key(&id) {
            return false;
        }
        self.free.shift_remove(&id);
        self.busy.insert(id);
        true
    }

    /// Move a connection into `free`; no-op for unknown connections
    pub fn mark_free(&mut self, id: ConnectionId) -> bool {
        if !self.all.contains_key(&id) {
            return false;
        }
        self.busy.remove(&id);
        self.free.insert(id);
        true
    }

    /// Claim the most recently freed connection for a caller
    pub fn claim_free(&mut self) -> Option<Arc<PooledConnection>> {
        let id = self.free.pop()?;
        self.busy.insert(id);
        self.all.get(&id).cloned()
    }

    /// Remove a connection from every set
    pub fn remove(&mut self, id: ConnectionId) -> Option<Arc<PooledConnection>> {
        self.busy.remove(&id);
        self.free.shift_remove(&id);
        self.connecting.remove(&id);
        self.all.remove(&id)
    }

    /// Remove every connection, returning the ones that finished connecting
    ///
    /// Connections still in their handshake are dropped from the registry
    /// but not returned: the task running the handshake tears them down
    /// once it sees they are gone.
    pub fn drain(&mut self) -> Vec<Arc<PooledConnection>> {
        let connecting = std::mem::take(&mut self.connecting);
        self.busy.clear();
        self.free.clear();
        self.all
            .drain()
            .filter(|(id, _)| !connecting.contains(id))
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn is_free(&self, id: ConnectionId) -> bool {
        self.free.contains(&id)
    }

    /// Free connections, oldest-freed first
    pub fn free_connections(&self) -> impl Iterator<Item = &Arc<PooledConnection>> {
        self.free.iter().filter_map(move |id| self.all.get(id))
    }

    pub fn total(&self) -> usize {
        self.all.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Inert;

    #[async_trait]
    impl Connection for Inert {
        async fn connect(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn query(&self, _sql: &str, _values: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }

        async fn release(&self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            Ok(())
        }
    }

    fn assert_consistent(registry: &ConnectionRegistry) {
        assert_eq!(
            registry.total(),
            registry.busy_count() + registry.free_count()
        );
        assert!(registry.free.iter().all(|id| !registry.busy.contains(id)));
    }

    #[test]
    fn test_create_only_adds_to_all() {
        let mut registry = ConnectionRegistry::new();
        let entry = registry.create(Arc::new(Inert));
        assert!(registry.all.contains_key(&entry.id()));
        assert_eq!(registry.busy_count(), 0);
        assert_eq!(registry.free_count(), 0);

        registry.mark_busy(entry.id());
        assert_consistent(&registry);
    }

    #[test]
    fn test_moves_are_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let entry = registry.create_busy(Arc::new(Inert));

        assert!(registry.mark_free(entry.id()));
        assert!(registry.mark_free(entry.id()));
        assert_eq!(registry.free_count(), 1);
        assert_eq!(registry.busy_count(), 0);
        assert_consistent(&registry);

        assert!(registry.mark_busy(entry.id()));
        assert!(registry.mark_busy(entry.id()));
        assert_eq!(registry.busy_count(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn test_removed_connection_cannot_come_back() {
        let mut registry = ConnectionRegistry::new();
        let entry = registry.create_busy(Arc::new(Inert));

        assert!(registry.remove(entry.id()).is_some());
        assert!(registry.remove(entry.id()).is_none());
        assert!(!registry.mark_free(entry.id()));
        assert!(!registry.mark_busy(entry.id()));
        assert_eq!(registry.total(), 0);
        assert_consistent(&registry);
    }

    #[test]
    fn test_claim_prefers_most_recently_freed() {
        let mut registry = ConnectionRegistry::new();
        let first = registry.create_busy(Arc::new(Inert));
        let second = registry.create_busy(Arc::new(Inert));
        registry.mark_free(first.id());
        registry.mark_free(second.id());

        let claimed = registry.claim_free().expect("free connection");
        assert_eq!(claimed.id(), second.id());
        assert!(!registry.is_free(second.id()));
        assert_consistent(&registry);

        let ids: Vec<_> = registry.free_connections().map(|c| c.id()).collect();
        assert_eq!(ids, vec![first.id()]);
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.create_busy(Arc::new(Inert));
        let b = registry.create_busy(Arc::new(Inert));
        registry.mark_connected(a.id());
        registry.mark_connected(b.id());
        registry.mark_free(a.id());

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.total(), 0);
        assert_eq!(registry.free_count(), 0);
        assert_eq!(registry.busy_count(), 0);
    }

    #[test]
    fn test_drain_skips_connections_still_connecting() {
        let mut registry = ConnectionRegistry::new();
        let ready = registry.create_busy(Arc::new(Inert));
        let pending = registry.create_busy(Arc::new(Inert));
        assert!(registry.mark_connected(ready.id()));

        let drained: Vec<_> = registry.drain().iter().map(|c| c.id()).collect();
        assert_eq!(drained, vec![ready.id()]);
        assert_eq!(registry.total(), 0);
        assert!(!registry.mark_connected(pending.id()));
        assert_consistent(&registry);
    }
}

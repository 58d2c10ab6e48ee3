//! Connection pool implementation

use std::sync::Arc;

use parking_lot::Mutex;
use tidepool_core::{ConnectionFactory, QueryResult, Result, TidepoolError, Value};
use tokio::task::JoinHandle;

use super::config::PoolConfig;
use super::decay::spawn_decay_scanner;
use super::queue::{QueryQueue, QueuedQuery};
use super::registry::{ConnectionRegistry, PooledConnection};
use super::stats::PoolStats;

/// Everything guarded by the pool lock
///
/// The lock is never held across an await point, so every membership change
/// runs to completion before another one starts.
pub(super) struct PoolState {
    pub registry: ConnectionRegistry,
    pub queue: QueryQueue,
    pub closed: bool,
}

/// How an admitted request got its connection
pub(super) enum Acquired {
    /// A free connection, already moved to busy
    Reused(Arc<PooledConnection>),
    /// A freshly constructed connection that still has to connect
    Created(Arc<PooledConnection>),
}

pub(super) struct PoolInner {
    pub config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    pub state: Mutex<PoolState>,
    scanner: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    /// Claim a free connection, or register a new one if under the limit
    fn acquire_locked(&self, state: &mut PoolState) -> Option<Acquired> {
        if let Some(entry) = state.registry.claim_free() {
            return Some(Acquired::Reused(entry));
        }
        if state.registry.total() < self.config.max_connections() {
            return Some(Acquired::Created(self.create_locked(state)));
        }
        None
    }

    /// Construct a connection and register it as busy while it connects
    pub fn create_locked(&self, state: &mut PoolState) -> Arc<PooledConnection> {
        let connection = self.factory.create(self.config.connection_config());
        state.registry.create_busy(connection)
    }

    /// Run the handshake for a registered connection
    ///
    /// On failure the connection is removed from the registry before the
    /// error is returned. On success it stays busy; the caller decides whether
    /// to use it or release it.
    pub async fn connect(self: &Arc<Self>, entry: &Arc<PooledConnection>) -> Result<()> {
        let timeout = self.config.acquire_timeout();
        let outcome =
            match tokio::time::timeout(timeout, entry.connection().connect(timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TidepoolError::Timeout(format!(
                    "handshake did not finish within {:?}",
                    timeout
                ))),
            };

        match outcome {
            Ok(()) => {
                if self.state.lock().registry.mark_connected(entry.id()) {
                    tracing::debug!(connection_id = entry.id(), "connection established");
                    return Ok(());
                }
                // Closed mid-handshake; close left the teardown to this task.
                Self::destroy_connection(entry).await;
                Err(TidepoolError::PoolClosed)
            }
            Err(e) => {
                self.state.lock().registry.remove(entry.id());
                tracing::debug!(connection_id = entry.id(), error = %e, "connect failed");
                Self::destroy_connection(entry).await;
                self.backfill();
                Err(TidepoolError::connect(e))
            }
        }
    }

    /// Connect a new connection on behalf of a caller that keeps it
    ///
    /// The handshake runs in its own task so a caller that stops waiting
    /// cannot strand the connection in busy.
    async fn connect_reserved(
        self: &Arc<Self>,
        entry: Arc<PooledConnection>,
    ) -> Result<Arc<PooledConnection>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.connect(&entry).await.map(|()| Arc::clone(&entry));
            if let Err(Ok(unclaimed)) = tx.send(outcome) {
                inner.release(&unclaimed);
            }
        });
        rx.await
            .map_err(|_| TidepoolError::Other("connect task ended unexpectedly".into()))?
    }

    /// Run a query on an acquired connection in a detached task
    ///
    /// The connection is released before the caller is settled, so the next
    /// queued query is considered first.
    pub fn dispatch(self: &Arc<Self>, acquired: Acquired, query: QueuedQuery) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let entry = match acquired {
                Acquired::Reused(entry) => entry,
                Acquired::Created(entry) => match inner.connect(&entry).await {
                    Ok(()) => entry,
                    Err(e) => {
                        query.settle(Err(e));
                        return;
                    }
                },
            };
            let result = entry.query(&query.sql, &query.values).await;
            inner.release(&entry);
            query.settle(result);
        });
    }

    /// Move a connection back to free and hand it to the oldest queued query
    pub fn release(self: &Arc<Self>, entry: &Arc<PooledConnection>) {
        let next = {
            let mut state = self.state.lock();
            if state.registry.is_free(entry.id()) || !state.registry.mark_free(entry.id()) {
                return;
            }
            tracing::debug!(connection_id = entry.id(), "connection released");
            if state.closed {
                None
            } else {
                Self::next_queued(&mut state)
            }
        };

        if let Some((entry, query)) = next {
            tracing::debug!(connection_id = entry.id(), "dispatching queued query");
            self.dispatch(Acquired::Reused(entry), query);
        }
    }

    /// Pair at most one queued query with a free connection
    fn next_queued(state: &mut PoolState) -> Option<(Arc<PooledConnection>, QueuedQuery)> {
        if state.registry.free_count() == 0 || state.queue.is_empty() {
            return None;
        }
        let query = state.queue.pop()?;
        let entry = state.registry.claim_free()?;
        Some((entry, query))
    }

    /// Start a connection for the oldest queued query when a slot opened up
    /// without a release (a failed connect or a purge)
    ///
    /// While the database is unreachable every failed connect backfills the
    /// next queued query, so the queue drains with connect errors instead of
    /// waiting for a release.
    pub fn backfill(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            if state.closed
                || state.queue.is_empty()
                || state.registry.total() >= self.config.max_connections()
            {
                return;
            }
            state
                .queue
                .pop()
                .map(|query| (self.create_locked(&mut state), query))
        };

        if let Some((entry, query)) = next {
            tracing::debug!(connection_id = entry.id(), "backfilling connection for queued query");
            self.dispatch(Acquired::Created(entry), query);
        }
    }

    /// Mark the pool closed and take ownership of every connected connection
    ///
    /// Connections still handshaking are left to their connect task, which
    /// destroys them when it finishes.
    fn close(&self) -> Result<Vec<Arc<PooledConnection>>> {
        let (connections, dropped) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TidepoolError::PoolClosed);
            }
            state.closed = true;
            (state.registry.drain(), state.queue.clear())
        };

        if let Some(scanner) = self.scanner.lock().take() {
            scanner.abort();
        }
        tracing::info!(
            connections = connections.len(),
            dropped_queries = dropped,
            "closing pool"
        );
        Ok(connections)
    }

    pub async fn destroy_connection(entry: &PooledConnection) {
        if let Err(e) = entry.connection().destroy().await {
            tracing::warn!(connection_id = entry.id(), error = %e, "failed to destroy connection");
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats::new(
            state.registry.total(),
            state.registry.free_count(),
            state.registry.busy_count(),
            state.queue.len(),
        )
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(scanner) = self.scanner.get_mut().take() {
            scanner.abort();
        }
    }
}

/// An adaptive pool of database connections
///
/// Queries are served from a free connection when one exists, on a new
/// connection while under `maxConnectionLimit`, and otherwise wait in a FIFO
/// queue. The pool keeps `connectionBuffer` spare connections ready after
/// each claim and retires connections idle longer than `connectionDecay`,
/// never shrinking below `minConnectionLimit`.
///
/// Handles are cheap to clone and share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    ///
    /// Must be called from within a Tokio runtime: the decay scanner and the
    /// construction-time buffer run as background tasks.
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                registry: ConnectionRegistry::new(),
                queue: QueryQueue::new(config.queue_limit()),
                closed: false,
            }),
            config,
            factory: Arc::new(factory),
            scanner: Mutex::new(None),
        });

        if inner.config.connection_decay().is_some() {
            let scanner =
                spawn_decay_scanner(Arc::downgrade(&inner), inner.config.scale_interval());
            *inner.scanner.lock() = Some(scanner);
        }
        if inner.config.buffer_on_construct() {
            inner.buffer();
        }

        tracing::info!(
            max_connections = inner.config.max_connections(),
            min_connections = inner.config.min_connections(),
            connection_buffer = inner.config.connection_buffer(),
            "connection pool created"
        );
        Ok(Self { inner })
    }

    /// Get a connection for exclusive use
    ///
    /// Reuses a free connection or connects a new one. Unlike [`query`](Self::query)
    /// this never waits in the queue: with no free connection and the pool at
    /// its limit it fails with [`TidepoolError::CapacityExceeded`]. Hand the
    /// connection back with [`release_connection`](Self::release_connection).
    #[tracing::instrument(skip(self))]
    pub async fn get_connection(&self) -> Result<Arc<PooledConnection>> {
        let acquired = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TidepoolError::PoolClosed);
            }
            self.inner.acquire_locked(&mut state)
        };
        let acquired = acquired.ok_or(TidepoolError::CapacityExceeded {
            limit: self.inner.config.max_connections(),
        })?;

        self.inner.buffer();
        match acquired {
            Acquired::Reused(entry) => Ok(entry),
            Acquired::Created(entry) => self.inner.connect_reserved(entry).await,
        }
    }

    /// Run a query on a pooled connection
    ///
    /// Waits in the queue, without a timeout, when every connection is busy
    /// and the pool is at its limit. Fails with [`TidepoolError::QueueFull`]
    /// when the queue is at `queueLimit`.
    #[tracing::instrument(skip(self, values), fields(params = values.len()))]
    pub async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult> {
        let (query, receiver) = QueuedQuery::new(sql, values);
        let admitted = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TidepoolError::PoolClosed);
            }
            match self.inner.acquire_locked(&mut state) {
                Some(acquired) => Some((acquired, query)),
                None => {
                    state
                        .queue
                        .push(query, self.inner.config.max_connections())?;
                    tracing::debug!(queued = state.queue.len(), "query queued");
                    None
                }
            }
        };

        if let Some((acquired, query)) = admitted {
            self.inner.buffer();
            self.inner.dispatch(acquired, query);
        }

        // The sender only goes away without a result when the pool closes.
        receiver.await.map_err(|_| TidepoolError::PoolClosed)?
    }

    /// Return a connection to the pool
    ///
    /// Idempotent: releasing a free or unknown connection does nothing.
    pub fn release_connection(&self, connection: &Arc<PooledConnection>) -> Arc<PooledConnection> {
        self.inner.release(connection);
        Arc::clone(connection)
    }

    /// Remove a connection from the pool and destroy it without releasing it
    #[tracing::instrument(skip(self, connection), fields(connection_id = connection.id()))]
    pub async fn purge_connection(
        &self,
        connection: &Arc<PooledConnection>,
    ) -> Arc<PooledConnection> {
        let removed = self.inner.state.lock().registry.remove(connection.id());
        if removed.is_some() {
            tracing::debug!("purging connection");
            PoolInner::destroy_connection(connection).await;
            self.inner.backfill();
        }
        Arc::clone(connection)
    }

    /// Gracefully close the pool: release every connection, then mark it closed
    ///
    /// Queries still waiting in the queue fail with [`TidepoolError::PoolClosed`].
    #[tracing::instrument(skip(self))]
    pub async fn end(&self) -> Result<()> {
        let connections = self.inner.close()?;
        futures::future::join_all(connections.iter().map(|entry| async move {
            if let Err(e) = entry.connection().release().await {
                tracing::warn!(connection_id = entry.id(), error = %e, "failed to release connection");
            }
        }))
        .await;
        Ok(())
    }

    /// Forcefully close the pool: destroy every connection, then mark it closed
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self) -> Result<()> {
        let connections = self.inner.close()?;
        futures::future::join_all(
            connections
                .iter()
                .map(|entry| PoolInner::destroy_connection(entry)),
        )
        .await;
        Ok(())
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

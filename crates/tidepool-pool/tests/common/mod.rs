//! Shared fixtures for pool integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tidepool_pool::{
    Connection, ConnectionConfig, ConnectionFactory, ConnectionPool, PoolStats, QueryResult,
    Result, Value,
};

/// Counters shared by a [`TestFactory`] and every connection it creates
#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub queries: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

struct TestConnection {
    query_delay: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl Connection for TestConnection {
    async fn connect(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn query(&self, sql: &str, _values: &[Value]) -> Result<QueryResult> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.query_delay).await;
        Ok(QueryResult::with_rows(
            vec!["sql".into()],
            vec![vec![Value::from(sql)]],
        ))
    }

    async fn release(&self) -> Result<()> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory for connections that always connect and answer after `query_delay`
pub struct TestFactory {
    pub counters: Arc<Counters>,
    query_delay: Duration,
}

impl TestFactory {
    pub fn new(query_delay: Duration) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            query_delay,
        }
    }
}

impl ConnectionFactory for TestFactory {
    fn create(&self, _config: &ConnectionConfig) -> Arc<dyn Connection> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(TestConnection {
            query_delay: self.query_delay,
            counters: Arc::clone(&self.counters),
        })
    }
}

/// Poll the pool until `condition` holds, checking membership on every poll
pub async fn wait_for(
    pool: &ConnectionPool,
    condition: impl Fn(&PoolStats) -> bool,
) -> anyhow::Result<PoolStats> {
    for _ in 0..1000 {
        let stats = pool.stats();
        anyhow::ensure!(
            stats.is_consistent(),
            "inconsistent stats: {stats:?}"
        );
        if condition(&stats) {
            return Ok(stats);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    anyhow::bail!("condition never held, last stats: {:?}", pool.stats())
}

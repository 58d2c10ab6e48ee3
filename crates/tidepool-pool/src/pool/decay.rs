//! Idle decay of free connections
//!
//! Every `scaleInterval` the scanner destroys free connections whose last
//! query finished more than `connectionDecay` ago (or that never ran one),
//! keeping at least `minConnectionLimit` connections in the pool.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::pool::PoolInner;
use super::registry::{ConnectionId, PooledConnection};

/// Pick which free connections to destroy
///
/// `candidates` are the free connections with their last-query times. When
/// destroying every idle one would drop the pool below `min`, only the
/// longest-idle ones go; connections that never ran a query count as oldest.
pub(crate) fn select_decayed(
    candidates: impl IntoIterator<Item = (ConnectionId, Option<Instant>)>,
    now: Instant,
    decay: Duration,
    total: usize,
    min: usize,
) -> Vec<ConnectionId> {
    let mut purgeable: Vec<_> = candidates
        .into_iter()
        .filter(|(_, last_query)| match last_query {
            None => true,
            Some(at) => now.saturating_duration_since(*at) > decay,
        })
        .collect();

    let allowed = total.saturating_sub(min);
    if purgeable.len() > allowed {
        purgeable.sort_by_key(|(_, last_query)| *last_query);
        purgeable.truncate(allowed);
    }
    purgeable.into_iter().map(|(id, _)| id).collect()
}

impl PoolInner {
    /// Remove decayed connections from the registry and hand them back
    pub(super) fn take_decayed(&self) -> Vec<Arc<PooledConnection>> {
        let Some(decay) = self.config.connection_decay() else {
            return Vec::new();
        };
        let mut state = self.state.lock();
        if state.closed {
            return Vec::new();
        }

        let candidates: Vec<_> = state
            .registry
            .free_connections()
            .map(|entry| (entry.id(), entry.last_query_at()))
            .collect();
        let selected = select_decayed(
            candidates,
            Instant::now(),
            decay,
            state.registry.total(),
            self.config.min_connections(),
        );
        selected
            .into_iter()
            .filter_map(|id| state.registry.remove(id))
            .collect()
    }

    /// Run one decay pass
    pub(super) async fn scan_decay(&self) {
        let decayed = self.take_decayed();
        if decayed.is_empty() {
            return;
        }
        tracing::debug!(count = decayed.len(), "destroying idle connections");
        for entry in &decayed {
            Self::destroy_connection(entry).await;
        }
    }
}

/// Start the periodic decay scan
///
/// The task holds only a weak reference and stops once the pool is gone.
pub(super) fn spawn_decay_scanner(pool: Weak<PoolInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.scan_decay().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: Duration = Duration::from_millis(100);

    #[test]
    fn test_only_idle_connections_are_selected() {
        let now = Instant::now() + Duration::from_secs(10);
        let candidates = vec![
            (1, Some(now - Duration::from_millis(500))),
            (2, Some(now - Duration::from_millis(50))),
            (3, None),
        ];

        let mut selected = select_decayed(candidates, now, DECAY, 3, 0);
        selected.sort();
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn test_floor_keeps_most_recently_used() {
        let now = Instant::now() + Duration::from_secs(10);
        let candidates = vec![
            (1, Some(now - Duration::from_millis(300))),
            (2, Some(now - Duration::from_millis(900))),
            (3, None),
            (4, Some(now - Duration::from_millis(600))),
        ];

        // Five connections in total, floor of three: only two may go.
        let selected = select_decayed(candidates, now, DECAY, 5, 3);
        assert_eq!(selected, vec![3, 2]);
    }

    #[test]
    fn test_floor_at_total_selects_nothing() {
        let now = Instant::now();
        let selected = select_decayed(vec![(1, None), (2, None)], now, DECAY, 2, 2);
        assert!(selected.is_empty());

        let selected = select_decayed(vec![(1, None)], now, DECAY, 1, 4);
        assert!(selected.is_empty());
    }
}

//! Point-in-time view of pool membership

use serde::{Deserialize, Serialize};

/// Counts read from the registry under the pool lock
///
/// `total` is read from the registry's full membership, independently of the
/// busy and free sets, so [`PoolStats::is_consistent`] checks something real.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    total: usize,
    free: usize,
    /// Includes connections still handshaking
    busy: usize,
    queued: usize,
}

impl PoolStats {
    pub fn new(total: usize, free: usize, busy: usize, queued: usize) -> Self {
        Self {
            total,
            free,
            busy,
            queued,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn free(&self) -> usize {
        self.free
    }

    pub fn busy(&self) -> usize {
        self.busy
    }

    /// Queries waiting for a connection
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Every registered connection is either busy or free, never both
    pub fn is_consistent(&self) -> bool {
        self.total == self.free + self.busy
    }

    /// Nothing running and nothing waiting
    pub fn is_idle(&self) -> bool {
        self.busy == 0 && self.queued == 0
    }

    /// Busy share of all connections, 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.busy as f64 / total as f64,
        }
    }
}

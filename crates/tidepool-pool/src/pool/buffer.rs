//! Proactive buffering of free connections
//!
//! After a connection is claimed the pool tops the free set back up to
//! `connectionBuffer`, so the next caller does not pay the handshake. Buffer
//! connections connect in detached tasks; their failures are logged and never
//! reach a caller.

use std::sync::Arc;

use super::pool::PoolInner;

/// Number of connections to create so `free` reaches `buffer` without
/// pushing `total` past `max`
pub(crate) fn buffer_shortfall(buffer: usize, free: usize, total: usize, max: usize) -> usize {
    buffer.saturating_sub(free).min(max.saturating_sub(total))
}

impl PoolInner {
    /// Create and connect enough connections to refill the buffer
    ///
    /// Connections being buffered count as busy until they connect, so
    /// concurrent calls can overshoot the buffer size (never the max limit)
    /// until the handshakes finish.
    pub(super) fn buffer(self: &Arc<Self>) {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let shortfall = buffer_shortfall(
                self.config.connection_buffer(),
                state.registry.free_count(),
                state.registry.total(),
                self.config.max_connections(),
            );
            (0..shortfall)
                .map(|_| self.create_locked(&mut state))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        tracing::debug!(count = pending.len(), "buffering connections");
        for entry in pending {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                match inner.connect(&entry).await {
                    Ok(()) => inner.release(&entry),
                    Err(e) => {
                        tracing::warn!(connection_id = entry.id(), error = %e, "buffer connection failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_fills_buffer() {
        assert_eq!(buffer_shortfall(5, 0, 0, 10), 5);
        assert_eq!(buffer_shortfall(5, 2, 4, 10), 3);
    }

    #[test]
    fn test_shortfall_never_negative() {
        assert_eq!(buffer_shortfall(3, 4, 4, 10), 0);
        assert_eq!(buffer_shortfall(0, 0, 0, 10), 0);
    }

    #[test]
    fn test_shortfall_clamped_to_max() {
        assert_eq!(buffer_shortfall(5, 0, 8, 10), 2);
        assert_eq!(buffer_shortfall(5, 0, 10, 10), 0);
        assert_eq!(buffer_shortfall(5, 0, 12, 10), 0);
    }
}

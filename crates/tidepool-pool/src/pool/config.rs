//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidepool_core::{ConnectionConfig, Result, TidepoolError};

/// Configuration for a connection pool
///
/// Controls pool sizing, buffering, decay, and queueing. Keys use the
/// camelCase option names when (de)serialized, and every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Handshake timeout in milliseconds
    acquire_timeout: u64,
    /// Whether to fill the buffer as soon as the pool is built
    buffer_on_construct: bool,
    /// Number of free connections to keep ready ahead of demand
    connection_buffer: usize,
    /// Idle time in milliseconds after which a free connection may be destroyed (0 disables)
    connection_decay: u64,
    /// Hard upper bound on the number of connections
    max_connection_limit: usize,
    /// Floor the decay scanner will not shrink below
    min_connection_limit: usize,
    /// Maximum number of waiting queries (None is unbounded)
    queue_limit: Option<usize>,
    /// Interval in milliseconds between decay scans
    scale_interval: u64,
    /// Passed through untouched to the connection factory
    connection_config: ConnectionConfig,
}

impl PoolConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            acquire_timeout: 10_000,
            buffer_on_construct: true,
            connection_buffer: 5,
            connection_decay: 300_000,
            max_connection_limit: 10,
            min_connection_limit: 0,
            queue_limit: None,
            scale_interval: 300_000,
            connection_config: ConnectionConfig::default(),
        }
    }

    /// Set the handshake timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout = timeout_ms;
        self
    }

    /// Set whether the buffer is filled at construction
    pub fn with_buffer_on_construct(mut self, enabled: bool) -> Self {
        self.buffer_on_construct = enabled;
        self
    }

    /// Set the number of spare free connections to keep ready
    pub fn with_connection_buffer(mut self, buffer: usize) -> Self {
        self.connection_buffer = buffer;
        self
    }

    /// Set the idle decay threshold in milliseconds (0 disables decay)
    pub fn with_connection_decay_ms(mut self, decay_ms: u64) -> Self {
        self.connection_decay = decay_ms;
        self
    }

    /// Set the maximum number of connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connection_limit = max;
        self
    }

    /// Set the minimum number of connections kept through decay
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connection_limit = min;
        self
    }

    /// Bound the query queue (0 disables queueing entirely)
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    /// Remove the bound on the query queue
    pub fn with_unbounded_queue(mut self) -> Self {
        self.queue_limit = None;
        self
    }

    /// Set the decay scan interval in milliseconds
    pub fn with_scale_interval_ms(mut self, interval_ms: u64) -> Self {
        self.scale_interval = interval_ms;
        self
    }

    /// Set the configuration passed to the connection factory
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = config;
        self
    }

    /// Get the handshake timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }

    pub fn buffer_on_construct(&self) -> bool {
        self.buffer_on_construct
    }

    pub fn connection_buffer(&self) -> usize {
        self.connection_buffer
    }

    /// Get the decay threshold, or None if decay is disabled
    pub fn connection_decay(&self) -> Option<Duration> {
        (self.connection_decay > 0).then(|| Duration::from_millis(self.connection_decay))
    }

    pub fn max_connections(&self) -> usize {
        self.max_connection_limit
    }

    pub fn min_connections(&self) -> usize {
        self.min_connection_limit
    }

    /// Get the queue bound, or None if unbounded
    pub fn queue_limit(&self) -> Option<usize> {
        self.queue_limit
    }

    /// Get the decay scan interval as a Duration
    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval)
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }

    /// Check the configuration for values the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_connection_limit == 0 {
            return Err(TidepoolError::Configuration(
                "maxConnectionLimit must be greater than 0".into(),
            ));
        }
        if self.acquire_timeout == 0 {
            return Err(TidepoolError::Configuration(
                "acquireTimeout must be greater than 0".into(),
            ));
        }
        if self.min_connection_limit > self.max_connection_limit {
            return Err(TidepoolError::Configuration(format!(
                "minConnectionLimit ({}) cannot exceed maxConnectionLimit ({})",
                self.min_connection_limit, self.max_connection_limit
            )));
        }
        if self.connection_decay > 0 && self.scale_interval == 0 {
            return Err(TidepoolError::Configuration(
                "scaleInterval must be greater than 0 when connectionDecay is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| TidepoolError::Configuration(e.to_string()))
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Load a configuration file, picking the format from its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            other => Err(TidepoolError::Configuration(format!(
                "unsupported config format {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - acquire_timeout: 10 seconds
    /// - buffer_on_construct: true
    /// - connection_buffer: 5
    /// - connection_decay: 5 minutes
    /// - max_connections: 10
    /// - min_connections: 0
    /// - queue_limit: unbounded
    /// - scale_interval: 5 minutes
    fn default() -> Self {
        Self::new()
    }
}

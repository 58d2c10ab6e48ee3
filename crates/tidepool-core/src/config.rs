//! Opaque connection configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration handed to a [`ConnectionFactory`](crate::ConnectionFactory)
///
/// The pool never interprets these parameters (host, credentials, and so on);
/// it only passes them through when constructing a new connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig {
    params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Get a parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Iterate over all parameters
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

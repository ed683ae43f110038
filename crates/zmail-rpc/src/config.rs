//! RPC and router settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zmail_core::constants::{
    DEFAULT_FEE, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RPC_PORT,
};

use crate::capabilities::DEFAULT_PUBLIC_PROVIDERS;
use crate::classify::DEFAULT_UNAVAILABLE_PATTERNS;

/// Where and how to reach the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC URL. May embed `user:password@` credentials.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Hosts classified as known public providers.
    pub public_providers: Vec<String>,
    /// Error substrings meaning "method not offered".
    pub unavailable_patterns: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{DEFAULT_RPC_PORT}"),
            timeout_secs: 30,
            public_providers: DEFAULT_PUBLIC_PROVIDERS.iter().map(|s| s.to_string()).collect(),
            unavailable_patterns: DEFAULT_UNAVAILABLE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Seconds between async operation status polls.
    pub poll_interval_secs: u64,
    /// Seconds before an async operation counts as failed.
    pub operation_timeout_secs: u64,
    /// Fee in zatoshis when the caller gives none.
    pub default_fee: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            default_fee: DEFAULT_FEE,
        }
    }
}

impl RouterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

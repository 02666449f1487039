//! Dispatch configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for `DelegateFactory` and the native capability probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Use generated dispatch when the host supports it (default: true)
    pub prefer_generated: bool,
    /// Largest method arity the template backend emits (default: 8)
    pub max_generated_arity: usize,
    /// Delay before retrying generation after a failure, in ms (default: 50)
    pub retry_backoff_ms: u64,
    /// Upper bound of the doubling retry delay, in ms (default: 5000)
    pub max_retry_backoff_ms: u64,
    /// Allow the isolated-context loading primitive (default: true)
    pub allow_isolated_loader: bool,
    /// Allow the direct-define loading primitive (default: true)
    pub allow_direct_define: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            prefer_generated: true,
            max_generated_arity: 8,
            retry_backoff_ms: 50,
            max_retry_backoff_ms: 5000,
            allow_isolated_loader: true,
            allow_direct_define: true,
        }
    }
}

impl DispatchConfig {
    /// Parse from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Configuration that never generates code
    pub fn reflective_only() -> Self {
        DispatchConfig {
            prefer_generated: false,
            ..Default::default()
        }
    }

    /// Initial retry delay
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Retry delay ceiling
    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms.max(self.retry_backoff_ms))
    }
}

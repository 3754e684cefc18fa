use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default upper bound on waiting for an account lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Tunables for the ledger engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an operation waits for an account lock before giving up
    /// with a retryable conflict.
    pub lock_timeout_ms: u64,
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

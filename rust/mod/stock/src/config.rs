use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the stock ledger. Loaded from the `[ledger]` section of the
/// server config; every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How long an operation waits for a cycle or pond lock before failing
    /// with a retryable conflict.
    pub lock_timeout_ms: u64,
    /// Rows fetched per round trip by the lazy ledger iterators.
    pub page_size: usize,
    /// Close a cycle automatically when a harvest empties it.
    pub auto_close_on_depletion: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            page_size: 200,
            auto_close_on_depletion: true,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

use serde::Deserialize;

/// Sizing of a [`QueryStore`](super::QueryStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of cached responses.
    ///
    /// Once reached, the least valuable entries are evicted before they expire.
    ///
    /// Defaults to `1_000`.
    pub in_memory_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            in_memory_capacity: 1_000,
        }
    }
}

//! Pluggable cache/source for config specs and ID lists.
use async_trait::async_trait;

use crate::Result;

/// Key space shared between the SDK and data adapter implementations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataAdapterKey {
    /// The raw config-specs payload.
    Rulesets,
    /// The full ID list set, serialized as JSON.
    IdLists,
    /// One individual ID list's membership lines.
    IdList(String),
}

impl DataAdapterKey {
    /// Storage key string for this entry.
    pub fn cache_key(&self) -> String {
        match self {
            DataAdapterKey::Rulesets => "statsig.cache".to_string(),
            DataAdapterKey::IdLists => "statsig.id_lists".to_string(),
            DataAdapterKey::IdList(name) => format!("statsig.id_list::{name}"),
        }
    }
}

/// A value read back from an adapter. `result` is `None` when the adapter has nothing stored
/// under the key.
#[derive(Debug, Clone, Default)]
pub struct AdapterValue {
    pub result: Option<String>,
    /// Version stamp recorded at `set` time. Advisory; the payload itself carries the
    /// authoritative update time.
    pub time: Option<u64>,
}

/// External storage the spec store can hydrate from and save through to.
///
/// Implementations live outside this crate (Redis, local files, ...); the store only relies
/// on this narrow interface.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    /// Called exactly once when the owning store shuts down.
    fn shutdown(&self);

    async fn get(&self, key: &DataAdapterKey) -> Result<AdapterValue>;

    async fn set(&self, key: &DataAdapterKey, value: &str, time: u64) -> Result<()>;

    /// Whether the store should poll this adapter for updates under `key` instead of the
    /// network during steady-state syncs.
    fn supports_polling_updates_for(&self, _key: &DataAdapterKey) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::DataAdapterKey;

    #[test]
    fn cache_keys() {
        assert_eq!(DataAdapterKey::Rulesets.cache_key(), "statsig.cache");
        assert_eq!(DataAdapterKey::IdLists.cache_key(), "statsig.id_lists");
        assert_eq!(
            DataAdapterKey::IdList("employees".to_string()).cache_key(),
            "statsig.id_list::employees"
        );
    }
}

//! Key/value state shared across runs: high-water marks and connection info
//! referenced through `database_state_key`.

pub mod file;
pub mod memory;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::core::Result;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<JsonValue>>;

    fn set(&self, key: &str, value: JsonValue) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a typed document.
pub fn load<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a typed document.
pub fn save<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

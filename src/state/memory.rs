use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use super::StateStore;
use crate::core::Result;

#[derive(Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.read()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.values.write()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.write()?.remove(key);
        Ok(())
    }
}

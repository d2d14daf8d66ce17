//! Persisted, monotonic per-migration cursor.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::{Result, Value};
use crate::state::{self, StateStore};

const KEY_PREFIX: &str = "migrate:high_water:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighWaterMark {
    pub migration_id: String,
    pub property_name: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

/// Reads and max-merges high-water marks in a [`StateStore`].
#[derive(Clone)]
pub struct HighWaterTracker {
    store: Arc<dyn StateStore>,
}

impl HighWaterTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn state_key(migration_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, migration_id)
    }

    pub fn mark(&self, migration_id: &str) -> Result<Option<HighWaterMark>> {
        state::load(self.store.as_ref(), &Self::state_key(migration_id))
    }

    /// Stored value, or `None` when absent, NULL or an empty string.
    pub fn get(&self, migration_id: &str) -> Result<Option<Value>> {
        Ok(self
            .mark(migration_id)?
            .map(|mark| mark.value)
            .filter(|value| !value.is_empty()))
    }

    /// Store `max(stored, value)` and return the value now stored.
    ///
    /// Empty values never overwrite. Incomparable types are a `TypeMismatch`.
    pub fn set(&self, migration_id: &str, property_name: &str, value: Value) -> Result<Option<Value>> {
        let current = self.get(migration_id)?;
        if value.is_empty() {
            return Ok(current);
        }

        if let Some(current) = &current
            && value.compare(current)? != Ordering::Greater
        {
            debug!(
                "High-water for '{}' stays at {} (offered {})",
                migration_id, current, value
            );
            return Ok(Some(current.clone()));
        }

        let mark = HighWaterMark {
            migration_id: migration_id.to_string(),
            property_name: property_name.to_string(),
            value: value.clone(),
            updated_at: Utc::now(),
        };
        state::save(self.store.as_ref(), &Self::state_key(migration_id), &mark)?;
        info!("High-water for '{}' advanced to {}", migration_id, value);
        Ok(Some(value))
    }

    /// Forget the mark so the next run scans the full source.
    pub fn reset(&self, migration_id: &str) -> Result<()> {
        self.store.delete(&Self::state_key(migration_id))?;
        info!("High-water for '{}' reset", migration_id);
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;

use super::StateStore;
use crate::core::{MigrateError, Result};

/// State persisted as one JSON object on disk.
///
/// Every write replaces the file atomically: the document is written to a
/// temp file in the same directory, synced, then renamed over the target.
pub struct FileStateStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, JsonValue>>,
}

impl FileStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values: BTreeMap<String, JsonValue> = if path.exists() {
            let data = fs::read(&path)
                .map_err(|e| MigrateError::IoError(format!("Failed to read state file {}: {}", path.display(), e)))?;
            serde_json::from_slice(&data)?
        } else {
            BTreeMap::new()
        };
        debug!("Opened state file {} ({} keys)", path.display(), values.len());

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, JsonValue>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| MigrateError::IoError(format!("Failed to create state directory: {}", e)))?;

        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| MigrateError::IoError(format!("Failed to create temp file: {}", e)))?;
        let serialized = serde_json::to_vec_pretty(values)?;
        temp.write_all(&serialized)
            .map_err(|e| MigrateError::IoError(format!("Failed to write state: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| MigrateError::IoError(format!("Failed to sync state: {}", e)))?;
        temp.persist(&self.path)
            .map_err(|e| MigrateError::IoError(format!("Failed to replace state file: {}", e.error)))?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.read()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        let mut values = self.values.write()?;
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.write()?;
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

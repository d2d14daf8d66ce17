//! Persistent correspondence between source keys and destination keys.

pub mod sql;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionInfo;
use crate::core::{MigrateError, Result, Value};

pub use sql::SqlIdMap;

pub const SOURCE_ROW_STATUS: &str = "source_row_status";
pub const LAST_IMPORTED: &str = "last_imported";
pub const HASH: &str = "hash";

/// Prefix for map columns projected into source rows by the augmented query.
pub const MAP_ALIAS_PREFIX: &str = "migrate_map_";

pub fn source_id_column(position: usize) -> String {
    format!("sourceid{}", position + 1)
}

pub fn destination_id_column(position: usize) -> String {
    format!("destid{}", position + 1)
}

pub fn projected_alias(column: &str) -> String {
    format!("{}{}", MAP_ALIAS_PREFIX, column)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceIdStatus {
    Imported,
    NeedsUpdate,
    Ignored,
    Failed,
}

impl SourceIdStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Imported => 0,
            Self::NeedsUpdate => 1,
            Self::Ignored => 2,
            Self::Failed => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Imported),
            1 => Ok(Self::NeedsUpdate),
            2 => Ok(Self::Ignored),
            3 => Ok(Self::Failed),
            other => Err(MigrateError::ExecutionError(format!(
                "Unknown source row status {}",
                other
            ))),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let code = value.as_i64().ok_or_else(|| {
            MigrateError::TypeMismatch(format!("Source row status must be INTEGER, got {}", value.type_name()))
        })?;
        Self::from_code(code)
    }
}

impl fmt::Display for SourceIdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Imported => "imported",
            Self::NeedsUpdate => "needs update",
            Self::Ignored => "ignored",
            Self::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Error,
    Warning,
    Notice,
    Informational,
}

impl MessageLevel {
    pub fn code(self) -> i64 {
        match self {
            Self::Error => 1,
            Self::Warning => 2,
            Self::Notice => 3,
            Self::Informational => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Error),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Notice),
            4 => Ok(Self::Informational),
            other => Err(MigrateError::ExecutionError(format!("Unknown message level {}", other))),
        }
    }
}

/// One map entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRow {
    pub source_ids: Vec<Value>,
    /// `None` until the row has been written to the destination.
    pub destination_ids: Option<Vec<Value>>,
    pub status: SourceIdStatus,
    pub hash: Option<String>,
    pub last_imported: Option<DateTime<Utc>>,
}

impl MapRow {
    pub fn needs_update(&self) -> bool {
        self.status == SourceIdStatus::NeedsUpdate
    }

    pub fn has_destination(&self) -> bool {
        self.destination_ids.is_some()
    }

    /// Rebuild the map row projected into a joined source record under the
    /// `migrate_map_*` aliases. `None` when the left join found no map row.
    pub fn from_projection(
        record: &BTreeMap<String, Value>,
        source_key_count: usize,
        destination_key_count: usize,
    ) -> Result<Option<Self>> {
        let read = |column: String| record.get(&projected_alias(&column)).cloned().unwrap_or(Value::Null);

        let source_ids: Vec<Value> = (0..source_key_count).map(|i| read(source_id_column(i))).collect();
        if source_ids.iter().all(Value::is_null) {
            return Ok(None);
        }

        let destination_ids: Vec<Value> = (0..destination_key_count)
            .map(|i| read(destination_id_column(i)))
            .collect();
        let status = SourceIdStatus::from_value(&read(SOURCE_ROW_STATUS.to_string()))?;
        let hash = read(HASH.to_string()).as_str().map(str::to_string);

        Ok(Some(Self {
            source_ids,
            destination_ids: collapse_destination(destination_ids),
            status,
            hash,
            last_imported: None,
        }))
    }
}

/// All-NULL destination keys mean "no destination yet".
pub(crate) fn collapse_destination(ids: Vec<Value>) -> Option<Vec<Value>> {
    if ids.is_empty() || ids.iter().all(Value::is_null) {
        None
    } else {
        Some(ids)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapMessage {
    pub msgid: i64,
    pub source_ids: Vec<Value>,
    pub level: MessageLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MapCounts {
    pub processed: usize,
    pub imported: usize,
    pub needs_update: usize,
    pub ignored: usize,
    pub failed: usize,
    pub messages: usize,
}

/// What the augmenter needs to join the map table into a source query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescriptor {
    /// Qualified (`database.table`) so the join resolves from the source
    /// connection.
    pub table_name: String,
    pub source_columns: Vec<String>,
    pub destination_columns: Vec<String>,
    pub status_column: String,
    pub hash_column: String,
}

/// Map store contract.
pub trait IdMap: Send + Sync {
    fn lookup(&self, source_ids: &[Value]) -> Result<Option<MapRow>>;

    /// Reverse lookup: every source key mapped to `destination_ids`.
    fn lookup_source_ids(&self, destination_ids: &[Value]) -> Result<Vec<Vec<Value>>>;

    fn upsert(
        &self,
        source_ids: &[Value],
        destination_ids: Option<&[Value]>,
        status: SourceIdStatus,
        hash: Option<&str>,
    ) -> Result<()>;

    /// Flag one row for reprocessing. Returns false when there is no map row.
    fn set_needs_update(&self, source_ids: &[Value]) -> Result<bool>;

    /// Flag every row for reprocessing. Returns the number of rows flagged.
    fn prepare_update(&self) -> Result<usize>;

    /// Remove a map row and its messages.
    fn delete(&self, source_ids: &[Value]) -> Result<bool>;

    fn save_message(&self, source_ids: &[Value], message: &str, level: MessageLevel) -> Result<()>;

    fn messages(&self, source_ids: Option<&[Value]>) -> Result<Vec<MapMessage>>;

    fn clear_messages(&self) -> Result<()>;

    fn counts(&self) -> Result<MapCounts>;

    fn join_descriptor(&self) -> JoinDescriptor;

    /// Whether the map lives in storage a query on `driver` can join directly.
    fn supports_native_join(&self, driver: &str) -> bool;

    fn connection_info(&self) -> Option<&ConnectionInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            SourceIdStatus::Imported,
            SourceIdStatus::NeedsUpdate,
            SourceIdStatus::Ignored,
            SourceIdStatus::Failed,
        ] {
            assert_eq!(SourceIdStatus::from_code(status.code()).unwrap(), status);
        }
        assert!(SourceIdStatus::from_code(9).is_err());
    }

    #[test]
    fn test_projection_without_map_row() {
        let mut record = BTreeMap::new();
        record.insert("nid".to_string(), Value::Integer(4));
        record.insert(projected_alias("sourceid1"), Value::Null);
        record.insert(projected_alias("destid1"), Value::Null);
        record.insert(projected_alias(SOURCE_ROW_STATUS), Value::Null);

        assert!(MapRow::from_projection(&record, 1, 1).unwrap().is_none());
    }

    #[test]
    fn test_projection_with_map_row() {
        let mut record = BTreeMap::new();
        record.insert(projected_alias("sourceid1"), Value::Integer(2));
        record.insert(projected_alias("destid1"), Value::Integer(102));
        record.insert(projected_alias(SOURCE_ROW_STATUS), Value::Integer(1));
        record.insert(projected_alias(HASH), Value::from("abc"));

        let row = MapRow::from_projection(&record, 1, 1).unwrap().unwrap();
        assert!(row.needs_update());
        assert_eq!(row.destination_ids, Some(vec![Value::Integer(102)]));
        assert_eq!(row.hash.as_deref(), Some("abc"));
    }
}

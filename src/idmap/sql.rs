use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use log::{debug, trace};

use super::{
    HASH, IdMap, JoinDescriptor, LAST_IMPORTED, MapCounts, MapMessage, MapRow, MessageLevel,
    SOURCE_ROW_STATUS, SourceIdStatus, collapse_destination, destination_id_column, source_id_column,
};
use crate::connection::{Connection, ConnectionInfo};
use crate::core::{Column, DataType, MigrateError, Result, Row, Value};
use crate::migration::KeyField;
use crate::query::MAX_IDENTIFIER_LENGTH;
use crate::storage::{Table, TableSchema};

/// Id map stored as two tables on a database connection:
/// `migrate_map_<id>` keyed by the source key tuple, and
/// `migrate_message_<id>` holding per-row messages.
///
/// Map row layout: `sourceid1..N, destid1..M, source_row_status,
/// last_imported, hash`.
pub struct SqlIdMap {
    connection: Connection,
    migration_id: String,
    map_table: String,
    message_table: String,
    source_keys: Vec<KeyField>,
    destination_keys: Vec<KeyField>,
    next_message_id: AtomicI64,
}

impl SqlIdMap {
    /// Open the map for `migration_id`, creating its tables on first use.
    pub fn open(
        connection: Connection,
        migration_id: &str,
        source_keys: Vec<KeyField>,
        destination_keys: Vec<KeyField>,
    ) -> Result<Self> {
        if source_keys.is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "Migration '{}' declares no source keys; the id map cannot be keyed",
                migration_id
            )));
        }
        if destination_keys.is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "Migration '{}' declares no destination keys",
                migration_id
            )));
        }

        let quoter = connection.quoter();
        let map_table = quoter.machine_name(&format!("migrate_map_{}", migration_id), MAX_IDENTIFIER_LENGTH);
        let message_table =
            quoter.machine_name(&format!("migrate_message_{}", migration_id), MAX_IDENTIFIER_LENGTH);

        let map = Self {
            connection,
            migration_id: migration_id.to_string(),
            map_table,
            message_table,
            source_keys,
            destination_keys,
            next_message_id: AtomicI64::new(1),
        };
        map.ensure_tables()?;

        let last_msgid = map.connection.database().read(&map.message_table, |t| {
            Ok(t.scan_with_ids().filter_map(|(_, row)| row[0].as_i64()).max().unwrap_or(0))
        })?;
        map.next_message_id.store(last_msgid + 1, Ordering::SeqCst);

        Ok(map)
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn map_table_name(&self) -> &str {
        &self.map_table
    }

    pub fn message_table_name(&self) -> &str {
        &self.message_table
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Drop both tables. The map is unusable afterwards.
    pub fn destroy(&self) -> Result<()> {
        let db = self.connection.database();
        db.drop_table(&self.map_table)?;
        db.drop_table(&self.message_table)?;
        debug!("Dropped id map tables for migration '{}'", self.migration_id);
        Ok(())
    }

    fn ensure_tables(&self) -> Result<()> {
        let db = self.connection.database();

        let mut columns: Vec<Column> = self
            .source_keys
            .iter()
            .enumerate()
            .map(|(i, key)| Column::new(&source_id_column(i), key.data_type).not_null())
            .collect();
        columns.extend(
            self.destination_keys
                .iter()
                .enumerate()
                .map(|(i, key)| Column::new(&destination_id_column(i), key.data_type)),
        );
        columns.push(Column::new(SOURCE_ROW_STATUS, DataType::Integer).not_null());
        columns.push(Column::new(LAST_IMPORTED, DataType::Text));
        columns.push(Column::new(HASH, DataType::Text));

        let source_columns = self.source_columns();
        let map_schema = TableSchema::new(&self.map_table, columns).with_primary_key(&source_columns);
        if db.ensure_table(map_schema)? {
            debug!("Created id map table '{}'", self.map_table);
        }

        let mut message_columns = vec![Column::new("msgid", DataType::Integer).not_null()];
        message_columns.extend(
            self.source_keys
                .iter()
                .enumerate()
                .map(|(i, key)| Column::new(&source_id_column(i), key.data_type).not_null()),
        );
        message_columns.push(Column::new("level", DataType::Integer).not_null());
        message_columns.push(Column::new("message", DataType::Text).not_null());
        let message_schema = TableSchema::new(&self.message_table, message_columns).with_primary_key(&["msgid"]);
        db.ensure_table(message_schema)?;

        Ok(())
    }

    fn source_columns(&self) -> Vec<String> {
        (0..self.source_keys.len()).map(source_id_column).collect()
    }

    fn destination_columns(&self) -> Vec<String> {
        (0..self.destination_keys.len()).map(destination_id_column).collect()
    }

    fn status_position(&self) -> usize {
        self.source_keys.len() + self.destination_keys.len()
    }

    fn check_source_ids(&self, source_ids: &[Value]) -> Result<()> {
        if source_ids.len() != self.source_keys.len() {
            return Err(MigrateError::ExecutionError(format!(
                "Expected {} source id values for migration '{}', got {}",
                self.source_keys.len(),
                self.migration_id,
                source_ids.len()
            )));
        }
        Ok(())
    }

    fn decode_row(&self, row: &Row) -> Result<MapRow> {
        let n = self.source_keys.len();
        let status_at = self.status_position();

        let last_imported = match &row[status_at + 1] {
            Value::Text(stamp) => Some(
                DateTime::parse_from_rfc3339(stamp)
                    .map_err(|e| MigrateError::SerializationError(format!("Bad last_imported '{}': {}", stamp, e)))?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        Ok(MapRow {
            source_ids: row[..n].to_vec(),
            destination_ids: collapse_destination(row[n..status_at].to_vec()),
            status: SourceIdStatus::from_value(&row[status_at])?,
            hash: row[status_at + 2].as_str().map(str::to_string),
            last_imported,
        })
    }

    fn set_status(&self, table: &mut Table, id: usize, status: SourceIdStatus) -> Result<bool> {
        let status_at = self.status_position();
        let Some(mut row) = table.get(id).cloned() else {
            return Ok(false);
        };
        row[status_at] = Value::Integer(status.code());
        table.update(id, row)
    }
}

impl IdMap for SqlIdMap {
    fn lookup(&self, source_ids: &[Value]) -> Result<Option<MapRow>> {
        self.check_source_ids(source_ids)?;
        let row = self
            .connection
            .database()
            .read(&self.map_table, |t| Ok(t.find_by_key(source_ids).map(|(_, row)| row.clone())))?;
        row.map(|row| self.decode_row(&row)).transpose()
    }

    fn lookup_source_ids(&self, destination_ids: &[Value]) -> Result<Vec<Vec<Value>>> {
        if destination_ids.len() != self.destination_keys.len() {
            return Err(MigrateError::ExecutionError(format!(
                "Expected {} destination id values, got {}",
                self.destination_keys.len(),
                destination_ids.len()
            )));
        }
        let n = self.source_keys.len();
        let status_at = self.status_position();
        self.connection.database().read(&self.map_table, |t| {
            Ok(t.scan_with_ids()
                .filter(|(_, row)| &row[n..status_at] == destination_ids)
                .map(|(_, row)| row[..n].to_vec())
                .collect())
        })
    }

    fn upsert(
        &self,
        source_ids: &[Value],
        destination_ids: Option<&[Value]>,
        status: SourceIdStatus,
        hash: Option<&str>,
    ) -> Result<()> {
        self.check_source_ids(source_ids)?;

        let mut row: Row = source_ids.to_vec();
        match destination_ids {
            Some(ids) if ids.len() == self.destination_keys.len() => row.extend_from_slice(ids),
            Some(ids) => {
                return Err(MigrateError::ExecutionError(format!(
                    "Expected {} destination id values, got {}",
                    self.destination_keys.len(),
                    ids.len()
                )));
            }
            None => row.extend(std::iter::repeat_n(Value::Null, self.destination_keys.len())),
        }
        row.push(Value::Integer(status.code()));
        row.push(Value::Text(Utc::now().to_rfc3339()));
        row.push(Value::from(hash));

        trace!("Map {} <- {:?} ({})", self.map_table, source_ids, status);
        self.connection.database().write(&self.map_table, |t| {
            let existing = t.find_by_key(source_ids).map(|(id, _)| id);
            match existing {
                Some(id) => t.update(id, row).map(|_| ()),
                None => t.insert(row).map(|_| ()),
            }
        })
    }

    fn set_needs_update(&self, source_ids: &[Value]) -> Result<bool> {
        self.check_source_ids(source_ids)?;
        self.connection.database().write(&self.map_table, |t| {
            let existing = t.find_by_key(source_ids).map(|(id, _)| id);
            match existing {
                Some(id) => self.set_status(t, id, SourceIdStatus::NeedsUpdate),
                None => Ok(false),
            }
        })
    }

    fn prepare_update(&self) -> Result<usize> {
        let flagged = self.connection.database().write(&self.map_table, |t| {
            let mut flagged = 0;
            for id in t.row_ids() {
                if self.set_status(t, id, SourceIdStatus::NeedsUpdate)? {
                    flagged += 1;
                }
            }
            Ok(flagged)
        })?;
        debug!("Flagged {} map rows of '{}' for update", flagged, self.migration_id);
        Ok(flagged)
    }

    fn delete(&self, source_ids: &[Value]) -> Result<bool> {
        self.check_source_ids(source_ids)?;
        let db = self.connection.database();
        let removed = db.write(&self.map_table, |t| {
            let existing = t.find_by_key(source_ids).map(|(id, _)| id);
            Ok(existing.and_then(|id| t.delete(id)).is_some())
        })?;
        db.write(&self.message_table, |t| {
            let n = source_ids.len();
            let matching: Vec<usize> = t
                .scan_with_ids()
                .filter(|(_, row)| &row[1..=n] == source_ids)
                .map(|(id, _)| id)
                .collect();
            for id in matching {
                t.delete(id);
            }
            Ok(())
        })?;
        Ok(removed)
    }

    fn save_message(&self, source_ids: &[Value], message: &str, level: MessageLevel) -> Result<()> {
        self.check_source_ids(source_ids)?;
        let msgid = self.next_message_id.fetch_add(1, Ordering::SeqCst);

        let mut row: Row = vec![Value::Integer(msgid)];
        row.extend_from_slice(source_ids);
        row.push(Value::Integer(level.code()));
        row.push(Value::from(message));

        self.connection.database().insert(&self.message_table, row)?;
        Ok(())
    }

    fn messages(&self, source_ids: Option<&[Value]>) -> Result<Vec<MapMessage>> {
        let n = self.source_keys.len();
        let rows = self.connection.database().read(&self.message_table, |t| {
            Ok(t.scan_with_ids()
                .filter(|(_, row)| source_ids.is_none_or(|ids| &row[1..=n] == ids))
                .map(|(_, row)| row.clone())
                .collect::<Vec<Row>>())
        })?;

        let mut messages = rows
            .into_iter()
            .map(|row| {
                Ok(MapMessage {
                    msgid: row[0].as_i64().unwrap_or_default(),
                    source_ids: row[1..=n].to_vec(),
                    level: MessageLevel::from_code(row[n + 1].as_i64().unwrap_or_default())?,
                    message: row[n + 2].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        messages.sort_by_key(|m| m.msgid);
        Ok(messages)
    }

    fn clear_messages(&self) -> Result<()> {
        self.connection.database().write(&self.message_table, |t| {
            for id in t.row_ids() {
                t.delete(id);
            }
            Ok(())
        })
    }

    fn counts(&self) -> Result<MapCounts> {
        let status_at = self.status_position();
        let mut counts = self.connection.database().read(&self.map_table, |t| {
            let mut counts = MapCounts::default();
            for (_, row) in t.scan_with_ids() {
                counts.processed += 1;
                match SourceIdStatus::from_value(&row[status_at])? {
                    SourceIdStatus::Imported => counts.imported += 1,
                    SourceIdStatus::NeedsUpdate => counts.needs_update += 1,
                    SourceIdStatus::Ignored => counts.ignored += 1,
                    SourceIdStatus::Failed => counts.failed += 1,
                }
            }
            Ok(counts)
        })?;
        counts.messages = self
            .connection
            .database()
            .read(&self.message_table, |t| Ok(t.row_count()))?;
        Ok(counts)
    }

    fn join_descriptor(&self) -> JoinDescriptor {
        JoinDescriptor {
            table_name: self.connection.qualified_table_name(&self.map_table),
            source_columns: self.source_columns(),
            destination_columns: self.destination_columns(),
            status_column: SOURCE_ROW_STATUS.to_string(),
            hash_column: HASH.to_string(),
        }
    }

    fn supports_native_join(&self, driver: &str) -> bool {
        self.connection.driver() == driver
    }

    fn connection_info(&self) -> Option<&ConnectionInfo> {
        Some(self.connection.info())
    }
}

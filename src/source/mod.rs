//! Source side of a migration: concrete source plugins supply a base query,
//! [`SqlSource`] narrows it to pending rows and iterates them.

pub mod augment;
pub mod cursor;
pub mod joinability;
pub mod row;

use std::sync::Arc;

use log::debug;

use crate::connection::Connection;
use crate::core::{Result, Value};
use crate::highwater::HighWaterTracker;
use crate::idmap::IdMap;
use crate::migration::{KeyField, MigrationDescriptor};
use crate::query::{Expr, SelectQuery};

pub use augment::augment;
pub use cursor::{CancellationToken, SourceCursor};
pub use joinability::JoinBlocker;
pub use row::SourceRow;

use cursor::CursorConfig;

/// A concrete source: its own base selection and key schema. Id map and
/// high-water narrowing is applied on top by [`SqlSource`].
pub trait SourcePlugin: Send + Sync {
    fn query(&self) -> SelectQuery;

    fn ids(&self) -> Vec<KeyField>;

    /// Query counted by [`SqlSource::count`]. Defaults to the base query.
    fn count_query(&self) -> SelectQuery {
        self.query()
    }
}

/// Every row of one table, optionally filtered.
#[derive(Debug, Clone)]
pub struct TableSourcePlugin {
    table: String,
    alias: String,
    ids: Vec<KeyField>,
    conditions: Vec<Expr>,
}

impl TableSourcePlugin {
    pub fn new(table: &str, alias: &str, ids: Vec<KeyField>) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            ids,
            conditions: Vec::new(),
        }
    }

    pub fn condition(mut self, expr: Expr) -> Self {
        self.conditions.push(expr);
        self
    }
}

impl SourcePlugin for TableSourcePlugin {
    fn query(&self) -> SelectQuery {
        let mut query = SelectQuery::new(&self.table, &self.alias);
        query.all_fields(&self.alias);
        for condition in &self.conditions {
            query.condition(condition.clone());
        }
        query
    }

    fn ids(&self) -> Vec<KeyField> {
        self.ids.clone()
    }
}

/// Shared engine over a [`SourcePlugin`] and its connection.
pub struct SqlSource {
    plugin: Box<dyn SourcePlugin>,
    descriptor: MigrationDescriptor,
    connection: Connection,
    id_map: Option<Arc<dyn IdMap>>,
    high_water: Option<HighWaterTracker>,
}

impl SqlSource {
    /// Descriptors without source keys take the plugin's `ids()`.
    pub fn new(plugin: Box<dyn SourcePlugin>, mut descriptor: MigrationDescriptor, connection: Connection) -> Result<Self> {
        if descriptor.source_keys.is_empty() {
            descriptor.source_keys = plugin.ids();
        }
        descriptor.validate()?;

        Ok(Self {
            plugin,
            descriptor,
            connection,
            id_map: None,
            high_water: None,
        })
    }

    pub fn with_id_map(mut self, id_map: Arc<dyn IdMap>) -> Self {
        self.id_map = Some(id_map);
        self
    }

    pub fn with_high_water(mut self, tracker: HighWaterTracker) -> Self {
        self.high_water = Some(tracker);
        self
    }

    pub fn descriptor(&self) -> &MigrationDescriptor {
        &self.descriptor
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn id_map(&self) -> Option<&Arc<dyn IdMap>> {
        self.id_map.as_ref()
    }

    pub fn high_water_tracker(&self) -> Option<&HighWaterTracker> {
        self.high_water.as_ref()
    }

    pub fn is_map_joinable(&self) -> bool {
        if self.descriptor.ignore_map {
            return false;
        }
        // Every row has to be read to compare hashes.
        if self.descriptor.track_changes {
            debug!("Id map join skipped for '{}': tracking changes", self.descriptor.id);
            return false;
        }
        self.id_map.as_ref().is_some_and(|id_map| {
            joinability::is_joinable(self.connection.info(), id_map.as_ref(), self.descriptor.source_keys.len())
        })
    }

    /// Stored high-water value, read once per cursor.
    pub fn high_water_snapshot(&self) -> Result<Option<Value>> {
        match (&self.high_water, &self.descriptor.high_water_property) {
            (Some(tracker), Some(_)) => tracker.get(&self.descriptor.id),
            _ => Ok(None),
        }
    }

    /// The augmented query a fresh cursor would run.
    pub fn pending_query(&self) -> Result<SelectQuery> {
        let snapshot = self.high_water_snapshot()?;
        self.build_query(self.is_map_joinable(), snapshot.as_ref())
    }

    /// A fresh cursor. Nothing executes until the first row is pulled.
    pub fn cursor(&self, cancel: CancellationToken) -> Result<SourceCursor> {
        let snapshot = self.high_water_snapshot()?;
        let map_joined = self.is_map_joinable();
        let query = self.build_query(map_joined, snapshot.as_ref())?;
        debug!(
            "Prepared source cursor for '{}' (map joined: {}, high-water: {:?})",
            self.descriptor.id, map_joined, snapshot
        );

        let config = CursorConfig {
            keys: self.descriptor.source_keys.clone(),
            destination_key_count: self.descriptor.destination_keys.len(),
            id_map: self.id_map.clone(),
            map_joined,
            ignore_map: self.descriptor.ignore_map,
            track_changes: self.descriptor.track_changes,
            high_water_property: self.descriptor.high_water_property.clone(),
            high_water_snapshot: snapshot,
        };
        Ok(SourceCursor::new(self.connection.clone(), query, config, cancel))
    }

    /// Rows in the whole source, not only the pending ones.
    pub fn count(&self) -> Result<usize> {
        self.connection.count(&self.plugin.count_query())
    }

    fn build_query(&self, map_joined: bool, snapshot: Option<&Value>) -> Result<SelectQuery> {
        let (join, snapshot) = match &self.id_map {
            Some(id_map) if map_joined => (Some(id_map.join_descriptor()), snapshot),
            // Unjoined map: rows at or below the mark can still be flagged,
            // failed or unmapped, so the cursor filters them per row.
            Some(_) if !self.descriptor.ignore_map => (None, None),
            _ => (None, snapshot),
        };
        augment(&self.plugin.query(), &self.descriptor, join.as_ref(), snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionInfo, ConnectionManager};
    use crate::core::{Column, DataType, MigrateError};
    use crate::idmap::{SourceIdStatus, SqlIdMap};
    use crate::migration::HighWaterProperty;
    use crate::state::MemoryStateStore;
    use crate::storage::TableSchema;

    struct Fixture {
        source: SqlSource,
        id_map: Arc<SqlIdMap>,
        tracker: HighWaterTracker,
    }

    fn info(database: &str) -> ConnectionInfo {
        ConnectionInfo::new("memory", database).host("localhost")
    }

    fn fixture(map_database: &str, map_host: &str) -> Fixture {
        let manager = ConnectionManager::new();
        let legacy = manager.open(info("legacy")).unwrap();
        legacy
            .database()
            .create_table(
                TableSchema::new(
                    "node",
                    vec![
                        Column::new("nid", DataType::Integer).not_null(),
                        Column::new("title", DataType::Text),
                        Column::new("changed", DataType::Integer),
                    ],
                )
                .with_primary_key(&["nid"]),
            )
            .unwrap();
        for nid in 1..=5i64 {
            legacy
                .database()
                .insert("node", vec![nid.into(), format!("Node {}", nid).into(), (nid * 10).into()])
                .unwrap();
        }

        let map_conn = manager
            .open(ConnectionInfo::new("memory", map_database).host(map_host))
            .unwrap();
        let id_map = Arc::new(
            SqlIdMap::open(
                map_conn,
                "article",
                vec![KeyField::new("nid", DataType::Integer)],
                vec![KeyField::new("id", DataType::Integer)],
            )
            .unwrap(),
        );
        for nid in 1..=3i64 {
            id_map
                .upsert(
                    &[Value::Integer(nid)],
                    Some(&[Value::Integer(nid + 100)]),
                    SourceIdStatus::Imported,
                    None,
                )
                .unwrap();
        }

        let tracker = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));
        tracker.set("article", "changed", Value::Integer(30)).unwrap();

        let descriptor = MigrationDescriptor::new("article")
            .destination_key(KeyField::new("id", DataType::Integer))
            .high_water(HighWaterProperty::new("changed"));
        let plugin = TableSourcePlugin::new("node", "n", vec![KeyField::new("nid", DataType::Integer)]);
        let source = SqlSource::new(Box::new(plugin), descriptor, legacy)
            .unwrap()
            .with_id_map(id_map.clone())
            .with_high_water(tracker.clone());

        Fixture { source, id_map, tracker }
    }

    fn pending_ids(source: &SqlSource) -> Vec<i64> {
        source
            .cursor(CancellationToken::new())
            .unwrap()
            .map(|row| row.unwrap().source_ids()[0].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_joined_pending_rows() {
        let fx = fixture("tracking", "localhost");
        assert!(fx.source.is_map_joinable());
        assert_eq!(pending_ids(&fx.source), vec![4, 5]);

        fx.id_map.set_needs_update(&[Value::Integer(2)]).unwrap();
        assert_eq!(pending_ids(&fx.source), vec![2, 4, 5]);
        assert_eq!(fx.source.count().unwrap(), 5);
    }

    #[test]
    fn test_degraded_join_filters_per_row() {
        let fx = fixture("tracking", "replica");
        assert!(!fx.source.is_map_joinable());
        let query = fx.source.pending_query().unwrap();
        assert!(query.joins().is_empty());
        assert!(query.conditions().is_empty());
        assert_eq!(query.order_by_clauses().len(), 1);
        assert_eq!(pending_ids(&fx.source), vec![4, 5]);

        fx.id_map.set_needs_update(&[Value::Integer(2)]).unwrap();
        assert_eq!(pending_ids(&fx.source), vec![2, 4, 5]);

        fx.tracker.reset("article").unwrap();
        assert_eq!(pending_ids(&fx.source), vec![2, 4, 5]);
    }

    #[test]
    fn test_degraded_join_keeps_unmapped_rows_below_high_water() {
        let fx = fixture("tracking", "replica");
        fx.source
            .connection()
            .database()
            .insert("node", vec![Value::Integer(6), Value::from("Node 6"), Value::Integer(5)])
            .unwrap();
        fx.id_map.set_needs_update(&[Value::Integer(2)]).unwrap();

        // Ordered by the high-water column.
        assert_eq!(pending_ids(&fx.source), vec![6, 2, 4, 5]);
    }

    #[test]
    fn test_degraded_join_retries_failed_rows_after_high_water_advanced() {
        let fx = fixture("tracking", "replica");
        fx.id_map
            .upsert(&[Value::Integer(4)], None, SourceIdStatus::Failed, None)
            .unwrap();
        fx.id_map
            .upsert(&[Value::Integer(5)], Some(&[Value::Integer(105)]), SourceIdStatus::Imported, None)
            .unwrap();
        fx.tracker.set("article", "changed", Value::Integer(50)).unwrap();

        assert_eq!(pending_ids(&fx.source), vec![4]);
    }

    #[test]
    fn test_cursor_attaches_map_rows_and_tracks_high_water() {
        let fx = fixture("tracking", "localhost");
        fx.id_map.set_needs_update(&[Value::Integer(2)]).unwrap();

        let mut cursor = fx.source.cursor(CancellationToken::new()).unwrap();
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.destination_ids(), Some(&[Value::Integer(102)][..]));
        assert!(first.id_map().unwrap().needs_update());

        assert_eq!(cursor.by_ref().count(), 2);
        assert_eq!(cursor.observed_high_water(), Some(&Value::Integer(50)));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_cancelled_cursor_stops() {
        let fx = fixture("tracking", "localhost");
        let cancel = CancellationToken::new();
        let mut cursor = fx.source.cursor(cancel.clone()).unwrap();
        assert!(cursor.next().unwrap().is_ok());

        cancel.cancel();
        assert!(matches!(cursor.next(), Some(Err(MigrateError::Cancelled))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_fetch_error_is_fused() {
        let fx = fixture("tracking", "localhost");
        fx.source.connection().database().drop_table("node").unwrap();

        let mut cursor = fx.source.cursor(CancellationToken::new()).unwrap();
        assert!(matches!(cursor.next(), Some(Err(MigrateError::RowFetchError(_)))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_reset_high_water_rescans_unimported_only() {
        let fx = fixture("tracking", "localhost");
        fx.tracker.reset("article").unwrap();
        assert_eq!(pending_ids(&fx.source), vec![4, 5]);

        fx.id_map.prepare_update().unwrap();
        assert_eq!(pending_ids(&fx.source), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ignore_map_processes_everything_above_high_water() {
        let manager = ConnectionManager::new();
        let legacy = manager.open(info("legacy")).unwrap();
        legacy
            .database()
            .create_table(TableSchema::new("node", vec![Column::new("nid", DataType::Integer)]))
            .unwrap();
        legacy.database().insert("node", vec![Value::Integer(1)]).unwrap();

        let descriptor = MigrationDescriptor::new("article").ignore_map(true);
        let plugin = TableSourcePlugin::new("node", "n", vec![KeyField::new("nid", DataType::Integer)]);
        let source = SqlSource::new(Box::new(plugin), descriptor, legacy).unwrap();
        assert!(!source.is_map_joinable());
        assert_eq!(pending_ids(&source), vec![1]);
    }
}

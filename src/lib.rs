// ============================================================================
// migratemap Library
// ============================================================================

//! Incremental migration synchronization.
//!
//! Each run of a migration selects only the source rows that are new, flagged
//! for update, or above the stored high-water mark, and records every
//! processed row in an id map so later runs update in place.
//!
//! ```
//! use std::sync::Arc;
//!
//! use migratemap::{
//!     Column, ConnectionInfo, ConnectionManager, DataType, HighWaterProperty, ImportOutcome, KeyField,
//!     MemoryStateStore, Migration, MigrationDescriptor, SourceOptions, TableSchema, TableSourcePlugin, Value,
//! };
//!
//! # fn main() -> migratemap::Result<()> {
//! let connections = ConnectionManager::new();
//! let legacy = ConnectionInfo::new("memory", "legacy");
//! let db = connections.open(legacy.clone())?;
//! db.database().create_table(
//!     TableSchema::new(
//!         "node",
//!         vec![
//!             Column::new("nid", DataType::Integer).not_null(),
//!             Column::new("changed", DataType::Integer),
//!         ],
//!     )
//!     .with_primary_key(&["nid"]),
//! )?;
//! db.database().insert("node", vec![Value::Integer(1), Value::Integer(10)])?;
//!
//! let descriptor = MigrationDescriptor::new("article")
//!     .destination_key(KeyField::new("id", DataType::Integer))
//!     .high_water(HighWaterProperty::new("changed"))
//!     .source_options(SourceOptions {
//!         database: Some(legacy),
//!         ..SourceOptions::default()
//!     });
//! let plugin = TableSourcePlugin::new("node", "n", vec![KeyField::new("nid", DataType::Integer)]);
//! let migration = Migration::build(descriptor, Box::new(plugin), &connections, Arc::new(MemoryStateStore::new()))?;
//!
//! let report = migration.run(|row| Ok(ImportOutcome::Imported(vec![row.source_ids()[0].clone()])))?;
//! assert_eq!(report.imported, 1);
//! assert_eq!(migration.run(|_| Ok(ImportOutcome::Ignored))?.processed, 0);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod core;
pub mod highwater;
pub mod idmap;
pub mod migration;
pub mod query;
pub mod result;
pub mod source;
pub mod state;
pub mod storage;
mod evaluator;

// Re-export main types for convenience
pub use crate::core::{Column, DataType, MigrateError, Result, Row, Schema, Value};
pub use result::QueryResult;
pub use storage::{Database, TableSchema};

pub use connection::{Connection, ConnectionInfo, ConnectionManager, SourceOptions};
pub use highwater::{HighWaterMark, HighWaterTracker};
pub use idmap::{IdMap, JoinDescriptor, MapCounts, MapMessage, MapRow, MessageLevel, SourceIdStatus, SqlIdMap};
pub use migration::{
    HighWaterProperty, ImportOutcome, KeyField, MigrateExecutable, Migration, MigrationDescriptor,
    MigrationReport,
};
pub use query::{ColumnRef, Expr, IdentifierQuoter, SelectQuery, SortDirection};
pub use source::{
    CancellationToken, JoinBlocker, SourceCursor, SourcePlugin, SourceRow, SqlSource, TableSourcePlugin, augment,
};
pub use state::{FileStateStore, MemoryStateStore, StateStore};

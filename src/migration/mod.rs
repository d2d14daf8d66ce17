//! Migration configuration, wiring and the run driver.

pub mod descriptor;
pub mod executable;

use std::sync::Arc;

use log::debug;

use crate::connection::ConnectionManager;
use crate::core::Result;
use crate::highwater::HighWaterTracker;
use crate::idmap::{IdMap, MapCounts, SqlIdMap};
use crate::source::{CancellationToken, SourcePlugin, SourceRow, SqlSource};
use crate::state::StateStore;

pub use descriptor::{HighWaterProperty, KeyField, MigrationDescriptor};
pub use executable::{ImportOutcome, MigrateExecutable, MigrationReport};

/// A source plugin wired to its connection, id map and high-water tracker.
pub struct Migration {
    source: SqlSource,
    id_map: Option<Arc<SqlIdMap>>,
    high_water: HighWaterTracker,
}

impl Migration {
    /// Resolve connections, open the id map and build the source.
    ///
    /// The id map lives on `descriptor.id_map` when given, otherwise on the
    /// source connection. Configuration and connection errors surface here,
    /// before any row is fetched.
    pub fn build(
        descriptor: MigrationDescriptor,
        plugin: Box<dyn SourcePlugin>,
        connections: &ConnectionManager,
        state: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let source_connection = connections.resolve(&descriptor.source, state.as_ref())?;
        let map_connection = match &descriptor.id_map {
            Some(options) => connections.resolve(options, state.as_ref())?,
            None => source_connection.clone(),
        };

        let high_water = HighWaterTracker::new(state);
        let mut source = SqlSource::new(plugin, descriptor, source_connection)?.with_high_water(high_water.clone());

        let descriptor = source.descriptor();
        let id_map = if descriptor.source_keys.is_empty() || descriptor.destination_keys.is_empty() {
            None
        } else {
            Some(Arc::new(SqlIdMap::open(
                map_connection,
                &descriptor.id,
                descriptor.source_keys.clone(),
                descriptor.destination_keys.clone(),
            )?))
        };
        if let Some(id_map) = &id_map {
            debug!(
                "Migration '{}' maps through '{}'",
                source.descriptor().id,
                id_map.map_table_name()
            );
            source = source.with_id_map(id_map.clone());
        }

        Ok(Self {
            source,
            id_map,
            high_water,
        })
    }

    pub fn id(&self) -> &str {
        &self.source.descriptor().id
    }

    pub fn source(&self) -> &SqlSource {
        &self.source
    }

    pub fn id_map(&self) -> Option<&Arc<SqlIdMap>> {
        self.id_map.as_ref()
    }

    pub fn high_water(&self) -> &HighWaterTracker {
        &self.high_water
    }

    pub fn executable(&self, cancel: CancellationToken) -> MigrateExecutable<'_> {
        MigrateExecutable::new(&self.source, cancel)
    }

    /// Run to completion with a fresh cancellation token.
    pub fn run<F>(&self, import: F) -> Result<MigrationReport>
    where
        F: FnMut(&SourceRow) -> Result<ImportOutcome>,
    {
        self.executable(CancellationToken::new()).run(import)
    }

    pub fn counts(&self) -> Result<MapCounts> {
        match &self.id_map {
            Some(id_map) => id_map.counts(),
            None => Ok(MapCounts::default()),
        }
    }

    /// Flag every mapped row so the next run reimports it.
    pub fn prepare_update(&self) -> Result<usize> {
        match &self.id_map {
            Some(id_map) => id_map.prepare_update(),
            None => Ok(0),
        }
    }
}

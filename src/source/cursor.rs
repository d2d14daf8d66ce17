use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::vec::IntoIter;

use log::{debug, trace};

use super::SourceRow;
use crate::connection::Connection;
use crate::core::{MigrateError, Result, Value};
use crate::idmap::{IdMap, MapRow};
use crate::migration::{HighWaterProperty, KeyField};
use crate::query::SelectQuery;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a cursor needs besides the query.
pub(crate) struct CursorConfig {
    pub keys: Vec<KeyField>,
    pub destination_key_count: usize,
    pub id_map: Option<Arc<dyn IdMap>>,
    pub map_joined: bool,
    pub ignore_map: bool,
    pub track_changes: bool,
    pub high_water_property: Option<HighWaterProperty>,
    pub high_water_snapshot: Option<Value>,
}

enum CursorState {
    Pending,
    Open(IntoIter<BTreeMap<String, Value>>),
    Done,
}

/// Lazy sequence of pending source rows.
///
/// The query runs on the first `next()`. Rows the id map says are done are
/// skipped. After the first error (or cancellation) the cursor is exhausted.
pub struct SourceCursor {
    connection: Connection,
    query: SelectQuery,
    config: CursorConfig,
    cancel: CancellationToken,
    state: CursorState,
    observed_high_water: Option<Value>,
    yielded: usize,
    skipped: usize,
}

impl SourceCursor {
    pub(crate) fn new(
        connection: Connection,
        query: SelectQuery,
        config: CursorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            query,
            config,
            cancel,
            state: CursorState::Pending,
            observed_high_water: None,
            yielded: 0,
            skipped: 0,
        }
    }

    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Largest high-water property value among the rows yielded so far.
    pub fn observed_high_water(&self) -> Option<&Value> {
        self.observed_high_water.as_ref()
    }

    pub fn high_water_snapshot(&self) -> Option<&Value> {
        self.config.high_water_snapshot.as_ref()
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_map_joined(&self) -> bool {
        self.config.map_joined
    }

    fn open(&mut self) -> Result<()> {
        let result = self.connection.query(&self.query).map_err(fetch_error)?;
        debug!("Source query returned {} candidate rows", result.row_count());
        self.state = CursorState::Open(result.into_records().into_iter());
        Ok(())
    }

    /// Attach the map row and decide whether the record is pending.
    fn prepare(&mut self, record: BTreeMap<String, Value>) -> Result<Option<SourceRow>> {
        let config = &self.config;
        let projected = if config.map_joined {
            MapRow::from_projection(&record, config.keys.len(), config.destination_key_count)?
        } else {
            None
        };

        let mut row = SourceRow::new(record, &config.keys)?;
        let map_row = match (projected, &config.id_map) {
            (Some(map_row), _) => Some(map_row),
            (None, Some(id_map)) if !config.map_joined => id_map.lookup(row.source_ids())?,
            _ => None,
        };
        row.set_id_map(map_row);

        if config.track_changes {
            row.rehash()?;
        }

        let high_water_value = config
            .high_water_property
            .as_ref()
            .and_then(|property| row.get(&property.name))
            .filter(|value| !value.is_null())
            .cloned();

        if !config.ignore_map && self.already_imported(&row, high_water_value.as_ref())? {
            trace!("Skipping unchanged row {:?}", row.source_ids());
            return Ok(None);
        }

        if let Some(value) = high_water_value {
            let higher = match &self.observed_high_water {
                Some(current) => value.compare(current)? == CmpOrdering::Greater,
                None => true,
            };
            if higher {
                self.observed_high_water = Some(value);
            }
        }

        Ok(Some(row))
    }

    fn already_imported(&self, row: &SourceRow, high_water_value: Option<&Value>) -> Result<bool> {
        let Some(map_row) = row.id_map() else {
            return Ok(false);
        };
        if map_row.needs_update() || !map_row.has_destination() {
            return Ok(false);
        }

        let above_high_water = match (high_water_value, &self.config.high_water_snapshot) {
            (Some(value), Some(snapshot)) => value.compare(snapshot)? == CmpOrdering::Greater,
            _ => false,
        };
        if above_high_water {
            return Ok(false);
        }

        Ok(!(self.config.track_changes && row.changed()))
    }
}

impl Iterator for SourceCursor {
    type Item = Result<SourceRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if matches!(self.state, CursorState::Done) {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!("Source cursor cancelled after {} rows", self.yielded);
                self.state = CursorState::Done;
                return Some(Err(MigrateError::Cancelled));
            }
            if matches!(self.state, CursorState::Pending)
                && let Err(err) = self.open()
            {
                self.state = CursorState::Done;
                return Some(Err(err));
            }

            let record = match &mut self.state {
                CursorState::Open(records) => records.next(),
                _ => None,
            };
            let Some(record) = record else {
                self.state = CursorState::Done;
                return None;
            };

            match self.prepare(record) {
                Ok(Some(row)) => {
                    self.yielded += 1;
                    return Some(Ok(row));
                }
                Ok(None) => self.skipped += 1,
                Err(err) => {
                    self.state = CursorState::Done;
                    return Some(Err(fetch_error(err)));
                }
            }
        }
    }
}

fn fetch_error(err: MigrateError) -> MigrateError {
    match err {
        MigrateError::RowFetchError(_) | MigrateError::Cancelled => err,
        other => MigrateError::RowFetchError(other.to_string()),
    }
}

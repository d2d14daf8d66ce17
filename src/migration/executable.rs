use serde::Serialize;
use tracing::{Level, event, info_span};
use uuid::Uuid;

use crate::core::{MigrateError, Result, Value};
use crate::idmap::{MessageLevel, SourceIdStatus};
use crate::source::{CancellationToken, SourceRow, SqlSource};

/// What the import callback did with a row.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    /// Written to the destination under this key.
    Imported(Vec<Value>),
    /// Deliberately skipped; recorded so it is not counted as pending work.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub migration_id: String,
    pub processed: usize,
    pub imported: usize,
    pub ignored: usize,
    pub failed: usize,
    /// Rows the query returned but the id map marked as done.
    pub skipped: usize,
    /// High-water mark stored after the run.
    pub high_water: Option<Value>,
}

impl MigrationReport {
    fn new(run_id: Uuid, migration_id: &str) -> Self {
        Self {
            run_id,
            migration_id: migration_id.to_string(),
            processed: 0,
            imported: 0,
            ignored: 0,
            failed: 0,
            skipped: 0,
            high_water: None,
        }
    }
}

/// Drives one run of a migration.
///
/// Each pending row goes to the import callback; the outcome lands in the id
/// map. Callback errors fail only their row. The high-water mark is merged
/// once, after the cursor is drained; a cancelled or failed run leaves it
/// untouched.
pub struct MigrateExecutable<'a> {
    source: &'a SqlSource,
    cancel: CancellationToken,
}

impl<'a> MigrateExecutable<'a> {
    pub fn new(source: &'a SqlSource, cancel: CancellationToken) -> Self {
        Self { source, cancel }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run<F>(&self, mut import: F) -> Result<MigrationReport>
    where
        F: FnMut(&SourceRow) -> Result<ImportOutcome>,
    {
        let migration_id = self.source.descriptor().id.as_str();
        let run_id = Uuid::new_v4();
        let span = info_span!("migration.run", migration = %migration_id, run_id = %run_id);
        let _enter = span.enter();

        let mut cursor = self.source.cursor(self.cancel.clone()).inspect_err(|err| {
            if err.is_fatal_setup() {
                event!(Level::ERROR, error = %err, "migration setup failed");
            }
        })?;
        let id_map = self.source.id_map();
        let mut report = MigrationReport::new(run_id, migration_id);

        for next in cursor.by_ref() {
            let row = match next {
                Ok(row) => row,
                Err(MigrateError::Cancelled) => {
                    event!(Level::WARN, processed = report.processed, "migration run cancelled");
                    return Err(MigrateError::Cancelled);
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, "source row fetch failed");
                    return Err(err);
                }
            };
            report.processed += 1;

            match import(&row) {
                Ok(ImportOutcome::Imported(destination_ids)) => {
                    if let Some(id_map) = id_map {
                        id_map.upsert(row.source_ids(), Some(&destination_ids), SourceIdStatus::Imported, row.hash())?;
                    }
                    report.imported += 1;
                }
                Ok(ImportOutcome::Ignored) => {
                    if let Some(id_map) = id_map {
                        id_map.upsert(row.source_ids(), None, SourceIdStatus::Ignored, row.hash())?;
                    }
                    report.ignored += 1;
                }
                Err(err) => {
                    event!(Level::WARN, error = %err, source_ids = ?row.source_ids(), "row import failed");
                    if let Some(id_map) = id_map {
                        id_map.upsert(row.source_ids(), None, SourceIdStatus::Failed, None)?;
                        id_map.save_message(row.source_ids(), &err.to_string(), MessageLevel::Error)?;
                    }
                    report.failed += 1;
                }
            }
        }
        report.skipped = cursor.skipped();

        let descriptor = self.source.descriptor();
        if let (Some(tracker), Some(property), Some(observed)) = (
            self.source.high_water_tracker(),
            &descriptor.high_water_property,
            cursor.observed_high_water(),
        ) {
            report.high_water = tracker.set(migration_id, &property.name, observed.clone())?;
        } else if let Some(tracker) = self.source.high_water_tracker() {
            report.high_water = tracker.get(migration_id)?;
        }

        event!(
            Level::INFO,
            processed = report.processed,
            imported = report.imported,
            ignored = report.ignored,
            failed = report.failed,
            skipped = report.skipped,
            "migration run finished"
        );
        Ok(report)
    }
}

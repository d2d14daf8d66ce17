use std::fmt;

use log::info;

use crate::connection::ConnectionInfo;
use crate::idmap::IdMap;

/// Drivers whose queries cannot reach another database by qualified name.
const SINGLE_DATABASE_DRIVERS: &[&str] = &["sqlite", "pgsql"];

/// First reason a source query may not join the id map in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinBlocker {
    NoSourceKeys,
    UnsupportedDriver(String),
    MissingConnectionInfo,
    FieldMismatch(&'static str),
    DatabaseMismatch,
}

impl fmt::Display for JoinBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSourceKeys => write!(f, "source declares no key fields"),
            Self::UnsupportedDriver(driver) => {
                write!(f, "id map cannot be joined natively from driver '{}'", driver)
            }
            Self::MissingConnectionInfo => write!(f, "id map exposes no connection info"),
            Self::FieldMismatch(field) => write!(f, "connection field '{}' differs", field),
            Self::DatabaseMismatch => write!(f, "driver cannot join across databases"),
        }
    }
}

/// Decide whether the map can be joined into queries on `source`.
///
/// A field absent on one side and present on the other counts as a
/// mismatch; absent on both sides counts as equal.
pub fn check(source: &ConnectionInfo, map: &dyn IdMap, source_key_count: usize) -> Result<(), JoinBlocker> {
    if source_key_count == 0 {
        return Err(JoinBlocker::NoSourceKeys);
    }
    if !map.supports_native_join(&source.driver) {
        return Err(JoinBlocker::UnsupportedDriver(source.driver.clone()));
    }
    let target = map.connection_info().ok_or(JoinBlocker::MissingConnectionInfo)?;

    let fields: [(&'static str, bool); 6] = [
        ("username", source.username == target.username),
        ("password", source.password == target.password),
        ("host", source.host == target.host),
        ("port", source.port == target.port),
        ("namespace", source.namespace == target.namespace),
        ("driver", source.driver == target.driver),
    ];
    if let Some((field, _)) = fields.iter().find(|(_, same)| !same) {
        return Err(JoinBlocker::FieldMismatch(*field));
    }

    if SINGLE_DATABASE_DRIVERS.contains(&source.driver.as_str()) && source.database != target.database {
        return Err(JoinBlocker::DatabaseMismatch);
    }

    Ok(())
}

/// [`check`], logging the degradation when the answer is no.
pub fn is_joinable(source: &ConnectionInfo, map: &dyn IdMap, source_key_count: usize) -> bool {
    match check(source, map, source_key_count) {
        Ok(()) => true,
        Err(blocker) => {
            info!("Id map join disabled, falling back to per-row lookups: {}", blocker);
            false
        }
    }
}

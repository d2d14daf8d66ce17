use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::core::{MigrateError, Result, Value};
use crate::idmap::{MAP_ALIAS_PREFIX, MapRow};
use crate::migration::KeyField;

/// One source record as handed to the import step.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    record: BTreeMap<String, Value>,
    source_ids: Vec<Value>,
    id_map: Option<MapRow>,
    hash: Option<String>,
}

impl SourceRow {
    /// Split the projected `migrate_map_*` columns off `record` and read the
    /// source key from what remains.
    pub fn new(mut record: BTreeMap<String, Value>, keys: &[KeyField]) -> Result<Self> {
        record.retain(|column, _| !column.starts_with(MAP_ALIAS_PREFIX));

        let source_ids = keys
            .iter()
            .map(|key| {
                record
                    .get(&key.name)
                    .cloned()
                    .ok_or_else(|| MigrateError::ColumnNotFound(key.name.clone(), "source row".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            record,
            source_ids,
            id_map: None,
            hash: None,
        })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.record.get(column)
    }

    pub fn record(&self) -> &BTreeMap<String, Value> {
        &self.record
    }

    pub fn into_record(self) -> BTreeMap<String, Value> {
        self.record
    }

    pub fn source_ids(&self) -> &[Value] {
        &self.source_ids
    }

    /// Map row recorded by a previous run, if any.
    pub fn id_map(&self) -> Option<&MapRow> {
        self.id_map.as_ref()
    }

    pub fn set_id_map(&mut self, map_row: Option<MapRow>) {
        self.id_map = map_row;
    }

    /// Destination key from the previous run, for updating in place.
    pub fn destination_ids(&self) -> Option<&[Value]> {
        self.id_map.as_ref().and_then(|row| row.destination_ids.as_deref())
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Compute and remember the content hash.
    pub fn rehash(&mut self) -> Result<&str> {
        let serialized = serde_json::to_vec(&self.record)?;
        let digest = Sha256::digest(&serialized);
        Ok(self.hash.insert(format!("{:x}", digest)).as_str())
    }

    /// True when the content differs from what was hashed last time. Rows
    /// never hashed count as changed.
    pub fn changed(&self) -> bool {
        match (&self.hash, self.id_map.as_ref().and_then(|row| row.hash.as_ref())) {
            (Some(current), Some(previous)) => current != previous,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::idmap::{SourceIdStatus, projected_alias};

    fn record(nid: i64, title: &str) -> BTreeMap<String, Value> {
        let mut record = BTreeMap::new();
        record.insert("nid".to_string(), Value::Integer(nid));
        record.insert("title".to_string(), Value::from(title));
        record.insert(projected_alias("destid1"), Value::Null);
        record
    }

    fn keys() -> Vec<KeyField> {
        vec![KeyField::new("nid", DataType::Integer)]
    }

    #[test]
    fn test_map_columns_are_stripped() {
        let row = SourceRow::new(record(1, "Hello"), &keys()).unwrap();
        assert_eq!(row.source_ids(), &[Value::Integer(1)]);
        assert_eq!(row.record().len(), 2);
    }

    #[test]
    fn test_missing_key_column() {
        let keys = vec![KeyField::new("vid", DataType::Integer)];
        assert!(matches!(
            SourceRow::new(record(1, "Hello"), &keys),
            Err(MigrateError::ColumnNotFound(_, _))
        ));
    }

    #[test]
    fn test_hash_detects_changes() {
        let mut first = SourceRow::new(record(1, "Hello"), &keys()).unwrap();
        let previous = first.rehash().unwrap().to_string();
        assert_eq!(previous.len(), 64);

        let map_row = MapRow {
            source_ids: vec![Value::Integer(1)],
            destination_ids: Some(vec![Value::Integer(101)]),
            status: SourceIdStatus::Imported,
            hash: Some(previous),
            last_imported: None,
        };

        let mut same = SourceRow::new(record(1, "Hello"), &keys()).unwrap();
        same.set_id_map(Some(map_row.clone()));
        same.rehash().unwrap();
        assert!(!same.changed());
        assert_eq!(same.destination_ids(), Some(&[Value::Integer(101)][..]));

        let mut edited = SourceRow::new(record(1, "Hello, world"), &keys()).unwrap();
        edited.set_id_map(Some(map_row));
        edited.rehash().unwrap();
        assert!(edited.changed());
    }
}

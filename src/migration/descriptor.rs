use serde::{Deserialize, Serialize};

use crate::connection::SourceOptions;
use crate::core::{DataType, MigrateError, Result};
use crate::query::ColumnRef;

/// One field of a source or destination key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,

    /// Table alias the field is read from; defaults to the base table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(rename = "type", default)]
    pub data_type: DataType,
}

impl KeyField {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            data_type,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn column_ref(&self, base_alias: &str) -> ColumnRef {
        ColumnRef::qualified(self.alias.as_deref().unwrap_or(base_alias), &self.name)
    }
}

/// Source field feeding the high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighWaterProperty {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl HighWaterProperty {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn column_ref(&self, base_alias: &str) -> ColumnRef {
        ColumnRef::qualified(self.alias.as_deref().unwrap_or(base_alias), &self.name)
    }
}

/// Static configuration of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDescriptor {
    pub id: String,

    /// Ordered source key. Left empty, the source plugin's `ids()` are used.
    #[serde(default)]
    pub source_keys: Vec<KeyField>,

    #[serde(default)]
    pub destination_keys: Vec<KeyField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water_property: Option<HighWaterProperty>,

    /// Skip the id map entirely when selecting rows.
    #[serde(default)]
    pub ignore_map: bool,

    /// Hash each row so changed rows are reimported even when the map says
    /// they are done.
    #[serde(default)]
    pub track_changes: bool,

    #[serde(default)]
    pub source: SourceOptions,

    /// Where the id map lives. Defaults to the source connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_map: Option<SourceOptions>,
}

impl MigrationDescriptor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            source_keys: Vec::new(),
            destination_keys: Vec::new(),
            high_water_property: None,
            ignore_map: false,
            track_changes: false,
            source: SourceOptions::default(),
            id_map: None,
        }
    }

    pub fn source_key(mut self, key: KeyField) -> Self {
        self.source_keys.push(key);
        self
    }

    pub fn destination_key(mut self, key: KeyField) -> Self {
        self.destination_keys.push(key);
        self
    }

    pub fn high_water(mut self, property: HighWaterProperty) -> Self {
        self.high_water_property = Some(property);
        self
    }

    pub fn ignore_map(mut self, ignore: bool) -> Self {
        self.ignore_map = ignore;
        self
    }

    pub fn track_changes(mut self, track: bool) -> Self {
        self.track_changes = track;
        self
    }

    pub fn source_options(mut self, options: SourceOptions) -> Self {
        self.source = options;
        self
    }

    pub fn id_map_options(mut self, options: SourceOptions) -> Self {
        self.id_map = Some(options);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MigrateError::ConfigurationError("Migration id cannot be empty".to_string()));
        }
        if !self.ignore_map && self.source_keys.is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "Migration '{}' joins the id map but declares no source keys",
                self.id
            )));
        }
        if let Some(property) = &self.high_water_property
            && property.name.is_empty()
        {
            return Err(MigrateError::ConfigurationError(format!(
                "Migration '{}' has an unnamed high-water property",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_json() {
        let descriptor: MigrationDescriptor = serde_json::from_str(
            r#"{
                "id": "d7_node_article",
                "source_keys": [{"name": "nid", "alias": "n", "type": "integer"}],
                "destination_keys": [{"name": "id"}],
                "high_water_property": {"name": "changed"},
                "source": {"key": "d7"}
            }"#,
        )
        .unwrap();

        assert_eq!(descriptor.source_keys[0].column_ref("x"), ColumnRef::qualified("n", "nid"));
        assert_eq!(descriptor.destination_keys[0].data_type, DataType::Integer);
        assert_eq!(
            descriptor.high_water_property.as_ref().unwrap().column_ref("n"),
            ColumnRef::qualified("n", "changed")
        );
        assert!(!descriptor.ignore_map);
        assert_eq!(descriptor.source.key, "d7");
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_keys_for_map_join() {
        let descriptor = MigrationDescriptor::new("article");
        assert!(matches!(descriptor.validate(), Err(MigrateError::ConfigurationError(_))));
        assert!(descriptor.ignore_map(true).validate().is_ok());
    }
}

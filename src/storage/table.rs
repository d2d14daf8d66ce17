use std::collections::{BTreeMap, HashMap};

use crate::core::{Column, MigrateError, Result, Row, Schema, Value};

pub type RowId = usize;

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
            primary_key: Vec::new(),
        }
    }

    /// Declare a (possibly composite) primary key. Order is significant.
    pub fn with_primary_key<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.primary_key = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    fn primary_key_positions(&self) -> Result<Vec<usize>> {
        self.primary_key
            .iter()
            .map(|name| {
                self.schema
                    .find_column_index(name)
                    .ok_or_else(|| MigrateError::ColumnNotFound(name.clone(), self.name.clone()))
            })
            .collect()
    }
}

/// Row storage for one table with a unique index on the primary key.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowId, Row>,
    next_row_id: RowId,
    key_positions: Vec<usize>,
    key_index: HashMap<Vec<Value>, RowId>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self> {
        let key_positions = schema.primary_key_positions()?;
        Ok(Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            key_positions,
            key_index: HashMap::new(),
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn insert(&mut self, row: Row) -> Result<RowId> {
        self.validate_row(&row)?;

        let key = self.key_of(&row);
        if let Some(key) = &key
            && self.key_index.contains_key(key)
        {
            return Err(self.duplicate_key(key));
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        if let Some(key) = key {
            self.key_index.insert(key, id);
        }
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Replace a row in place. Changing the primary key is allowed as long as
    /// the new key is not taken by another row.
    pub fn update(&mut self, id: RowId, new_row: Row) -> Result<bool> {
        self.validate_row(&new_row)?;

        let Some(old_row) = self.rows.get(&id) else {
            return Ok(false);
        };
        let old_key = self.key_of(old_row);
        let new_key = self.key_of(&new_row);

        if old_key != new_key {
            if let Some(key) = &new_key
                && self.key_index.contains_key(key)
            {
                return Err(self.duplicate_key(key));
            }
            if let Some(key) = old_key {
                self.key_index.remove(&key);
            }
            if let Some(key) = new_key {
                self.key_index.insert(key, id);
            }
        }

        self.rows.insert(id, new_row);
        Ok(true)
    }

    pub fn delete(&mut self, id: RowId) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        if let Some(key) = self.key_of(&row) {
            self.key_index.remove(&key);
        }
        Some(row)
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.keys().copied().collect()
    }

    pub fn find_by_key(&self, key: &[Value]) -> Option<(RowId, &Row)> {
        let id = *self.key_index.get(key)?;
        self.rows.get(&id).map(|row| (id, row))
    }

    pub fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    pub fn scan_with_ids(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn key_of(&self, row: &Row) -> Option<Vec<Value>> {
        if self.key_positions.is_empty() {
            return None;
        }
        Some(self.key_positions.iter().map(|&i| row[i].clone()).collect())
    }

    fn duplicate_key(&self, key: &[Value]) -> MigrateError {
        let rendered: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        MigrateError::ConstraintViolation(format!(
            "Duplicate primary key ({}) in table '{}'",
            rendered.join(", "),
            self.schema.name()
        ))
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(MigrateError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}

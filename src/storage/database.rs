use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;

use super::{RowId, Table, TableSchema};
use crate::core::{MigrateError, Result, Row};

/// A named collection of tables. One `Database` is one connection namespace.
pub struct Database {
    name: String,
    tables: RwLock<HashMap<String, Table>>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.write()?;
        let name = schema.name().to_string();
        if tables.contains_key(&name) {
            return Err(MigrateError::TableExists(name));
        }
        tables.insert(name, Table::new(schema)?);
        Ok(())
    }

    /// Create the table unless it already exists. Returns true when created.
    pub fn ensure_table(&self, schema: TableSchema) -> Result<bool> {
        let mut tables = self.tables.write()?;
        if tables.contains_key(schema.name()) {
            return Ok(false);
        }
        debug!("Creating table '{}' in database '{}'", schema.name(), self.name);
        tables.insert(schema.name().to_string(), Table::new(schema)?);
        Ok(true)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write()?;
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| MigrateError::TableNotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.tables.read()?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn insert(&self, table: &str, row: Row) -> Result<RowId> {
        self.write(table, |t| t.insert(row))
    }

    /// Snapshot of a table's schema and rows.
    pub fn scan(&self, table: &str) -> Result<(TableSchema, Vec<Row>)> {
        self.read(table, |t| Ok((t.schema().clone(), t.scan())))
    }

    pub fn read<R>(&self, table: &str, f: impl FnOnce(&Table) -> Result<R>) -> Result<R> {
        let tables = self.tables.read()?;
        let table_ref = tables
            .get(table)
            .ok_or_else(|| MigrateError::TableNotFound(table.to_string()))?;
        f(table_ref)
    }

    pub fn write<R>(&self, table: &str, f: impl FnOnce(&mut Table) -> Result<R>) -> Result<R> {
        let mut tables = self.tables.write()?;
        let table_ref = tables
            .get_mut(table)
            .ok_or_else(|| MigrateError::TableNotFound(table.to_string()))?;
        f(table_ref)
    }
}

/// A database server identity: every database reachable with the same
/// driver, host and port lives here, so qualified `database.table` names
/// resolve across namespaces of one server.
pub struct DatabaseServer {
    driver: String,
    host: Option<String>,
    port: Option<u16>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl DatabaseServer {
    pub fn new(driver: impl Into<String>, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            driver: driver.into(),
            host,
            port,
            databases: RwLock::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Open a database by name, creating it on first use.
    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        if let Some(db) = self.databases.read()?.get(name) {
            return Ok(Arc::clone(db));
        }
        let mut databases = self.databases.write()?;
        let db = databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Database::new(name)));
        Ok(Arc::clone(db))
    }

    /// Look up an existing database without creating it.
    pub fn existing_database(&self, name: &str) -> Result<Option<Arc<Database>>> {
        Ok(self.databases.read()?.get(name).cloned())
    }
}

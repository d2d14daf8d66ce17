pub mod config;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::core::{MigrateError, Result, Row};
use crate::query::{IdentifierQuoter, QueryExecutor, SelectQuery, TableSource};
use crate::result::QueryResult;
use crate::state::{self, StateStore};
use crate::storage::{Database, DatabaseServer, TableSchema};
pub use config::{ConnectionInfo, DEFAULT_KEY, DEFAULT_TARGET, SourceOptions};

/// Live handle on one database of one server.
///
/// Cheap to clone; clones share the underlying storage.
#[derive(Clone)]
pub struct Connection {
    info: ConnectionInfo,
    server: Arc<DatabaseServer>,
    database: Arc<Database>,
    quoter: IdentifierQuoter,
}

impl Connection {
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn driver(&self) -> &str {
        &self.info.driver
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn quoter(&self) -> &IdentifierQuoter {
        &self.quoter
    }

    /// `database.table`, resolvable from any connection to the same server.
    pub fn qualified_table_name(&self, table: &str) -> String {
        format!("{}.{}", self.database.name(), table)
    }

    pub fn query(&self, query: &SelectQuery) -> Result<QueryResult> {
        debug!("Executing query:\n{}", query.to_sql(&self.quoter));
        QueryExecutor::new(self, self.quoter).execute(query)
    }

    pub fn count(&self, query: &SelectQuery) -> Result<usize> {
        debug!("Executing count query:\n{}", query.to_count_sql(&self.quoter));
        QueryExecutor::new(self, self.quoter).count(query)
    }

    /// True when both handles point at the same storage.
    pub fn same_database(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.database, &other.database)
    }
}

impl TableSource for Connection {
    fn scan_table(&self, name: &str) -> Result<(TableSchema, Vec<Row>)> {
        match name.split_once('.') {
            Some((database, table)) => {
                let db = self
                    .server
                    .existing_database(database)?
                    .ok_or_else(|| MigrateError::TableNotFound(name.to_string()))?;
                db.scan(table)
            }
            None => self.database.scan(name),
        }
    }
}

type ServerKey = (String, Option<String>, Option<u16>);

/// Registry of connection info by `key`/`target` plus the servers those
/// connections open.
#[derive(Default)]
pub struct ConnectionManager {
    infos: RwLock<HashMap<(String, String), ConnectionInfo>>,
    servers: RwLock<HashMap<ServerKey, Arc<DatabaseServer>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str, target: &str, info: ConnectionInfo) -> Result<()> {
        info.validate().map_err(MigrateError::ConnectionError)?;
        debug!("Registering connection {}/{} -> {}", key, target, info.to_url());
        self.infos
            .write()?
            .insert((key.to_string(), target.to_string()), info);
        Ok(())
    }

    pub fn connection_info(&self, key: &str, target: &str) -> Result<Option<ConnectionInfo>> {
        Ok(self
            .infos
            .read()?
            .get(&(key.to_string(), target.to_string()))
            .cloned())
    }

    pub fn connect(&self, key: &str, target: &str) -> Result<Connection> {
        let info = self.connection_info(key, target)?.ok_or_else(|| {
            MigrateError::ConnectionError(format!(
                "No database connection registered for key '{}', target '{}'",
                key, target
            ))
        })?;
        self.open(info)
    }

    /// Open a connection directly from its info.
    pub fn open(&self, info: ConnectionInfo) -> Result<Connection> {
        info.validate().map_err(MigrateError::ConnectionError)?;

        let server = self.server_for(&info)?;
        let database = server.database(&info.database)?;
        Ok(Connection {
            quoter: IdentifierQuoter::for_driver(&info.driver),
            info,
            server,
            database,
        })
    }

    /// Resolve a migration's source options to a live connection.
    ///
    /// `database_state_key` wins over inline `database` info, which wins over
    /// whatever is already registered under `key`/`target`.
    pub fn resolve(&self, options: &SourceOptions, state: &dyn StateStore) -> Result<Connection> {
        if let Some(state_key) = &options.database_state_key {
            let info: ConnectionInfo = state::load(state, state_key)?.ok_or_else(|| {
                MigrateError::ConnectionError(format!(
                    "No connection info stored under state key '{}'",
                    state_key
                ))
            })?;
            info!("Using connection info from state key '{}'", state_key);
            self.register(&options.key, &options.target, info)?;
        } else if let Some(info) = &options.database {
            self.register(&options.key, &options.target, info.clone())?;
        }

        self.connect(&options.key, &options.target)
    }

    fn server_for(&self, info: &ConnectionInfo) -> Result<Arc<DatabaseServer>> {
        let key: ServerKey = (info.driver.clone(), info.host.clone(), info.port);
        if let Some(server) = self.servers.read()?.get(&key) {
            return Ok(Arc::clone(server));
        }
        let mut servers = self.servers.write()?;
        let server = servers
            .entry(key)
            .or_insert_with(|| Arc::new(DatabaseServer::new(info.driver.clone(), info.host.clone(), info.port)));
        Ok(Arc::clone(server))
    }
}

pub mod database;
pub mod table;

pub use database::{Database, DatabaseServer};
pub use table::{RowId, Table, TableSchema};

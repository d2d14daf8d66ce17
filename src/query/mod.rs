//! Structured SELECT model, SQL rendering and in-memory execution.

pub mod executor;
pub mod expr;
pub mod quote;
pub mod scope;
pub mod select;

pub use executor::{QueryExecutor, TableSource};
pub use expr::{BinaryOp, ColumnRef, ConditionGroup, Conjunction, Expr};
pub use quote::{IdentifierQuoter, MAX_IDENTIFIER_LENGTH};
pub use scope::{Scope, ScopedColumn};
pub use select::{Join, JoinKind, OrderBy, SelectItem, SelectQuery, SortDirection, TableRef};

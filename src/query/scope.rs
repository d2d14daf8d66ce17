use super::expr::ColumnRef;
use super::quote::IdentifierQuoter;
use crate::core::{MigrateError, Result, Schema};

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedColumn {
    pub table: String,
    pub name: String,
}

/// Column layout of an intermediate row: the concatenation of every joined
/// table's columns, each tagged with its table alias.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    columns: Vec<ScopedColumn>,
    quoter: IdentifierQuoter,
}

impl Scope {
    pub fn for_table(alias: &str, schema: &Schema, quoter: IdentifierQuoter) -> Self {
        Self {
            columns: schema
                .columns()
                .iter()
                .map(|c| ScopedColumn {
                    table: alias.to_string(),
                    name: c.name.clone(),
                })
                .collect(),
            quoter,
        }
    }

    pub fn extended(&self, other: &Scope) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Self {
            columns,
            quoter: self.quoter,
        }
    }

    pub fn columns(&self) -> &[ScopedColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = (usize, &'a ScopedColumn)> + 'a {
        self.columns
            .iter()
            .enumerate()
            .filter(move |(_, c)| self.quoter.same_identifier(&c.table, table))
    }

    pub fn try_resolve(&self, column: &ColumnRef) -> Result<Option<usize>> {
        let mut matches = self.columns.iter().enumerate().filter(|(_, c)| {
            self.quoter.same_identifier(&c.name, &column.column)
                && column
                    .table
                    .as_deref()
                    .is_none_or(|t| self.quoter.same_identifier(&c.table, t))
        });

        let first = matches.next().map(|(i, _)| i);
        if first.is_some() && matches.next().is_some() {
            return Err(MigrateError::ExecutionError(format!(
                "Column reference '{}' is ambiguous",
                column
            )));
        }
        Ok(first)
    }

    pub fn resolve(&self, column: &ColumnRef) -> Result<usize> {
        self.try_resolve(column)?.ok_or_else(|| {
            MigrateError::ColumnNotFound(
                column.column.clone(),
                column.table.clone().unwrap_or_else(|| "<query>".to_string()),
            )
        })
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;

use log::trace;

use super::expr::{BinaryOp, ColumnRef, Expr};
use super::quote::IdentifierQuoter;
use super::scope::Scope;
use super::select::{Join, JoinKind, SelectItem, SelectQuery, SortDirection};
use crate::core::{MigrateError, Result, Row, Value};
use crate::evaluator::{EvaluationContext, EvaluatorRegistry};
use crate::result::QueryResult;
use crate::storage::TableSchema;

/// Resolves table names (plain or `database.table`) to a snapshot of rows.
pub trait TableSource {
    fn scan_table(&self, name: &str) -> Result<(TableSchema, Vec<Row>)>;
}

pub struct QueryExecutor<'a> {
    tables: &'a dyn TableSource,
    quoter: IdentifierQuoter,
    registry: EvaluatorRegistry,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(tables: &'a dyn TableSource, quoter: IdentifierQuoter) -> Self {
        Self {
            tables,
            quoter,
            registry: EvaluatorRegistry::with_default_evaluators(),
        }
    }

    pub fn execute(&self, query: &SelectQuery) -> Result<QueryResult> {
        let (scope, rows) = self.load_rows(query)?;
        let eval_ctx = EvaluationContext::new(&self.registry);

        let mut rows = match query.where_expr() {
            Some(predicate) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if eval_ctx.matches(&predicate, &row, &scope)? {
                        kept.push(row);
                    }
                }
                kept
            }
            None => rows,
        };

        self.sort_rows(query, &scope, &mut rows)?;
        self.project(query, &scope, rows, &eval_ctx)
    }

    /// Number of rows the query would return.
    pub fn count(&self, query: &SelectQuery) -> Result<usize> {
        Ok(self.execute(query)?.row_count())
    }

    fn load_rows(&self, query: &SelectQuery) -> Result<(Scope, Vec<Row>)> {
        let from = query.from_table();
        let (schema, mut rows) = self.tables.scan_table(&from.name)?;
        let mut scope = Scope::for_table(&from.alias, schema.schema(), self.quoter);

        for join in query.joins() {
            let (right_schema, right_rows) = self.tables.scan_table(&join.table.name)?;
            let right_scope = Scope::for_table(&join.table.alias, right_schema.schema(), self.quoter);
            let combined = scope.extended(&right_scope);

            rows = match self.equi_join_keys(&join.on, &scope, &right_scope)? {
                Some((left_keys, right_keys)) => {
                    trace!("Hash join on '{}' ({} key columns)", join.table.name, left_keys.len());
                    hash_join(join.kind, rows, &left_keys, right_rows, &right_keys, right_scope.len())
                }
                None => self.nested_loop_join(join, rows, right_rows, right_scope.len(), &combined)?,
            };
            scope = combined;
        }

        Ok((scope, rows))
    }

    /// Column positions for a join condition made only of
    /// `left.col = right.col` conjuncts; `None` when any conjunct is anything else.
    fn equi_join_keys(&self, on: &Expr, left: &Scope, right: &Scope) -> Result<Option<(Vec<usize>, Vec<usize>)>> {
        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();

        for conjunct in on.conjuncts() {
            let Expr::BinaryOp {
                left: a,
                op: BinaryOp::Eq,
                right: b,
            } = conjunct
            else {
                return Ok(None);
            };
            let (Expr::Column(a), Expr::Column(b)) = (a.as_ref(), b.as_ref()) else {
                return Ok(None);
            };

            match (self.side_of(a, left, right)?, self.side_of(b, left, right)?) {
                (Some(Side::Left(l)), Some(Side::Right(r))) | (Some(Side::Right(r)), Some(Side::Left(l))) => {
                    left_keys.push(l);
                    right_keys.push(r);
                }
                _ => return Ok(None),
            }
        }

        Ok(Some((left_keys, right_keys)))
    }

    fn side_of(&self, column: &ColumnRef, left: &Scope, right: &Scope) -> Result<Option<Side>> {
        if let Some(idx) = right.try_resolve(column)? {
            return Ok(Some(Side::Right(idx)));
        }
        Ok(left.try_resolve(column)?.map(Side::Left))
    }

    fn nested_loop_join(
        &self,
        join: &Join,
        left_rows: Vec<Row>,
        right_rows: Vec<Row>,
        right_width: usize,
        combined: &Scope,
    ) -> Result<Vec<Row>> {
        let eval_ctx = EvaluationContext::new(&self.registry);
        let mut output = Vec::new();

        for left in left_rows {
            let mut matched = false;
            for right in &right_rows {
                let mut candidate = left.clone();
                candidate.extend(right.iter().cloned());
                if eval_ctx.matches(&join.on, &candidate, combined)? {
                    matched = true;
                    output.push(candidate);
                }
            }
            if !matched && join.kind == JoinKind::Left {
                output.push(pad_right(left, right_width));
            }
        }

        Ok(output)
    }

    fn sort_rows(&self, query: &SelectQuery, scope: &Scope, rows: &mut [Row]) -> Result<()> {
        if query.order_by_clauses().is_empty() {
            return Ok(());
        }

        let keys: Vec<(usize, SortDirection)> = query
            .order_by_clauses()
            .iter()
            .map(|o| scope.resolve(&o.column).map(|idx| (idx, o.direction)))
            .collect::<Result<_>>()?;

        let mut failure: Option<MigrateError> = None;
        rows.sort_by(|a, b| {
            for (idx, direction) in &keys {
                let ordering = match a[*idx].compare(&b[*idx]) {
                    Ok(ordering) => ordering,
                    Err(e) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                };
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn project(
        &self,
        query: &SelectQuery,
        scope: &Scope,
        rows: Vec<Row>,
        eval_ctx: &EvaluationContext<'_>,
    ) -> Result<QueryResult> {
        if query.items().is_empty() {
            let columns = scope.columns().iter().map(|c| c.name.clone()).collect();
            return Ok(QueryResult::new(columns, rows));
        }

        let mut columns = Vec::new();
        let mut plan: Vec<Projection<'_>> = Vec::new();
        for (i, item) in query.items().iter().enumerate() {
            match item {
                SelectItem::AllColumns(alias) => {
                    let mut found = false;
                    for (idx, column) in scope.columns_of(alias) {
                        found = true;
                        columns.push(column.name.clone());
                        plan.push(Projection::Position(idx));
                    }
                    if !found {
                        return Err(MigrateError::TableNotFound(alias.clone()));
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    let name = match (alias, expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Column(column)) => column.column.clone(),
                        (None, _) => format!("expression_{}", i),
                    };
                    columns.push(name);
                    plan.push(Projection::Expr(expr));
                }
            }
        }

        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            let mut out = Vec::with_capacity(plan.len());
            for step in &plan {
                out.push(match step {
                    Projection::Position(idx) => row[*idx].clone(),
                    Projection::Expr(expr) => eval_ctx.evaluate(expr, &row, scope)?,
                });
            }
            projected.push(out);
        }

        Ok(QueryResult::new(columns, projected))
    }
}

enum Side {
    Left(usize),
    Right(usize),
}

enum Projection<'q> {
    Position(usize),
    Expr(&'q Expr),
}

fn pad_right(mut row: Row, width: usize) -> Row {
    row.extend(std::iter::repeat_n(Value::Null, width));
    row
}

fn hash_join(
    kind: JoinKind,
    left_rows: Vec<Row>,
    left_keys: &[usize],
    right_rows: Vec<Row>,
    right_keys: &[usize],
    right_width: usize,
) -> Vec<Row> {
    let mut buckets: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
    for (i, row) in right_rows.iter().enumerate() {
        let key: Vec<Value> = right_keys.iter().map(|&k| row[k].clone()).collect();
        // NULL never equals anything, so NULL keys can't match.
        if key.iter().any(Value::is_null) {
            continue;
        }
        buckets.entry(key).or_default().push(i);
    }

    let mut output = Vec::with_capacity(left_rows.len());
    for left in left_rows {
        let key: Vec<Value> = left_keys.iter().map(|&k| left[k].clone()).collect();
        let matches = if key.iter().any(Value::is_null) {
            None
        } else {
            buckets.get(&key)
        };

        match matches {
            Some(indices) => {
                for &i in indices {
                    let mut joined = left.clone();
                    joined.extend(right_rows[i].iter().cloned());
                    output.push(joined);
                }
            }
            None if kind == JoinKind::Left => output.push(pad_right(left, right_width)),
            None => {}
        }
    }
    output
}

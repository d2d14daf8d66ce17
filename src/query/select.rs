use super::expr::{ColumnRef, ConditionGroup, Expr};
use super::quote::IdentifierQuoter;

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Table name, optionally qualified by database (`legacy.node`).
    pub name: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `alias.*`
    AllColumns(String),
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// Structured `SELECT` over one base table plus joins.
///
/// Concrete sources build one of these for their base selection; the
/// augmenter adds the id map join and the pending-row predicates on top.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    from: TableRef,
    joins: Vec<Join>,
    items: Vec<SelectItem>,
    conditions: ConditionGroup,
    order_by: Vec<OrderBy>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            from: TableRef {
                name: table.into(),
                alias: alias.into(),
            },
            joins: Vec::new(),
            items: Vec::new(),
            conditions: ConditionGroup::and(),
            order_by: Vec::new(),
        }
    }

    pub fn from_table(&self) -> &TableRef {
        &self.from
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn items(&self) -> &[SelectItem] {
        &self.items
    }

    pub fn conditions(&self) -> &ConditionGroup {
        &self.conditions
    }

    pub fn order_by_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn all_fields(&mut self, alias: &str) -> &mut Self {
        self.items.push(SelectItem::AllColumns(alias.to_string()));
        self
    }

    pub fn field(&mut self, table_alias: &str, column: &str, alias: Option<&str>) -> &mut Self {
        self.expression(Expr::column(table_alias, column), alias)
    }

    pub fn expression(&mut self, expr: Expr, alias: Option<&str>) -> &mut Self {
        self.items.push(SelectItem::Expr {
            expr,
            alias: alias.map(str::to_string),
        });
        self
    }

    /// Add a join and return the alias actually used, which differs from
    /// `alias` when that alias is already taken.
    pub fn join(&mut self, kind: JoinKind, table: &str, alias: &str, on: Expr) -> String {
        let alias = self.unique_alias(alias);
        self.joins.push(Join {
            kind,
            table: TableRef {
                name: table.to_string(),
                alias: alias.clone(),
            },
            on,
        });
        alias
    }

    pub fn left_join(&mut self, table: &str, alias: &str, on: Expr) -> String {
        self.join(JoinKind::Left, table, alias, on)
    }

    pub fn inner_join(&mut self, table: &str, alias: &str, on: Expr) -> String {
        self.join(JoinKind::Inner, table, alias, on)
    }

    pub fn condition(&mut self, expr: Expr) -> &mut Self {
        self.conditions.push(expr);
        self
    }

    /// AND a nested group into the WHERE clause. Empty groups add nothing.
    pub fn condition_group(&mut self, group: ConditionGroup) -> &mut Self {
        self.conditions.push_group(group);
        self
    }

    pub fn order_by(&mut self, column: ColumnRef, direction: SortDirection) -> &mut Self {
        self.order_by.push(OrderBy { column, direction });
        self
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.from.alias == alias || self.joins.iter().any(|j| j.table.alias == alias)
    }

    /// `wanted`, or `wanted_2`, `wanted_3`, ... whichever is free first.
    pub fn unique_alias(&self, wanted: &str) -> String {
        if !self.has_alias(wanted) {
            return wanted.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", wanted, n))
            .find(|candidate| !self.has_alias(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }

    pub fn where_expr(&self) -> Option<Expr> {
        self.conditions.to_expr()
    }

    pub fn to_sql(&self, quoter: &IdentifierQuoter) -> String {
        let mut sql = String::from("SELECT ");

        if self.items.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<String> = self
                .items
                .iter()
                .map(|item| match item {
                    SelectItem::AllColumns(alias) => format!("{}.*", quoter.quote_identifier(alias)),
                    SelectItem::Expr { expr, alias: None } => render_expr(expr, quoter),
                    SelectItem::Expr {
                        expr,
                        alias: Some(alias),
                    } => format!("{} AS {}", render_expr(expr, quoter), quoter.quote_identifier(alias)),
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        sql.push_str(&format!(
            "\nFROM {} {}",
            quoter.quote_field(&self.from.name),
            quoter.quote_identifier(&self.from.alias)
        ));

        for join in &self.joins {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT OUTER JOIN",
            };
            sql.push_str(&format!(
                "\n{} {} {} ON {}",
                keyword,
                quoter.quote_field(&join.table.name),
                quoter.quote_identifier(&join.table.alias),
                render_expr(&join.on, quoter)
            ));
        }

        if let Some(predicate) = self.where_expr() {
            sql.push_str(&format!("\nWHERE {}", render_expr(&predicate, quoter)));
        }

        if !self.order_by.is_empty() {
            let clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {}", render_column(&o.column, quoter), dir)
                })
                .collect();
            sql.push_str(&format!("\nORDER BY {}", clauses.join(", ")));
        }

        sql
    }

    pub fn to_count_sql(&self, quoter: &IdentifierQuoter) -> String {
        format!("SELECT COUNT(*) AS {} FROM ({}) subquery", quoter.quote_identifier("expression"), self.to_sql(quoter))
    }
}

fn render_column(column: &ColumnRef, quoter: &IdentifierQuoter) -> String {
    match &column.table {
        Some(table) => format!("{}.{}", quoter.quote_identifier(table), quoter.quote_identifier(&column.column)),
        None => quoter.quote_identifier(&column.column),
    }
}

fn render_expr(expr: &Expr, quoter: &IdentifierQuoter) -> String {
    match expr {
        Expr::Column(column) => render_column(column, quoter),
        Expr::Literal(value) => value.to_sql_literal(),
        Expr::BinaryOp { left, op, right } => {
            format!("({} {} {})", render_expr(left, quoter), op.as_sql(), render_expr(right, quoter))
        }
        Expr::IsNull { expr, negated } => {
            let suffix = if *negated { "IS NOT NULL" } else { "IS NULL" };
            format!("{} {}", render_expr(expr, quoter), suffix)
        }
    }
}

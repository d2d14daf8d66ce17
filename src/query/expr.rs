use std::fmt;

use crate::core::Value;

/// Column reference, optionally qualified by a table alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: Option<&str>, column: impl Into<String>) -> Self {
        Self {
            table: table.map(str::to_string),
            column: column.into(),
        }
    }

    pub fn qualified(table: &str, column: impl Into<String>) -> Self {
        Self::new(Some(table), column)
    }

    pub fn bare(column: impl Into<String>) -> Self {
        Self::new(None, column)
    }

    /// Parse `alias.column` or `column`.
    pub fn parse(field: &str) -> Self {
        match field.split_once('.') {
            Some((table, column)) => Self::qualified(table, column),
            None => Self::bare(field),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn column(table: &str, column: &str) -> Self {
        Self::Column(ColumnRef::qualified(table, column))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Self::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Eq, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Gt, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::And, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOp::Or, right)
    }

    pub fn is_null(expr: Expr) -> Self {
        Self::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Self::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    /// Split a tree of ANDs into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Self::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn op(self) -> BinaryOp {
        match self {
            Self::And => BinaryOp::And,
            Self::Or => BinaryOp::Or,
        }
    }
}

/// A list of predicates joined by one conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    conjunction: Conjunction,
    conditions: Vec<Expr>,
}

impl ConditionGroup {
    pub fn new(conjunction: Conjunction) -> Self {
        Self {
            conjunction,
            conditions: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(Conjunction::And)
    }

    pub fn or() -> Self {
        Self::new(Conjunction::Or)
    }

    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    pub fn push(&mut self, expr: Expr) -> &mut Self {
        self.conditions.push(expr);
        self
    }

    /// Nest another group; empty groups are dropped.
    pub fn push_group(&mut self, group: ConditionGroup) -> &mut Self {
        if let Some(expr) = group.into_expr() {
            self.conditions.push(expr);
        }
        self
    }

    pub fn conditions(&self) -> &[Expr] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn to_expr(&self) -> Option<Expr> {
        self.clone().into_expr()
    }

    pub fn into_expr(self) -> Option<Expr> {
        let op = self.conjunction.op();
        self.conditions
            .into_iter()
            .reduce(|acc, next| Expr::binary(acc, op, next))
    }
}

use super::super::{EvaluationContext, ExpressionEvaluator};
use crate::core::{Result, Row, Value};
use crate::query::{Expr, Scope};

pub struct IsNullEvaluator;

impl ExpressionEvaluator for IsNullEvaluator {
    fn name(&self) -> &'static str {
        "IS_NULL"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::IsNull { .. })
    }

    fn evaluate(&self, expr: &Expr, row: &Row, scope: &Scope, context: &EvaluationContext<'_>) -> Result<Value> {
        let Expr::IsNull { expr, negated } = expr else {
            unreachable!();
        };

        let is_null = context.evaluate(expr, row, scope)?.is_null();
        Ok(Value::Boolean(is_null != *negated))
    }
}

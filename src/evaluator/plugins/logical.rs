use super::super::{EvaluationContext, ExpressionEvaluator};
use crate::core::{Result, Row, Value};
use crate::query::{BinaryOp, Expr, Scope};

pub struct LogicalEvaluator;

impl ExpressionEvaluator for LogicalEvaluator {
    fn name(&self) -> &'static str {
        "LOGICAL"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        if let Expr::BinaryOp { op, .. } = expr {
            matches!(op, BinaryOp::And | BinaryOp::Or)
        } else {
            false
        }
    }

    fn evaluate(&self, expr: &Expr, row: &Row, scope: &Scope, context: &EvaluationContext<'_>) -> Result<Value> {
        let Expr::BinaryOp { left, op, right } = expr else {
            unreachable!();
        };

        match op {
            BinaryOp::And => {
                if !context.matches(left, row, scope)? {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(context.matches(right, row, scope)?))
            }

            BinaryOp::Or => {
                if context.matches(left, row, scope)? {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(context.matches(right, row, scope)?))
            }

            _ => unreachable!(),
        }
    }
}

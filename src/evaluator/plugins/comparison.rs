use std::cmp::Ordering;

use super::super::{EvaluationContext, ExpressionEvaluator};
use crate::core::{Result, Row, Value};
use crate::query::{BinaryOp, Expr, Scope};

pub struct ComparisonEvaluator;

impl ExpressionEvaluator for ComparisonEvaluator {
    fn name(&self) -> &'static str {
        "COMPARISON"
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        if let Expr::BinaryOp { op, .. } = expr {
            matches!(
                op,
                BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
            )
        } else {
            false
        }
    }

    fn evaluate(&self, expr: &Expr, row: &Row, scope: &Scope, context: &EvaluationContext<'_>) -> Result<Value> {
        let Expr::BinaryOp { left, op, right } = expr else {
            unreachable!();
        };

        let left_val = context.evaluate(left, row, scope)?;
        let right_val = context.evaluate(right, row, scope)?;

        // Any comparison with NULL is unknown.
        if left_val.is_null() || right_val.is_null() {
            return Ok(Value::Null);
        }

        Ok(Value::Boolean(self.compare(&left_val, &right_val, *op)?))
    }
}

impl ComparisonEvaluator {
    pub fn compare(&self, left: &Value, right: &Value, op: BinaryOp) -> Result<bool> {
        match op {
            BinaryOp::Eq => Ok(left == right),
            BinaryOp::NotEq => Ok(left != right),
            _ => {
                let ordering = left.compare(right)?;
                Ok(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::LtEq => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    BinaryOp::GtEq => ordering != Ordering::Less,
                    _ => unreachable!(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MigrateError;

    #[test]
    fn test_numeric_ordering() {
        let ev = ComparisonEvaluator;
        assert!(ev.compare(&Value::Integer(40), &Value::Integer(30), BinaryOp::Gt).unwrap());
        assert!(!ev.compare(&Value::Integer(30), &Value::Integer(30), BinaryOp::Gt).unwrap());
        assert!(ev.compare(&Value::Float(30.5), &Value::Integer(30), BinaryOp::GtEq).unwrap());
    }

    #[test]
    fn test_text_ordering() {
        let ev = ComparisonEvaluator;
        assert!(ev.compare(&"2024-02-01".into(), &"2024-01-31".into(), BinaryOp::Gt).unwrap());
    }

    #[test]
    fn test_mismatched_types() {
        let ev = ComparisonEvaluator;
        assert!(matches!(
            ev.compare(&Value::Integer(1), &"1".into(), BinaryOp::Lt),
            Err(MigrateError::TypeMismatch(_))
        ));
        assert!(!ev.compare(&Value::Integer(1), &"1".into(), BinaryOp::Eq).unwrap());
    }
}

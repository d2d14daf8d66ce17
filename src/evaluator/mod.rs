pub mod plugins;

use crate::core::{MigrateError, Result, Row, Value};
use crate::query::{Expr, Scope};

/// Evaluates one kind of expression node.
pub trait ExpressionEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_evaluate(&self, expr: &Expr) -> bool;

    fn evaluate(&self, expr: &Expr, row: &Row, scope: &Scope, context: &EvaluationContext<'_>) -> Result<Value>;
}

pub struct EvaluationContext<'a> {
    registry: &'a EvaluatorRegistry,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(registry: &'a EvaluatorRegistry) -> Self {
        Self { registry }
    }

    pub fn evaluate(&self, expr: &Expr, row: &Row, scope: &Scope) -> Result<Value> {
        match expr {
            Expr::Column(column) => {
                let idx = scope.resolve(column)?;
                return Ok(row[idx].clone());
            }
            Expr::Literal(value) => return Ok(value.clone()),
            _ => {}
        }

        if let Some(evaluator) = self.registry.find_evaluator(expr) {
            return evaluator.evaluate(expr, row, scope, self);
        }

        Err(MigrateError::ExecutionError(format!(
            "No evaluator found for expression: {:?}",
            expr
        )))
    }

    /// Evaluate as a predicate: NULL and false both reject the row.
    pub fn matches(&self, expr: &Expr, row: &Row, scope: &Scope) -> Result<bool> {
        Ok(self.evaluate(expr, row, scope)?.as_bool())
    }
}

pub struct EvaluatorRegistry {
    evaluators: Vec<Box<dyn ExpressionEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
        }
    }

    pub fn register(&mut self, evaluator: Box<dyn ExpressionEvaluator>) {
        log::trace!("Registered evaluator: {}", evaluator.name());
        self.evaluators.push(evaluator);
    }

    pub fn with_default_evaluators() -> Self {
        use plugins::*;

        let mut registry = Self::new();
        registry.register(Box::new(comparison::ComparisonEvaluator));
        registry.register(Box::new(logical::LogicalEvaluator));
        registry.register(Box::new(is_null::IsNullEvaluator));
        registry
    }

    fn find_evaluator(&self, expr: &Expr) -> Option<&dyn ExpressionEvaluator> {
        self.evaluators
            .iter()
            .find(|ev| ev.can_evaluate(expr))
            .map(|boxed| &**boxed)
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_default_evaluators()
    }
}

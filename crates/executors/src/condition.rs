//! Built-in executor for `condition` steps.
//!
//! A condition step's config is a single predicate:
//!
//! ```json
//! { "field": "deal.stage", "operator": "equals", "value": "won" }
//! ```
//!
//! `field` is a dotted path resolved against the run context (see
//! [`RunContext::lookup`]). The executor never fails for a missing field;
//! it simply evaluates to `false` (or `true` for `not_exists`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutorError, RunContext, StepExecutor, StepResult};

/// Comparison applied between the context value and the configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    Exists,
    NotExists,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Parsed condition config.
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn from_config(config: &Value) -> Result<Self, ExecutorError> {
        serde_json::from_value(config.clone())
            .map_err(|e| ExecutorError::Fatal(format!("invalid condition config: {e}")))
    }

    /// Evaluate against an already-resolved context value.
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        match self.operator {
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::NotExists => actual.map_or(true, Value::is_null),
            Operator::Equals => actual.is_some_and(|v| v == &self.value),
            Operator::NotEquals => actual.map_or(true, |v| v != &self.value),
            Operator::Contains => match actual {
                Some(Value::String(s)) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Array(items)) => items.contains(&self.value),
                _ => false,
            },
            Operator::Gt => compare(actual, &self.value).is_some_and(|o| o.is_gt()),
            Operator::Gte => compare(actual, &self.value).is_some_and(|o| o.is_ge()),
            Operator::Lt => compare(actual, &self.value).is_some_and(|o| o.is_lt()),
            Operator::Lte => compare(actual, &self.value).is_some_and(|o| o.is_le()),
        }
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let lhs = actual?.as_f64()?;
    let rhs = expected.as_f64()?;
    lhs.partial_cmp(&rhs)
}

/// Resolve a dotted path (`a.b.0.c`) inside a JSON value.
///
/// Numeric segments index into arrays. An empty path returns the value itself.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Evaluates `{field, operator, value}` predicates against the run context.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionExecutor;

#[async_trait]
impl StepExecutor for ConditionExecutor {
    async fn execute(&self, config: &Value, ctx: &RunContext) -> Result<StepResult, ExecutorError> {
        let condition = Condition::from_config(config)?;
        let taken = condition.evaluate(ctx.lookup(&condition.field));
        debug!(
            run_id = %ctx.run_id,
            field = %condition.field,
            operator = ?condition.operator,
            taken,
            "condition evaluated"
        );
        Ok(StepResult::branch(taken))
    }
}

//! Condition model and evaluation for conditional steps

use crate::core::{
    error::{ConditionError, ResolveError},
    property::{lookup, PropertyReference, ResolutionScope},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison applied between the extracted metric and the literal threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    LessThanOrEqualTo,
    LessThan,
    GreaterThanOrEqualTo,
    GreaterThan,
    Equals,
    NotEquals,
    In,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConditionOperator::LessThanOrEqualTo => "<=",
            ConditionOperator::LessThan => "<",
            ConditionOperator::GreaterThanOrEqualTo => ">=",
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::Equals => "==",
            ConditionOperator::NotEquals => "!=",
            ConditionOperator::In => "in",
        };
        write!(f, "{}", symbol)
    }
}

/// Branch chosen by a conditional step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    If,
    Else,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::If => write!(f, "if"),
            Branch::Else => write!(f, "else"),
        }
    }
}

/// `left operator right`, where `left` points into a report published by an
/// upstream step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub left: PropertyReference,
    pub operator: ConditionOperator,
    pub right: Value,
}

#[derive(Debug, PartialEq, PartialOrd)]
enum Operand<'a> {
    Number(f64),
    Text(&'a str),
    Flag(bool),
}

impl Condition {
    pub fn new(left: PropertyReference, operator: ConditionOperator, right: impl Into<Value>) -> Self {
        Self {
            left,
            operator,
            right: right.into(),
        }
    }

    pub fn less_than_or_equal_to(left: PropertyReference, right: impl Into<Value>) -> Self {
        Self::new(left, ConditionOperator::LessThanOrEqualTo, right)
    }

    pub fn greater_than_or_equal_to(left: PropertyReference, right: impl Into<Value>) -> Self {
        Self::new(left, ConditionOperator::GreaterThanOrEqualTo, right)
    }

    pub fn json_path(&self) -> &str {
        self.left.json_path.as_deref().unwrap_or("")
    }

    /// Evaluate against the report document of the `left` reference's step
    pub fn evaluate(&self, report: &Value) -> Result<bool, ConditionError> {
        let path = self.json_path();
        let left = lookup(report, path).ok_or_else(|| ConditionError::MetricExtraction {
            step: self.left.step.clone(),
            path: path.to_string(),
        })?;

        match self.operator {
            ConditionOperator::In => {
                let candidates = self
                    .right
                    .as_array()
                    .ok_or_else(|| self.type_mismatch(left, &self.right))?;
                let mut comparable = false;
                for candidate in candidates {
                    if let Some((l, r)) = coerce(left, candidate) {
                        comparable = true;
                        if l.partial_cmp(&r) == Some(Ordering::Equal) {
                            return Ok(true);
                        }
                    }
                }
                if comparable || candidates.is_empty() {
                    Ok(false)
                } else {
                    Err(self.type_mismatch(left, &self.right))
                }
            }
            operator => {
                let (l, r) =
                    coerce(left, &self.right).ok_or_else(|| self.type_mismatch(left, &self.right))?;
                let ordered = !matches!(
                    operator,
                    ConditionOperator::Equals | ConditionOperator::NotEquals
                );
                if ordered && matches!(l, Operand::Flag(_)) {
                    return Err(self.type_mismatch(left, &self.right));
                }

                let ordering = l.partial_cmp(&r);
                Ok(match operator {
                    ConditionOperator::LessThanOrEqualTo => {
                        matches!(ordering, Some(Ordering::Less | Ordering::Equal))
                    }
                    ConditionOperator::LessThan => ordering == Some(Ordering::Less),
                    ConditionOperator::GreaterThanOrEqualTo => {
                        matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
                    }
                    ConditionOperator::GreaterThan => ordering == Some(Ordering::Greater),
                    ConditionOperator::Equals => ordering == Some(Ordering::Equal),
                    ConditionOperator::NotEquals => ordering != Some(Ordering::Equal),
                    ConditionOperator::In => unreachable!("handled above"),
                })
            }
        }
    }

    /// Evaluate using the report published in the execution's scope
    pub fn evaluate_in(&self, scope: &ResolutionScope) -> Result<bool, ConditionError> {
        let report = scope
            .report(&self.left.step, &self.left.output)
            .map_err(|e| match e {
                ResolveError::MissingReport { step, .. } => ConditionError::MetricExtraction {
                    step,
                    path: self.json_path().to_string(),
                },
                other => ConditionError::Resolve(other),
            })?;
        self.evaluate(report)
    }

    fn type_mismatch(&self, left: &Value, right: &Value) -> ConditionError {
        ConditionError::TypeMismatch {
            left: type_name(left).to_string(),
            operator: self.operator,
            right: type_name(right).to_string(),
        }
    }
}

/// Select a branch: `If` when every condition holds
pub fn select_branch(
    conditions: &[Condition],
    scope: &ResolutionScope,
) -> Result<Branch, ConditionError> {
    for condition in conditions {
        if !condition.evaluate_in(scope)? {
            return Ok(Branch::Else);
        }
    }
    Ok(Branch::If)
}

/// Coerce the metric to the type of the threshold
fn coerce<'a>(left: &'a Value, right: &'a Value) -> Option<(Operand<'a>, Operand<'a>)> {
    match right {
        Value::Number(r) => {
            let l = match left {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            Some((Operand::Number(l), Operand::Number(r.as_f64()?)))
        }
        Value::String(r) => left.as_str().map(|l| (Operand::Text(l), Operand::Text(r))),
        Value::Bool(r) => left.as_bool().map(|l| (Operand::Flag(l), Operand::Flag(*r))),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

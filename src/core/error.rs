//! Errors raised while building pipelines and resolving deferred values

use crate::core::{condition::ConditionOperator, parameter::ParameterKind, property::PropertyReference};
use thiserror::Error;

/// Definition errors. Always detected locally, before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("Duplicate parameter name: {0}")]
    DuplicateParameter(String),

    #[error("Parameter '{name}' default value is not of kind {kind}")]
    ParameterKindMismatch { name: String, kind: ParameterKind },

    #[error("Step '{step}' references '{reference}' which does not exist")]
    DanglingReference { step: String, reference: String },

    #[error("Step '{step}' uses undeclared parameter '{parameter}'")]
    UnknownParameter { step: String, parameter: String },

    #[error("Condition step '{step}' lists unknown branch step '{target}'")]
    UnknownBranchStep { step: String, target: String },

    #[error("Cycle detected in dependency graph involving steps: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

/// Errors resolving parameters and property references at run time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unresolved reference {0}: source step has not succeeded")]
    UnresolvedReference(PropertyReference),

    #[error("Step '{step}' did not produce output '{output}'")]
    MissingOutput { step: String, output: String },

    #[error("Output '{output}' of step '{step}' has no report document")]
    MissingReport { step: String, output: String },

    #[error("Path '{path}' not found in output '{output}' of step '{step}'")]
    PathNotFound {
        step: String,
        output: String,
        path: String,
    },

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Parameter '{name}' expects a value of kind {expected}")]
    ParameterTypeMismatch { name: String, expected: ParameterKind },
}

/// Errors evaluating a condition against a step report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("Metric extraction failed: '{path}' not found in report of step '{step}'")]
    MetricExtraction { step: String, path: String },

    #[error("Type mismatch: cannot compare {left} {operator} {right}")]
    TypeMismatch {
        left: String,
        operator: ConditionOperator,
        right: String,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

//! Pipeline parameters - named, typed values overridable at execution start

use crate::core::error::{BuildError, ResolveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Type of a pipeline parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Integer,
    String,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Integer => write!(f, "Integer"),
            ParameterKind::String => write!(f, "String"),
        }
    }
}

/// Concrete value of a parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    String(String),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParameterValue::Integer(_) => ParameterKind::Integer,
            ParameterValue::String(_) => ParameterKind::String,
        }
    }

    /// Parse a raw command-line value into the given kind
    pub fn parse(kind: ParameterKind, raw: &str) -> Option<Self> {
        match kind {
            ParameterKind::Integer => raw.trim().parse().ok().map(ParameterValue::Integer),
            ParameterKind::String => Some(ParameterValue::String(raw.to_string())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParameterValue::Integer(n) => Value::from(*n),
            ParameterValue::String(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Integer(n) => write!(f, "{}", n),
            ParameterValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

/// A named pipeline parameter with its default value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default_value: ParameterValue,
}

impl Parameter {
    pub fn integer(name: impl Into<String>, default_value: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Integer,
            default_value: ParameterValue::Integer(default_value),
        }
    }

    pub fn string(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::String,
            default_value: ParameterValue::String(default_value.into()),
        }
    }

    /// Check that the default value matches the declared kind
    pub fn check(&self) -> Result<(), BuildError> {
        if self.default_value.kind() != self.kind {
            return Err(BuildError::ParameterKindMismatch {
                name: self.name.clone(),
                kind: self.kind,
            });
        }
        Ok(())
    }
}

/// Merge overrides onto parameter defaults.
///
/// Every override must name a declared parameter and carry a value of the
/// declared kind.
pub fn resolve_parameters(
    parameters: &[Parameter],
    overrides: &HashMap<String, ParameterValue>,
) -> Result<BTreeMap<String, ParameterValue>, ResolveError> {
    let mut resolved: BTreeMap<String, ParameterValue> = parameters
        .iter()
        .map(|p| (p.name.clone(), p.default_value.clone()))
        .collect();

    for (name, value) in overrides {
        let parameter = parameters
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| ResolveError::UnknownParameter(name.clone()))?;

        if value.kind() != parameter.kind {
            return Err(ResolveError::ParameterTypeMismatch {
                name: name.clone(),
                expected: parameter.kind,
            });
        }
        resolved.insert(name.clone(), value.clone());
    }

    Ok(resolved)
}

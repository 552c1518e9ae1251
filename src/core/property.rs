//! Deferred values and property references
//!
//! A step's configuration mixes literals, parameters and references to the
//! outputs of other steps. References stay unresolved until the producing step
//! succeeds; the [`ResolutionScope`] is the lookup table filled in as steps
//! finish during one execution.

use crate::core::{error::ResolveError, parameter::ParameterValue, Parameter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

/// Handle to an output of a step that may not have run yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyReference {
    /// Name of the producing step
    pub step: String,

    /// Output channel of the producing step
    pub output: String,

    /// Path into the report document published on the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
}

impl PropertyReference {
    pub fn new(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            output: output.into(),
            json_path: None,
        }
    }

    pub fn with_json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }
}

impl fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.output)?;
        if let Some(path) = &self.json_path {
            write!(f, "[{}]", path)?;
        }
        Ok(())
    }
}

/// A value in step configuration that may only be known at run time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredValue {
    Literal(Value),
    Parameter(String),
    Property(PropertyReference),
    Join { on: String, values: Vec<DeferredValue> },
}

impl DeferredValue {
    pub fn join(on: impl Into<String>, values: Vec<DeferredValue>) -> Self {
        DeferredValue::Join {
            on: on.into(),
            values,
        }
    }

    /// All property references contained in this value
    pub fn references(&self) -> Vec<&PropertyReference> {
        match self {
            DeferredValue::Property(reference) => vec![reference],
            DeferredValue::Join { values, .. } => {
                values.iter().flat_map(|v| v.references()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// All parameter names used by this value
    pub fn parameters(&self) -> Vec<&str> {
        match self {
            DeferredValue::Parameter(name) => vec![name.as_str()],
            DeferredValue::Join { values, .. } => {
                values.iter().flat_map(|v| v.parameters()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<&str> for DeferredValue {
    fn from(value: &str) -> Self {
        DeferredValue::Literal(Value::from(value))
    }
}

impl From<String> for DeferredValue {
    fn from(value: String) -> Self {
        DeferredValue::Literal(Value::from(value))
    }
}

impl From<i64> for DeferredValue {
    fn from(value: i64) -> Self {
        DeferredValue::Literal(Value::from(value))
    }
}

impl From<f64> for DeferredValue {
    fn from(value: f64) -> Self {
        DeferredValue::Literal(Value::from(value))
    }
}

impl From<Value> for DeferredValue {
    fn from(value: Value) -> Self {
        DeferredValue::Literal(value)
    }
}

impl From<&Parameter> for DeferredValue {
    fn from(parameter: &Parameter) -> Self {
        DeferredValue::Parameter(parameter.name.clone())
    }
}

impl From<PropertyReference> for DeferredValue {
    fn from(reference: PropertyReference) -> Self {
        DeferredValue::Property(reference)
    }
}

/// Value published on a step output channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    /// Location of the produced artifact
    pub uri: String,

    /// Structured report published alongside the artifact (e.g. evaluation metrics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

impl OutputValue {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }
}

/// Lookup table for one execution: resolved parameters plus the outputs of
/// steps that have succeeded so far
#[derive(Debug, Clone, Default)]
pub struct ResolutionScope {
    parameters: BTreeMap<String, ParameterValue>,
    outputs: HashMap<String, BTreeMap<String, OutputValue>>,
}

impl ResolutionScope {
    pub fn new(parameters: BTreeMap<String, ParameterValue>) -> Self {
        Self {
            parameters,
            outputs: HashMap::new(),
        }
    }

    /// Publish the outputs of a step that reached Succeeded
    pub fn record_outputs(&mut self, step: &str, outputs: BTreeMap<String, OutputValue>) {
        self.outputs.insert(step.to_string(), outputs);
    }

    pub fn has_succeeded(&self, step: &str) -> bool {
        self.outputs.contains_key(step)
    }

    pub fn parameter(&self, name: &str) -> Result<&ParameterValue, ResolveError> {
        self.parameters
            .get(name)
            .ok_or_else(|| ResolveError::UnknownParameter(name.to_string()))
    }

    /// Resolve a deferred value to a concrete JSON value
    pub fn resolve(&self, value: &DeferredValue) -> Result<Value, ResolveError> {
        match value {
            DeferredValue::Literal(literal) => Ok(literal.clone()),
            DeferredValue::Parameter(name) => Ok(self.parameter(name)?.to_json()),
            DeferredValue::Property(reference) => self.resolve_reference(reference),
            DeferredValue::Join { on, values } => {
                let parts = values
                    .iter()
                    .map(|v| self.resolve(v).map(|resolved| render(&resolved)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(on)))
            }
        }
    }

    /// Resolve a deferred value and render it as a string
    pub fn resolve_string(&self, value: &DeferredValue) -> Result<String, ResolveError> {
        self.resolve(value).map(|v| render(&v))
    }

    /// Resolve a property reference.
    ///
    /// Without a json path this is the channel URI, otherwise the value found
    /// at the path inside the channel's report document.
    pub fn resolve_reference(&self, reference: &PropertyReference) -> Result<Value, ResolveError> {
        let output = self.output(reference)?;
        match &reference.json_path {
            None => Ok(Value::String(output.uri.clone())),
            Some(path) => {
                let document = self.report(&reference.step, &reference.output)?;
                lookup(document, path)
                    .cloned()
                    .ok_or_else(|| ResolveError::PathNotFound {
                        step: reference.step.clone(),
                        output: reference.output.clone(),
                        path: path.clone(),
                    })
            }
        }
    }

    /// Report document published on a step output
    pub fn report(&self, step: &str, output: &str) -> Result<&Value, ResolveError> {
        let reference = PropertyReference::new(step, output);
        self.output(&reference)?
            .document
            .as_ref()
            .ok_or_else(|| ResolveError::MissingReport {
                step: step.to_string(),
                output: output.to_string(),
            })
    }

    fn output(&self, reference: &PropertyReference) -> Result<&OutputValue, ResolveError> {
        let outputs = self
            .outputs
            .get(&reference.step)
            .ok_or_else(|| ResolveError::UnresolvedReference(reference.clone()))?;
        outputs
            .get(&reference.output)
            .ok_or_else(|| ResolveError::MissingOutput {
                step: reference.step.clone(),
                output: reference.output.clone(),
            })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^\[\]]+)?((?:\[\d+\])*)$").expect("json path segment pattern is valid")
    })
}

/// Find the value at a dotted path such as `regression_metrics.mse.value` or
/// `metrics[0].value`
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(document);
    }

    let mut current = document;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        let captures = segment_pattern().captures(segment)?;
        if let Some(key) = captures.get(1) {
            current = current.get(key.as_str())?;
        }
        let indexes = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        for index in indexes
            .split(|c| c == '[' || c == ']')
            .filter(|s| !s.is_empty())
        {
            current = current.get(index.parse::<usize>().ok()?)?;
        }
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_with_eval() -> ResolutionScope {
        let mut parameters = BTreeMap::new();
        parameters.insert("trainInstanceType".to_string(), ParameterValue::from("ml.m5.xlarge"));
        let mut scope = ResolutionScope::new(parameters);

        let mut outputs = BTreeMap::new();
        outputs.insert(
            "eval_report".to_string(),
            OutputValue::new("local://runs/1/evaluateModel/eval_report")
                .with_document(json!({"regression_metrics": {"mse": {"value": 6.5}}})),
        );
        scope.record_outputs("evaluateModel", outputs);
        scope
    }

    #[test]
    fn test_lookup_dotted_path() {
        let doc = json!({"regression_metrics": {"mse": {"value": 6.5}}});
        assert_eq!(lookup(&doc, "regression_metrics.mse.value"), Some(&json!(6.5)));
        assert_eq!(lookup(&doc, "regression_metrics.rmse.value"), None);
        assert_eq!(lookup(&doc, "regression_metrics..value"), None);
    }

    #[test]
    fn test_lookup_indexed_path() {
        let doc = json!({"metrics": [{"value": 1}, {"value": [7, 8]}]});
        assert_eq!(lookup(&doc, "metrics[1].value[0]"), Some(&json!(7)));
        assert_eq!(lookup(&doc, "metrics[5].value"), None);
    }

    #[test]
    fn test_unresolved_before_source_succeeds() {
        let scope = ResolutionScope::default();
        let reference = PropertyReference::new("trainModel", "model_artifacts");
        assert_eq!(
            scope.resolve_reference(&reference),
            Err(ResolveError::UnresolvedReference(reference.clone()))
        );
    }

    #[test]
    fn test_resolve_uri_and_json_path() {
        let scope = scope_with_eval();
        let uri = scope
            .resolve(&PropertyReference::new("evaluateModel", "eval_report").into())
            .unwrap();
        assert_eq!(uri, json!("local://runs/1/evaluateModel/eval_report"));

        let metric = scope
            .resolve(
                &PropertyReference::new("evaluateModel", "eval_report")
                    .with_json_path("regression_metrics.mse.value")
                    .into(),
            )
            .unwrap();
        assert_eq!(metric, json!(6.5));
    }

    #[test]
    fn test_missing_output_channel() {
        let scope = scope_with_eval();
        let err = scope
            .resolve(&PropertyReference::new("evaluateModel", "other").into())
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingOutput { .. }));
    }

    #[test]
    fn test_join_renders_parts() {
        let scope = scope_with_eval();
        let joined = DeferredValue::join(
            "/",
            vec![
                PropertyReference::new("evaluateModel", "eval_report").into(),
                "evaluation.json".into(),
            ],
        );
        assert_eq!(
            scope.resolve_string(&joined).unwrap(),
            "local://runs/1/evaluateModel/eval_report/evaluation.json"
        );
    }

    #[test]
    fn test_parameter_resolution() {
        let scope = scope_with_eval();
        assert_eq!(
            scope.resolve(&DeferredValue::Parameter("trainInstanceType".to_string())).unwrap(),
            json!("ml.m5.xlarge")
        );
        assert_eq!(
            scope.resolve(&DeferredValue::Parameter("nope".to_string())),
            Err(ResolveError::UnknownParameter("nope".to_string()))
        );
    }

    #[test]
    fn test_references_are_collected_through_joins() {
        let value = DeferredValue::join(
            "/",
            vec![
                PropertyReference::new("a", "out").into(),
                DeferredValue::Parameter("p".to_string()),
                PropertyReference::new("b", "out").into(),
            ],
        );
        let steps: Vec<_> = value.references().iter().map(|r| r.step.as_str()).collect();
        assert_eq!(steps, vec!["a", "b"]);
        assert_eq!(value.parameters(), vec!["p"]);
    }

    #[test]
    fn test_reference_equality() {
        let a = PropertyReference::new("s", "o").with_json_path("x.y");
        let b = PropertyReference::new("s", "o").with_json_path("x.y");
        assert_eq!(a, b);
        assert_ne!(a, PropertyReference::new("s", "o"));
    }
}

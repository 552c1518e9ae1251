//! Step domain model

use crate::core::{
    condition::{select_branch, Branch, Condition},
    error::ConditionError,
    property::{DeferredValue, PropertyReference, ResolutionScope},
};
use crate::registry::ApprovalStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Output channel of a training step
pub const MODEL_ARTIFACTS: &str = "model_artifacts";

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step name
    pub name: String,

    /// Human-readable step name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Optional step description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// What the step does
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Closed set of step variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Processing(ProcessingStep),
    Training(TrainingStep),
    Register(RegisterStep),
    Fail(FailStep),
    Condition(ConditionStep),
}

/// Discriminant of [`StepKind`], used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    Processing,
    Training,
    Register,
    Fail,
    Condition,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepType::Processing => "Processing",
            StepType::Training => "Training",
            StepType::Register => "RegisterModel",
            StepType::Fail => "Fail",
            StepType::Condition => "Condition",
        };
        write!(f, "{}", name)
    }
}

/// Instance shape a compute job runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeSpec {
    pub instance_type: DeferredValue,
    pub instance_count: DeferredValue,
}

impl Default for ComputeSpec {
    fn default() -> Self {
        Self {
            instance_type: DeferredValue::from("ml.m5.large"),
            instance_count: DeferredValue::from(1),
        }
    }
}

/// Script-driven processing job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    /// Script executed by the job
    pub code: String,

    /// Interpreter command the script is handed to
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Container image, when not the framework default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub compute: ComputeSpec,

    #[serde(default)]
    pub job_arguments: Vec<DeferredValue>,

    #[serde(default)]
    pub inputs: Vec<ProcessingInput>,

    #[serde(default)]
    pub outputs: Vec<ProcessingOutput>,
}

fn default_command() -> Vec<String> {
    vec!["python3".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInput {
    /// Input channel name
    pub name: String,
    pub source: DeferredValue,
    /// Where the job sees the data
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutput {
    /// Output channel name, addressable by property references
    pub name: String,
    /// Path inside the job the channel is collected from
    pub source: String,
    /// Upload location; assigned by the engine when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<DeferredValue>,
}

/// Training job producing a single model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStep {
    pub image: String,

    #[serde(default)]
    pub compute: ComputeSpec,

    pub output_path: DeferredValue,

    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Value>,

    #[serde(default)]
    pub inputs: BTreeMap<String, TrainingInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInput {
    pub data: DeferredValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Model registry write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterStep {
    pub model_package_group: String,

    /// Name of the model the package wraps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    pub model_data: DeferredValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metrics: Option<MetricsSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub content_types: Vec<String>,

    #[serde(default)]
    pub response_types: Vec<String>,

    #[serde(default)]
    pub inference_instances: Vec<DeferredValue>,

    #[serde(default)]
    pub transform_instances: Vec<DeferredValue>,

    #[serde(default)]
    pub approval_status: ApprovalStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSource {
    pub uri: DeferredValue,
    pub content_type: String,
}

/// Ends the execution as failed when reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailStep {
    pub error_message: String,
}

/// Chooses which branch of steps runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStep {
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub if_steps: Vec<String>,

    #[serde(default)]
    pub else_steps: Vec<String>,
}

impl ConditionStep {
    pub fn select_branch(&self, scope: &ResolutionScope) -> Result<Branch, ConditionError> {
        select_branch(&self.conditions, scope)
    }

    pub fn branch_steps(&self, branch: Branch) -> &[String] {
        match branch {
            Branch::If => &self.if_steps,
            Branch::Else => &self.else_steps,
        }
    }
}

macro_rules! impl_into_kind {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for StepKind {
            fn from(step: $ty) -> Self {
                StepKind::$variant(step)
            }
        })*
    };
}

impl_into_kind! {
    ProcessingStep => Processing,
    TrainingStep => Training,
    RegisterStep => Register,
    FailStep => Fail,
    ConditionStep => Condition,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: impl Into<StepKind>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            kind: kind.into(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step_type(&self) -> StepType {
        match &self.kind {
            StepKind::Processing(_) => StepType::Processing,
            StepKind::Training(_) => StepType::Training,
            StepKind::Register(_) => StepType::Register,
            StepKind::Fail(_) => StepType::Fail,
            StepKind::Condition(_) => StepType::Condition,
        }
    }

    /// Reference to one of this step's outputs
    pub fn output(&self, name: &str) -> PropertyReference {
        PropertyReference::new(&self.name, name)
    }

    /// Names of the output channels later steps may reference
    pub fn outputs(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::Processing(p) => p.outputs.iter().map(|o| o.name.as_str()).collect(),
            StepKind::Training(_) => vec![MODEL_ARTIFACTS],
            StepKind::Register(_) | StepKind::Fail(_) | StepKind::Condition(_) => Vec::new(),
        }
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs().contains(&name)
    }

    /// Every deferred value in the step configuration
    pub fn deferred_values(&self) -> Vec<&DeferredValue> {
        let mut values = Vec::new();
        match &self.kind {
            StepKind::Processing(p) => {
                values.push(&p.compute.instance_type);
                values.push(&p.compute.instance_count);
                values.extend(p.job_arguments.iter());
                values.extend(p.inputs.iter().map(|i| &i.source));
                values.extend(p.outputs.iter().filter_map(|o| o.destination.as_ref()));
            }
            StepKind::Training(t) => {
                values.push(&t.compute.instance_type);
                values.push(&t.compute.instance_count);
                values.push(&t.output_path);
                values.extend(t.inputs.values().map(|i| &i.data));
            }
            StepKind::Register(r) => {
                values.push(&r.model_data);
                values.extend(r.model_metrics.iter().map(|m| &m.uri));
                values.extend(r.inference_instances.iter());
                values.extend(r.transform_instances.iter());
            }
            StepKind::Fail(_) | StepKind::Condition(_) => {}
        }
        values
    }

    /// Property references this step consumes
    pub fn references(&self) -> Vec<&PropertyReference> {
        let mut references: Vec<&PropertyReference> = self
            .deferred_values()
            .into_iter()
            .flat_map(|v| v.references())
            .collect();
        if let StepKind::Condition(condition) = &self.kind {
            references.extend(condition.conditions.iter().map(|c| &c.left));
        }
        references
    }

    /// Parameter names this step uses
    pub fn parameters(&self) -> BTreeSet<&str> {
        self.deferred_values()
            .into_iter()
            .flat_map(|v| v.parameters())
            .collect()
    }

    /// Steps whose outputs this step consumes
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.references().into_iter().map(|r| r.step.as_str()).collect()
    }

    /// Steps gated by this step when it is a condition
    pub fn branch_targets(&self) -> Vec<(&str, Branch)> {
        match &self.kind {
            StepKind::Condition(c) => c
                .if_steps
                .iter()
                .map(|s| (s.as_str(), Branch::If))
                .chain(c.else_steps.iter().map(|s| (s.as_str(), Branch::Else)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

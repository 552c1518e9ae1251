//! Pipeline configuration from YAML

use crate::core::{error::BuildError, Parameter, Pipeline, Step};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline document loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Description sent with the definition on upsert
    #[serde(default)]
    pub description: Option<String>,

    /// Runtime-overridable parameters
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Pipeline steps, in any order
    pub steps: Vec<Step>,

    /// Polling settings used when waiting on executions
    #[serde(default)]
    pub driver: DriverConfig,
}

/// How the driver waits on an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Seconds between status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Client-side budget for one wait, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    7200 // 2 hours
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        self.to_pipeline()?;
        Ok(())
    }

    /// Convert config to a validated Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, BuildError> {
        Pipeline::new(self.name.clone(), self.parameters.clone(), self.steps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterValue, StepType};

    const SHOWCASE: &str = r#"
name: "abalonePipeline"
parameters:
  - name: "trainInstanceType"
    kind: String
    default_value: "ml.m5.xlarge"
  - name: "trainInstanceCount"
    kind: Integer
    default_value: 1
steps:
  - name: "reviewModelMetrics"
    display_name: "Review model metrics"
    condition:
      conditions:
        - left: { step: "evaluateModel", output: "eval_report", json_path: "regression_metrics.mse.value" }
          operator: less_than_or_equal_to
          right: 7.0
      if_steps: ["registerModel"]
      else_steps: ["failModelBadMetric"]
  - name: "registerModel"
    register:
      model_package_group: "abaloneGroup"
      model_data: { property: { step: "trainModel", output: "model_artifacts" } }
      approval_status: Approved
  - name: "failModelBadMetric"
    fail:
      error_message: "Model metrics below requirements."
  - name: "evaluateModel"
    processing:
      code: "evaluate.py"
      inputs:
        - name: "model"
          source: { property: { step: "trainModel", output: "model_artifacts" } }
          destination: "/opt/ml/processing/model"
      outputs:
        - name: "eval_report"
          source: "/opt/ml/processing/evaluation"
  - name: "trainModel"
    training:
      image: "xgboost:1.0-1"
      compute:
        instance_type: { parameter: "trainInstanceType" }
        instance_count: { parameter: "trainInstanceCount" }
      output_path: { literal: "local://models" }
      hyperparameters:
        num_round: 20
      inputs:
        train:
          data: { property: { step: "dataPreparation", output: "train" } }
          content_type: "text/csv"
  - name: "dataPreparation"
    processing:
      code: "preprocess.py"
      job_arguments:
        - { literal: "--input-data" }
        - { literal: "data/abalone.csv" }
      outputs:
        - name: "train"
          source: "/opt/ml/processing/train"
"#;

    #[test]
    fn test_parse_pipeline_in_any_order() {
        let config = PipelineConfig::from_yaml(SHOWCASE).unwrap();
        let pipeline = config.to_pipeline().unwrap();

        assert_eq!(pipeline.steps().len(), 6);
        assert_eq!(
            pipeline.step("reviewModelMetrics").unwrap().step_type(),
            StepType::Condition
        );
        assert_eq!(
            pipeline.parameter("trainInstanceCount").unwrap().default_value,
            ParameterValue::Integer(1)
        );

        let order = pipeline.topological_order().unwrap();
        let position = |name: &str| order.iter().position(|s| s == name).unwrap();
        assert!(position("dataPreparation") < position("trainModel"));
        assert!(position("trainModel") < position("evaluateModel"));
        assert!(position("evaluateModel") < position("reviewModelMetrics"));
        assert!(position("reviewModelMetrics") < position("registerModel"));
        assert!(position("reviewModelMetrics") < position("failModelBadMetric"));
    }

    #[test]
    fn test_driver_defaults() {
        let config = PipelineConfig::from_yaml(SHOWCASE).unwrap();
        assert_eq!(config.driver, DriverConfig::default());
        assert_eq!(config.driver.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.driver.timeout(), Duration::from_secs(7200));
    }

    #[test]
    fn test_duplicate_step_name_fails() {
        let yaml = r#"
name: "Test Pipeline"
steps:
  - name: "step1"
    fail: { error_message: "a" }
  - name: "step1"
    fail: { error_message: "b" }
"#;

        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_dangling_reference_fails() {
        let yaml = r#"
name: "Test Pipeline"
steps:
  - name: "register"
    register:
      model_package_group: "g"
      model_data: { property: { step: "nonexistent", output: "model_artifacts" } }
"#;

        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_cycle_fails() {
        let yaml = r#"
name: "Test Pipeline"
steps:
  - name: "a"
    processing:
      code: "a.py"
      inputs:
        - { name: "in", source: { property: { step: "b", output: "out" } }, destination: "/in" }
      outputs:
        - { name: "out", source: "/out" }
  - name: "b"
    processing:
      code: "b.py"
      inputs:
        - { name: "in", source: { property: { step: "a", output: "out" } }, destination: "/in" }
      outputs:
        - { name: "out", source: "/out" }
"#;

        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Cycle detected"));
    }
}

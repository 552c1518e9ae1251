//! Showcase pipeline: prepare data, train a regressor, evaluate it, and
//! register the model only when its mean squared error is low enough

use crate::core::{
    BuildError, ComputeSpec, Condition, ConditionStep, DeferredValue, FailStep, MetricsSource,
    Parameter, Pipeline, ProcessingInput, ProcessingOutput, ProcessingStep, PropertyReference,
    RegisterStep, Step, TrainingInput, TrainingStep, MODEL_ARTIFACTS,
};
use crate::pipelines::FactoryError;
use crate::registry::ApprovalStatus;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Threshold on `regression_metrics.mse.value` for registering a model
pub const MSE_THRESHOLD: f64 = 7.0;

/// Session settings of hosted deployments; meaningless to the local service
const IGNORED_KWARGS: &[&str] = &["region", "role"];

/// Factory options, overridable through keyword arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowcaseOptions {
    pub pipeline_name: String,
    pub model_name: String,
    pub model_package_group_name: String,
    pub base_job_prefix: String,
    pub default_bucket: String,
    pub repo_data_branch: String,
    pub repo_data_path: String,
    pub image: String,
}

impl Default for ShowcaseOptions {
    fn default() -> Self {
        Self {
            pipeline_name: "showcasePipeline".to_string(),
            model_name: "showcaseModel".to_string(),
            model_package_group_name: "showcasePackageGroup".to_string(),
            base_job_prefix: "showcase".to_string(),
            default_bucket: "local://artifacts".to_string(),
            repo_data_branch: "main".to_string(),
            repo_data_path: "data/abalone-dataset.csv".to_string(),
            image: "xgboost:1.0-1".to_string(),
        }
    }
}

impl ShowcaseOptions {
    pub fn from_kwargs(kwargs: &BTreeMap<String, String>) -> Result<Self, FactoryError> {
        let mut options = Self::default();
        for (key, value) in kwargs {
            let field = match key.as_str() {
                "pipeline_name" => &mut options.pipeline_name,
                "model_name" => &mut options.model_name,
                "model_package_group_name" => &mut options.model_package_group_name,
                "base_job_prefix" => &mut options.base_job_prefix,
                "default_bucket" => &mut options.default_bucket,
                "repo_data_branch" => &mut options.repo_data_branch,
                "repo_data_path" => &mut options.repo_data_path,
                "image" => &mut options.image,
                ignored if IGNORED_KWARGS.contains(&ignored) => {
                    warn!("Ignoring showcase argument '{}' for local execution", ignored);
                    continue;
                }
                _ => {
                    return Err(FactoryError::UnknownArgument {
                        module: "showcase".to_string(),
                        argument: key.clone(),
                    })
                }
            };
            *field = value.clone();
        }
        Ok(options)
    }
}

/// Factory entry point
pub fn get_pipeline(kwargs: &BTreeMap<String, String>) -> Result<Pipeline, FactoryError> {
    let options = ShowcaseOptions::from_kwargs(kwargs)?;
    Ok(showcase_pipeline(&options)?)
}

fn parameter(name: &str) -> DeferredValue {
    DeferredValue::Parameter(name.to_string())
}

fn output(name: &str, source: &str) -> ProcessingOutput {
    ProcessingOutput {
        name: name.to_string(),
        source: source.to_string(),
        destination: None,
    }
}

pub fn showcase_pipeline(options: &ShowcaseOptions) -> Result<Pipeline, BuildError> {
    let mut builder = Pipeline::builder(&options.pipeline_name);
    for p in [
        Parameter::integer("evalInstanceCount", 1),
        Parameter::string("evalInstanceType", "ml.m5.large"),
        Parameter::string("dataPrepInputData", &options.repo_data_path),
        Parameter::string("dataPrepInputRepoBranch", &options.repo_data_branch),
        Parameter::integer("dataPrepInstanceCount", 1),
        Parameter::string("dataPrepInstanceType", "ml.m5.xlarge"),
        Parameter::string("registerInferenceInstanceType", "ml.m5.large"),
        Parameter::string("registerTransformInstanceType", "ml.m5.large"),
        Parameter::integer("trainInstanceCount", 1),
        Parameter::string("trainInstanceType", "ml.m5.xlarge"),
        Parameter::string(
            "trainOutputPath",
            format!("{}/{}/Model", options.default_bucket, options.base_job_prefix),
        ),
    ] {
        builder.add_parameter(p)?;
    }

    let prepare = Step::new(
        "dataPreparation",
        ProcessingStep {
            code: "preprocess.py".to_string(),
            command: vec!["python3".to_string()],
            image: None,
            compute: ComputeSpec {
                instance_type: parameter("dataPrepInstanceType"),
                instance_count: parameter("dataPrepInstanceCount"),
            },
            job_arguments: vec![
                "--input-data".into(),
                parameter("dataPrepInputData"),
                "--repo-branch".into(),
                parameter("dataPrepInputRepoBranch"),
            ],
            inputs: Vec::new(),
            outputs: vec![
                output("train", "/opt/ml/processing/train"),
                output("validation", "/opt/ml/processing/validation"),
                output("test", "/opt/ml/processing/test"),
            ],
        },
    )
    .with_display_name("Data preparation")
    .with_description("Split data to train, test and validation datasets.");

    let hyperparameters: BTreeMap<String, Value> = [
        ("objective", json!("reg:linear")),
        ("num_round", json!(20)),
        ("max_depth", json!(3)),
        ("eta", json!(0.3)),
        ("gamma", json!(3)),
        ("min_child_weight", json!(5)),
        ("subsample", json!(0.8)),
        ("silent", json!(0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let csv_channel = |channel: &str| TrainingInput {
        data: prepare.output(channel).into(),
        content_type: Some("text/csv".to_string()),
    };
    let train = Step::new(
        "trainModel",
        TrainingStep {
            image: options.image.clone(),
            compute: ComputeSpec {
                instance_type: parameter("trainInstanceType"),
                instance_count: parameter("trainInstanceCount"),
            },
            output_path: parameter("trainOutputPath"),
            hyperparameters,
            inputs: [
                ("train".to_string(), csv_channel("train")),
                ("validation".to_string(), csv_channel("validation")),
            ]
            .into_iter()
            .collect(),
        },
    )
    .with_display_name("Train new model")
    .with_description("Train model and store it on S3");

    let evaluate = Step::new(
        "evaluateModel",
        ProcessingStep {
            code: "evaluate.py".to_string(),
            command: vec!["python3".to_string()],
            image: Some(options.image.clone()),
            compute: ComputeSpec {
                instance_type: parameter("evalInstanceType"),
                instance_count: parameter("evalInstanceCount"),
            },
            job_arguments: Vec::new(),
            inputs: vec![
                ProcessingInput {
                    name: "model".to_string(),
                    source: train.output(MODEL_ARTIFACTS).into(),
                    destination: "/opt/ml/processing/model".to_string(),
                },
                ProcessingInput {
                    name: "test".to_string(),
                    source: prepare.output("test").into(),
                    destination: "/opt/ml/processing/test".to_string(),
                },
            ],
            outputs: vec![output("eval_report", "/opt/ml/processing/evaluation")],
        },
    )
    .with_display_name("Evaluate new model")
    .with_description("Evaluate performance of newly trained model");

    let register = Step::new(
        "registerModel",
        RegisterStep {
            model_package_group: options.model_package_group_name.clone(),
            model_name: Some(options.model_name.clone()),
            model_data: train.output(MODEL_ARTIFACTS).into(),
            model_metrics: Some(MetricsSource {
                uri: DeferredValue::join(
                    "/",
                    vec![evaluate.output("eval_report").into(), "evaluation.json".into()],
                ),
                content_type: "application/json".to_string(),
            }),
            image: Some(options.image.clone()),
            content_types: vec!["text/csv".to_string()],
            response_types: vec!["text/csv".to_string()],
            inference_instances: vec![parameter("registerInferenceInstanceType")],
            transform_instances: vec![parameter("registerTransformInstanceType")],
            approval_status: ApprovalStatus::Approved,
        },
    )
    .with_display_name("Register new model")
    .with_description("Register newly trained model in model registry");

    let fail = Step::new(
        "failModelBadMetric",
        FailStep {
            error_message: "Fail pipeline due to model metrics below requirements.".to_string(),
        },
    )
    .with_display_name("Bad model metrics");

    let review = Step::new(
        "reviewModelMetrics",
        ConditionStep {
            conditions: vec![Condition::less_than_or_equal_to(
                PropertyReference::new("evaluateModel", "eval_report")
                    .with_json_path("regression_metrics.mse.value"),
                MSE_THRESHOLD,
            )],
            if_steps: vec![register.name.clone()],
            else_steps: vec![fail.name.clone()],
        },
    )
    .with_display_name("Review model metrics")
    .with_description("Review newly trained model metrics and continue based on results");

    for step in [prepare, train, evaluate, register, fail, review] {
        builder.add_step(step)?;
    }
    builder.build()
}

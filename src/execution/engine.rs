//! Execution engine - runs one pipeline execution to a terminal state
//!
//! The engine walks the steps in dependency order, resolves each step's
//! deferred values against the outputs published so far, and records every
//! transition in the shared [`ExecutionRecord`] that pollers read.

use crate::{
    core::{
        Branch, ConditionError, DeferredValue, ExecutionStatus, OutputValue, ParameterValue,
        Pipeline, ResolutionScope, ResolveError, Step, StepKind, StepReport, MODEL_ARTIFACTS,
    },
    execution::{
        runner::{
            JobError, JobRequest, JobRunner, JobSpec, ProcessingJob, ResolvedInput,
            ResolvedOutput, TrainingChannel, TrainingJob,
        },
        service::ExecutionDescription,
        ExecutionScheduler, Readiness,
    },
    registry::{ModelRegistry, NewModelPackage},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Events that can occur during an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_arn: String,
        pipeline_name: String,
    },
    StepStarted {
        execution_arn: String,
        step_name: String,
    },
    StepSucceeded {
        execution_arn: String,
        step_name: String,
    },
    BranchSelected {
        execution_arn: String,
        step_name: String,
        branch: Branch,
    },
    StepFailed {
        execution_arn: String,
        step_name: String,
        reason: String,
    },
    ExecutionFinished {
        execution_arn: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Why a step ended Failed
#[derive(Debug, Error)]
pub enum StepError {
    /// A fail step was reached
    #[error("{0}")]
    Fail(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Model registration failed: {0}")]
    Registry(String),
}

/// Mutable state of one execution, shared between the engine and pollers
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_arn: String,
    pub pipeline_arn: String,
    pub pipeline_version: u32,
    pub status: ExecutionStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    /// Parameter snapshot taken at start
    pub parameters: BTreeMap<String, ParameterValue>,
    /// Step trace in execution order
    pub steps: Vec<StepReport>,
}

pub type SharedRecord = Arc<RwLock<ExecutionRecord>>;

impl ExecutionRecord {
    pub fn new(
        execution_arn: String,
        pipeline_arn: String,
        pipeline_version: u32,
        parameters: BTreeMap<String, ParameterValue>,
        steps: Vec<StepReport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_arn,
            pipeline_arn,
            pipeline_version,
            status: ExecutionStatus::Pending,
            failure_reason: None,
            created_at: now,
            last_modified_at: now,
            parameters,
            steps,
        }
    }

    pub fn describe(&self) -> ExecutionDescription {
        ExecutionDescription {
            execution_arn: self.execution_arn.clone(),
            pipeline_arn: self.pipeline_arn.clone(),
            pipeline_version: self.pipeline_version,
            status: self.status,
            failure_reason: self.failure_reason.clone(),
            created_at: self.created_at,
            last_modified_at: self.last_modified_at,
        }
    }

    /// Apply a change to one step's report
    fn update_step(&mut self, name: &str, change: impl FnOnce(&mut StepReport)) {
        if let Some(report) = self.steps.iter_mut().find(|s| s.step_name == name) {
            change(report);
        }
        self.last_modified_at = Utc::now();
    }

    fn finish(&mut self, status: ExecutionStatus, failure_reason: Option<String>) {
        self.status = status;
        self.failure_reason = failure_reason;
        self.last_modified_at = Utc::now();
    }
}

/// Stop request shared by the service and the running engine
#[derive(Debug, Clone)]
pub struct StopSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn request(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn requested(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Result of a step that succeeded
#[derive(Debug, Default)]
struct StepOutcome {
    /// Channels later steps may reference
    outputs: BTreeMap<String, OutputValue>,
    branch: Option<Branch>,
    /// Extra entries shown in the step report
    metadata: BTreeMap<String, String>,
}

/// Main execution engine
pub struct ExecutionEngine<R: ?Sized> {
    runner: Arc<R>,
    registry: Arc<dyn ModelRegistry>,
    artifact_root: String,
    event_handlers: Vec<EventHandler>,
}

impl<R: JobRunner + ?Sized> ExecutionEngine<R> {
    pub fn new(runner: Arc<R>, registry: Arc<dyn ModelRegistry>, artifact_root: impl Into<String>) -> Self {
        Self {
            runner,
            registry,
            artifact_root: artifact_root.into(),
            event_handlers: Vec::new(),
        }
    }

    pub fn with_event_handlers(mut self, handlers: Vec<EventHandler>) -> Self {
        self.event_handlers.extend(handlers);
        self
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run an execution until it succeeds, fails or is stopped
    pub async fn execute(&self, pipeline: &Pipeline, record: SharedRecord, stop: StopSignal) -> ExecutionStatus {
        let (execution_arn, parameters) = {
            let mut record = record.write().await;
            record.status = ExecutionStatus::Executing;
            record.last_modified_at = Utc::now();
            (record.execution_arn.clone(), record.parameters.clone())
        };

        info!("Starting execution {} of pipeline {}", execution_arn, pipeline.name);
        self.emit_event(ExecutionEvent::ExecutionStarted {
            execution_arn: execution_arn.clone(),
            pipeline_name: pipeline.name.clone(),
        });

        let (status, failure_reason) = self
            .run_steps(pipeline, &execution_arn, parameters, &record, &stop)
            .await;

        record.write().await.finish(status, failure_reason);

        info!("Execution {} finished: {:?}", execution_arn, status);
        self.emit_event(ExecutionEvent::ExecutionFinished {
            execution_arn,
            status,
        });
        status
    }

    async fn run_steps(
        &self,
        pipeline: &Pipeline,
        execution_arn: &str,
        parameters: BTreeMap<String, ParameterValue>,
        record: &SharedRecord,
        stop: &StopSignal,
    ) -> (ExecutionStatus, Option<String>) {
        let mut scheduler = match ExecutionScheduler::new(pipeline) {
            Ok(scheduler) => scheduler,
            Err(e) => return (ExecutionStatus::Failed, Some(e.to_string())),
        };
        let mut scope = ResolutionScope::new(parameters);

        while let Some((name, readiness)) = scheduler.next_step() {
            if readiness == Readiness::Skip {
                debug!("Step {} not executed", name);
                continue;
            }
            if stop.is_requested() {
                return (ExecutionStatus::Stopped, None);
            }
            let Some(step) = pipeline.step(&name) else {
                return (ExecutionStatus::Failed, Some(format!("Step {} not found", name)));
            };

            record.write().await.update_step(&name, |report| report.start());
            self.emit_event(ExecutionEvent::StepStarted {
                execution_arn: execution_arn.to_string(),
                step_name: name.clone(),
            });

            let result = tokio::select! {
                result = self.run_step(step, &scope, execution_arn) => Some(result),
                _ = stop.requested() => None,
            };

            match result {
                None => {
                    warn!("Step {} stopped", name);
                    record.write().await.update_step(&name, |report| report.stop());
                    return (ExecutionStatus::Stopped, None);
                }
                Some(Ok(outcome)) => {
                    let mut report_outputs: BTreeMap<String, String> = outcome
                        .outputs
                        .iter()
                        .map(|(channel, value)| (channel.clone(), value.uri.clone()))
                        .collect();
                    report_outputs.extend(outcome.metadata);

                    record.write().await.update_step(&name, |report| {
                        report.branch = outcome.branch;
                        report.succeed(report_outputs);
                    });

                    if let Some(branch) = outcome.branch {
                        info!("Condition {} selected the {} branch", name, branch);
                        self.emit_event(ExecutionEvent::BranchSelected {
                            execution_arn: execution_arn.to_string(),
                            step_name: name.clone(),
                            branch,
                        });
                    }
                    self.emit_event(ExecutionEvent::StepSucceeded {
                        execution_arn: execution_arn.to_string(),
                        step_name: name.clone(),
                    });

                    scope.record_outputs(&name, outcome.outputs);
                    scheduler.record_success(&name, outcome.branch);
                }
                Some(Err(e)) => {
                    let reason = e.to_string();
                    error!("Step {} failed: {}", name, reason);
                    record.write().await.update_step(&name, |report| report.fail(reason.clone()));
                    self.emit_event(ExecutionEvent::StepFailed {
                        execution_arn: execution_arn.to_string(),
                        step_name: name.clone(),
                        reason: reason.clone(),
                    });

                    let failure = match e {
                        StepError::Fail(message) => message,
                        other => format!("Step {} failed: {}", name, other),
                    };
                    return (ExecutionStatus::Failed, Some(failure));
                }
            }
        }

        (ExecutionStatus::Succeeded, None)
    }

    async fn run_step(
        &self,
        step: &Step,
        scope: &ResolutionScope,
        execution_arn: &str,
    ) -> Result<StepOutcome, StepError> {
        match &step.kind {
            StepKind::Processing(_) | StepKind::Training(_) => {
                let job = self.job_spec(step, scope, execution_arn)?;
                let assigned = assigned_outputs(&job);
                let request = JobRequest {
                    execution_arn: execution_arn.to_string(),
                    step_name: step.name.clone(),
                    job,
                };

                let mut published = self.runner.run(&request).await?.outputs;
                let outputs = assigned
                    .into_iter()
                    .map(|(channel, uri)| {
                        let value = published.remove(&channel).unwrap_or_else(|| OutputValue::new(uri));
                        (channel, value)
                    })
                    .collect();
                for channel in published.keys() {
                    warn!("Step {} published undeclared output {}", step.name, channel);
                }

                Ok(StepOutcome {
                    outputs,
                    ..Default::default()
                })
            }
            StepKind::Register(register) => {
                let package = NewModelPackage {
                    group: register.model_package_group.clone(),
                    model_name: register.model_name.clone(),
                    approval_status: register.approval_status,
                    model_data: scope.resolve_string(&register.model_data)?,
                    metrics_uri: register
                        .model_metrics
                        .as_ref()
                        .map(|m| scope.resolve_string(&m.uri))
                        .transpose()?,
                    image: register.image.clone(),
                    content_types: register.content_types.clone(),
                    response_types: register.response_types.clone(),
                    inference_instances: resolve_all(scope, &register.inference_instances)?,
                    transform_instances: resolve_all(scope, &register.transform_instances)?,
                };

                let registered = self
                    .registry
                    .register(package)
                    .await
                    .map_err(|e| StepError::Registry(e.to_string()))?;
                info!("Registered model package {}", registered.arn);

                let mut metadata = BTreeMap::new();
                metadata.insert("model_package_arn".to_string(), registered.arn);
                Ok(StepOutcome {
                    metadata,
                    ..Default::default()
                })
            }
            StepKind::Fail(fail) => Err(StepError::Fail(fail.error_message.clone())),
            StepKind::Condition(condition) => {
                let branch = condition.select_branch(scope)?;
                Ok(StepOutcome {
                    branch: Some(branch),
                    ..Default::default()
                })
            }
        }
    }

    fn job_spec(&self, step: &Step, scope: &ResolutionScope, execution_arn: &str) -> Result<JobSpec, StepError> {
        let run_id = execution_arn.rsplit('/').next().unwrap_or(execution_arn);
        match &step.kind {
            StepKind::Processing(p) => Ok(JobSpec::Processing(ProcessingJob {
                code: p.code.clone(),
                command: p.command.clone(),
                image: p.image.clone(),
                instance_type: scope.resolve_string(&p.compute.instance_type)?,
                instance_count: resolve_count(scope, &p.compute.instance_count)?,
                arguments: resolve_all(scope, &p.job_arguments)?,
                inputs: p
                    .inputs
                    .iter()
                    .map(|input| {
                        Ok(ResolvedInput {
                            name: input.name.clone(),
                            uri: scope.resolve_string(&input.source)?,
                            destination: input.destination.clone(),
                        })
                    })
                    .collect::<Result<_, StepError>>()?,
                outputs: p
                    .outputs
                    .iter()
                    .map(|output| {
                        let destination = match &output.destination {
                            Some(value) => scope.resolve_string(value)?,
                            None => format!("{}/{}/{}/{}", self.artifact_root, run_id, step.name, output.name),
                        };
                        Ok(ResolvedOutput {
                            name: output.name.clone(),
                            source: output.source.clone(),
                            destination,
                        })
                    })
                    .collect::<Result<_, StepError>>()?,
            })),
            StepKind::Training(t) => {
                let output_path = scope.resolve_string(&t.output_path)?;
                Ok(JobSpec::Training(TrainingJob {
                    image: t.image.clone(),
                    instance_type: scope.resolve_string(&t.compute.instance_type)?,
                    instance_count: resolve_count(scope, &t.compute.instance_count)?,
                    model_artifacts: format!(
                        "{}/{}-{}/output/model.tar.gz",
                        output_path.trim_end_matches('/'),
                        step.name,
                        run_id
                    ),
                    hyperparameters: t.hyperparameters.clone(),
                    inputs: t
                        .inputs
                        .iter()
                        .map(|(channel, input)| {
                            Ok((
                                channel.clone(),
                                TrainingChannel {
                                    uri: scope.resolve_string(&input.data)?,
                                    content_type: input.content_type.clone(),
                                },
                            ))
                        })
                        .collect::<Result<_, StepError>>()?,
                }))
            }
            _ => Err(StepError::InvalidValue {
                field: "step".to_string(),
                value: step.step_type().to_string(),
            }),
        }
    }
}

/// Output channels with the locations the engine assigned
fn assigned_outputs(job: &JobSpec) -> Vec<(String, String)> {
    match job {
        JobSpec::Processing(p) => p
            .outputs
            .iter()
            .map(|o| (o.name.clone(), o.destination.clone()))
            .collect(),
        JobSpec::Training(t) => vec![(MODEL_ARTIFACTS.to_string(), t.model_artifacts.clone())],
    }
}

fn resolve_all(scope: &ResolutionScope, values: &[DeferredValue]) -> Result<Vec<String>, StepError> {
    values
        .iter()
        .map(|v| scope.resolve_string(v).map_err(StepError::from))
        .collect()
}

fn resolve_count(scope: &ResolutionScope, value: &DeferredValue) -> Result<i64, StepError> {
    let resolved = scope.resolve(value)?;
    let count = match &resolved {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    count.filter(|c| *c > 0).ok_or_else(|| StepError::InvalidValue {
        field: "instance_count".to_string(),
        value: resolved.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Condition, ConditionStep, FailStep, Parameter, ProcessingOutput, ProcessingStep,
        PropertyReference, StepStatus,
    };
    use crate::execution::runner::JobOutcome;
    use crate::registry::InMemoryModelRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Publishes a fixed mse on every `report` channel
    struct MetricRunner {
        mse: f64,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for MetricRunner {
        async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
            self.calls.lock().unwrap().push(request.step_name.clone());
            Ok(JobOutcome::new().with_output(
                "report",
                OutputValue::new("local://eval").with_document(json!({"mse": self.mse})),
            ))
        }
    }

    fn pipeline() -> Pipeline {
        let evaluate = Step::new(
            "evaluate",
            ProcessingStep {
                code: "evaluate.py".to_string(),
                command: vec!["python3".to_string()],
                image: None,
                compute: Default::default(),
                job_arguments: vec![DeferredValue::Parameter("threshold".to_string())],
                inputs: Vec::new(),
                outputs: vec![ProcessingOutput {
                    name: "report".to_string(),
                    source: "/opt/ml/processing/evaluation".to_string(),
                    destination: None,
                }],
            },
        );
        let check = Step::new(
            "check",
            ConditionStep {
                conditions: vec![Condition::less_than_or_equal_to(
                    PropertyReference::new("evaluate", "report").with_json_path("mse"),
                    7.0,
                )],
                if_steps: Vec::new(),
                else_steps: vec!["fail".to_string()],
            },
        );
        let fail = Step::new(
            "fail",
            FailStep {
                error_message: "mse too high".to_string(),
            },
        );
        Pipeline::new(
            "p",
            vec![Parameter::string("threshold", "7")],
            vec![evaluate, check, fail],
        )
        .unwrap()
    }

    async fn run(mse: f64) -> (ExecutionStatus, ExecutionRecord) {
        let pipeline = pipeline();
        let order = pipeline.topological_order().unwrap();
        let steps = order
            .iter()
            .map(|name| StepReport::not_executed(pipeline.step(name).unwrap()))
            .collect();
        let parameters = pipeline.resolve_parameters(&Default::default()).unwrap();
        let record = Arc::new(RwLock::new(ExecutionRecord::new(
            "arn:local:pipeline/p/execution/1".to_string(),
            "arn:local:pipeline/p".to_string(),
            1,
            parameters,
            steps,
        )));

        let runner = Arc::new(MetricRunner {
            mse,
            calls: Mutex::new(Vec::new()),
        });
        let registry: Arc<dyn ModelRegistry> = Arc::new(InMemoryModelRegistry::new("arn:local:"));
        let engine = ExecutionEngine::new(runner, registry, "local://artifacts");

        let status = engine.execute(&pipeline, record.clone(), StopSignal::new()).await;
        let snapshot = record.read().await.clone();
        (status, snapshot)
    }

    #[tokio::test]
    async fn test_if_branch_leaves_fail_unexecuted() {
        let (status, record) = run(5.0).await;
        assert_eq!(status, ExecutionStatus::Succeeded);

        let check = record.steps.iter().find(|s| s.step_name == "check").unwrap();
        assert_eq!(check.branch, Some(Branch::If));
        let fail = record.steps.iter().find(|s| s.step_name == "fail").unwrap();
        assert_eq!(fail.status, StepStatus::NotExecuted);
    }

    #[tokio::test]
    async fn test_fail_step_fails_execution_with_its_message() {
        let (status, record) = run(9.0).await;
        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("mse too high"));

        let fail = record.steps.iter().find(|s| s.step_name == "fail").unwrap();
        assert_eq!(fail.status, StepStatus::Failed);
        assert_eq!(fail.failure_reason.as_deref(), Some("mse too high"));
    }

    #[tokio::test]
    async fn test_outputs_published_by_job_are_reported() {
        let (_, record) = run(5.0).await;
        let evaluate = record.steps.iter().find(|s| s.step_name == "evaluate").unwrap();
        assert_eq!(evaluate.outputs.get("report").map(String::as_str), Some("local://eval"));
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let stop = StopSignal::new();
        assert!(!stop.is_requested());
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.requested().await })
        };
        stop.request();
        waiter.await.unwrap();
        assert!(stop.is_requested());
    }

    #[test]
    fn test_resolve_count_rejects_non_positive() {
        let scope = ResolutionScope::default();
        assert_eq!(resolve_count(&scope, &DeferredValue::from(2)).unwrap(), 2);
        assert_eq!(resolve_count(&scope, &DeferredValue::from("3")).unwrap(), 3);
        assert!(resolve_count(&scope, &DeferredValue::from(0)).is_err());
        assert!(resolve_count(&scope, &DeferredValue::from("many")).is_err());
    }
}

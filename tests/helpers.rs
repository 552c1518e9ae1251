//! Test utility functions for mlpipe
#![allow(dead_code)]

use async_trait::async_trait;
use mlpipe::core::{ExecutionStatus, OutputValue, ParameterValue, StepReport, StepStatus, TerminalReport};
use mlpipe::execution::{
    ExecutionDescription, ExecutionHandle, ExecutionService, JobError, JobOutcome, JobRequest,
    JobRunner, JobSpec, LocalExecutionService, PipelineDescription, PipelineDriver, PipelineHandle,
    ServiceError, UpsertRequest,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ROLE: &str = "arn:local:role/pipelines";
pub const GROUP: &str = "showcasePackageGroup";
pub const POLL: Duration = Duration::from_millis(10);
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Evaluation report in the shape the showcase condition reads
pub fn metrics(mse: f64) -> Value {
    json!({
        "regression_metrics": {
            "mse": {"value": mse, "standard_deviation": 0.5}
        }
    })
}

/// Job runner that publishes a fixed report on every `eval_report` output
pub struct ScriptedRunner {
    report: Option<Value>,
    delay: Option<Duration>,
    failures: HashMap<String, String>,
    calls: Mutex<Vec<JobRequest>>,
}

impl ScriptedRunner {
    pub fn new(mse: f64) -> Self {
        Self {
            report: Some(metrics(mse)),
            delay: None,
            failures: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every job takes `delay` to finish
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Publish `report` instead of the metrics document; `None` publishes
    /// the output location alone
    pub fn with_report(mut self, report: Option<Value>) -> Self {
        self.report = report;
        self
    }

    /// Jobs of `step` fail with `message`
    pub fn failing(mut self, step: &str, message: &str) -> Self {
        self.failures.insert(step.to_string(), message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<JobRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of the steps that reached the runner, in call order
    pub fn step_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.step_name).collect()
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.get(&request.step_name) {
            return Err(JobError::Failed(message.clone()));
        }

        let mut outcome = JobOutcome::new();
        if let JobSpec::Processing(job) = &request.job {
            for output in job.outputs.iter().filter(|o| o.name == "eval_report") {
                let mut value = OutputValue::new(output.destination.clone());
                if let Some(report) = &self.report {
                    value = value.with_document(report.clone());
                }
                outcome = outcome.with_output(output.name.clone(), value);
            }
        }
        Ok(outcome)
    }
}

/// Wraps a service and throttles the first `failures` status polls
pub struct FlakyService<S> {
    inner: Arc<S>,
    failures: usize,
    polls: AtomicUsize,
}

impl<S> FlakyService<S> {
    pub fn new(inner: Arc<S>, failures: usize) -> Self {
        Self {
            inner,
            failures,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ExecutionService> ExecutionService for FlakyService<S> {
    async fn upsert_pipeline(&self, request: UpsertRequest) -> Result<PipelineHandle, ServiceError> {
        self.inner.upsert_pipeline(request).await
    }

    async fn describe_pipeline(&self, name: &str) -> Result<PipelineDescription, ServiceError> {
        self.inner.describe_pipeline(name).await
    }

    async fn start_execution(
        &self,
        pipeline: &PipelineHandle,
        parameters: HashMap<String, ParameterValue>,
    ) -> Result<ExecutionHandle, ServiceError> {
        self.inner.start_execution(pipeline, parameters).await
    }

    async fn describe_execution(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<ExecutionDescription, ServiceError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if poll < self.failures {
            return Err(ServiceError::Throttled(format!("Rate exceeded (poll {})", poll + 1)));
        }
        self.inner.describe_execution(execution).await
    }

    async fn list_execution_steps(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<Vec<StepReport>, ServiceError> {
        self.inner.list_execution_steps(execution).await
    }

    async fn stop_execution(&self, execution: &ExecutionHandle) -> Result<(), ServiceError> {
        self.inner.stop_execution(execution).await
    }
}

/// Local service and driver around a runner
pub fn local_driver(
    runner: Arc<ScriptedRunner>,
) -> (Arc<LocalExecutionService<ScriptedRunner>>, PipelineDriver<LocalExecutionService<ScriptedRunner>>) {
    let service = Arc::new(LocalExecutionService::new(runner).with_artifact_root("local://test-artifacts"));
    let driver = PipelineDriver::new(service.clone());
    (service, driver)
}

/// Assert the execution ended with `status`
pub fn assert_status(report: &TerminalReport, status: ExecutionStatus) {
    assert_eq!(
        report.status, status,
        "unexpected execution status, failure reason: {:?}",
        report.failure_reason
    );
}

/// Assert a step ended with `status`
pub fn assert_step(report: &TerminalReport, step: &str, status: StepStatus) {
    let entry = report
        .step(step)
        .unwrap_or_else(|| panic!("step {} missing from report", step));
    assert_eq!(entry.status, status, "unexpected status for step {}", step);
}

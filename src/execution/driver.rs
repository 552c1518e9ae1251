//! Pipeline driver - submit, start, wait and report
//!
//! The driver never mutates an execution itself except through `start` and
//! `stop`. Waiting is a cooperative poll: a status may be up to one poll
//! interval stale.

use crate::{
    core::{BuildError, ExecutionStatus, ParameterValue, Pipeline, StepReport, TerminalReport},
    execution::service::{
        ExecutionDescription, ExecutionHandle, ExecutionService, PipelineHandle, ServiceError, Tag,
        UpsertRequest,
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors surfaced by the driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// The pipeline is invalid; nothing was sent
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Rejected or failed by the execution service, message kept verbatim
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to serialize pipeline definition: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client-side wait budget ran out; the execution keeps running
    #[error("Execution {execution_arn} did not finish within {timeout:?}")]
    ExecutionTimeout {
        execution_arn: String,
        timeout: Duration,
    },
}

/// Drives pipelines on an execution service
pub struct PipelineDriver<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> Clone for PipelineDriver<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S: ExecutionService + ?Sized> PipelineDriver<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Create or update the pipeline definition.
    ///
    /// The pipeline is validated first, so build errors never reach the
    /// service. Service errors are returned as-is, without retry.
    pub async fn upsert(
        &self,
        pipeline: &Pipeline,
        role_arn: &str,
        description: Option<&str>,
        tags: &[Tag],
    ) -> Result<PipelineHandle, DriverError> {
        pipeline.validate()?;
        let definition = pipeline.definition()?.to_json()?;

        let handle = self
            .service
            .upsert_pipeline(UpsertRequest {
                pipeline_name: pipeline.name.clone(),
                definition,
                role_arn: role_arn.to_string(),
                description: description.map(str::to_string),
                tags: tags.to_vec(),
            })
            .await?;

        info!("Upserted pipeline {} (version {})", handle.pipeline_arn, handle.version);
        Ok(handle)
    }

    /// Start an execution with parameter overrides; returns immediately
    pub async fn start(
        &self,
        pipeline: &PipelineHandle,
        overrides: HashMap<String, ParameterValue>,
    ) -> Result<ExecutionHandle, DriverError> {
        let execution = self.service.start_execution(pipeline, overrides).await?;
        info!("Started execution {}", execution.execution_arn);
        Ok(execution)
    }

    /// Poll until the execution is terminal or `timeout` elapses
    pub async fn wait(
        &self,
        execution: &ExecutionHandle,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<TerminalReport, DriverError> {
        self.wait_with_progress(execution, poll_interval, timeout, |_| {}).await
    }

    /// Like [`wait`](Self::wait), calling `on_poll` with every status observed
    pub async fn wait_with_progress<F>(
        &self,
        execution: &ExecutionHandle,
        poll_interval: Duration,
        timeout: Duration,
        mut on_poll: F,
    ) -> Result<TerminalReport, DriverError>
    where
        F: FnMut(&ExecutionDescription) + Send,
    {
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll(execution).await {
                Ok((description, Some(steps))) => {
                    on_poll(&description);
                    return Ok(terminal_report(description, steps));
                }
                Ok((description, None)) => on_poll(&description),
                Err(e) if e.is_transient() => {
                    warn!("Transient error polling {}: {}", execution.execution_arn, e);
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::ExecutionTimeout {
                    execution_arn: execution.execution_arn.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// One status check; the step trace is fetched only once terminal
    async fn poll(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<(ExecutionDescription, Option<Vec<StepReport>>), ServiceError> {
        let description = self.service.describe_execution(execution).await?;
        debug!("Execution {} is {:?}", execution.execution_arn, description.status);

        if !description.status.is_terminal() {
            return Ok((description, None));
        }
        let steps = self.service.list_execution_steps(execution).await?;
        Ok((description, Some(steps)))
    }

    /// Current per-step trace; unreached steps are `NotExecuted`
    pub async fn list_steps(&self, execution: &ExecutionHandle) -> Result<Vec<StepReport>, DriverError> {
        Ok(self.service.list_execution_steps(execution).await?)
    }

    /// Request termination. Poll afterwards to observe `Stopped`.
    pub async fn stop(&self, execution: &ExecutionHandle) -> Result<(), DriverError> {
        self.service.stop_execution(execution).await?;
        info!("Requested stop of {}", execution.execution_arn);
        Ok(())
    }

    pub async fn status(&self, execution: &ExecutionHandle) -> Result<ExecutionStatus, DriverError> {
        Ok(self.service.describe_execution(execution).await?.status)
    }
}

fn terminal_report(description: ExecutionDescription, steps: Vec<StepReport>) -> TerminalReport {
    TerminalReport {
        execution_arn: description.execution_arn,
        pipeline_arn: description.pipeline_arn,
        status: description.status,
        failure_reason: description.failure_reason,
        created_at: description.created_at,
        last_modified_at: description.last_modified_at,
        steps,
    }
}

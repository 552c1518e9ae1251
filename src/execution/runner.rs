//! Compute job runners
//!
//! Processing and training steps hand a fully resolved job description to a
//! [`JobRunner`]. What the job does is opaque to the engine; it only reads
//! back the published output channels.

use crate::core::OutputValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Error types for job execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job ran and reported failure; the message is kept verbatim
    #[error("{0}")]
    Failed(String),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid job output: {0}")]
    InvalidOutput(String),
}

/// Input channel with its concrete location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub name: String,
    pub uri: String,
    pub destination: String,
}

/// Output channel with the location it is uploaded to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub name: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingChannel {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub code: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub instance_type: String,
    pub instance_count: i64,
    pub arguments: Vec<String>,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<ResolvedOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub image: String,
    pub instance_type: String,
    pub instance_count: i64,
    /// Where the model artifact is written
    pub model_artifacts: String,
    pub hyperparameters: BTreeMap<String, Value>,
    pub inputs: BTreeMap<String, TrainingChannel>,
}

/// Job description with every deferred value resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobSpec {
    Processing(ProcessingJob),
    Training(TrainingJob),
}

impl JobSpec {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobSpec::Processing(_) => "processing",
            JobSpec::Training(_) => "training",
        }
    }
}

/// A job submitted on behalf of one step of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub execution_arn: String,
    pub step_name: String,
    #[serde(flatten)]
    pub job: JobSpec,
}

/// What a finished job published, keyed by output channel.
///
/// Channels left out keep the location the engine assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
}

impl JobOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, channel: impl Into<String>, value: OutputValue) -> Self {
        self.outputs.insert(channel.into(), value);
        self
    }
}

/// Runs compute jobs for processing and training steps
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError>;
}

#[async_trait]
impl<R: JobRunner + ?Sized> JobRunner for Arc<R> {
    async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
        (**self).run(request).await
    }
}

/// Runs each job as a subprocess
///
/// The program is called as `<program> <job_type> <step_name>` with the
/// request as JSON on stdin. A JSON [`JobOutcome`] on stdout is optional.
#[derive(Debug, Clone)]
pub struct SubprocessJobRunner {
    /// Path to the job executable
    program: String,

    /// Timeout for a single job in seconds
    timeout_secs: u64,
}

impl SubprocessJobRunner {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout_secs,
        }
    }

    async fn spawn(&self, request: &JobRequest, payload: Vec<u8>) -> Result<std::process::Output, JobError> {
        let mut child = Command::new(&self.program)
            .arg(request.job.job_type())
            .arg(&request.step_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Internal(format!("Failed to spawn {}: {}", self.program, e)))?;

        // Feed stdin while draining stdout and stderr, so neither side blocks on a full pipe
        let stdin = child.stdin.take();
        let write_request = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload).await {
                // A job that ignores its request may exit before reading stdin
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let (written, output) = tokio::join!(write_request, child.wait_with_output());
        written.map_err(|e| JobError::Internal(format!("Failed to write job request: {}", e)))?;
        output.map_err(|e| JobError::Internal(format!("Failed to wait for job: {}", e)))
    }
}

#[async_trait]
impl JobRunner for SubprocessJobRunner {
    async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
        debug!(
            "Spawning {} job for step {} via {}",
            request.job.job_type(),
            request.step_name,
            self.program
        );

        let payload = serde_json::to_vec(request)
            .map_err(|e| JobError::Internal(format!("Failed to encode job request: {}", e)))?;

        let output = timeout(Duration::from_secs(self.timeout_secs), self.spawn(request, payload))
            .await
            .map_err(|_| JobError::Timeout(self.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("Job for step {} exited with code {}: {}", request.step_name, exit_code, stderr.trim());
            return Err(JobError::Failed(format!(
                "Job exited with code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| JobError::InvalidOutput(format!("Failed to decode job output: {}", e)))?;
        if stdout.trim().is_empty() {
            return Ok(JobOutcome::new());
        }

        serde_json::from_str(&stdout).map_err(|e| JobError::InvalidOutput(e.to_string()))
    }
}

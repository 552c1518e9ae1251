//! Remote execution service interface
//!
//! The service owns pipeline definitions and executions. The driver only
//! talks to it through this trait, so a hosted engine and the in-process
//! [`LocalExecutionService`](crate::execution::LocalExecutionService) are
//! interchangeable.

use crate::core::{ExecutionStatus, ParameterValue, StepReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by the execution service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Errors worth retrying on the next poll
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Throttled(_) | ServiceError::Unavailable(_))
    }
}

/// Key/value tag attached to a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Create-or-update request for a named pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub pipeline_name: String,
    /// Serialized definition document
    pub definition: String,
    /// Identity the engine assumes when running jobs
    pub role_arn: String,
    pub description: Option<String>,
    pub tags: Vec<Tag>,
}

/// Identity of a stored pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineHandle {
    pub pipeline_arn: String,
    pub pipeline_name: String,
    /// Definition version; bumped only when the definition changes
    pub version: u32,
}

/// Identity of one execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_arn: String,
    pub pipeline_arn: String,
}

/// Stored definition with its upsert metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    pub handle: PipelineHandle,
    pub definition: String,
    pub role_arn: String,
    pub description: Option<String>,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// Point-in-time status of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDescription {
    pub execution_arn: String,
    pub pipeline_arn: String,
    pub pipeline_version: u32,
    pub status: ExecutionStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// Operations offered by a pipeline execution engine
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Create or update a named pipeline definition
    async fn upsert_pipeline(&self, request: UpsertRequest) -> Result<PipelineHandle, ServiceError>;

    /// Fetch the stored definition of a pipeline
    async fn describe_pipeline(&self, pipeline_name: &str) -> Result<PipelineDescription, ServiceError>;

    /// Begin a new execution; returns without waiting for any step
    async fn start_execution(
        &self,
        pipeline: &PipelineHandle,
        parameters: HashMap<String, ParameterValue>,
    ) -> Result<ExecutionHandle, ServiceError>;

    async fn describe_execution(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<ExecutionDescription, ServiceError>;

    /// Per-step trace in execution order
    async fn list_execution_steps(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<Vec<StepReport>, ServiceError>;

    /// Request termination; the stop is observed by polling
    async fn stop_execution(&self, execution: &ExecutionHandle) -> Result<(), ServiceError>;
}

#[async_trait]
impl<S: ExecutionService + ?Sized> ExecutionService for Arc<S> {
    async fn upsert_pipeline(&self, request: UpsertRequest) -> Result<PipelineHandle, ServiceError> {
        (**self).upsert_pipeline(request).await
    }

    async fn describe_pipeline(&self, pipeline_name: &str) -> Result<PipelineDescription, ServiceError> {
        (**self).describe_pipeline(pipeline_name).await
    }

    async fn start_execution(
        &self,
        pipeline: &PipelineHandle,
        parameters: HashMap<String, ParameterValue>,
    ) -> Result<ExecutionHandle, ServiceError> {
        (**self).start_execution(pipeline, parameters).await
    }

    async fn describe_execution(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<ExecutionDescription, ServiceError> {
        (**self).describe_execution(execution).await
    }

    async fn list_execution_steps(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<Vec<StepReport>, ServiceError> {
        (**self).list_execution_steps(execution).await
    }

    async fn stop_execution(&self, execution: &ExecutionHandle) -> Result<(), ServiceError> {
        (**self).stop_execution(execution).await
    }
}

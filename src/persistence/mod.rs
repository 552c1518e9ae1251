//! Persistence layer for execution history and registered models

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{ExecutionStatus, StepReport, StepStatus, TerminalReport};
use crate::registry::{ApprovalStatus, ModelPackage, ModelRegistry, NewModelPackage};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Summary of a finished pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Execution identifier assigned by the service
    pub execution_arn: String,

    /// Pipeline name
    pub pipeline_name: String,

    pub pipeline_arn: String,

    /// Terminal status
    pub status: ExecutionStatus,

    pub failure_reason: Option<String>,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// Last status change
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps that succeeded
    pub succeeded_steps: usize,

    /// Total number of steps
    pub total_steps: usize,

    /// Full step trace
    #[serde(default)]
    pub steps: Vec<StepReport>,
}

impl ExecutionSummary {
    /// Share of steps that succeeded (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.succeeded_steps as f64 / self.total_steps as f64
    }

    /// Short form of the execution identifier
    pub fn short_id(&self) -> &str {
        let id = self
            .execution_arn
            .rsplit('/')
            .next()
            .unwrap_or(&self.execution_arn);
        &id[..id.len().min(8)]
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by its identifier, or by a unique prefix of its short id
    async fn load_execution(&self, execution_id: &str) -> Result<Option<ExecutionSummary>>;

    /// List executions of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Record a registered model package. Fails when its group already
    /// holds a package with the same version.
    async fn save_model_package(&self, package: &ModelPackage) -> Result<()>;

    /// Packages recorded for a group, newest first
    async fn list_model_packages(&self, group: &str) -> Result<Vec<ModelPackage>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<String, ExecutionSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<String>>>,
    packages: RwLock<BTreeMap<String, Vec<ModelPackage>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let existed = execs
            .insert(execution.execution_arn.clone(), execution.clone())
            .is_some();

        if !existed {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_arn.clone());
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        if let Some(summary) = execs.get(execution_id) {
            return Ok(Some(summary.clone()));
        }
        let mut matches = execs.values().filter(|s| s.short_id().starts_with(execution_id));
        match (matches.next(), matches.next()) {
            (Some(summary), None) => Ok(Some(summary.clone())),
            _ => Ok(None),
        }
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<ExecutionSummary> = by_pipeline
            .get(pipeline_name)
            .into_iter()
            .flatten()
            .filter_map(|arn| execs.get(arn).cloned())
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn save_model_package(&self, package: &ModelPackage) -> Result<()> {
        let mut packages = self.packages.write().await;
        let group = packages.entry(package.group.clone()).or_default();
        if group.iter().any(|p| p.version == package.version) {
            bail!(
                "Model package group {} already has version {}",
                package.group,
                package.version
            );
        }
        group.push(package.clone());
        Ok(())
    }

    async fn list_model_packages(&self, group: &str) -> Result<Vec<ModelPackage>> {
        let packages = self.packages.read().await;
        let mut result = packages.get(group).cloned().unwrap_or_default();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.version.cmp(&a.version)));
        Ok(result)
    }
}

/// Create a summary from a terminal report
pub fn create_summary(pipeline_name: &str, report: &TerminalReport) -> ExecutionSummary {
    ExecutionSummary {
        execution_arn: report.execution_arn.clone(),
        pipeline_name: pipeline_name.to_string(),
        pipeline_arn: report.pipeline_arn.clone(),
        status: report.status,
        failure_reason: report.failure_reason.clone(),
        started_at: report.created_at,
        completed_at: report
            .status
            .is_terminal()
            .then_some(report.last_modified_at),
        succeeded_steps: report
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count(),
        total_steps: report.steps.len(),
        steps: report.steps.clone(),
    }
}

/// Model registry backed by the packages recorded in history
pub struct HistoryRegistry {
    backend: Arc<dyn PersistenceBackend>,
    prefix: String,
    /// Held from reading the latest version until the new one is saved
    register_lock: Mutex<()>,
}

impl HistoryRegistry {
    pub fn new(backend: Arc<dyn PersistenceBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            register_lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl ModelRegistry for HistoryRegistry {
    async fn register(&self, package: NewModelPackage) -> Result<ModelPackage> {
        let _guard = self.register_lock.lock().await;
        let existing = self.backend.list_model_packages(&package.group).await?;
        let version = existing.iter().map(|p| p.version).max().unwrap_or(0) + 1;

        let registered = ModelPackage {
            arn: format!("{}model-package/{}/{}", self.prefix, package.group, version),
            group: package.group,
            version,
            model_name: package.model_name,
            approval_status: package.approval_status,
            model_data: package.model_data,
            metrics_uri: package.metrics_uri,
            image: package.image,
            content_types: package.content_types,
            response_types: package.response_types,
            inference_instances: package.inference_instances,
            transform_instances: package.transform_instances,
            created_at: Utc::now(),
        };
        self.backend.save_model_package(&registered).await?;
        Ok(registered)
    }

    async fn list_model_packages(
        &self,
        group: &str,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ModelPackage>> {
        let mut packages = self.backend.list_model_packages(group).await?;
        packages.retain(|p| status.map_or(true, |s| p.approval_status == s));
        Ok(packages)
    }
}

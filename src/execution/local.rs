//! In-process execution service
//!
//! Stores pipeline definitions, runs every execution on its own tokio task
//! and answers polls from the shared execution records. Register steps write
//! into the service's model registry.

use crate::{
    core::{ParameterValue, Pipeline, PipelineDefinition, StepReport},
    execution::{
        engine::{EventHandler, ExecutionEngine, ExecutionEvent, ExecutionRecord, SharedRecord, StopSignal},
        runner::JobRunner,
        service::{
            ExecutionDescription, ExecutionHandle, ExecutionService, PipelineDescription,
            PipelineHandle, ServiceError, UpsertRequest,
        },
    },
    registry::{InMemoryModelRegistry, ModelRegistry},
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const ARN_PREFIX: &str = "arn:local:";

struct PipelineEntry {
    description: PipelineDescription,
    pipeline: Arc<Pipeline>,
}

struct ExecutionEntry {
    record: SharedRecord,
    stop: StopSignal,
}

/// Execution service running pipelines inside this process
pub struct LocalExecutionService<R: ?Sized> {
    runner: Arc<R>,
    registry: Arc<dyn ModelRegistry>,
    artifact_root: String,
    allowed_roles: Option<HashSet<String>>,
    event_handlers: Vec<EventHandler>,
    /// Finished executions kept for polling; unbounded when `None`
    retention: Option<usize>,
    pipelines: RwLock<HashMap<String, PipelineEntry>>,
    executions: RwLock<HashMap<String, ExecutionEntry>>,
}

impl<R: JobRunner + ?Sized + 'static> LocalExecutionService<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            registry: Arc::new(InMemoryModelRegistry::new(ARN_PREFIX)),
            artifact_root: "local://artifacts".to_string(),
            allowed_roles: None,
            event_handlers: Vec::new(),
            retention: None,
            pipelines: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Root location for outputs without an explicit destination
    pub fn with_artifact_root(mut self, root: impl Into<String>) -> Self {
        self.artifact_root = root.into().trim_end_matches('/').to_string();
        self
    }

    /// Only accept upserts from these roles
    pub fn with_allowed_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    /// Keep at most `limit` finished executions; older ones are evicted when
    /// a new execution starts
    pub fn with_retention(mut self, limit: usize) -> Self {
        self.retention = Some(limit);
        self
    }

    /// Write registered models to `registry` instead of process memory
    pub fn with_model_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Registry the service's register steps write to
    pub fn model_registry(&self) -> Arc<dyn ModelRegistry> {
        self.registry.clone()
    }

    fn authorize(&self, role_arn: &str) -> Result<(), ServiceError> {
        if role_arn.trim().is_empty() {
            return Err(ServiceError::Authorization("A role is required".to_string()));
        }
        if let Some(allowed) = &self.allowed_roles {
            if !allowed.contains(role_arn) {
                return Err(ServiceError::Authorization(format!(
                    "Role {} may not manage pipelines",
                    role_arn
                )));
            }
        }
        Ok(())
    }

    async fn evict_finished(&self, executions: &mut HashMap<String, ExecutionEntry>) {
        let Some(limit) = self.retention else {
            return;
        };

        let mut finished = Vec::new();
        for (arn, entry) in executions.iter() {
            let record = entry.record.read().await;
            if record.status.is_terminal() {
                finished.push((record.last_modified_at, arn.clone()));
            }
        }
        if finished.len() <= limit {
            return;
        }

        finished.sort();
        let excess = finished.len() - limit;
        for (_, arn) in finished.into_iter().take(excess) {
            debug!("Evicting finished execution {}", arn);
            executions.remove(&arn);
        }
    }

    async fn execution(&self, handle: &ExecutionHandle) -> Result<(SharedRecord, StopSignal), ServiceError> {
        let executions = self.executions.read().await;
        executions
            .get(&handle.execution_arn)
            .map(|entry| (entry.record.clone(), entry.stop.clone()))
            .ok_or_else(|| ServiceError::NotFound(format!("Execution {}", handle.execution_arn)))
    }
}

#[async_trait]
impl<R: JobRunner + ?Sized + 'static> ExecutionService for LocalExecutionService<R> {
    async fn upsert_pipeline(&self, request: UpsertRequest) -> Result<PipelineHandle, ServiceError> {
        self.authorize(&request.role_arn)?;

        let definition = PipelineDefinition::from_json(&request.definition)
            .map_err(|e| ServiceError::Validation(format!("Malformed definition: {}", e)))?;
        if definition.name != request.pipeline_name {
            return Err(ServiceError::Validation(format!(
                "Definition is for pipeline {}, not {}",
                definition.name, request.pipeline_name
            )));
        }
        let pipeline = definition
            .into_pipeline()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let now = Utc::now();
        let mut pipelines = self.pipelines.write().await;
        let entry = match pipelines.remove(&request.pipeline_name) {
            Some(mut existing) => {
                if existing.description.definition != request.definition {
                    existing.description.handle.version += 1;
                    existing.description.definition = request.definition;
                    existing.pipeline = Arc::new(pipeline);
                    info!(
                        "Updated pipeline {} to version {}",
                        request.pipeline_name, existing.description.handle.version
                    );
                } else {
                    debug!("Pipeline {} definition unchanged", request.pipeline_name);
                }
                existing.description.role_arn = request.role_arn;
                existing.description.description = request.description;
                existing.description.tags = request.tags;
                existing.description.last_modified_at = now;
                existing
            }
            None => {
                info!("Created pipeline {}", request.pipeline_name);
                PipelineEntry {
                    description: PipelineDescription {
                        handle: PipelineHandle {
                            pipeline_arn: format!("{}pipeline/{}", ARN_PREFIX, request.pipeline_name),
                            pipeline_name: request.pipeline_name.clone(),
                            version: 1,
                        },
                        definition: request.definition,
                        role_arn: request.role_arn,
                        description: request.description,
                        tags: request.tags,
                        created_at: now,
                        last_modified_at: now,
                    },
                    pipeline: Arc::new(pipeline),
                }
            }
        };

        let handle = entry.description.handle.clone();
        pipelines.insert(request.pipeline_name, entry);
        Ok(handle)
    }

    async fn describe_pipeline(&self, pipeline_name: &str) -> Result<PipelineDescription, ServiceError> {
        let pipelines = self.pipelines.read().await;
        pipelines
            .get(pipeline_name)
            .map(|entry| entry.description.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline_name)))
    }

    async fn start_execution(
        &self,
        pipeline: &PipelineHandle,
        parameters: HashMap<String, ParameterValue>,
    ) -> Result<ExecutionHandle, ServiceError> {
        let (definition, version) = {
            let pipelines = self.pipelines.read().await;
            let entry = pipelines
                .get(&pipeline.pipeline_name)
                .filter(|entry| entry.description.handle.pipeline_arn == pipeline.pipeline_arn)
                .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline.pipeline_arn)))?;
            (entry.pipeline.clone(), entry.description.handle.version)
        };

        let resolved = definition
            .resolve_parameters(&parameters)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let order = definition
            .topological_order()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let steps = order
            .iter()
            .filter_map(|name| definition.step(name))
            .map(StepReport::not_executed)
            .collect();

        let execution_arn = format!("{}/execution/{}", pipeline.pipeline_arn, Uuid::new_v4().simple());
        let record = Arc::new(RwLock::new(ExecutionRecord::new(
            execution_arn.clone(),
            pipeline.pipeline_arn.clone(),
            version,
            resolved,
            steps,
        )));
        let stop = StopSignal::new();

        {
            let mut executions = self.executions.write().await;
            self.evict_finished(&mut executions).await;
            executions.insert(
                execution_arn.clone(),
                ExecutionEntry {
                    record: record.clone(),
                    stop: stop.clone(),
                },
            );
        }

        let engine = ExecutionEngine::new(self.runner.clone(), self.registry.clone(), self.artifact_root.clone())
            .with_event_handlers(self.event_handlers.clone());
        info!("Starting execution {}", execution_arn);
        tokio::spawn(async move {
            engine.execute(&definition, record, stop).await;
        });

        Ok(ExecutionHandle {
            execution_arn,
            pipeline_arn: pipeline.pipeline_arn.clone(),
        })
    }

    async fn describe_execution(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<ExecutionDescription, ServiceError> {
        let (record, _) = self.execution(execution).await?;
        let description = record.read().await.describe();
        Ok(description)
    }

    async fn list_execution_steps(
        &self,
        execution: &ExecutionHandle,
    ) -> Result<Vec<StepReport>, ServiceError> {
        let (record, _) = self.execution(execution).await?;
        let steps = record.read().await.steps.clone();
        Ok(steps)
    }

    async fn stop_execution(&self, execution: &ExecutionHandle) -> Result<(), ServiceError> {
        let (record, stop) = self.execution(execution).await?;
        if record.read().await.status.is_terminal() {
            debug!("Execution {} already terminal, ignoring stop", execution.execution_arn);
            return Ok(());
        }
        info!("Stop requested for {}", execution.execution_arn);
        stop.request();
        Ok(())
    }
}

//! Endpoint configuration builder
//!
//! Looks up the newest approved model package of a group and merges its
//! identity into an endpoint configuration document.

use crate::registry::{ApprovalStatus, ModelPackage, ModelRegistry};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Errors building an endpoint configuration
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("No approved model package found for model package group: {0}")]
    NoApprovedPackage(String),

    #[error("Endpoint configuration must include parameters")]
    MissingParameters,

    #[error("Endpoint configuration {field} must be a JSON object")]
    NotAnObject { field: &'static str },

    #[error("Model registry error: {0}")]
    Registry(String),

    #[error("Failed to read or write endpoint configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Values merged into the configuration's `Parameters`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub endpoint_name: String,
    pub model_execution_role: String,
}

impl EndpointSettings {
    pub fn new(endpoint_name: impl Into<String>, model_execution_role: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            model_execution_role: model_execution_role.into(),
        }
    }

    pub fn endpoint_config_name(&self) -> String {
        format!("{}-config", self.endpoint_name)
    }
}

/// Newest approved package of a model package group
pub async fn latest_approved_package<R: ModelRegistry + ?Sized>(
    registry: &R,
    group: &str,
) -> Result<ModelPackage, DeployError> {
    let packages = registry
        .list_model_packages(group, Some(ApprovalStatus::Approved))
        .await
        .map_err(|e| DeployError::Registry(e.to_string()))?;

    match packages.into_iter().max_by_key(|p| (p.created_at, p.version)) {
        Some(package) => {
            info!("Latest approved model package: {}", package.arn);
            Ok(package)
        }
        None => {
            let err = DeployError::NoApprovedPackage(group.to_string());
            error!("{}", err);
            Err(err)
        }
    }
}

/// Merge the package and endpoint identity into `config`.
///
/// `config` must carry a `Parameters` object; its keys are kept unless
/// overwritten by `ModelPackageName`, `ModelExecutionRoleArn`, `EndpointName`
/// or `EndpointConfigName`. The result holds only the merged `Parameters`.
pub fn adjust_endpoint_config(
    config: &Value,
    model_package_arn: &str,
    settings: &EndpointSettings,
) -> Result<Value, DeployError> {
    let document = config
        .as_object()
        .ok_or(DeployError::NotAnObject { field: "document" })?;
    let parameters = document
        .get("Parameters")
        .ok_or(DeployError::MissingParameters)?
        .as_object()
        .ok_or(DeployError::NotAnObject { field: "Parameters" })?;

    let mut merged = parameters.clone();
    merged.insert("ModelPackageName".to_string(), Value::from(model_package_arn));
    merged.insert(
        "ModelExecutionRoleArn".to_string(),
        Value::from(settings.model_execution_role.as_str()),
    );
    merged.insert("EndpointName".to_string(), Value::from(settings.endpoint_name.as_str()));
    merged.insert(
        "EndpointConfigName".to_string(),
        Value::from(settings.endpoint_config_name()),
    );

    let mut adjusted = Map::new();
    adjusted.insert("Parameters".to_string(), Value::Object(merged));
    Ok(Value::Object(adjusted))
}

/// Read a configuration file, adjust it and write the result
pub async fn build_config_file<R: ModelRegistry + ?Sized>(
    registry: &R,
    group: &str,
    settings: &EndpointSettings,
    import_path: &Path,
    export_path: &Path,
) -> Result<Value, DeployError> {
    let package = latest_approved_package(registry, group).await?;

    let raw = tokio::fs::read_to_string(import_path).await?;
    let config: Value = serde_json::from_str(&raw)?;
    let adjusted = adjust_endpoint_config(&config, &package.arn, settings)?;

    let rendered = serde_json::to_string_pretty(&adjusted)?;
    info!("Adjusted endpoint configuration: {}", rendered);
    tokio::fs::write(export_path, rendered).await?;
    Ok(adjusted)
}

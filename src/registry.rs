//! Model registry - versioned model packages written by register steps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;

/// Approval state of a registered model package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Approved,
    #[default]
    PendingManualApproval,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::PendingManualApproval => "PendingManualApproval",
            ApprovalStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Approved" => Some(ApprovalStatus::Approved),
            "PendingManualApproval" => Some(ApprovalStatus::PendingManualApproval),
            "Rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A model version registered under a package group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPackage {
    /// Unique package identifier (`<registry>/<group>/<version>`)
    pub arn: String,

    pub group: String,

    /// 1-based version within the group
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    pub approval_status: ApprovalStatus,

    /// Location of the trained model artifact
    pub model_data: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub content_types: Vec<String>,

    #[serde(default)]
    pub response_types: Vec<String>,

    #[serde(default)]
    pub inference_instances: Vec<String>,

    #[serde(default)]
    pub transform_instances: Vec<String>,

    pub created_at: DateTime<Utc>,
}

/// Fields of a package about to be registered; the registry assigns identity
#[derive(Debug, Clone, PartialEq)]
pub struct NewModelPackage {
    pub group: String,
    pub model_name: Option<String>,
    pub approval_status: ApprovalStatus,
    pub model_data: String,
    pub metrics_uri: Option<String>,
    pub image: Option<String>,
    pub content_types: Vec<String>,
    pub response_types: Vec<String>,
    pub inference_instances: Vec<String>,
    pub transform_instances: Vec<String>,
}

/// Read and write access to registered model packages
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register a new package version in its group
    async fn register(&self, package: NewModelPackage) -> anyhow::Result<ModelPackage>;

    /// Packages of a group, newest first, optionally filtered by approval status
    async fn list_model_packages(
        &self,
        group: &str,
        status: Option<ApprovalStatus>,
    ) -> anyhow::Result<Vec<ModelPackage>>;
}

/// Registry kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    prefix: String,
    groups: RwLock<BTreeMap<String, Vec<ModelPackage>>>,
}

impl InMemoryModelRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            groups: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn register(&self, package: NewModelPackage) -> anyhow::Result<ModelPackage> {
        let mut groups = self.groups.write().await;
        let versions = groups.entry(package.group.clone()).or_default();
        let version = versions.len() as u32 + 1;

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
        versions.push(registered.clone());
        Ok(registered)
    }

    async fn list_model_packages(
        &self,
        group: &str,
        status: Option<ApprovalStatus>,
    ) -> anyhow::Result<Vec<ModelPackage>> {
        let groups = self.groups.read().await;
        let packages = groups
            .get(group)
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .filter(|p| status.map_or(true, |s| p.approval_status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(packages)
    }
}

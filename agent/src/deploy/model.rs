//! Deployment records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::sdk::{
    ArtifactVersion, DeploymentInfo, DeploymentSource, ManualOperation, StageSpec, StageStatus,
    SyncStrategy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Running,
    RollingBack,
    Success,
    Failure,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::RollingBack => "ROLLING_BACK",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failure => "FAILURE",
        }
    }
}

/// A stage of a deployment pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub available_operation: ManualOperation,

    pub status: StageStatus,
    #[serde(default)]
    pub status_reason: Option<String>,

    /// Set by the operator's approve operation
    #[serde(default)]
    pub approved: bool,

    /// Set by the operator's skip operation
    #[serde(default)]
    pub skip_requested: bool,

    pub updated_at: DateTime<Utc>,
}

impl Stage {
    pub fn from_spec(spec: StageSpec, now: DateTime<Utc>) -> Self {
        Self {
            index: spec.index,
            name: spec.name,
            description: spec.description,
            rollback: spec.rollback,
            config: spec.config,
            metadata: spec.metadata,
            available_operation: spec.available_operation,
            status: StageStatus::Pending,
            status_reason: None,
            approved: false,
            skip_requested: false,
            updated_at: now,
        }
    }

    pub fn spec(&self) -> StageSpec {
        StageSpec {
            index: self.index,
            name: self.name.clone(),
            description: self.description.clone(),
            rollback: self.rollback,
            metadata: self.metadata.clone(),
            available_operation: self.available_operation,
            config: self.config.clone(),
        }
    }
}

/// A timestamped stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    pub deployment_id: String,
    pub stage_index: u32,
    pub stage_name: String,
    pub status: StageStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A deployment and everything recorded about its progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub application_id: String,
    pub piped_id: String,
    pub plugin: String,

    #[serde(default)]
    pub running_source: DeploymentSource,
    pub target_source: DeploymentSource,

    /// None when the submitter supplied the stages
    #[serde(default)]
    pub strategy: Option<SyncStrategy>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub versions: Vec<ArtifactVersion>,

    pub stages: Vec<Stage>,

    pub status: DeploymentStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub rollback_outcome: Option<String>,

    /// Every stage transition, oldest first
    #[serde(default)]
    pub events: Vec<StageEvent>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn info(&self) -> DeploymentInfo {
        DeploymentInfo {
            id: self.id.clone(),
            application_id: self.application_id.clone(),
            piped_id: self.piped_id.clone(),
            plugin: self.plugin.clone(),
        }
    }

    pub fn stage(&self, index: u32) -> Result<&Stage, AgentError> {
        self.stages
            .iter()
            .find(|s| s.index == index)
            .ok_or_else(|| AgentError::NotFound(format!("stage {} of deployment {}", index, self.id)))
    }

    pub fn stage_mut(&mut self, index: u32) -> Result<&mut Stage, AgentError> {
        let id = self.id.clone();
        self.stages
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or_else(|| AgentError::NotFound(format!("stage {} of deployment {}", index, id)))
    }

    /// Indices of the forward stages in execution order
    pub fn forward_indices(&self) -> Vec<u32> {
        self.indices(false)
    }

    /// Indices of the rollback stages in execution order
    pub fn rollback_indices(&self) -> Vec<u32> {
        self.indices(true)
    }

    fn indices(&self, rollback: bool) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .stages
            .iter()
            .filter(|s| s.rollback == rollback)
            .map(|s| s.index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

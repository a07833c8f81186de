//! Values exchanged between the agent and plugins

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::reconciler::SyncStatus;

/// Stage outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    WaitingApproval,
    Success,
    Failure,
    Skipped,
}

impl StageStatus {
    /// Terminal statuses are never revised
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Success | StageStatus::Failure | StageStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::WaitingApproval => "WAITING_APPROVAL",
            StageStatus::Success => "SUCCESS",
            StageStatus::Failure => "FAILURE",
            StageStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator action a stage may advertise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualOperation {
    #[default]
    None,
    Approve,
    Skip,
}

impl ManualOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualOperation::None => "NONE",
            ManualOperation::Approve => "APPROVE",
            ManualOperation::Skip => "SKIP",
        }
    }
}

impl fmt::Display for ManualOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManualOperation {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(ManualOperation::None),
            "APPROVE" => Ok(ManualOperation::Approve),
            "SKIP" => Ok(ManualOperation::Skip),
            _ => Err(AgentError::ValidationError(format!(
                "unknown manual operation {:?}",
                s
            ))),
        }
    }
}

/// One side of a deployment: the commit running now or the one to deploy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSource {
    #[serde(default)]
    pub commit_hash: String,

    /// Checkout of the application at `commit_hash`
    #[serde(default)]
    pub application_directory: String,

    /// Decoded application configuration, see [`ApplicationConfig`]
    #[serde(default)]
    pub application_config: serde_json::Value,
}

impl DeploymentSource {
    /// Decode the generic part of the application configuration
    pub fn config(&self) -> Result<ApplicationConfig, AgentError> {
        if self.application_config.is_null() {
            return Ok(ApplicationConfig::default());
        }
        serde_json::from_value(self.application_config.clone()).map_err(|e| {
            AgentError::ConfigError(format!("invalid application configuration: {}", e))
        })
    }
}

/// Plugin-independent envelope of an application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    /// Plugin-specific application spec
    #[serde(default)]
    pub spec: serde_json::Value,

    /// Declared pipeline; absent means the plugin's quick sync applies
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,

    #[serde(default)]
    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stages: Vec<PipelineStageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageConfig {
    pub name: String,

    #[serde(default)]
    pub desc: String,

    /// Stage options
    #[serde(default)]
    pub with: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerConfig {
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            auto_rollback: true,
        }
    }
}

/// Identity of a deployment as seen by plugins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub id: String,
    pub application_id: String,
    pub piped_id: String,
    pub plugin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Unknown,
    ContainerImage,
    TerraformModule,
}

/// A versioned artifact the deployment brings in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub kind: ArtifactKind,
    pub version: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    QuickSync,
    PipelineSync,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::QuickSync => "QUICK_SYNC",
            SyncStrategy::PipelineSync => "PIPELINE_SYNC",
        }
    }
}

/// How the plugin wants the deployment carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: SyncStrategy,
    pub summary: String,
}

/// A stage the application declares, before the plugin shapes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub index: u32,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

/// An executable stage record produced by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    pub index: u32,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub rollback: bool,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub available_operation: ManualOperation,

    #[serde(default)]
    pub config: serde_json::Value,
}

impl StageSpec {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            description: String::new(),
            rollback: false,
            metadata: BTreeMap::new(),
            available_operation: ManualOperation::None,
            config: serde_json::Value::Null,
        }
    }
}

/// A deploy target with its plugin-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub name: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

impl DeployTarget {
    /// Decode the plugin-specific configuration
    pub fn decode<T: serde::de::DeserializeOwned + Default>(&self) -> Result<T, AgentError> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone()).map_err(|e| {
            AgentError::ConfigError(format!(
                "invalid configuration of deploy target {}: {}",
                self.name, e
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
        }
    }
}

/// An observed platform resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub health_status: HealthStatus,
    pub health_description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub short_reason: String,
    pub reason: String,
}

/// Live state of one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestateResponse {
    pub resources: Vec<ResourceState>,
    pub health_status: HealthStatus,
    pub sync_state: SyncState,
}

//! Operator API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Source reference of a deployment (running or target)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default)]
    pub commit_hash: String,
    #[serde(default)]
    pub application_directory: String,
    /// Decoded application configuration
    #[serde(default)]
    pub application_config: serde_json::Value,
}

/// A stage declared by the submitter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSubmission {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub available_operation: Option<String>,
    /// Plugin-specific stage options
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Deployment submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDeploymentRequest {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub application_id: String,
    /// Plugin that owns the application, e.g. "opentofu"
    pub plugin: String,
    /// Pre-built pipeline. When empty the agent plans the stages itself.
    #[serde(default)]
    pub stages: Vec<StageSubmission>,
    #[serde(default)]
    pub running_source: SourceRef,
    pub target_source: SourceRef,
}

/// Deployment submission outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDeploymentResponse {
    pub accepted: bool,
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Stage status as reported to the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatusView {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub rollback: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub available_operation: String,
    pub metadata: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// Deployment status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusResponse {
    pub id: String,
    pub application_id: String,
    pub piped_id: String,
    pub plugin: String,
    /// QUICK_SYNC or PIPELINE_SYNC, absent for submitted pipelines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub summary: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageStatusView>,
}

/// A timestamped stage transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEventView {
    pub deployment_id: String,
    pub stage_index: u32,
    pub stage_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Stage transitions of one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEventsResponse {
    pub events: Vec<StageEventView>,
}

/// One persisted stage log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLineView {
    pub severity: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Stage log lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLogsResponse {
    pub completed: bool,
    pub lines: Vec<LogLineView>,
}

/// Manual operation request, e.g. `{"operation": "approve"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOperationRequest {
    pub operation: String,
}

/// Manual operation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOperationResponse {
    pub accepted: bool,
    pub message: String,
}

/// A deploy target the plugin should inspect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTargetView {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Livestate query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestateRequest {
    pub application_id: String,
    pub plugin: String,
    /// Empty uses the deploy targets configured for the plugin
    #[serde(default)]
    pub deploy_targets: Vec<DeployTargetView>,
    pub source: SourceRef,
}

/// Observed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStateView {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub health_status: String,
    pub health_description: String,
    pub metadata: BTreeMap<String, String>,
}

/// Sync state of an application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateView {
    pub status: String,
    pub short_reason: String,
    pub reason: String,
}

/// Livestate query result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestateResponse {
    pub resources: Vec<ResourceStateView>,
    pub health_status: String,
    pub sync_state: SyncStateView,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

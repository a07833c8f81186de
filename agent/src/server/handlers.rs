//! HTTP request handlers

use std::sync::Arc;

use agent_api::models::{
    DeployTargetView, DeploymentStatusResponse, ErrorResponse, HealthResponse, LivestateRequest,
    LivestateResponse as LivestateView, LogLineView, ManualOperationRequest,
    ManualOperationResponse, ResourceStateView, SourceRef, StageEventView, StageEventsResponse,
    StageLogsResponse, StageStatusView, StageSubmission, SubmitDeploymentRequest,
    SubmitDeploymentResponse, SyncStateView, VersionResponse,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::deploy::engine::Submission;
use crate::deploy::model::{Deployment, Stage, StageEvent};
use crate::errors::{AgentError, ErrorKind};
use crate::logpersister::LogLine;
use crate::sdk::{
    DeployTarget, DeploymentSource, LivestateResponse, ManualOperation, StageSpec,
};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// An error rendered as a JSON body with a matching status code
#[derive(Debug)]
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.root() {
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::TransitionError(_) => StatusCode::CONFLICT,
            _ if self.0.kind() == ErrorKind::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "piped".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ============================== DEPLOYMENTS ================================= //

/// Accept a deployment. Rejections answer 422 with the reason.
pub async fn submit_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SubmitDeploymentRequest>,
) -> Response {
    let result = match submission(request) {
        Ok(submission) => state.engine.submit(submission).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(SubmitDeploymentResponse {
                accepted: true,
                deployment_id: Some(id),
                reason: None,
            }),
        )
            .into_response(),
        Err(e) => {
            let err = ApiError(e);
            let status = err.status();
            info!("Rejected deployment: {}", err.0);
            (
                status,
                Json(SubmitDeploymentResponse {
                    accepted: false,
                    deployment_id: None,
                    reason: Some(err.0.to_string()),
                }),
            )
                .into_response()
        }
    }
}

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentStatusResponse>, ApiError> {
    let deployment = find(&state, &id)?;
    Ok(Json(deployment_view(&deployment)))
}

pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<StageEventsResponse>, ApiError> {
    let deployment = find(&state, &id)?;
    Ok(Json(StageEventsResponse {
        events: deployment.events.iter().map(event_view).collect(),
    }))
}

pub async fn stage_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path((id, index)): Path<(String, u32)>,
) -> Result<Json<StageLogsResponse>, ApiError> {
    let deployment = find(&state, &id)?;
    let completed = deployment.stage(index)?.status.is_terminal();
    let lines = state.engine.stage_logs(&id, index).await?;
    Ok(Json(StageLogsResponse {
        completed,
        lines: lines.iter().map(log_line_view).collect(),
    }))
}

pub async fn operation_handler(
    State(state): State<Arc<ServerState>>,
    Path((id, index)): Path<(String, u32)>,
    Json(request): Json<ManualOperationRequest>,
) -> Result<Json<ManualOperationResponse>, ApiError> {
    let operation: ManualOperation = request.operation.parse()?;
    state.engine.operate(&id, index, operation).await?;
    Ok(Json(ManualOperationResponse {
        accepted: true,
        message: format!("{} accepted for stage {} of deployment {}", operation, index, id),
    }))
}

// =============================== LIVESTATE ================================== //

pub async fn livestate_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LivestateRequest>,
) -> Result<Json<LivestateView>, ApiError> {
    let targets = request.deploy_targets.into_iter().map(deploy_target).collect();
    let response = state
        .engine
        .livestate(
            &request.application_id,
            &request.plugin,
            targets,
            source(request.source),
        )
        .await?;
    Ok(Json(livestate_view(response)))
}

// ============================== CONVERSIONS ================================= //

fn find(state: &ServerState, id: &str) -> Result<Deployment, ApiError> {
    state
        .engine
        .deployment(id)
        .ok_or_else(|| ApiError(AgentError::NotFound(format!("deployment {}", id))))
}

fn submission(request: SubmitDeploymentRequest) -> Result<Submission, AgentError> {
    let stages = request
        .stages
        .into_iter()
        .map(stage_spec)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Submission {
        id: request.id,
        application_id: request.application_id,
        plugin: request.plugin,
        stages,
        running_source: source(request.running_source),
        target_source: source(request.target_source),
    })
}

fn stage_spec(stage: StageSubmission) -> Result<StageSpec, AgentError> {
    let available_operation = match stage.available_operation {
        Some(operation) => operation.parse()?,
        None => ManualOperation::None,
    };
    Ok(StageSpec {
        index: stage.index,
        name: stage.name,
        description: stage.description,
        rollback: stage.rollback,
        metadata: stage.metadata,
        available_operation,
        config: stage.config,
    })
}

fn source(source: SourceRef) -> DeploymentSource {
    DeploymentSource {
        commit_hash: source.commit_hash,
        application_directory: source.application_directory,
        application_config: source.application_config,
    }
}

fn deploy_target(target: DeployTargetView) -> DeployTarget {
    DeployTarget {
        name: target.name,
        config: target.config,
    }
}

fn deployment_view(deployment: &Deployment) -> DeploymentStatusResponse {
    DeploymentStatusResponse {
        id: deployment.id.clone(),
        application_id: deployment.application_id.clone(),
        piped_id: deployment.piped_id.clone(),
        plugin: deployment.plugin.clone(),
        strategy: deployment.strategy.map(|s| s.as_str().to_string()),
        summary: deployment.summary.clone(),
        status: deployment.status.as_str().to_string(),
        status_reason: deployment.status_reason.clone(),
        rollback_outcome: deployment.rollback_outcome.clone(),
        created_at: deployment.created_at,
        updated_at: deployment.updated_at,
        stages: deployment.stages.iter().map(stage_view).collect(),
    }
}

fn stage_view(stage: &Stage) -> StageStatusView {
    StageStatusView {
        index: stage.index,
        name: stage.name.clone(),
        description: stage.description.clone(),
        rollback: stage.rollback,
        status: stage.status.as_str().to_string(),
        status_reason: stage.status_reason.clone(),
        available_operation: stage.available_operation.as_str().to_string(),
        metadata: stage.metadata.clone(),
        updated_at: stage.updated_at,
    }
}

fn event_view(event: &StageEvent) -> StageEventView {
    StageEventView {
        deployment_id: event.deployment_id.clone(),
        stage_index: event.stage_index,
        stage_name: event.stage_name.clone(),
        status: event.status.as_str().to_string(),
        reason: event.reason.clone(),
        at: event.at,
    }
}

fn log_line_view(line: &LogLine) -> LogLineView {
    LogLineView {
        severity: line.severity.as_str().to_string(),
        message: line.message.clone(),
        at: line.at,
    }
}

fn livestate_view(response: LivestateResponse) -> LivestateView {
    LivestateView {
        resources: response
            .resources
            .into_iter()
            .map(|r| ResourceStateView {
                id: r.id,
                name: r.name,
                resource_type: r.resource_type,
                health_status: r.health_status.as_str().to_string(),
                health_description: r.health_description,
                metadata: r.metadata,
            })
            .collect(),
        health_status: response.health_status.as_str().to_string(),
        sync_state: SyncStateView {
            status: response.sync_state.status.as_str().to_string(),
            short_reason: response.sync_state.short_reason,
            reason: response.sync_state.reason,
        },
    }
}

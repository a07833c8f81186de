//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    deployment_handler, events_handler, health_handler, livestate_handler, operation_handler,
    stage_logs_handler, submit_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the operator API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deployments", post(submit_handler))
        .route("/deployments/{id}", get(deployment_handler))
        .route("/deployments/{id}/events", get(events_handler))
        .route("/deployments/{id}/stages/{index}/logs", get(stage_logs_handler))
        .route(
            "/deployments/{id}/stages/{index}/operations",
            post(operation_handler),
        )
        // Live state
        .route("/livestate", post(livestate_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(format!("failed to bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}

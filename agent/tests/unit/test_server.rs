//! Operator API tests

use std::sync::Arc;

use agent_api::models::{
    DeploymentStatusResponse, ManualOperationResponse, StageEventsResponse, StageLogsResponse,
    SubmitDeploymentResponse,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;

use piped::app::state::AppState;
use piped::server::serve::router;
use piped::server::state::ServerState;

use crate::common::{fake_app, FakePlugin, FAKE_PLUGIN};

fn api(state: &AppState) -> Router {
    router(Arc::new(ServerState::new(state.engine.clone())))
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

fn submit_body(stages: Value) -> Value {
    json!({
        "applicationId": "app-1",
        "plugin": FAKE_PLUGIN,
        "stages": stages,
        "targetSource": {"commitHash": "new"}
    })
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;

    let (status, body) = call(api(&state), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = decode(&body);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "piped");
}

#[tokio::test]
async fn test_submit_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mut queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A", "B"]))).await;

    let (status, body) = call(
        api(&state),
        "POST",
        "/deployments",
        Some(submit_body(json!([]))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: SubmitDeploymentResponse = decode(&body);
    assert!(submitted.accepted);
    let id = submitted.deployment_id.unwrap();
    assert_eq!(queue.try_recv().unwrap(), id);

    let (status, body) = call(api(&state), "GET", &format!("/deployments/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let deployment: DeploymentStatusResponse = decode(&body);
    assert_eq!(deployment.status, "PENDING");
    assert_eq!(deployment.strategy.as_deref(), Some("QUICK_SYNC"));
    let names: Vec<&str> = deployment.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);

    state.engine.run_deployment(&id).await;

    let (status, body) = call(api(&state), "GET", &format!("/deployments/{}/events", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let events: StageEventsResponse = decode(&body);
    assert_eq!(events.events.len(), 4);
    assert_eq!(events.events[3].status, "SUCCESS");

    let (status, body) = call(
        api(&state),
        "GET",
        &format!("/deployments/{}/stages/0/logs", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let logs: StageLogsResponse = decode(&body);
    assert!(logs.completed);
    assert!(logs.lines.iter().any(|l| l.message == "running A"));
}

#[tokio::test]
async fn test_invalid_submission_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;

    let (status, body) = call(
        api(&state),
        "POST",
        "/deployments",
        Some(submit_body(json!([{"index": 0, "name": "UNKNOWN"}]))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected: SubmitDeploymentResponse = decode(&body);
    assert!(!rejected.accepted);
    assert!(rejected.reason.unwrap().contains("unknown stage name UNKNOWN"));
    assert!(state.engine.deployments().is_empty());
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;

    let (status, _) = call(api(&state), "GET", "/deployments/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(api(&state), "GET", "/deployments/missing/stages/0/logs", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_operations() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A", "B"]))).await;

    let (_, body) = call(
        api(&state),
        "POST",
        "/deployments",
        Some(submit_body(json!([
            {"index": 0, "name": "A", "availableOperation": "APPROVE"},
            {"index": 1, "name": "B"}
        ]))),
    )
    .await;
    let id = decode::<SubmitDeploymentResponse>(&body).deployment_id.unwrap();

    // B advertises nothing
    let (status, _) = call(
        api(&state),
        "POST",
        &format!("/deployments/{}/stages/1/operations", id),
        Some(json!({"operation": "skip"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        api(&state),
        "POST",
        &format!("/deployments/{}/stages/0/operations", id),
        Some(json!({"operation": "launch"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        api(&state),
        "POST",
        &format!("/deployments/{}/stages/7/operations", id),
        Some(json!({"operation": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        api(&state),
        "POST",
        &format!("/deployments/{}/stages/0/operations", id),
        Some(json!({"operation": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let accepted: ManualOperationResponse = decode(&body);
    assert!(accepted.accepted);
    assert!(state.engine.deployment(&id).unwrap().stages[0].approved);
}

#[tokio::test]
async fn test_livestate_of_unknown_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;

    let (status, body) = call(
        api(&state),
        "POST",
        "/livestate",
        Some(json!({"applicationId": "app-1", "plugin": "nomad", "source": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = decode(&body);
    assert!(body["error"].as_str().unwrap().contains("nomad"));
}

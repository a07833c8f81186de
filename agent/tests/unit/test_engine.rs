//! Stage execution engine tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use piped::deploy::{DeploymentStatus, EngineOptions};
use piped::errors::ErrorKind;
use piped::logpersister::Severity;
use piped::sdk::{ManualOperation, StageStatus};

use crate::common::{
    app, fake_app, registry_with, rollback_stage, stage, submission, wait_for, CountingInstaller,
    FakePlugin, Outcome,
};

fn statuses(deployment: &piped::deploy::Deployment) -> Vec<StageStatus> {
    deployment.stages.iter().map(|s| s.status).collect()
}

#[tokio::test]
async fn test_quick_sync_runs_every_stage_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "B"]));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    let pending = state.engine.deployment(&id).unwrap();
    assert_eq!(pending.status, DeploymentStatus::Pending);
    assert_eq!(pending.summary, "quick");

    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(statuses(&deployment), vec![StageStatus::Success, StageStatus::Success]);
    assert_eq!(plugin.executed(), vec!["A", "B"]);

    let trail: Vec<(u32, StageStatus)> = deployment
        .events
        .iter()
        .map(|e| (e.stage_index, e.status))
        .collect();
    assert_eq!(
        trail,
        vec![
            (0, StageStatus::Running),
            (0, StageStatus::Success),
            (1, StageStatus::Running),
            (1, StageStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_forward_failure_runs_rollback_and_keeps_reason() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "B", "C", "ROLLBACK"]).with_outcome("B", Outcome::Fail));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let stages = vec![
        stage(0, "A"),
        stage(1, "B"),
        stage(2, "C"),
        rollback_stage(3, "ROLLBACK"),
    ];
    let id = state.engine.submit(submission(stages)).await.unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(plugin.executed(), vec!["A", "B", "ROLLBACK"]);
    assert_eq!(
        statuses(&deployment),
        vec![
            StageStatus::Success,
            StageStatus::Failure,
            StageStatus::Skipped,
            StageStatus::Success,
        ]
    );
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert_eq!(
        deployment.status_reason.as_deref(),
        Some("stage B (1) failed: plugin reported failure")
    );
    assert_eq!(deployment.rollback_outcome.as_deref(), Some("rollback completed"));
}

#[tokio::test]
async fn test_failed_rollback_is_reported_separately() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(
        FakePlugin::new(&["A", "ROLLBACK"])
            .with_outcome("A", Outcome::Fail)
            .with_outcome("ROLLBACK", Outcome::Fail),
    );
    let (state, _queue) = fake_app(dir.path(), plugin).await;

    let id = state
        .engine
        .submit(submission(vec![stage(0, "A"), rollback_stage(1, "ROLLBACK")]))
        .await
        .unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert!(deployment.status_reason.unwrap().starts_with("stage A (0) failed"));
    assert!(deployment
        .rollback_outcome
        .unwrap()
        .starts_with("stage ROLLBACK (1) failed"));
}

#[tokio::test]
async fn test_success_skips_rollback_stages() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "ROLLBACK"]));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let id = state
        .engine
        .submit(submission(vec![stage(0, "A"), rollback_stage(1, "ROLLBACK")]))
        .await
        .unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(plugin.executed(), vec!["A"]);
    assert_eq!(deployment.stages[1].status, StageStatus::Skipped);
    assert_eq!(
        deployment.stages[1].status_reason.as_deref(),
        Some("deployment succeeded")
    );
}

#[tokio::test]
async fn test_plugin_error_fails_stage_with_output_in_logs() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(
        FakePlugin::new(&["A", "B"]).with_outcome("A", Outcome::Error("boom".to_string())),
    );
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert_eq!(plugin.executed(), vec!["A"]);
    assert_eq!(
        deployment.stages[0].status_reason.as_deref(),
        Some("execute stage A: Execution error: boom")
    );
    assert_eq!(deployment.stages[1].status, StageStatus::Skipped);

    let logs = state.engine.stage_logs(&id, 0).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "running A"));
    assert!(logs
        .iter()
        .any(|l| l.severity == Severity::Error && l.message == "fake command output"));
}

#[tokio::test]
async fn test_stage_metadata_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A"]));
    let (state, _queue) = fake_app(dir.path(), plugin).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(
        deployment.stages[0].metadata.get("attempts").map(String::as_str),
        Some("1")
    );
}

#[tokio::test]
async fn test_approval_gate_waits_for_operator() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "B"]));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let mut gated = stage(0, "A");
    gated.available_operation = ManualOperation::Approve;
    let id = state
        .engine
        .submit(submission(vec![gated, stage(1, "B")]))
        .await
        .unwrap();

    let engine = state.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run_deployment(&run_id).await });

    wait_for(&state, &id, |d| d.stages[0].status == StageStatus::WaitingApproval).await;
    assert!(plugin.executed().is_empty());

    // only the advertised operation is accepted
    let err = state
        .engine
        .operate(&id, 0, ManualOperation::Skip)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    state
        .engine
        .operate(&id, 0, ManualOperation::Approve)
        .await
        .unwrap();
    run.await.unwrap();

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(deployment.stages[0].approved);
    assert_eq!(plugin.executed(), vec!["A", "B"]);

    // finished deployments accept nothing
    assert!(state
        .engine
        .operate(&id, 0, ManualOperation::Approve)
        .await
        .is_err());
}

#[tokio::test]
async fn test_approval_recorded_before_run_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A"]));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let mut gated = stage(0, "A");
    gated.available_operation = ManualOperation::Approve;
    let id = state.engine.submit(submission(vec![gated])).await.unwrap();

    // nothing drives the deployment yet
    state
        .engine
        .operate(&id, 0, ManualOperation::Approve)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), state.engine.run_deployment(&id))
        .await
        .unwrap();

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(plugin.executed(), vec!["A"]);
}

#[tokio::test]
async fn test_skip_cancels_running_stage() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "B"]).with_outcome("A", Outcome::Block));
    let (state, _queue) = fake_app(dir.path(), plugin.clone()).await;

    let mut skippable = stage(0, "A");
    skippable.available_operation = ManualOperation::Skip;
    let id = state
        .engine
        .submit(submission(vec![skippable, stage(1, "B")]))
        .await
        .unwrap();

    let engine = state.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run_deployment(&run_id).await });

    wait_for(&state, &id, |d| d.stages[0].status == StageStatus::Running).await;
    state
        .engine
        .operate(&id, 0, ManualOperation::Skip)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.stages[0].status, StageStatus::Skipped);
    assert_eq!(
        deployment.stages[0].status_reason.as_deref(),
        Some("skipped by operator")
    );
    assert_eq!(deployment.stages[1].status, StageStatus::Success);
    assert_eq!(deployment.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_stage_timeout_fails_stage() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A"]).with_outcome("A", Outcome::Block));
    let options = EngineOptions {
        stage_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let (state, _queue) = app(
        dir.path(),
        registry_with(plugin),
        options,
        Arc::new(CountingInstaller::default()),
    )
    .await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.stages[0].status, StageStatus::Failure);
    assert!(deployment.stages[0]
        .status_reason
        .as_deref()
        .unwrap()
        .starts_with("stage timed out after"));
    assert_eq!(deployment.status, DeploymentStatus::Failure);
}

#[tokio::test]
async fn test_interrupt_leaves_stage_running() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A"]).with_outcome("A", Outcome::Block));
    let (state, _queue) = fake_app(dir.path(), plugin).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    let engine = state.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run_deployment(&run_id).await });

    wait_for(&state, &id, |d| d.stages[0].status == StageStatus::Running).await;
    state.engine.interrupt();
    run.await.unwrap();

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.stages[0].status, StageStatus::Running);
}

#[tokio::test]
async fn test_finished_deployment_releases_artifacts_and_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A", "B"]).with_outcome("B", Outcome::Fail));
    let (state, _queue) = fake_app(dir.path(), plugin).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state
        .artifacts
        .put(&id, "tfplan", b"plan", BTreeMap::new())
        .await
        .unwrap();
    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert!(state.artifacts.meta(&id, "tfplan").await.unwrap().is_none());
    assert!(!state.layout.artifacts_dir().subdir(&id).exists().await);
    assert!(!state.layout.workspaces_dir().subdir(&id).exists().await);

    // the record and the stage logs outlive the cleanup
    let logs = state.engine.stage_logs(&id, 0).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "running A"));
}

#[tokio::test]
async fn test_interrupted_deployment_keeps_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(FakePlugin::new(&["A"]).with_outcome("A", Outcome::Block));
    let (state, _queue) = fake_app(dir.path(), plugin).await;

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state
        .artifacts
        .put(&id, "tfplan", b"plan", BTreeMap::new())
        .await
        .unwrap();
    let engine = state.engine.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.run_deployment(&run_id).await });

    wait_for(&state, &id, |d| d.stages[0].status == StageStatus::Running).await;
    state.engine.interrupt();
    run.await.unwrap();

    assert!(state.artifacts.meta(&id, "tfplan").await.unwrap().is_some());
    assert!(state.layout.workspaces_dir().subdir(&id).exists().await);
}

#[tokio::test]
async fn test_resume_reinvokes_running_stage_only() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A", "B"]))).await;
        let id = state.engine.submit(submission(Vec::new())).await.unwrap();
        // as left behind by an agent that died while B ran
        state
            .store
            .update(&id, |d| {
                d.status = DeploymentStatus::Running;
                d.stages[0].status = StageStatus::Success;
                d.stages[1].status = StageStatus::Running;
                Ok(())
            })
            .await
            .unwrap();
        id
    };

    let plugin = Arc::new(FakePlugin::new(&["A", "B"]));
    let (state, mut queue) = fake_app(dir.path(), plugin.clone()).await;
    assert_eq!(state.engine.resume().await.unwrap(), 1);
    assert_eq!(queue.try_recv().unwrap(), id);

    state.engine.run_deployment(&id).await;

    let deployment = state.engine.deployment(&id).unwrap();
    assert_eq!(plugin.executed(), vec!["B"]);
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(deployment.events.iter().any(|e| e.stage_index == 1
        && e.status == StageStatus::Running
        && e.reason.as_deref() == Some("re-invoked after restart")));
}

#[tokio::test]
async fn test_resume_skips_finished_deployments() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;
        let id = state.engine.submit(submission(Vec::new())).await.unwrap();
        state.engine.run_deployment(&id).await;
    }

    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;
    assert_eq!(state.engine.resume().await.unwrap(), 0);
    assert_eq!(state.engine.deployments().len(), 1);
}

#[tokio::test]
async fn test_rejected_submissions_leave_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A"]))).await;

    let mut unknown_plugin = submission(Vec::new());
    unknown_plugin.plugin = "kubernetes".to_string();
    let err = state.engine.submit(unknown_plugin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = state
        .engine
        .submit(submission(vec![stage(0, "DEPLOY")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut bad_id = submission(Vec::new());
    bad_id.id = Some("../escape".to_string());
    assert!(state.engine.submit(bad_id).await.is_err());

    assert!(state.engine.deployments().is_empty());

    let mut first = submission(Vec::new());
    first.id = Some("deploy-1".to_string());
    state.engine.submit(first.clone()).await.unwrap();
    assert!(state.engine.submit(first).await.is_err());
    assert_eq!(state.engine.deployments().len(), 1);
}

#[tokio::test]
async fn test_subscribers_see_transitions_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _queue) = fake_app(dir.path(), Arc::new(FakePlugin::new(&["A", "B"]))).await;
    let mut events = state.engine.subscribe();

    let id = state.engine.submit(submission(Vec::new())).await.unwrap();
    state.engine.run_deployment(&id).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.deployment_id, id);
        seen.push((event.stage_name, event.status));
    }
    assert_eq!(
        seen,
        vec![
            ("A".to_string(), StageStatus::Running),
            ("A".to_string(), StageStatus::Success),
            ("B".to_string(), StageStatus::Running),
            ("B".to_string(), StageStatus::Success),
        ]
    );
}

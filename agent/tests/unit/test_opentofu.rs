//! OpenTofu plugin driven through the engine with a scripted `tofu` binary
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use piped::app::state::AppState;
use piped::deploy::{DeploymentStatus, EngineOptions, Submission};
use piped::errors::ErrorKind;
use piped::plugins::opentofu::{self, OpenTofuPlugin};
use piped::plugins::PluginRegistry;
use piped::reconciler::SyncStatus;
use piped::sdk::{DeployTarget, DeploymentSource, HealthStatus, StageStatus};

use crate::common::{app, CountingInstaller};

const FAKE_TOFU: &str = r##"#!/bin/sh
echo "$1" >> "$TOFU_LOG"
case "$1" in
  init)
    echo "OpenTofu has been successfully initialized!"
    ;;
  plan)
    for arg in "$@"; do
      case "$arg" in
        -out=*) out="${arg#-out=}" ;;
      esac
    done
    echo "plan of $(pwd -P)" > "$out"
    echo "Plan: 1 to add, 0 to change, 0 to destroy."
    ;;
  apply)
    if [ -f FAIL_APPLY ]; then
      echo "Error: apply failed" >&2
      exit 1
    fi
    echo "Apply complete!"
    ;;
  show)
    if [ $# -ge 4 ]; then cat plan.json; else cat state.json; fi
    ;;
esac
"##;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    state: AppState,
    installer: Arc<CountingInstaller>,
    _queue: tokio::sync::mpsc::UnboundedReceiver<String>,
}

impl Fixture {
    /// Agent with the OpenTofu plugin; `with_tofu` pre-installs the fake binary
    async fn new(with_tofu: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let data_dir = root.join("data");

        if with_tofu {
            let tools_dir = data_dir.join("tools");
            std::fs::create_dir_all(&tools_dir).unwrap();
            let binary = tools_dir.join(format!("tofu-{}", opentofu::tool::DEFAULT_VERSION));
            std::fs::write(&binary, FAKE_TOFU).unwrap();
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let plugin = Arc::new(OpenTofuPlugin::new());
        let mut plugins = PluginRegistry::new();
        plugins.register_deployment(plugin.clone());
        plugins.register_livestate(plugin);
        plugins.set_deploy_targets(
            opentofu::PLUGIN_NAME,
            vec![DeployTarget {
                name: "local".to_string(),
                config: json!({}),
            }],
        );

        let installer = Arc::new(CountingInstaller::default());
        let (state, queue) = app(&data_dir, plugins, EngineOptions::default(), installer.clone()).await;

        Self {
            _dir: dir,
            root,
            state,
            installer,
            _queue: queue,
        }
    }

    fn calls_log(&self) -> PathBuf {
        self.root.join("calls.log")
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.calls_log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Application checkout with a main.tf
    fn checkout(&self, name: &str) -> PathBuf {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.tf"), "resource \"null_resource\" \"a\" {}\n").unwrap();
        dir
    }

    fn source(&self, commit: &str, dir: &Path, pipeline: Option<serde_json::Value>) -> DeploymentSource {
        let mut config = json!({
            "spec": {"input": {"env": [format!("TOFU_LOG={}", self.calls_log().display())]}}
        });
        if let Some(pipeline) = pipeline {
            config["pipeline"] = pipeline;
        }
        DeploymentSource {
            commit_hash: commit.to_string(),
            application_directory: dir.display().to_string(),
            application_config: config,
        }
    }

    async fn deploy(&self, running: DeploymentSource, target: DeploymentSource) -> String {
        let id = self
            .state
            .engine
            .submit(Submission {
                application_id: "infra".to_string(),
                plugin: opentofu::PLUGIN_NAME.to_string(),
                running_source: running,
                target_source: target,
                ..Default::default()
            })
            .await
            .unwrap();
        self.state.engine.run_deployment(&id).await;
        id
    }
}

#[tokio::test]
async fn test_quick_sync_plans_then_applies() {
    let fx = Fixture::new(true).await;
    let app_dir = fx.checkout("app");

    let id = fx
        .deploy(DeploymentSource::default(), fx.source("abc123", &app_dir, None))
        .await;

    let deployment = fx.state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    let names: Vec<&str> = deployment.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![opentofu::STAGE_PLAN, opentofu::STAGE_APPLY]);
    assert_eq!(deployment.versions[0].version, "v1-abc123");
    assert_eq!(fx.calls(), vec!["init", "plan", "init", "apply"]);

    let plan_sha = deployment.stages[0].metadata.get("planSha256").unwrap();
    assert_eq!(plan_sha.len(), 64);
    let logs = fx.state.engine.stage_logs(&id, 0).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.message.contains(&format!("Stored the plan for commit abc123 ({})", plan_sha))));

    // the stored plan goes away with the finished deployment
    assert!(fx.state.artifacts.meta(&id, "tfplan").await.unwrap().is_none());

    // the binary on disk was reused, nothing was downloaded
    assert_eq!(fx.installer.calls(), 0);
}

#[tokio::test]
async fn test_failed_apply_rolls_back_to_running_commit() {
    let fx = Fixture::new(true).await;
    let running_dir = fx.checkout("running");
    let target_dir = fx.checkout("target");
    std::fs::write(target_dir.join("FAIL_APPLY"), "").unwrap();

    let pipeline = json!({"stages": [
        {"name": opentofu::STAGE_PLAN},
        {"name": opentofu::STAGE_APPLY}
    ]});
    let id = fx
        .deploy(
            fx.source("old", &running_dir, Some(pipeline.clone())),
            fx.source("new", &target_dir, Some(pipeline)),
        )
        .await;

    let deployment = fx.state.engine.deployment(&id).unwrap();
    let stages: Vec<(&str, StageStatus)> = deployment
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.status))
        .collect();
    assert_eq!(
        stages,
        vec![
            (opentofu::STAGE_PLAN, StageStatus::Success),
            (opentofu::STAGE_APPLY, StageStatus::Failure),
            (opentofu::STAGE_ROLLBACK, StageStatus::Success),
        ]
    );
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert!(deployment
        .status_reason
        .as_deref()
        .unwrap()
        .contains(opentofu::STAGE_APPLY));
    assert_eq!(deployment.rollback_outcome.as_deref(), Some("rollback completed"));
    assert_eq!(
        fx.calls(),
        vec!["init", "plan", "init", "apply", "init", "plan", "apply"]
    );

    let logs = fx.state.engine.stage_logs(&id, 1).await.unwrap();
    assert!(logs.iter().any(|l| l.message.contains("Error: apply failed")));
}

#[tokio::test]
async fn test_missing_config_fails_before_tool_acquisition() {
    let fx = Fixture::new(false).await;
    let app_dir = fx.root.join("empty");
    std::fs::create_dir_all(&app_dir).unwrap();

    let id = fx
        .deploy(DeploymentSource::default(), fx.source("abc123", &app_dir, None))
        .await;

    let deployment = fx.state.engine.deployment(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failure);
    assert_eq!(deployment.stages[0].status, StageStatus::Failure);
    let reason = deployment.stages[0].status_reason.clone().unwrap();
    assert!(reason.contains("main.tf does not exist"), "{}", reason);
    assert_eq!(deployment.stages[1].status, StageStatus::Skipped);

    assert_eq!(fx.installer.calls(), 0);
    assert!(fx.calls().is_empty());
}

#[tokio::test]
async fn test_livestate_reports_drift() {
    let fx = Fixture::new(true).await;
    let app_dir = fx.checkout("app");
    std::fs::write(
        app_dir.join("state.json"),
        json!({"format_version": "1.0", "values": {"root_module": {"resources": [
            {"address": "null_resource.a", "type": "null_resource", "name": "a", "values": {"id": "1"}}
        ]}}})
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        app_dir.join("plan.json"),
        json!({
            "planned_values": {"root_module": {"resources": [
                {"address": "null_resource.a", "type": "null_resource", "name": "a", "values": {}},
                {"address": "null_resource.b", "type": "null_resource", "name": "b", "values": {}}
            ]}},
            "resource_changes": [
                {"address": "null_resource.a", "change": {"actions": ["no-op"]}},
                {"address": "null_resource.b", "change": {"actions": ["create"]}}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let response = fx
        .state
        .engine
        .livestate("infra", opentofu::PLUGIN_NAME, Vec::new(), fx.source("abc123", &app_dir, None))
        .await
        .unwrap();

    assert_eq!(response.sync_state.status, SyncStatus::OutOfSync);
    assert!(response.sync_state.reason.contains("null_resource.b will be create"));
    assert_eq!(response.health_status, HealthStatus::Unknown);
    assert_eq!(response.resources.len(), 1);
    assert_eq!(response.resources[0].id, "null_resource.a");
    assert_eq!(response.resources[0].health_status, HealthStatus::Healthy);
    assert_eq!(fx.calls(), vec!["init", "show", "plan", "show"]);
}

#[tokio::test]
async fn test_livestate_requires_exactly_one_target() {
    let fx = Fixture::new(false).await;
    let app_dir = fx.checkout("app");
    let targets = vec![
        DeployTarget {
            name: "a".to_string(),
            config: json!({}),
        },
        DeployTarget {
            name: "b".to_string(),
            config: json!({}),
        },
    ];

    let err = fx
        .state
        .engine
        .livestate("infra", opentofu::PLUGIN_NAME, targets, fx.source("abc123", &app_dir, None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("only 1 deploy target is allowed but got 2"));
    assert_eq!(fx.installer.calls(), 0);
}

//! OpenTofu deployment operations

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use crate::errors::{AgentError, ResultExt};
use crate::plugins::opentofu::config::OpenTofuStageOptions;
use crate::plugins::opentofu::tool::Tofu;
use crate::plugins::opentofu::{
    locate, OpenTofuPlugin, Workdir, PLUGIN_NAME, PLUGIN_VERSION, STAGE_APPLY, STAGE_PLAN,
    STAGE_ROLLBACK,
};
use crate::process::CommandOutput;
use crate::sdk::{
    ArtifactKind, ArtifactVersion, DeploymentPlugin, DetermineStrategyInput, DetermineVersionsInput,
    ExecuteStageInput, StageRequest, StageSpec, StageStatus, StrategyDecision, SyncStrategy,
};

/// Artifact key of the plan made by OPEN_TOFU_PLAN
const PLAN_ARTIFACT: &str = "tfplan";
const ROLLBACK_PLAN_FILE: &str = "tfplan-rollback";
const COMMIT_LABEL: &str = "commit";

#[async_trait]
impl DeploymentPlugin for OpenTofuPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    async fn determine_versions(
        &self,
        input: &DetermineVersionsInput,
    ) -> Result<Vec<ArtifactVersion>, AgentError> {
        let source = &input.source;
        let version = if source.commit_hash.is_empty() {
            "v1".to_string()
        } else {
            format!("v1-{}", source.commit_hash)
        };

        Ok(vec![ArtifactVersion {
            kind: ArtifactKind::TerraformModule,
            version,
            name: source.application_directory.clone(),
            url: source.application_directory.clone(),
        }])
    }

    async fn determine_strategy(
        &self,
        input: &DetermineStrategyInput,
    ) -> Result<StrategyDecision, AgentError> {
        let config = input.target_source.config()?;
        if config.pipeline.is_some() {
            return Ok(StrategyDecision {
                strategy: SyncStrategy::PipelineSync,
                summary: "Sync with the specified pipeline".to_string(),
            });
        }
        Ok(StrategyDecision {
            strategy: SyncStrategy::QuickSync,
            summary: "Using QUICK_SYNC strategy for OpenTofu deployment".to_string(),
        })
    }

    async fn build_quick_sync_stages(&self) -> Result<Vec<StageSpec>, AgentError> {
        Ok(vec![
            stage(0, STAGE_PLAN, ""),
            stage(1, STAGE_APPLY, ""),
        ])
    }

    async fn build_pipeline_sync_stages(
        &self,
        stages: &[StageRequest],
        rollback: bool,
    ) -> Result<Vec<StageSpec>, AgentError> {
        let mut built = Vec::with_capacity(stages.len() + 1);
        for request in stages {
            let options = OpenTofuStageOptions::decode(&request.config)
                .with_context(|| format!("build stage {} ({})", request.name, request.index))?;
            let mut spec = stage(request.index, &request.name, &request.description);
            spec.available_operation = options.available_operation();
            spec.config = request.config.clone();
            built.push(spec);
        }

        if rollback {
            if let Some(last) = stages.iter().map(|s| s.index).max() {
                let mut spec = stage(last + 1, STAGE_ROLLBACK, "");
                spec.rollback = true;
                built.push(spec);
            }
        }
        Ok(built)
    }

    fn fetch_defined_stages(&self) -> Vec<String> {
        vec![
            STAGE_PLAN.to_string(),
            STAGE_APPLY.to_string(),
            STAGE_ROLLBACK.to_string(),
        ]
    }

    async fn execute_stage(&self, input: ExecuteStageInput) -> Result<StageStatus, AgentError> {
        info!(
            "Executing stage {} of deployment {}",
            input.stage.name, input.deployment.id
        );
        match input.stage.name.as_str() {
            STAGE_PLAN => self.execute_plan(&input).await?,
            STAGE_APPLY => self.execute_apply(&input).await?,
            STAGE_ROLLBACK => self.execute_rollback(&input).await?,
            other => {
                return Err(AgentError::ConfigError(format!(
                    "stage {} is not an OpenTofu stage",
                    other
                )))
            }
        }
        Ok(StageStatus::Success)
    }
}

fn stage(index: u32, name: &str, description: &str) -> StageSpec {
    let mut spec = StageSpec::new(index, name);
    let (default_description, command) = match name {
        STAGE_PLAN => ("Plan OpenTofu changes", Some("plan")),
        STAGE_APPLY => ("Apply OpenTofu changes", Some("apply")),
        STAGE_ROLLBACK => ("Roll back to the previously deployed commit", Some("rollback")),
        _ => ("", None),
    };
    spec.description = if description.is_empty() {
        default_description.to_string()
    } else {
        description.to_string()
    };
    if let Some(command) = command {
        spec.metadata.insert("command".to_string(), command.to_string());
    }
    spec
}

impl OpenTofuPlugin {
    /// Plan the target commit and keep the plan for the apply stage.
    ///
    /// A plan already stored for the same commit is reused.
    async fn execute_plan(&self, input: &ExecuteStageInput) -> Result<(), AgentError> {
        let workdir = locate(&input.target_source)
            .await
            .context("validate stage preconditions")?;
        let commit = &input.target_source.commit_hash;
        let artifacts = input.client.artifacts();

        if let Some(meta) = artifacts.meta(&input.deployment.id, PLAN_ARTIFACT).await? {
            if meta.labels.get(COMMIT_LABEL) == Some(commit) {
                input.logger.info(format!(
                    "Reusing the plan already made for commit {} ({})",
                    commit, meta.sha256
                ));
                return Ok(());
            }
        }

        let tofu = self.prepare(input, &workdir).await?;
        let plan_file = input.workspace.file(PLAN_ARTIFACT);
        let output = tofu
            .plan(&workdir.dir, &workdir.env, plan_file.path(), &input.cancel)
            .await?;
        log_output(input, &output);

        let data = tokio::fs::read(plan_file.path()).await.map_err(|e| {
            AgentError::ExecutionError {
                message: format!("tofu plan did not write {}: {}", plan_file.path().display(), e),
                output: output.combined(),
            }
        })?;

        let labels = BTreeMap::from([(COMMIT_LABEL.to_string(), commit.clone())]);
        let meta = artifacts
            .put(&input.deployment.id, PLAN_ARTIFACT, &data, labels)
            .await
            .context("store plan")?;
        input.metadata.put("planSha256", &meta.sha256).await?;

        input
            .logger
            .success(format!("Stored the plan for commit {} ({})", commit, meta.sha256));
        Ok(())
    }

    /// Apply the plan the plan stage stored for this deployment
    async fn execute_apply(&self, input: &ExecuteStageInput) -> Result<(), AgentError> {
        let workdir = locate(&input.target_source)
            .await
            .context("validate stage preconditions")?;
        let commit = &input.target_source.commit_hash;

        let artifact = input
            .client
            .artifacts()
            .get(&input.deployment.id, PLAN_ARTIFACT)
            .await?
            .ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "no plan stored for deployment {}, {} must run first",
                    input.deployment.id, STAGE_PLAN
                ))
            })?;
        match artifact.meta.labels.get(COMMIT_LABEL) {
            Some(planned) if planned == commit => {}
            planned => {
                return Err(AgentError::ConfigError(format!(
                    "stored plan was made for commit {}, not {}",
                    planned.map(String::as_str).unwrap_or("unknown"),
                    commit
                )))
            }
        }

        let tofu = self.prepare(input, &workdir).await?;
        let plan_file = input.workspace.file(PLAN_ARTIFACT);
        plan_file.write_atomic(&artifact.data).await?;

        let output = tofu
            .apply(&workdir.dir, &workdir.env, plan_file.path(), &input.cancel)
            .await?;
        log_output(input, &output);
        input
            .logger
            .success(format!("Applied the plan for commit {}", commit));
        Ok(())
    }

    /// Plan and apply the commit that was running before this deployment
    async fn execute_rollback(&self, input: &ExecuteStageInput) -> Result<(), AgentError> {
        let running = &input.running_source;
        if running.commit_hash.is_empty() {
            return Err(AgentError::ConfigError(
                "no previous deployment to roll back to".to_string(),
            ));
        }
        let workdir = locate(running)
            .await
            .context("validate stage preconditions")?;

        input
            .logger
            .info(format!("Rolling back to commit {}", running.commit_hash));
        let tofu = self.prepare(input, &workdir).await?;
        let plan_file = input.workspace.file(ROLLBACK_PLAN_FILE);

        let output = tofu
            .plan(&workdir.dir, &workdir.env, plan_file.path(), &input.cancel)
            .await?;
        log_output(input, &output);
        let output = tofu
            .apply(&workdir.dir, &workdir.env, plan_file.path(), &input.cancel)
            .await?;
        log_output(input, &output);

        input
            .logger
            .success(format!("Rolled back to commit {}", running.commit_hash));
        Ok(())
    }

    /// Acquire tofu and initialize the working directory
    async fn prepare(&self, input: &ExecuteStageInput, workdir: &Workdir) -> Result<Tofu, AgentError> {
        let version = self.tool_version(&workdir.spec, &input.deploy_targets)?;
        let tofu = self.tofu(&input.client, &version).await?;
        input.logger.info(format!(
            "Using OpenTofu {} in {}",
            tofu.version(),
            workdir.dir.display()
        ));

        let output = tofu.init(&workdir.dir, &workdir.env, &input.cancel).await?;
        log_output(input, &output);
        Ok(tofu)
    }
}

fn log_output(input: &ExecuteStageInput, output: &CommandOutput) {
    for line in output.combined().lines().filter(|l| !l.trim().is_empty()) {
        input.logger.info(line);
    }
}

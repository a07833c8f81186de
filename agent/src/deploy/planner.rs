//! Pipeline planning and validation

use std::collections::HashSet;

use tracing::info;

use crate::errors::{AgentError, ResultExt};
use crate::sdk::{
    DeploymentInfo, DeploymentPlugin, DeploymentSource, DetermineStrategyInput, StageRequest,
    StageSpec, SyncStrategy,
};

/// Stages a deployment will run and how they were chosen
#[derive(Debug, Clone)]
pub struct PlannedPipeline {
    /// None when the submitter supplied the stages
    pub strategy: Option<SyncStrategy>,
    pub summary: String,
    pub stages: Vec<StageSpec>,
}

/// Decide the stages of a deployment.
///
/// Submitted stages are validated as they are. Without them the plugin picks
/// a strategy and builds the stages for it.
pub async fn plan(
    plugin: &dyn DeploymentPlugin,
    deployment: &DeploymentInfo,
    running_source: &DeploymentSource,
    target_source: &DeploymentSource,
    submitted: Vec<StageSpec>,
) -> Result<PlannedPipeline, AgentError> {
    let defined = plugin.fetch_defined_stages();

    if !submitted.is_empty() {
        validate_stages(&submitted, &defined)?;
        return Ok(PlannedPipeline {
            strategy: None,
            summary: "Using the submitted pipeline".to_string(),
            stages: submitted,
        });
    }

    let decision = plugin
        .determine_strategy(&DetermineStrategyInput {
            deployment: deployment.clone(),
            running_source: running_source.clone(),
            target_source: target_source.clone(),
        })
        .await
        .context("determine strategy")?;

    let stages = match decision.strategy {
        SyncStrategy::QuickSync => plugin
            .build_quick_sync_stages()
            .await
            .context("build quick sync stages")?,
        SyncStrategy::PipelineSync => {
            let config = target_source.config()?;
            let pipeline = config.pipeline.unwrap_or_default();
            let requests: Vec<StageRequest> = pipeline
                .stages
                .into_iter()
                .enumerate()
                .map(|(i, s)| StageRequest {
                    index: i as u32,
                    name: s.name,
                    description: s.desc,
                    config: s.with,
                })
                .collect();
            plugin
                .build_pipeline_sync_stages(&requests, config.planner.auto_rollback)
                .await
                .context("build pipeline sync stages")?
        }
    };

    validate_stages(&stages, &defined).context(format!("plugin {} built an invalid pipeline", plugin.name()))?;
    info!(
        "Planned deployment {} with {} ({} stages)",
        deployment.id,
        decision.strategy.as_str(),
        stages.len()
    );

    Ok(PlannedPipeline {
        strategy: Some(decision.strategy),
        summary: decision.summary,
        stages,
    })
}

/// Check the pipeline invariants: at least one stage, indices contiguous from
/// zero in order, rollback stages after every forward stage and only stage
/// names the plugin defines.
pub fn validate_stages(stages: &[StageSpec], defined: &[String]) -> Result<(), AgentError> {
    if stages.is_empty() {
        return Err(AgentError::ValidationError("pipeline has no stages".to_string()));
    }

    let defined: HashSet<&str> = defined.iter().map(String::as_str).collect();
    let mut seen_rollback = false;

    for (position, stage) in stages.iter().enumerate() {
        if stage.index != position as u32 {
            return Err(AgentError::ValidationError(format!(
                "stage {} has index {}, expected {}",
                stage.name, stage.index, position
            )));
        }
        if !defined.contains(stage.name.as_str()) {
            return Err(AgentError::ValidationError(format!(
                "unknown stage name {}",
                stage.name
            )));
        }
        if stage.rollback {
            seen_rollback = true;
        } else if seen_rollback {
            return Err(AgentError::ValidationError(format!(
                "forward stage {} follows a rollback stage",
                stage.name
            )));
        }
    }

    if stages.iter().all(|s| s.rollback) {
        return Err(AgentError::ValidationError(
            "pipeline has no forward stages".to_string(),
        ));
    }
    Ok(())
}

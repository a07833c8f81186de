//! Plugin traits

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::logpersister::StageLogger;
use crate::sdk::client::{MetadataStore, PluginClient};
use crate::sdk::models::{
    ArtifactVersion, DeployTarget, DeploymentInfo, DeploymentSource, LivestateResponse,
    StageRequest, StageSpec, StageStatus, StrategyDecision,
};

#[derive(Debug, Clone)]
pub struct DetermineVersionsInput {
    pub deployment: DeploymentInfo,
    pub source: DeploymentSource,
}

#[derive(Debug, Clone)]
pub struct DetermineStrategyInput {
    pub deployment: DeploymentInfo,
    pub running_source: DeploymentSource,
    pub target_source: DeploymentSource,
}

/// Everything a stage invocation gets
pub struct ExecuteStageInput {
    pub deployment: DeploymentInfo,

    /// The stage being run, with its decoded options in `config`
    pub stage: StageSpec,

    pub running_source: DeploymentSource,
    pub target_source: DeploymentSource,
    pub deploy_targets: Vec<DeployTarget>,

    pub metadata: Arc<dyn MetadataStore>,
    pub logger: StageLogger,
    pub client: PluginClient,

    /// Directory private to this deployment, kept across stages
    pub workspace: Dir,

    /// Fires when the stage must stop, e.g. an operator skipped it
    pub cancel: CancellationToken,
}

pub struct GetLivestateInput {
    pub application_id: String,
    pub source: DeploymentSource,
    pub client: PluginClient,
    pub cancel: CancellationToken,
}

/// A platform plugin able to deploy applications
#[async_trait]
pub trait DeploymentPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Artifacts the target source brings in
    async fn determine_versions(
        &self,
        input: &DetermineVersionsInput,
    ) -> Result<Vec<ArtifactVersion>, AgentError>;

    /// Quick or pipeline sync
    async fn determine_strategy(
        &self,
        input: &DetermineStrategyInput,
    ) -> Result<StrategyDecision, AgentError>;

    /// The fixed stage list of the quick path
    async fn build_quick_sync_stages(&self) -> Result<Vec<StageSpec>, AgentError>;

    /// Shape declared stages into executable ones. Indices keep the declared
    /// order; with `rollback` the rollback stages follow every forward stage.
    async fn build_pipeline_sync_stages(
        &self,
        stages: &[StageRequest],
        rollback: bool,
    ) -> Result<Vec<StageSpec>, AgentError>;

    /// Names of every stage this plugin can execute
    fn fetch_defined_stages(&self) -> Vec<String>;

    async fn execute_stage(&self, input: ExecuteStageInput) -> Result<StageStatus, AgentError>;
}

/// A platform plugin able to report live state
#[async_trait]
pub trait LivestatePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Exactly one deploy target is accepted
    async fn get_livestate(
        &self,
        deploy_targets: &[DeployTarget],
        input: GetLivestateInput,
    ) -> Result<LivestateResponse, AgentError>;
}

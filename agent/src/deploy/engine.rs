//! Stage execution engine
//!
//! Walks deployments through their stages. Deployments run concurrently (the
//! deployer worker decides how many at once); stages of one deployment run
//! strictly one after another. Every transition is persisted before the next
//! step so a restarted agent picks up where it stopped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, StageFsm, StageTransition};
use crate::deploy::model::{Deployment, DeploymentStatus, Stage, StageEvent};
use crate::deploy::planner;
use crate::deploy::store::{DeploymentStore, StageMetadataHandle};
use crate::errors::{AgentError, ErrorKind, ResultExt};
use crate::filesys::dir::Dir;
use crate::logpersister::{LogLine, LogPersister};
use crate::plugins::PluginRegistry;
use crate::sdk::{
    DeployTarget, DeploymentInfo, DeploymentPlugin, DeploymentSource, DetermineVersionsInput,
    ExecuteStageInput, GetLivestateInput, LivestateResponse, ManualOperation, PluginClient,
    StageSpec, StageStatus,
};
use crate::toolregistry::ToolRegistry;
use crate::utils::generate_uuid;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Stamped on every deployment
    pub piped_id: String,

    /// Upper bound on one stage invocation
    pub stage_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            piped_id: "local".to_string(),
            stage_timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Services the engine drives deployments with
pub struct EngineParts {
    pub store: Arc<DeploymentStore>,
    pub plugins: Arc<PluginRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub artifacts: Arc<ArtifactStore>,
    pub logs: Arc<LogPersister>,

    /// Parent of the per-deployment workspaces
    pub workspaces_dir: Dir,

    /// Parent of plugin scratch directories
    pub scratch_dir: Dir,
}

/// A deployment request
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Generated when absent
    pub id: Option<String>,
    pub application_id: String,
    pub plugin: String,

    /// Pre-built pipeline; empty lets the plugin plan it
    pub stages: Vec<StageSpec>,

    pub running_source: DeploymentSource,
    pub target_source: DeploymentSource,
}

/// How a stage ended for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
enum StageOutcome {
    Succeeded,
    Skipped,
    Failed(String),

    /// The agent is stopping; the stage resumes on restart
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PhaseOutcome {
    Succeeded,
    Failed(String),
    Interrupted,
}

/// Operator signals for one deployment
#[derive(Default)]
struct DeploymentControl {
    notify: Notify,
    running: Mutex<Option<(u32, CancellationToken)>>,
}

impl DeploymentControl {
    fn set_running(&self, index: u32, token: CancellationToken) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *running = Some((index, token));
    }

    fn clear_running(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        *running = None;
    }

    fn cancel_running(&self, index: u32) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((running_index, token)) = running.as_ref() {
            if *running_index == index {
                token.cancel();
            }
        }
    }
}

/// Stage execution engine
pub struct Engine {
    options: EngineOptions,
    store: Arc<DeploymentStore>,
    plugins: Arc<PluginRegistry>,
    tools: Arc<ToolRegistry>,
    artifacts: Arc<ArtifactStore>,
    logs: Arc<LogPersister>,
    workspaces_dir: Dir,
    scratch_dir: Dir,
    queue: mpsc::UnboundedSender<String>,
    controls: Mutex<HashMap<String, Arc<DeploymentControl>>>,
    active: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create the engine and the queue of deployment ids it wants run.
    ///
    /// The receiver belongs to the deployer worker.
    pub fn new(
        options: EngineOptions,
        parts: EngineParts,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            options,
            store: parts.store,
            plugins: parts.plugins,
            tools: parts.tools,
            artifacts: parts.artifacts,
            logs: parts.logs,
            workspaces_dir: parts.workspaces_dir,
            scratch_dir: parts.scratch_dir,
            queue,
            controls: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        });
        (engine, rx)
    }

    // ============================== OPERATOR API ================================ //

    /// Accept a deployment and queue it. Returns its id.
    ///
    /// Rejections (unknown plugin, invalid pipeline, planning failures) are
    /// returned as errors and leave no record behind.
    pub async fn submit(&self, submission: Submission) -> Result<String, AgentError> {
        if submission.application_id.is_empty() {
            return Err(AgentError::ValidationError("application id is required".to_string()));
        }
        let plugin = self.plugins.deployment(&submission.plugin)?;

        let id = match submission.id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => generate_uuid(),
        };
        if self.store.get(&id).is_some() {
            return Err(AgentError::ValidationError(format!("deployment {} already exists", id)));
        }

        let info = DeploymentInfo {
            id: id.clone(),
            application_id: submission.application_id.clone(),
            piped_id: self.options.piped_id.clone(),
            plugin: submission.plugin.clone(),
        };

        let pipeline = planner::plan(
            plugin.as_ref(),
            &info,
            &submission.running_source,
            &submission.target_source,
            submission.stages,
        )
        .await
        .context("plan deployment")?;

        let versions = plugin
            .determine_versions(&DetermineVersionsInput {
                deployment: info.clone(),
                source: submission.target_source.clone(),
            })
            .await
            .context("determine versions")?;

        let now = Utc::now();
        let deployment = Deployment {
            id: id.clone(),
            application_id: info.application_id,
            piped_id: info.piped_id,
            plugin: info.plugin,
            running_source: submission.running_source,
            target_source: submission.target_source,
            strategy: pipeline.strategy,
            summary: pipeline.summary,
            versions,
            stages: pipeline
                .stages
                .into_iter()
                .map(|spec| Stage::from_spec(spec, now))
                .collect(),
            status: DeploymentStatus::Pending,
            status_reason: None,
            rollback_outcome: None,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert(deployment).await?;
        info!("Accepted deployment {} of application {}", id, submission.application_id);
        self.enqueue(&id);
        Ok(id)
    }

    pub fn deployment(&self, id: &str) -> Option<Deployment> {
        self.store.get(id)
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.store.list()
    }

    /// Live stream of stage transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.store.subscribe()
    }

    /// Log lines of a stage
    pub async fn stage_logs(&self, id: &str, index: u32) -> Result<Vec<LogLine>, AgentError> {
        let deployment = self
            .store
            .get(id)
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
        deployment.stage(index)?;
        self.logs.read(id, index).await
    }

    /// Apply an operator action to a stage.
    ///
    /// Only the operation the stage advertises is accepted, and only while
    /// the stage has not finished.
    pub async fn operate(
        &self,
        id: &str,
        index: u32,
        operation: ManualOperation,
    ) -> Result<(), AgentError> {
        if operation == ManualOperation::None {
            return Err(AgentError::ValidationError("no operation given".to_string()));
        }

        self.store
            .update(id, |deployment| {
                if deployment.status.is_terminal() {
                    return Err(AgentError::ValidationError(format!(
                        "deployment {} already finished with {}",
                        deployment.id,
                        deployment.status.as_str()
                    )));
                }
                let stage = deployment.stage_mut(index)?;
                if stage.available_operation != operation {
                    return Err(AgentError::ValidationError(format!(
                        "stage {} does not accept {}",
                        stage.name, operation
                    )));
                }
                if stage.status.is_terminal() {
                    return Err(AgentError::ValidationError(format!(
                        "stage {} already finished with {}",
                        stage.name, stage.status
                    )));
                }
                match operation {
                    ManualOperation::Approve if stage.approved => Err(AgentError::ValidationError(
                        format!("stage {} is already approved", stage.name),
                    )),
                    ManualOperation::Approve => {
                        stage.approved = true;
                        Ok(())
                    }
                    ManualOperation::Skip => {
                        stage.skip_requested = true;
                        Ok(())
                    }
                    ManualOperation::None => Ok(()),
                }
            })
            .await?;

        // a deployment that is not being driven picks the change up from its record
        let control = {
            let controls = self.controls.lock().unwrap_or_else(|e| e.into_inner());
            controls.get(id).cloned()
        };
        if let Some(control) = control {
            if operation == ManualOperation::Skip {
                control.cancel_running(index);
            }
            control.notify.notify_one();
        }

        info!("Applied {} to stage {} of deployment {}", operation, index, id);
        Ok(())
    }

    /// Report the live state of an application through its plugin
    pub async fn livestate(
        &self,
        application_id: &str,
        plugin: &str,
        deploy_targets: Vec<DeployTarget>,
        source: DeploymentSource,
    ) -> Result<LivestateResponse, AgentError> {
        let livestate = self.plugins.livestate(plugin)?;
        let targets = if deploy_targets.is_empty() {
            self.plugins.deploy_targets(plugin)
        } else {
            deploy_targets
        };

        let cancel = self.shutdown.child_token();
        let input = GetLivestateInput {
            application_id: application_id.to_string(),
            source,
            client: self.plugin_client(),
            cancel: cancel.clone(),
        };

        let result = tokio::time::timeout(
            self.options.stage_timeout,
            livestate.get_livestate(&targets, input),
        )
        .await;
        cancel.cancel();

        match result {
            Ok(response) => response.with_context(|| format!("get livestate of {}", application_id)),
            Err(_) => Err(AgentError::Cancelled(format!(
                "livestate of {} timed out after {:?}",
                application_id, self.options.stage_timeout
            ))),
        }
    }

    /// Queue every deployment that did not finish before the last stop.
    pub async fn resume(&self) -> Result<usize, AgentError> {
        let deployments = self.store.load().await?;
        let mut resumed = 0;
        for deployment in deployments.iter().filter(|d| !d.status.is_terminal()) {
            info!(
                "Resuming deployment {} ({})",
                deployment.id,
                deployment.status.as_str()
            );
            self.enqueue(&deployment.id);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Stop running stages without recording an outcome; they are re-run
    /// on the next start.
    pub fn interrupt(&self) {
        self.shutdown.cancel();
    }

    fn enqueue(&self, id: &str) {
        if self.queue.send(id.to_string()).is_err() {
            warn!("Deployer worker is gone, deployment {} stays queued on disk", id);
        }
    }

    /// Drop what a finished deployment no longer needs: its artifacts and
    /// its workspace. Records and stage logs stay.
    async fn release(&self, id: &str) {
        if let Err(e) = self.artifacts.remove_deployment(id).await {
            warn!("Failed to remove artifacts of deployment {}: {}", id, e);
        }
        if let Err(e) = self.workspaces_dir.subdir(id).delete().await {
            warn!("Failed to remove workspace of deployment {}: {}", id, e);
        }
        debug!("Released resources of deployment {}", id);
    }

    fn control(&self, id: &str) -> Arc<DeploymentControl> {
        let mut controls = self.controls.lock().unwrap_or_else(|e| e.into_inner());
        controls.entry(id.to_string()).or_default().clone()
    }

    fn plugin_client(&self) -> PluginClient {
        PluginClient::new(
            self.tools.clone(),
            self.artifacts.clone(),
            self.scratch_dir.clone(),
        )
    }

    // ================================ EXECUTION ================================= //

    /// Drive a deployment until it finishes or the agent stops
    pub async fn run_deployment(&self, id: &str) {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(id.to_string()) {
                debug!("Deployment {} is already running", id);
                return;
            }
        }

        let finished = match self.drive(id).await {
            Ok(None) => {
                info!("Deployment {} interrupted, it resumes on restart", id);
                false
            }
            Ok(Some(status)) => {
                info!("Deployment {} finished with {}", id, status.as_str());
                true
            }
            Err(e) => {
                error!("Deployment {} failed: {}", id, e);
                match self.abort(id, e.to_string()).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to record failure of deployment {}: {}", id, e);
                        false
                    }
                }
            }
        };
        if finished {
            self.release(id).await;
        }

        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(id);
        }
        let mut controls = self.controls.lock().unwrap_or_else(|e| e.into_inner());
        controls.remove(id);
    }

    /// Returns the terminal status, or None when interrupted
    async fn drive(&self, id: &str) -> Result<Option<DeploymentStatus>, AgentError> {
        if self.shutdown.is_cancelled() {
            return Ok(None);
        }
        let deployment = self
            .store
            .get(id)
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
        if deployment.status.is_terminal() {
            return Ok(Some(deployment.status));
        }
        let plugin = self.plugins.deployment(&deployment.plugin)?;

        if deployment.status == DeploymentStatus::Pending {
            self.transition_deployment(id, DeploymentEvent::Start).await?;
        }

        let forward = if deployment.status == DeploymentStatus::RollingBack {
            PhaseOutcome::Failed(deployment.status_reason.clone().unwrap_or_default())
        } else {
            self.run_forward(plugin.as_ref(), id).await?
        };

        let reason = match forward {
            PhaseOutcome::Interrupted => return Ok(None),
            PhaseOutcome::Succeeded => {
                self.skip_remaining(id, true, "deployment succeeded").await?;
                self.transition_deployment(id, DeploymentEvent::Succeed).await?;
                return Ok(Some(DeploymentStatus::Success));
            }
            PhaseOutcome::Failed(reason) => reason,
        };

        self.skip_remaining(id, false, "not reached, an earlier stage failed")
            .await?;

        let current = self.current(id)?;
        if current.rollback_indices().is_empty() {
            self.transition_deployment(id, DeploymentEvent::Fail(reason)).await?;
            return Ok(Some(DeploymentStatus::Failure));
        }
        if current.status != DeploymentStatus::RollingBack {
            self.transition_deployment(id, DeploymentEvent::StartRollback(reason))
                .await?;
        }

        let outcome = match self.run_rollback(plugin.as_ref(), id).await? {
            PhaseOutcome::Interrupted => return Ok(None),
            PhaseOutcome::Succeeded => "rollback completed".to_string(),
            PhaseOutcome::Failed(reason) => reason,
        };
        self.transition_deployment(id, DeploymentEvent::FinishRollback(outcome))
            .await?;
        Ok(Some(DeploymentStatus::Failure))
    }

    async fn run_forward(
        &self,
        plugin: &dyn DeploymentPlugin,
        id: &str,
    ) -> Result<PhaseOutcome, AgentError> {
        for index in self.current(id)?.forward_indices() {
            let stage = self.current(id)?.stage(index)?.clone();
            match stage.status {
                StageStatus::Success | StageStatus::Skipped => continue,
                StageStatus::Failure => {
                    return Ok(PhaseOutcome::Failed(stage_failure(
                        &stage,
                        stage.status_reason.as_deref().unwrap_or("failed"),
                    )));
                }
                _ => {}
            }

            match self.run_stage(plugin, id, index).await? {
                StageOutcome::Succeeded | StageOutcome::Skipped => {}
                StageOutcome::Failed(reason) => {
                    return Ok(PhaseOutcome::Failed(stage_failure(&stage, &reason)));
                }
                StageOutcome::Interrupted => return Ok(PhaseOutcome::Interrupted),
            }
        }
        Ok(PhaseOutcome::Succeeded)
    }

    /// Every rollback stage runs even when an earlier one fails
    async fn run_rollback(
        &self,
        plugin: &dyn DeploymentPlugin,
        id: &str,
    ) -> Result<PhaseOutcome, AgentError> {
        let mut failures = Vec::new();
        for index in self.current(id)?.rollback_indices() {
            let stage = self.current(id)?.stage(index)?.clone();
            let outcome = match stage.status {
                StageStatus::Success | StageStatus::Skipped => continue,
                StageStatus::Failure => StageOutcome::Failed(
                    stage.status_reason.clone().unwrap_or_else(|| "failed".to_string()),
                ),
                _ => self.run_stage(plugin, id, index).await?,
            };
            match outcome {
                StageOutcome::Succeeded | StageOutcome::Skipped => {}
                StageOutcome::Failed(reason) => failures.push(stage_failure(&stage, &reason)),
                StageOutcome::Interrupted => return Ok(PhaseOutcome::Interrupted),
            }
        }

        if failures.is_empty() {
            Ok(PhaseOutcome::Succeeded)
        } else {
            Ok(PhaseOutcome::Failed(failures.join("; ")))
        }
    }

    async fn run_stage(
        &self,
        plugin: &dyn DeploymentPlugin,
        id: &str,
        index: u32,
    ) -> Result<StageOutcome, AgentError> {
        let control = self.control(id);

        // approval gate
        loop {
            let stage = self.current(id)?.stage(index)?.clone();
            if stage.skip_requested {
                self.transition_stage(id, index, StageTransition::Skip("skipped by operator".to_string()))
                    .await?;
                return Ok(StageOutcome::Skipped);
            }
            if stage.available_operation != ManualOperation::Approve
                || stage.approved
                || stage.status == StageStatus::Running
            {
                break;
            }
            if stage.status == StageStatus::Pending {
                self.transition_stage(id, index, StageTransition::AwaitApproval)
                    .await?;
                info!("Stage {} of deployment {} waits for approval", stage.name, id);
            }
            tokio::select! {
                _ = control.notify.notified() => {}
                _ = self.shutdown.cancelled() => return Ok(StageOutcome::Interrupted),
            }
        }

        let deployment = self.current(id)?;
        let stage = deployment.stage(index)?.clone();
        let transition = if stage.status == StageStatus::Running {
            StageTransition::Resume
        } else {
            StageTransition::Start
        };
        self.transition_stage(id, index, transition).await?;

        let cancel = CancellationToken::new();
        control.set_running(index, cancel.clone());
        // a skip may have landed before the token was registered
        if self.current(id)?.stage(index)?.skip_requested {
            cancel.cancel();
        }

        let workspace = self.workspaces_dir.subdir(id);
        workspace.create().await?;
        let logger = self.logs.stage_logger(id, index);
        logger.info(format!("Starting stage {} ({})", stage.name, stage.index));

        let input = ExecuteStageInput {
            deployment: deployment.info(),
            stage: stage.spec(),
            running_source: deployment.running_source.clone(),
            target_source: deployment.target_source.clone(),
            deploy_targets: self.plugins.deploy_targets(&deployment.plugin),
            metadata: Arc::new(StageMetadataHandle::new(
                self.store.clone(),
                id.to_string(),
                index,
            )),
            logger: logger.clone(),
            client: self.plugin_client(),
            workspace,
            cancel: cancel.clone(),
        };

        let result = tokio::select! {
            result = tokio::time::timeout(self.options.stage_timeout, plugin.execute_stage(input)) => Some(result),
            _ = self.shutdown.cancelled() => None,
        };
        control.clear_running();

        let Some(result) = result else {
            logger.info("Agent is stopping, the stage will be re-run");
            logger.flush().await;
            return Ok(StageOutcome::Interrupted);
        };

        let skip_requested = self.current(id)?.stage(index)?.skip_requested;
        let transition = match result {
            Ok(Ok(StageStatus::Success)) => StageTransition::Succeed,
            _ if skip_requested => StageTransition::Skip("skipped by operator".to_string()),
            Err(_) => StageTransition::Fail(format!(
                "stage timed out after {:?}",
                self.options.stage_timeout
            )),
            Ok(Ok(StageStatus::Skipped)) => StageTransition::Skip("skipped by plugin".to_string()),
            Ok(Ok(StageStatus::Failure)) => {
                StageTransition::Fail("plugin reported failure".to_string())
            }
            Ok(Ok(other)) => StageTransition::Fail(format!(
                "plugin returned non-terminal status {}",
                other
            )),
            Ok(Err(e)) => {
                let e = e.context(format!("execute stage {}", stage.name));
                if let Some(output) = e.output() {
                    logger.error(output.to_string());
                }
                if e.kind() == ErrorKind::StateFormat {
                    logger.error("The tool ran but its output could not be decoded");
                }
                StageTransition::Fail(e.to_string())
            }
        };

        let outcome = match &transition {
            StageTransition::Succeed => {
                logger.success(format!("Stage {} succeeded", stage.name));
                StageOutcome::Succeeded
            }
            StageTransition::Skip(reason) => {
                logger.info(format!("Stage {} skipped: {}", stage.name, reason));
                StageOutcome::Skipped
            }
            StageTransition::Fail(reason) => {
                logger.error(format!("Stage {} failed: {}", stage.name, reason));
                StageOutcome::Failed(reason.clone())
            }
            _ => StageOutcome::Failed("unexpected stage transition".to_string()),
        };
        logger.flush().await;

        self.transition_stage(id, index, transition).await?;
        Ok(outcome)
    }

    /// Mark every not yet finished stage of one kind as skipped
    async fn skip_remaining(&self, id: &str, rollback: bool, reason: &str) -> Result<(), AgentError> {
        let deployment = self.current(id)?;
        let indices = if rollback {
            deployment.rollback_indices()
        } else {
            deployment.forward_indices()
        };
        for index in indices {
            if !deployment.stage(index)?.status.is_terminal() {
                self.transition_stage(id, index, StageTransition::Skip(reason.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Fail a deployment that cannot be driven any further
    async fn abort(&self, id: &str, reason: String) -> Result<(), AgentError> {
        let Some(deployment) = self.store.get(id) else {
            return Ok(());
        };
        if deployment.status.is_terminal() {
            return Ok(());
        }

        let stages_reason = format!("deployment aborted: {}", reason);
        self.skip_remaining(id, false, &stages_reason).await?;
        self.skip_remaining(id, true, &stages_reason).await?;
        self.transition_deployment(id, DeploymentEvent::Fail(reason)).await
    }

    fn current(&self, id: &str) -> Result<Deployment, AgentError> {
        self.store
            .get(id)
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))
    }

    async fn transition_deployment(&self, id: &str, event: DeploymentEvent) -> Result<(), AgentError> {
        self.store
            .update(id, |deployment| {
                let mut fsm = DeploymentFsm::restore(
                    deployment.status,
                    deployment.status_reason.clone(),
                    deployment.rollback_outcome.clone(),
                );
                fsm.process(event)?;
                deployment.status = fsm.state();
                deployment.status_reason = fsm.reason().map(str::to_string);
                deployment.rollback_outcome = fsm.rollback_outcome().map(str::to_string);
                Ok(())
            })
            .await
    }

    async fn transition_stage(
        &self,
        id: &str,
        index: u32,
        transition: StageTransition,
    ) -> Result<(), AgentError> {
        self.store
            .update(id, |deployment| {
                let deployment_id = deployment.id.clone();
                let stage = deployment.stage_mut(index)?;
                let mut fsm = StageFsm::new(stage.status);
                fsm.process(transition)?;

                let now = Utc::now();
                stage.status = fsm.state();
                stage.status_reason = fsm.reason().map(str::to_string);
                stage.updated_at = now;
                let event = StageEvent {
                    deployment_id,
                    stage_index: stage.index,
                    stage_name: stage.name.clone(),
                    status: stage.status,
                    reason: stage.status_reason.clone(),
                    at: now,
                };
                debug!(
                    "Stage {} of deployment {} is now {}",
                    event.stage_name, event.deployment_id, event.status
                );
                deployment.events.push(event);
                Ok(())
            })
            .await
    }
}

fn stage_failure(stage: &Stage, reason: &str) -> String {
    format!("stage {} ({}) failed: {}", stage.name, stage.index, reason)
}

// ids become file names
fn validate_id(id: &str) -> Result<(), AgentError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(AgentError::ValidationError(format!("invalid deployment id {:?}", id)))
    }
}

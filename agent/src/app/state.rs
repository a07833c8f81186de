//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::deploy::engine::{Engine, EngineOptions, EngineParts};
use crate::deploy::store::DeploymentStore;
use crate::errors::AgentError;
use crate::logpersister::LogPersister;
use crate::plugins::PluginRegistry;
use crate::storage::layout::StorageLayout;
use crate::toolregistry::{ScriptInstaller, ToolInstaller, ToolRegistry};

/// Main application state
pub struct AppState {
    /// Where everything is stored
    pub layout: StorageLayout,

    /// Deployment records
    pub store: Arc<DeploymentStore>,

    /// Installed tool binaries
    pub tools: Arc<ToolRegistry>,

    /// Cross-stage artifacts
    pub artifacts: Arc<ArtifactStore>,

    /// Stage log files
    pub logs: Arc<LogPersister>,

    /// Stage execution engine
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Also returns the queue of deployments the engine wants run, for the
    /// deployer worker.
    pub async fn init(
        layout: &StorageLayout,
        engine_options: EngineOptions,
        plugins: PluginRegistry,
        installer: Arc<dyn ToolInstaller>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), AgentError> {
        info!("Initializing application state in {}...", layout.base_dir.display());
        layout.setup().await?;

        let store = Arc::new(DeploymentStore::new(layout.deployments_dir()));
        let tools = Arc::new(ToolRegistry::new(
            layout.tools_dir(),
            layout.tmp_dir(),
            installer,
        ));
        let artifacts = Arc::new(ArtifactStore::new(layout.artifacts_dir()));
        let logs = Arc::new(LogPersister::new(layout.stage_logs_dir()));

        let (engine, queue) = Engine::new(
            engine_options,
            EngineParts {
                store: store.clone(),
                plugins: Arc::new(plugins),
                tools: tools.clone(),
                artifacts: artifacts.clone(),
                logs: logs.clone(),
                workspaces_dir: layout.workspaces_dir(),
                scratch_dir: layout.tmp_dir(),
            },
        );

        let state = Self {
            layout: layout.clone(),
            store,
            tools,
            artifacts,
            logs,
            engine,
        };
        Ok((state, queue))
    }

    /// Initialize with the shell script tool installer
    pub async fn init_default(
        layout: &StorageLayout,
        engine_options: EngineOptions,
        plugins: PluginRegistry,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), AgentError> {
        Self::init(layout, engine_options, plugins, Arc::new(ScriptInstaller::new())).await
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        let tmp = self.layout.tmp_dir();
        tmp.delete().await?;
        Ok(())
    }
}

//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::plugins::PluginRegistry;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::deployer;

/// Run piped until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    plugins: PluginRegistry,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing piped...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, plugins, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start piped: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    plugins: PluginRegistry,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, AgentError> {
    let (app_state, queue) = AppState::init_default(
        &options.storage.layout,
        options.engine.clone(),
        plugins,
    )
    .await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_deployer_worker(
        options.deployer.clone(),
        app_state.clone(),
        queue,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    let resumed = app_state.engine.resume().await?;
    if resumed > 0 {
        info!("Resumed {} unfinished deployments", resumed);
    }

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_deployer_worker(
    options: deployer::Options,
    app_state: Arc<AppState>,
    queue: mpsc::UnboundedReceiver<String>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing deployer worker...");

    let engine = app_state.engine.clone();
    let deployer_handle = tokio::spawn(async move {
        deployer::run(
            &options,
            engine,
            queue,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_deployer_worker_handle(deployer_handle)?;
    Ok(())
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state.engine.clone());
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    deployer_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            deployer_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AgentError> {
        if self.app_state.is_some() {
            return Err(AgentError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.deployer_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("deployer_handle already set".to_string()));
        }
        self.deployer_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.socket_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let _ = self.shutdown_tx.send(());

        let delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", delay);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down piped...");

        // 1. Socket server, so no new work arrives
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 2. Deployer worker, interrupting running stages
        if let Some(handle) = self.deployer_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

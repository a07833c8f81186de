//! Application configuration options

use std::time::Duration;

use crate::deploy::engine::EngineOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Stage execution settings
    pub engine: EngineOptions,

    /// Deployer worker options
    pub deployer: deployer::Options,
}

impl AppOptions {
    /// Options for an agent storing its data under `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions { layout },
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            engine: EngineOptions {
                piped_id: settings.piped_id.clone(),
                stage_timeout: Duration::from_secs(settings.engine.stage_timeout_secs),
            },
            deployer: deployer::Options {
                max_concurrent: settings.engine.max_concurrent_deployments,
            },
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9085,
        }
    }
}

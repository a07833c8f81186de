//! OpenTofu plugin
//!
//! Deploys infrastructure-as-code applications with the `tofu` binary and
//! reports drift between their state and configuration.

pub mod config;
pub mod deployment;
pub mod livestate;
pub mod tool;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{AgentError, ResultExt};
use crate::platform::ClientRegistry;
use crate::plugins::opentofu::config::{OpenTofuApplicationSpec, OpenTofuDeployTargetConfig};
use crate::plugins::opentofu::tool::{Tofu, TofuClientConfig, TofuFactory, DEFAULT_VERSION, TOOL_NAME};
use crate::sdk::{DeployTarget, DeploymentSource, PluginClient};

pub const PLUGIN_NAME: &str = "opentofu";

pub const PLUGIN_VERSION: &str = "v1.0.0";

pub const STAGE_PLAN: &str = "OPEN_TOFU_PLAN";
pub const STAGE_APPLY: &str = "OPEN_TOFU_APPLY";
pub const STAGE_ROLLBACK: &str = "OPEN_TOFU_ROLLBACK";

/// OpenTofu deployment and livestate plugin
pub struct OpenTofuPlugin {
    default_version: String,
    clients: ClientRegistry<TofuFactory>,
}

impl Default for OpenTofuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenTofuPlugin {
    pub fn new() -> Self {
        Self::with_tool_version(DEFAULT_VERSION)
    }

    /// Use `version` when neither the application nor the deploy target
    /// names one
    pub fn with_tool_version(version: impl Into<String>) -> Self {
        let default_version = version.into();
        Self {
            clients: ClientRegistry::new(TofuFactory::new(default_version.clone())),
            default_version,
        }
    }

    /// The application spec wins over the deploy target, which wins over the
    /// plugin default
    fn tool_version(
        &self,
        spec: &OpenTofuApplicationSpec,
        targets: &[DeployTarget],
    ) -> Result<String, AgentError> {
        if !spec.input.version.is_empty() {
            return Ok(spec.input.version.clone());
        }
        for target in targets {
            let config: OpenTofuDeployTargetConfig = target.decode()?;
            if !config.version.is_empty() {
                return Ok(config.version);
            }
        }
        Ok(self.default_version.clone())
    }

    /// The tofu client for `version`, installing the binary on first use
    async fn tofu(&self, client: &PluginClient, version: &str) -> Result<Tofu, AgentError> {
        let config = TofuClientConfig {
            tools: client.tool_registry().clone(),
            version: version.to_string(),
        };
        self.clients
            .client(&format!("{}-{}", TOOL_NAME, version), &config)
            .await
            .with_context(|| format!("acquire OpenTofu {}", version))
    }
}

/// An application checkout that passed the stage preconditions
struct Workdir {
    spec: OpenTofuApplicationSpec,
    dir: PathBuf,
    env: Vec<(String, String)>,
}

/// Check the declared working directory and configuration file exist
async fn locate(source: &DeploymentSource) -> Result<Workdir, AgentError> {
    let spec = OpenTofuApplicationSpec::from_source(source)?.ok_or_else(|| {
        AgentError::ConfigError("application configuration has no OpenTofu spec".to_string())
    })?;

    let dir = spec.input.working_dir(Path::new(&source.application_directory));
    if !is_dir(&dir).await {
        return Err(AgentError::ConfigError(format!(
            "working directory {} does not exist",
            dir.display()
        )));
    }

    let config_file = dir.join(&spec.input.config);
    if !is_file(&config_file).await {
        return Err(AgentError::ConfigError(format!(
            "configuration file {} does not exist",
            config_file.display()
        )));
    }

    let env = spec.input.env_vars()?;
    debug!("Located OpenTofu configuration {}", config_file.display());
    Ok(Workdir { spec, dir, env })
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

//! Settings file management

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Identifier stamped on every deployment this agent runs
    #[serde(default = "default_piped_id")]
    pub piped_id: String,

    /// Log configuration
    #[serde(default)]
    pub log: LogSettings,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Stage execution limits
    #[serde(default)]
    pub engine: EngineSettings,

    /// Per-plugin configuration, keyed by plugin name
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSettings>,
}

fn default_true() -> bool {
    true
}

fn default_piped_id() -> String {
    "local".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            piped_id: default_piped_id(),
            log: LogSettings::default(),
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            plugins: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist.
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            AgentError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Settings of one plugin, or the empty default
    pub fn plugin(&self, name: &str) -> PluginSettings {
        self.plugins.get(name).cloned().unwrap_or_default()
    }
}

/// Log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub json: bool,

    /// Also write rolling log files under `<data dir>/logs`
    #[serde(default)]
    pub file_output: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            file_output: false,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9085
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Deployments allowed to run at the same time
    #[serde(default = "default_max_concurrent_deployments")]
    pub max_concurrent_deployments: usize,

    /// Upper bound on a single stage run, in seconds
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

fn default_max_concurrent_deployments() -> usize {
    4
}

fn default_stage_timeout() -> u64 {
    6 * 60 * 60
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_deployments: default_max_concurrent_deployments(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

/// Plugin settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    /// Overrides the plugin's built-in default tool version
    #[serde(default)]
    pub tool_version: Option<String>,

    /// Deploy targets available to applications using this plugin
    #[serde(default)]
    pub deploy_targets: Vec<DeployTargetSettings>,
}

/// A named deploy target with plugin-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTargetSettings {
    pub name: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

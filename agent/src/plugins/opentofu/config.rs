//! OpenTofu configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::sdk::{DeploymentSource, ManualOperation};

/// Application spec of an OpenTofu application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTofuApplicationSpec {
    #[serde(default)]
    pub input: OpenTofuDeploymentInput,
}

impl OpenTofuApplicationSpec {
    /// Decode the spec of `source`; `None` when the application declares none
    pub fn from_source(source: &DeploymentSource) -> Result<Option<Self>, AgentError> {
        let config = source.config()?;
        if config.spec.is_null() {
            return Ok(None);
        }
        serde_json::from_value(config.spec)
            .map(Some)
            .map_err(|e| AgentError::ConfigError(format!("invalid OpenTofu application spec: {}", e)))
    }
}

/// Where and how OpenTofu runs for an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTofuDeploymentInput {
    /// OpenTofu version, e.g. "1.9.0"; empty falls back to the deploy target
    #[serde(default)]
    pub version: String,

    /// Configuration file, relative to the working directory
    #[serde(default = "default_config")]
    pub config: String,

    /// Relative to the application directory
    #[serde(default)]
    pub working_dir: String,

    /// `KEY=VALUE` entries passed to every command
    #[serde(default)]
    pub env: Vec<String>,
}

fn default_config() -> String {
    "main.tf".to_string()
}

impl Default for OpenTofuDeploymentInput {
    fn default() -> Self {
        Self {
            version: String::new(),
            config: default_config(),
            working_dir: String::new(),
            env: Vec::new(),
        }
    }
}

impl OpenTofuDeploymentInput {
    pub fn working_dir(&self, application_dir: &Path) -> PathBuf {
        if self.working_dir.is_empty() {
            application_dir.to_path_buf()
        } else {
            application_dir.join(&self.working_dir)
        }
    }

    pub fn env_vars(&self) -> Result<Vec<(String, String)>, AgentError> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(AgentError::ConfigError(format!(
                    "invalid environment entry {:?}, expected KEY=VALUE",
                    entry
                ))),
            })
            .collect()
    }
}

/// Deploy target configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenTofuDeployTargetConfig {
    #[serde(default)]
    pub version: String,
}

/// Options of a declared pipeline stage (`with` in the pipeline)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTofuStageOptions {
    /// Hold the stage until an operator approves it
    #[serde(default)]
    pub wait_approval: bool,

    /// Let an operator skip the stage
    #[serde(default)]
    pub skippable: bool,
}

impl OpenTofuStageOptions {
    pub fn decode(value: &serde_json::Value) -> Result<Self, AgentError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| AgentError::ConfigError(format!("invalid stage options: {}", e)))
    }

    pub fn available_operation(&self) -> ManualOperation {
        if self.wait_approval {
            ManualOperation::Approve
        } else if self.skippable {
            ManualOperation::Skip
        } else {
            ManualOperation::None
        }
    }
}

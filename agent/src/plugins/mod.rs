//! Plugins bundled with the agent and the registry that looks them up

pub mod opentofu;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::errors::AgentError;
use crate::plugins::opentofu::OpenTofuPlugin;
use crate::sdk::{DeployTarget, DeploymentPlugin, LivestatePlugin};
use crate::storage::settings::Settings;

/// Plugins available to the engine, by name
#[derive(Default)]
pub struct PluginRegistry {
    deployment: HashMap<String, Arc<dyn DeploymentPlugin>>,
    livestate: HashMap<String, Arc<dyn LivestatePlugin>>,
    deploy_targets: HashMap<String, Vec<DeployTarget>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled plugins configured from `settings`
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();

        let tofu_settings = settings.plugin(opentofu::PLUGIN_NAME);
        let tofu = Arc::new(match tofu_settings.tool_version {
            Some(version) => OpenTofuPlugin::with_tool_version(version),
            None => OpenTofuPlugin::new(),
        });
        registry.register_deployment(tofu.clone());
        registry.register_livestate(tofu);

        for (plugin, plugin_settings) in &settings.plugins {
            let targets = plugin_settings
                .deploy_targets
                .iter()
                .map(|t| DeployTarget {
                    name: t.name.clone(),
                    config: t.config.clone(),
                })
                .collect();
            registry.set_deploy_targets(plugin, targets);
        }
        registry
    }

    pub fn register_deployment(&mut self, plugin: Arc<dyn DeploymentPlugin>) {
        info!("Registered deployment plugin {} {}", plugin.name(), plugin.version());
        self.deployment.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_livestate(&mut self, plugin: Arc<dyn LivestatePlugin>) {
        self.livestate.insert(plugin.name().to_string(), plugin);
    }

    pub fn set_deploy_targets(&mut self, plugin: &str, targets: Vec<DeployTarget>) {
        self.deploy_targets.insert(plugin.to_string(), targets);
    }

    pub fn deployment(&self, name: &str) -> Result<Arc<dyn DeploymentPlugin>, AgentError> {
        self.deployment
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ConfigError(format!("unknown deployment plugin {:?}", name)))
    }

    pub fn livestate(&self, name: &str) -> Result<Arc<dyn LivestatePlugin>, AgentError> {
        self.livestate
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ConfigError(format!("unknown livestate plugin {:?}", name)))
    }

    /// Deploy targets configured for `plugin`
    pub fn deploy_targets(&self, plugin: &str) -> Vec<DeployTarget> {
        self.deploy_targets.get(plugin).cloned().unwrap_or_default()
    }
}

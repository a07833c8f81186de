//! Plugin contract
//!
//! Everything a platform plugin sees of the agent: the operations it
//! implements, the values passed to them and the handles it may use while a
//! stage runs.

pub mod client;
pub mod models;
pub mod plugin;

pub use client::{MetadataStore, PluginClient};
pub use models::*;
pub use plugin::{
    DeploymentPlugin, DetermineStrategyInput, DetermineVersionsInput, ExecuteStageInput,
    GetLivestateInput, LivestatePlugin,
};

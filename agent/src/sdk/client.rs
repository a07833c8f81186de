//! Handles plugins use while they run

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifacts::ArtifactStore;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::toolregistry::ToolRegistry;

/// Read/write access to the metadata of the running stage.
///
/// Writes are persisted with the deployment, so a stage re-invoked after a
/// restart sees what its previous invocation stored.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: &str) -> Result<(), AgentError>;

    async fn all(&self) -> BTreeMap<String, String>;
}

/// Agent services shared with plugins
#[derive(Clone)]
pub struct PluginClient {
    tools: Arc<ToolRegistry>,
    artifacts: Arc<ArtifactStore>,
    scratch_dir: Dir,
}

impl PluginClient {
    pub fn new(tools: Arc<ToolRegistry>, artifacts: Arc<ArtifactStore>, scratch_dir: Dir) -> Self {
        Self {
            tools,
            artifacts,
            scratch_dir,
        }
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// A fresh scratch directory; the caller removes it when done
    pub async fn scratch(&self, prefix: &str) -> Result<Dir, AgentError> {
        self.scratch_dir.create().await?;
        self.scratch_dir.create_temp_dir(prefix).await
    }
}

//! Tool installer backends

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::AgentError;
use crate::process;

/// Executes a rendered install recipe
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Run `script` with `work_dir` as the current directory.
    async fn install(&self, script: &str, work_dir: &Path) -> Result<(), AgentError>;
}

/// Runs install recipes with `sh -c`
#[derive(Debug, Clone)]
pub struct ScriptInstaller {
    shell: String,
}

impl ScriptInstaller {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ScriptInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInstaller for ScriptInstaller {
    async fn install(&self, script: &str, work_dir: &Path) -> Result<(), AgentError> {
        debug!("Running install script in {}", work_dir.display());

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(script).current_dir(work_dir);

        // installs are not tied to a stage; dropping the caller still kills the child
        process::run(command, "install script", &CancellationToken::new()).await?;
        Ok(())
    }
}

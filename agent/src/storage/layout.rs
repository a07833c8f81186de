//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Installed tool binaries, named `<name>-<version>`
    pub fn tools_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tools"))
    }

    /// Cross-stage artifacts, one subdirectory per deployment
    pub fn artifacts_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("artifacts"))
    }

    /// Persisted deployment records (`<id>.json`)
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Stage log files (`<deployment>/<index>.log`)
    pub fn stage_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("stages"))
    }

    /// Per-deployment checkouts handed to plugins
    pub fn workspaces_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("workspaces"))
    }

    /// Scratch space for installers and plugin temporaries
    pub fn tmp_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::AgentError> {
        self.tools_dir().create().await?;
        self.artifacts_dir().create().await?;
        self.deployments_dir().create().await?;
        self.logs_dir().create().await?;
        self.stage_logs_dir().create().await?;
        self.workspaces_dir().create().await?;
        self.tmp_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        // Use /var/lib/piped on Linux, or user home directory on other platforms
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/piped");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".piped");

        Self::new(base_dir)
    }
}

#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}

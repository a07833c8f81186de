//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::AgentError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, AgentError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write string to file, replacing it atomically
    pub async fn write_string(&self, contents: &str) -> Result<(), AgentError> {
        self.write_atomic(contents.as_bytes()).await
    }

    /// Write JSON to file
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), AgentError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_string(&contents).await
    }

    /// Append a single line, creating the file if needed
    pub async fn append_line(&self, line: &str) -> Result<(), AgentError> {
        self.ensure_parent().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Mark the file executable (0o755) on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_executable(&self) -> Result<(), AgentError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).await?;
            let mut perms = meta.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    /// Atomic write using a temporary sibling file
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), AgentError> {
        self.ensure_parent().await?;
        let temp_path = self.path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

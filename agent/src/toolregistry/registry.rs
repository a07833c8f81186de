//! Tool registry
//!
//! Installs versioned tool binaries into the tools directory and hands out
//! their paths. Each (name, version) is installed at most once at a time and,
//! once installed, never again for the life of the process.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::flight::FlightCache;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::toolregistry::installer::ToolInstaller;
use crate::toolregistry::template::{self, TemplateParams};
use crate::utils::sha256_file;

/// A tool a plugin depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,

    /// Used when a caller asks for the empty version
    pub default_version: String,

    /// Install recipe with `{{ .TmpDir }}`, `{{ .Version }}`, `{{ .Os }}`,
    /// `{{ .Arch }}` and `{{ .OutPath }}` placeholders
    pub install_script: String,
}

/// An installed tool binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledTool {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub sha256: String,
}

type ToolKey = (String, String);

/// Registry of installed tools
pub struct ToolRegistry {
    tools_dir: Dir,
    tmp_dir: Dir,
    installer: Arc<dyn ToolInstaller>,
    tools: FlightCache<ToolKey, InstalledTool>,
}

impl ToolRegistry {
    pub fn new(tools_dir: Dir, tmp_dir: Dir, installer: Arc<dyn ToolInstaller>) -> Self {
        Self {
            tools_dir,
            tmp_dir,
            installer,
            tools: FlightCache::new(),
        }
    }

    /// Resolve `spec` at `version` to an installed binary, installing it if
    /// needed. The empty version selects the tool's default.
    pub async fn resolve(&self, spec: &ToolSpec, version: &str) -> Result<InstalledTool, AgentError> {
        let version = if version.is_empty() {
            spec.default_version.clone()
        } else {
            version.to_string()
        };
        let tool_error = |source: Arc<AgentError>| AgentError::ToolError {
            name: spec.name.clone(),
            version: version.clone(),
            source,
        };

        validate_component("tool name", &spec.name).map_err(|e| tool_error(Arc::new(e)))?;
        validate_component("tool version", &version).map_err(|e| tool_error(Arc::new(e)))?;

        let job = InstallJob {
            name: spec.name.clone(),
            version: version.clone(),
            script: spec.install_script.clone(),
            tools_dir: self.tools_dir.clone(),
            tmp_dir: self.tmp_dir.clone(),
            installer: self.installer.clone(),
        };

        self.tools
            .get_or_try_insert_with((spec.name.clone(), version.clone()), move || job.run())
            .await
            .map_err(tool_error)
    }

    /// A tool already resolved by this process
    pub fn installed(&self, name: &str, version: &str) -> Option<InstalledTool> {
        self.tools.get(&(name.to_string(), version.to_string()))
    }
}

// names and versions become file names
fn validate_component(what: &str, value: &str) -> Result<(), AgentError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));
    if valid {
        Ok(())
    } else {
        Err(AgentError::ConfigError(format!("invalid {} {:?}", what, value)))
    }
}

struct InstallJob {
    name: String,
    version: String,
    script: String,
    tools_dir: Dir,
    tmp_dir: Dir,
    installer: Arc<dyn ToolInstaller>,
}

impl InstallJob {
    async fn run(self) -> Result<InstalledTool, AgentError> {
        let out = self.tools_dir.file(&format!("{}-{}", self.name, self.version));

        if out.exists().await {
            match self.verify(&out).await {
                Ok(tool) => {
                    info!("Reusing installed tool {} {}", self.name, self.version);
                    return Ok(tool);
                }
                Err(e) => {
                    warn!(
                        "Discarding unusable tool binary {}: {}",
                        out.path().display(),
                        e
                    );
                    out.delete().await?;
                }
            }
        }

        self.tools_dir.create().await?;
        self.tmp_dir.create().await?;
        let scratch = self.tmp_dir.create_temp_dir(&self.name).await?;

        let result = self.install_into(&out, &scratch).await;
        if let Err(e) = scratch.delete().await {
            warn!("Failed to remove {}: {}", scratch.path().display(), e);
        }
        result?;

        let tool = self.verify(&out).await?;
        info!(
            "Installed tool {} {} at {} (sha256 {})",
            tool.name,
            tool.version,
            tool.path.display(),
            tool.sha256
        );
        Ok(tool)
    }

    async fn install_into(&self, out: &File, scratch: &Dir) -> Result<(), AgentError> {
        let params = TemplateParams {
            tmp_dir: scratch.path().display().to_string(),
            version: self.version.clone(),
            os: template::host_os().to_string(),
            arch: template::host_arch().to_string(),
            out_path: out.path().display().to_string(),
        };
        let script = template::render(&self.script, &params)?;

        info!("Installing tool {} {}", self.name, self.version);
        self.installer.install(&script, scratch.path()).await?;

        if !out.exists().await {
            return Err(AgentError::ExecutionError {
                message: format!("install script did not produce {}", out.path().display()),
                output: String::new(),
            });
        }
        Ok(())
    }

    async fn verify(&self, out: &File) -> Result<InstalledTool, AgentError> {
        let meta = tokio::fs::metadata(out.path()).await?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(AgentError::StorageError(format!(
                "{} is not a non-empty regular file",
                out.path().display()
            )));
        }
        out.set_executable().await?;

        Ok(InstalledTool {
            name: self.name.clone(),
            version: self.version.clone(),
            path: out.path().to_path_buf(),
            sha256: sha256_file(out.path()).await?,
        })
    }
}

//! The tofu binary and the client wrapping it

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, ResultExt};
use crate::platform::ClientFactory;
use crate::process::{self, CommandOutput};
use crate::toolregistry::{ToolRegistry, ToolSpec};

pub const TOOL_NAME: &str = "tofu";

pub const DEFAULT_VERSION: &str = "1.9.0";

const INSTALL_SCRIPT: &str = r#"
cd {{ .TmpDir }}
curl -fsSL https://github.com/opentofu/opentofu/releases/download/v{{ .Version }}/tofu_{{ .Version }}_{{ .Os }}_{{ .Arch }}.zip -o tofu_{{ .Version }}_{{ .Os }}_{{ .Arch }}.zip
unzip -o tofu_{{ .Version }}_{{ .Os }}_{{ .Arch }}.zip tofu
mv tofu {{ .OutPath }}
"#;

/// How the tool registry obtains tofu
pub fn tool_spec(default_version: &str) -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        default_version: default_version.to_string(),
        install_script: INSTALL_SCRIPT.to_string(),
    }
}

/// Runs tofu commands with one installed binary
#[derive(Debug, Clone)]
pub struct Tofu {
    binary: PathBuf,
    version: String,
}

impl Tofu {
    pub fn new(binary: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    async fn run(
        &self,
        args: &[&str],
        dir: &Path,
        env: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AgentError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .current_dir(dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("TF_IN_AUTOMATION", "1");

        let description = format!("tofu {}", args.join(" "));
        process::run(command, &description, cancel).await
    }

    pub async fn init(
        &self,
        dir: &Path,
        env: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AgentError> {
        self.run(&["init", "-input=false", "-no-color"], dir, env, cancel)
            .await
            .context("tofu init")
    }

    /// Write a plan of pending changes to `out`
    pub async fn plan(
        &self,
        dir: &Path,
        env: &[(String, String)],
        out: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AgentError> {
        let out_arg = format!("-out={}", out.display());
        self.run(&["plan", "-input=false", "-no-color", &out_arg], dir, env, cancel)
            .await
            .context("tofu plan")
    }

    pub async fn apply(
        &self,
        dir: &Path,
        env: &[(String, String)],
        plan: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AgentError> {
        let plan_arg = plan.display().to_string();
        self.run(&["apply", "-input=false", "-no-color", &plan_arg], dir, env, cancel)
            .await
            .context("tofu apply")
    }

    /// JSON of the current state, or of `plan` when given
    pub async fn show_json(
        &self,
        dir: &Path,
        env: &[(String, String)],
        plan: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let plan_arg = plan.map(|p| p.display().to_string());
        let mut args = vec!["show", "-json", "-no-color"];
        if let Some(plan_arg) = plan_arg.as_deref() {
            args.push(plan_arg);
        }
        let output = self.run(&args, dir, env, cancel).await.context("tofu show")?;
        Ok(output.stdout)
    }
}

/// Builds [`Tofu`] clients by resolving the binary through the tool registry
pub struct TofuFactory {
    default_version: String,
}

impl TofuFactory {
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            default_version: default_version.into(),
        }
    }
}

#[derive(Clone)]
pub struct TofuClientConfig {
    pub tools: Arc<ToolRegistry>,
    pub version: String,
}

#[async_trait]
impl ClientFactory for TofuFactory {
    type Client = Tofu;
    type Config = TofuClientConfig;

    async fn build(&self, _provider: &str, config: &TofuClientConfig) -> Result<Tofu, AgentError> {
        let tool = config
            .tools
            .resolve(&tool_spec(&self.default_version), &config.version)
            .await?;
        Ok(Tofu::new(tool.path, tool.version))
    }
}

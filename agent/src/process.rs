//! External command execution

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::AgentError;

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run `command` to completion, capturing its output.
///
/// The child is killed when `cancel` fires or when the returned future is
/// dropped. A non-zero exit is an execution error carrying the output.
pub async fn run(
    mut command: Command,
    description: &str,
    cancel: &CancellationToken,
) -> Result<CommandOutput, AgentError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running command: {}", description);
    let child = command.spawn().map_err(|e| AgentError::ExecutionError {
        message: format!("failed to start {}: {}", description, e),
        output: String::new(),
    })?;

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = cancel.cancelled() => {
            return Err(AgentError::Cancelled(format!("{} was cancelled", description)));
        }
    };

    let captured = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !output.status.success() {
        return Err(AgentError::ExecutionError {
            message: format!("{} exited with {}", description, output.status),
            output: captured.combined(),
        });
    }

    Ok(captured)
}

//! Error types for piped

use std::sync::Arc;

use thiserror::Error;

/// Main error type for piped
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad or missing paths, invalid deploy target count, unknown stage names.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Installing or locating an external tool failed.
    #[error("failed to acquire tool {name} (version {version}): {source}")]
    ToolError {
        name: String,
        version: String,
        #[source]
        source: Arc<AgentError>,
    },

    /// An external command exited unsuccessfully. `output` holds its combined
    /// stdout and stderr.
    #[error("Execution error: {message}")]
    ExecutionError { message: String, output: String },

    /// A tool ran but produced output that could not be decoded.
    #[error("State format error: {0}")]
    StateFormatError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("failed to build client for platform provider {provider}: {source}")]
    PlatformError {
        provider: String,
        #[source]
        source: Arc<AgentError>,
    },

    #[error("Invalid transition: {0}")]
    TransitionError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// An error wrapped with the operation that observed it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AgentError>,
    },
}

/// Error classes reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ToolAcquisition,
    Execution,
    StateFormat,
    Cancelled,
    Other,
}

impl AgentError {
    /// Wrap the error with the name of the failing operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        AgentError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            AgentError::ConfigError(_) | AgentError::ValidationError(_) => ErrorKind::Configuration,
            AgentError::ToolError { source, .. } if source.kind() == ErrorKind::Configuration => {
                ErrorKind::Configuration
            }
            AgentError::ToolError { .. } => ErrorKind::ToolAcquisition,
            AgentError::PlatformError { source, .. } => source.kind(),
            AgentError::ExecutionError { .. } => ErrorKind::Execution,
            AgentError::StateFormatError(_) => ErrorKind::StateFormat,
            AgentError::Cancelled(_) => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Whether retrying the same operation cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::StateFormat)
    }

    /// Captured command output, if an external command caused the error.
    pub fn output(&self) -> Option<&str> {
        match self.root() {
            AgentError::ExecutionError { output, .. } if !output.is_empty() => Some(output),
            AgentError::ToolError { source, .. } | AgentError::PlatformError { source, .. } => {
                source.output()
            }
            _ => None,
        }
    }
}

/// Adds operation context to results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, AgentError>;

    fn with_context<F, S>(self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<AgentError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, AgentError> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

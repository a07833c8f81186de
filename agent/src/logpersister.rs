//! Stage log persistence
//!
//! Every stage gets a [`StageLogger`]. Lines are queued without blocking the
//! stage and appended as JSON lines to `logs/stages/<deployment>/<index>.log`
//! by a writer task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Error => "ERROR",
        }
    }
}

/// A persisted log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

enum Message {
    Line(LogLine),
    Flush(oneshot::Sender<()>),
}

/// Creates stage loggers and reads their output back
#[derive(Debug, Clone)]
pub struct LogPersister {
    dir: Dir,
}

impl LogPersister {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn file(&self, deployment_id: &str, stage_index: u32) -> File {
        self.dir
            .subdir(deployment_id)
            .file(&format!("{}.log", stage_index))
    }

    /// Logger appending to the stage's log. Must be called inside a runtime.
    pub fn stage_logger(&self, deployment_id: &str, stage_index: u32) -> StageLogger {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let file = self.file(deployment_id, stage_index);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Line(line) => {
                        let encoded = match serde_json::to_string(&line) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                warn!("Failed to encode stage log line: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = file.append_line(&encoded).await {
                            warn!("Failed to write {}: {}", file.path().display(), e);
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        StageLogger { tx }
    }

    /// All lines written so far for a stage
    pub async fn read(&self, deployment_id: &str, stage_index: u32) -> Result<Vec<LogLine>, AgentError> {
        let file = self.file(deployment_id, stage_index);
        if !file.exists().await {
            return Ok(Vec::new());
        }

        let mut lines = Vec::new();
        for raw in file.read_string().await?.lines() {
            if raw.trim().is_empty() {
                continue;
            }
            // a crash can leave a torn final line
            match serde_json::from_str::<LogLine>(raw) {
                Ok(line) => lines.push(line),
                Err(e) => warn!("Skipping unreadable stage log line: {}", e),
            }
        }
        Ok(lines)
    }
}

/// Handle a running stage writes its log through
#[derive(Debug, Clone)]
pub struct StageLogger {
    tx: mpsc::UnboundedSender<Message>,
}

impl StageLogger {
    fn send(&self, severity: Severity, message: impl Into<String>) {
        let _ = self.tx.send(Message::Line(LogLine {
            severity,
            message: message.into(),
            at: Utc::now(),
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(Severity::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Severity::Error, message);
    }

    /// Wait until every line queued so far is on disk
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

//! Tool registry tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use piped::errors::{AgentError, ErrorKind};
use piped::filesys::dir::Dir;
use piped::toolregistry::{ToolInstaller, ToolRegistry, ToolSpec};

/// Treats the rendered script as the output path and writes a binary there
#[derive(Default)]
struct SlowInstaller {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

#[async_trait]
impl ToolInstaller for SlowInstaller {
    async fn install(&self, script: &str, _work_dir: &Path) -> Result<(), AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AgentError::ExecutionError {
                message: "download failed".to_string(),
                output: "curl: (6) Could not resolve host".to_string(),
            });
        }

        tokio::fs::write(script.trim(), b"#!/bin/sh\necho tofu\n").await?;
        Ok(())
    }
}

fn spec() -> ToolSpec {
    ToolSpec {
        name: "tofu".to_string(),
        default_version: "1.9.0".to_string(),
        install_script: "{{ .OutPath }}".to_string(),
    }
}

fn registry(root: &Path, installer: Arc<dyn ToolInstaller>) -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new(
        Dir::new(root.join("tools")),
        Dir::new(root.join("tmp")),
        installer,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_install_once() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = Arc::new(SlowInstaller::default());
    let registry = registry(tmp.path(), installer.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.resolve(&spec(), "1.9.0").await
        }));
    }

    let mut paths = Vec::new();
    for task in tasks {
        paths.push(task.await.unwrap().unwrap().path);
    }

    assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
    assert!(paths.iter().all(|p| p == &tmp.path().join("tools").join("tofu-1.9.0")));
    assert!(registry.installed("tofu", "1.9.0").is_some());
}

#[tokio::test]
async fn test_versions_install_independently() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = Arc::new(SlowInstaller::default());
    let registry = registry(tmp.path(), installer.clone());

    let tofu = spec();
    let (a, b) = tokio::join!(registry.resolve(&tofu, "1.8.0"), registry.resolve(&tofu, "1.9.0"));

    assert_ne!(a.unwrap().path, b.unwrap().path);
    assert_eq!(installer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_install_is_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = Arc::new(SlowInstaller::default());
    installer.failures_left.store(1, Ordering::SeqCst);
    let registry = registry(tmp.path(), installer.clone());

    let tofu = spec();
    let (first, second) = tokio::join!(
        registry.resolve(&tofu, "1.9.0"),
        registry.resolve(&tofu, "1.9.0")
    );
    let err = assert_err!(first);
    assert_eq!(err.kind(), ErrorKind::ToolAcquisition);
    assert_eq!(err.output(), Some("curl: (6) Could not resolve host"));
    // both callers waited on the same failed install
    assert_err!(second);
    assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
    assert!(registry.installed("tofu", "1.9.0").is_none());

    let tool = assert_ok!(registry.resolve(&spec(), "1.9.0").await);
    assert_eq!(tool.version, "1.9.0");
    assert_eq!(installer.calls.load(Ordering::SeqCst), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_script_installer_produces_runnable_binary() {
    use piped::toolregistry::ScriptInstaller;

    let tmp = tempfile::tempdir().unwrap();
    let registry = registry(tmp.path(), Arc::new(ScriptInstaller::new()));
    let spec = ToolSpec {
        name: "hello".to_string(),
        default_version: "0.1.0".to_string(),
        install_script: "printf '#!/bin/sh\\necho hello {{ .Version }}\\n' > hello && mv hello {{ .OutPath }}"
            .to_string(),
    };

    let tool = registry.resolve(&spec, "").await.unwrap();
    let output = tokio::process::Command::new(&tool.path).output().await.unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello 0.1.0\n");
}

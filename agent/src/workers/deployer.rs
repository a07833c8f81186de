//! Deployer worker
//!
//! Takes queued deployment ids off the engine queue and runs each as its own
//! task, with at most `max_concurrent` deployments in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::deploy::engine::Engine;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deployments running at once
    pub max_concurrent: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

/// Run the deployer worker
pub async fn run(
    options: &Options,
    engine: Arc<Engine>,
    mut queue: mpsc::UnboundedReceiver<String>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!(
        "Deployer worker starting ({} concurrent deployments)...",
        options.max_concurrent
    );

    let permits = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            id = queue.recv() => {
                let Some(id) = id else {
                    info!("Deployment queue closed, deployer worker stopping...");
                    break;
                };
                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = &mut shutdown_signal => {
                        info!("Deployer worker shutting down...");
                        break;
                    }
                };

                debug!("Starting deployment {}", id);
                let engine = engine.clone();
                tasks.spawn(async move {
                    engine.run_deployment(&id).await;
                    drop(permit);
                });
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    error!("Deployment task failed: {}", e);
                }
            }
        }
    }

    // running stages stop where they are and resume on the next start
    engine.interrupt();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Deployment task failed: {}", e);
        }
    }
    info!("Deployer worker stopped");
}

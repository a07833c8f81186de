//! Persisted deployment records
//!
//! Each deployment is one `deployments/<id>.json` file rewritten atomically
//! after every change. The in-memory map serves reads; its lock is only held
//! for map access.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::deploy::model::{Deployment, StageEvent};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::sdk::MetadataStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Deployment store
pub struct DeploymentStore {
    dir: Dir,
    records: RwLock<HashMap<String, Deployment>>,
    // serializes modify-then-persist so files never go backwards
    write_lock: Mutex<()>,
    events: broadcast::Sender<StageEvent>,
}

impl DeploymentStore {
    pub fn new(dir: Dir) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            dir,
            records: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Read every persisted deployment into memory
    pub async fn load(&self) -> Result<Vec<Deployment>, AgentError> {
        let mut loaded = Vec::new();
        for path in self.dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file = crate::filesys::file::File::new(&path);
            match file.read_json::<Deployment>().await {
                Ok(deployment) => loaded.push(deployment),
                Err(e) => warn!("Skipping unreadable deployment record {}: {}", path.display(), e),
            }
        }

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        for deployment in &loaded {
            records.insert(deployment.id.clone(), deployment.clone());
        }
        info!("Loaded {} deployment records", loaded.len());
        Ok(loaded)
    }

    /// Add a new deployment. Ids are unique.
    pub async fn insert(&self, deployment: Deployment) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        if self.get(&deployment.id).is_some() {
            return Err(AgentError::ValidationError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }

        // the record only becomes visible once it is on disk
        self.persist(&deployment).await?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Deployment> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(id).cloned()
    }

    /// All deployments, newest first
    pub fn list(&self) -> Vec<Deployment> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Deployment> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Live stream of stage transitions across all deployments
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    /// Apply `change` to a deployment and persist the result.
    ///
    /// Nothing is stored when `change` or the write fails. Stage events it appends are
    /// broadcast once the record is on disk.
    pub async fn update<R, F>(&self, id: &str, change: F) -> Result<R, AgentError>
    where
        F: FnOnce(&mut Deployment) -> Result<R, AgentError>,
    {
        let _guard = self.write_lock.lock().await;

        let mut deployment = self
            .get(id)
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
        let known_events = deployment.events.len();

        let result = change(&mut deployment)?;
        deployment.updated_at = Utc::now();

        self.persist(&deployment).await?;
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            records.insert(id.to_string(), deployment.clone());
        }

        for event in deployment.events.iter().skip(known_events) {
            // no subscribers is fine
            let _ = self.events.send(event.clone());
        }
        Ok(result)
    }

    async fn persist(&self, deployment: &Deployment) -> Result<(), AgentError> {
        let file = self.dir.file(&format!("{}.json", deployment.id));
        file.write_json(deployment).await.map_err(|e| {
            AgentError::StorageError(format!("failed to persist deployment {}: {}", deployment.id, e))
        })?;
        debug!("Persisted deployment {} ({})", deployment.id, deployment.status.as_str());
        Ok(())
    }
}

/// Metadata of one stage, backed by its deployment record
pub struct StageMetadataHandle {
    store: Arc<DeploymentStore>,
    deployment_id: String,
    stage_index: u32,
}

impl StageMetadataHandle {
    pub fn new(store: Arc<DeploymentStore>, deployment_id: String, stage_index: u32) -> Self {
        Self {
            store,
            deployment_id,
            stage_index,
        }
    }
}

#[async_trait]
impl MetadataStore for StageMetadataHandle {
    async fn get(&self, key: &str) -> Option<String> {
        let deployment = self.store.get(&self.deployment_id)?;
        let stage = deployment.stage(self.stage_index).ok()?;
        stage.metadata.get(key).cloned()
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), AgentError> {
        let index = self.stage_index;
        self.store
            .update(&self.deployment_id, |deployment| {
                let stage = deployment.stage_mut(index)?;
                stage.metadata.insert(key.to_string(), value.to_string());
                Ok(())
            })
            .await
    }

    async fn all(&self) -> BTreeMap<String, String> {
        self.store
            .get(&self.deployment_id)
            .and_then(|d| d.stage(self.stage_index).ok().map(|s| s.metadata.clone()))
            .unwrap_or_default()
    }
}

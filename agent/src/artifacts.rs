//! Cross-stage artifact store
//!
//! Artifacts live on disk under `artifacts/<deployment>/<key>` next to a
//! `<key>.meta.json` record. The disk is the source of truth and survives
//! restarts; the in-memory index only saves metadata reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::sha256_hash;

/// Recorded facts about a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub key: String,
    pub sha256: String,
    pub size: u64,

    /// Free-form labels, e.g. the commit the artifact was built from
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
}

/// A stored artifact with its contents
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub data: Vec<u8>,
}

type ArtifactKey = (String, String);

/// Deployment-keyed artifact store
pub struct ArtifactStore {
    dir: Dir,
    index: RwLock<HashMap<ArtifactKey, ArtifactMeta>>,
}

impl ArtifactStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Store `data` under `key` for `deployment_id`, replacing any previous
    /// artifact with the same key.
    pub async fn put(
        &self,
        deployment_id: &str,
        key: &str,
        data: &[u8],
        labels: BTreeMap<String, String>,
    ) -> Result<ArtifactMeta, AgentError> {
        validate_key(deployment_id)?;
        validate_key(key)?;

        let meta = ArtifactMeta {
            key: key.to_string(),
            sha256: sha256_hash(data),
            size: data.len() as u64,
            labels,
            created_at: Utc::now(),
        };

        let dir = self.dir.subdir(deployment_id);
        dir.file(key).write_atomic(data).await?;
        meta_file(&dir, key).write_json(&meta).await?;

        debug!(
            "Stored artifact {} for deployment {} ({} bytes)",
            key, deployment_id, meta.size
        );

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index.insert((deployment_id.to_string(), key.to_string()), meta.clone());
        Ok(meta)
    }

    /// Metadata of a stored artifact
    pub async fn meta(&self, deployment_id: &str, key: &str) -> Result<Option<ArtifactMeta>, AgentError> {
        validate_key(deployment_id)?;
        validate_key(key)?;

        let cache_key = (deployment_id.to_string(), key.to_string());
        {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            if let Some(meta) = index.get(&cache_key) {
                return Ok(Some(meta.clone()));
            }
        }

        let file = meta_file(&self.dir.subdir(deployment_id), key);
        if !file.exists().await {
            return Ok(None);
        }
        let meta: ArtifactMeta = file.read_json().await?;

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index.insert(cache_key, meta.clone());
        Ok(Some(meta))
    }

    /// Load a stored artifact, verifying its digest
    pub async fn get(&self, deployment_id: &str, key: &str) -> Result<Option<Artifact>, AgentError> {
        let Some(meta) = self.meta(deployment_id, key).await? else {
            return Ok(None);
        };

        let path = self.dir.subdir(deployment_id).file(key);
        let data = match tokio::fs::read(path.path()).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if sha256_hash(&data) != meta.sha256 {
            return Err(AgentError::StorageError(format!(
                "artifact {} of deployment {} does not match its recorded digest",
                key, deployment_id
            )));
        }

        Ok(Some(Artifact { meta, data }))
    }

    /// Remove every artifact of a deployment
    pub async fn remove_deployment(&self, deployment_id: &str) -> Result<(), AgentError> {
        validate_key(deployment_id)?;
        self.dir.subdir(deployment_id).delete().await?;

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        index.retain(|(id, _), _| id != deployment_id);
        Ok(())
    }
}

fn meta_file(dir: &Dir, key: &str) -> File {
    dir.file(&format!("{}.meta.json", key))
}

fn validate_key(key: &str) -> Result<(), AgentError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(AgentError::ValidationError(format!("invalid artifact key {:?}", key)))
    }
}

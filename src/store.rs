//! Collaborator interfaces: record persistence and artifact storage.
//!
//! The engine treats both as external. `MemoryStore` backs development and
//! tests with Arc<RwLock<...>> maps; a relational implementation lives with
//! the (out of scope) persistence layer. Every write here is a single-record
//! operation, so storage-layer atomicity suffices; no multi-row transactions.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{CacheEntry, ProviderId, RegenerationEvent, Session, UsageRecord};
use crate::error::EngineError;

#[async_trait]
pub trait Store: Send + Sync {
  async fn get_session(&self, id: &str) -> Result<Option<Session>, EngineError>;
  async fn put_session(&self, session: &Session) -> Result<(), EngineError>;

  async fn append_regeneration(&self, event: RegenerationEvent) -> Result<(), EngineError>;
  /// Most-recent-first, capped at `limit`.
  async fn recent_regenerations(
    &self,
    session_id: &str,
    limit: usize,
  ) -> Result<Vec<RegenerationEvent>, EngineError>;

  /// Insert-or-replace on (identity, prompt_hash); the fresh entry wins.
  async fn upsert_cache_entry(&self, entry: CacheEntry) -> Result<(), EngineError>;
  async fn newest_cache_entry(
    &self,
    identity: &str,
    prompt_hash: &str,
  ) -> Result<Option<CacheEntry>, EngineError>;

  async fn append_usage(&self, record: UsageRecord) -> Result<(), EngineError>;
  /// Count of non-cache-reused records for the identity (optionally one
  /// provider) with `created_at >= since`.
  async fn count_usage_since(
    &self,
    identity: &str,
    provider: Option<ProviderId>,
    since: DateTime<Utc>,
  ) -> Result<u32, EngineError>;
}

/// Content-addressed artifact storage (cover images).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
  /// Persist bytes and return an opaque reference.
  async fn save(&self, bytes: &[u8]) -> Result<String, EngineError>;
  /// Whether the referenced artifact still exists. Cache rows whose
  /// artifact was removed must read as misses.
  async fn exists(&self, artifact_ref: &str) -> Result<bool, EngineError>;
}

// --- In-memory implementations ---

#[derive(Default)]
pub struct MemoryStore {
  sessions: RwLock<HashMap<String, Session>>,
  regenerations: RwLock<Vec<RegenerationEvent>>,
  cache: RwLock<HashMap<(String, String), CacheEntry>>,
  usage: RwLock<Vec<UsageRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get_session(&self, id: &str) -> Result<Option<Session>, EngineError> {
    Ok(self.sessions.read().await.get(id).cloned())
  }

  async fn put_session(&self, session: &Session) -> Result<(), EngineError> {
    self.sessions.write().await.insert(session.id.clone(), session.clone());
    Ok(())
  }

  async fn append_regeneration(&self, event: RegenerationEvent) -> Result<(), EngineError> {
    self.regenerations.write().await.push(event);
    Ok(())
  }

  async fn recent_regenerations(
    &self,
    session_id: &str,
    limit: usize,
  ) -> Result<Vec<RegenerationEvent>, EngineError> {
    let all = self.regenerations.read().await;
    Ok(
      all
        .iter()
        .rev()
        .filter(|e| e.session_id == session_id)
        .take(limit)
        .cloned()
        .collect(),
    )
  }

  async fn upsert_cache_entry(&self, entry: CacheEntry) -> Result<(), EngineError> {
    let key = (entry.identity.clone(), entry.prompt_hash.clone());
    self.cache.write().await.insert(key, entry);
    Ok(())
  }

  async fn newest_cache_entry(
    &self,
    identity: &str,
    prompt_hash: &str,
  ) -> Result<Option<CacheEntry>, EngineError> {
    let key = (identity.to_string(), prompt_hash.to_string());
    Ok(self.cache.read().await.get(&key).cloned())
  }

  async fn append_usage(&self, record: UsageRecord) -> Result<(), EngineError> {
    self.usage.write().await.push(record);
    Ok(())
  }

  async fn count_usage_since(
    &self,
    identity: &str,
    provider: Option<ProviderId>,
    since: DateTime<Utc>,
  ) -> Result<u32, EngineError> {
    let usage = self.usage.read().await;
    Ok(
      usage
        .iter()
        .filter(|r| {
          r.identity == identity
            && !r.reused_from_cache
            && r.created_at >= since
            && provider.map_or(true, |p| r.provider == p)
        })
        .count() as u32,
    )
  }
}

/// Filesystem artifact store: one file per artifact under a media dir.
pub struct FsArtifactStore {
  root: PathBuf,
}

impl FsArtifactStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
  async fn save(&self, bytes: &[u8]) -> Result<String, EngineError> {
    tokio::fs::create_dir_all(&self.root)
      .await
      .map_err(|e| EngineError::Storage(e.to_string()))?;
    let name = format!("cover_{}.png", uuid::Uuid::new_v4());
    let path = self.root.join(&name);
    tokio::fs::write(&path, bytes)
      .await
      .map_err(|e| EngineError::Storage(e.to_string()))?;
    Ok(path.to_string_lossy().into_owned())
  }

  async fn exists(&self, artifact_ref: &str) -> Result<bool, EngineError> {
    Ok(tokio::fs::try_exists(artifact_ref).await.unwrap_or(false))
  }
}

/// In-memory artifact store for tests.
#[derive(Default)]
pub struct MemoryArtifactStore {
  blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn remove(&self, artifact_ref: &str) {
    self.blobs.write().await.remove(artifact_ref);
  }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
  async fn save(&self, bytes: &[u8]) -> Result<String, EngineError> {
    let r = format!("mem://{}", uuid::Uuid::new_v4());
    self.blobs.write().await.insert(r.clone(), bytes.to_vec());
    Ok(r)
  }

  async fn exists(&self, artifact_ref: &str) -> Result<bool, EngineError> {
    Ok(self.blobs.read().await.contains_key(artifact_ref))
  }
}

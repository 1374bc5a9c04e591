/// Session Persistence
///
/// Key-value storage of serialized session state keyed by session id.
/// Two adapters:
/// - `InMemorySessionStore` for tests and single-process deployments
/// - `JsonFileSessionStore`, one `<id>.json` file per session
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::errors::StoreError;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, id: &str, state: &Value) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Last write time, used by expiry sweeps
    async fn mtime(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn describe(&self) -> String;
}

/// Valid keys: 1-128 chars of `[A-Za-z0-9_-]`
pub fn is_valid_key(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_key(id: &str) -> Result<(), StoreError> {
    if is_valid_key(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, (Value, DateTime<Utc>)>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the recorded write time of an entry
    pub fn set_mtime(&self, id: &str, at: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.1 = at;
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(id).map(|entry| entry.0.clone()))
    }

    async fn put(&self, id: &str, state: &Value) -> Result<(), StoreError> {
        check_key(id)?;
        self.entries.insert(id.to_string(), (state.clone(), Utc::now()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn mtime(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.entries.get(id).map(|entry| entry.1))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

pub struct JsonFileSessionStore {
    dir: PathBuf,
}

impl JsonFileSessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_key(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, id: &str, state: &Value) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        let bytes = serde_json::to_vec_pretty(state)?;

        // Write then rename so readers never see a partial file
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                if is_valid_key(id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn mtime(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(DateTime::<Utc>::from(metadata.modified()?))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("json:{}", self.dir.display())
    }
}

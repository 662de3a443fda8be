//! Key-value stores the roster is read from and written back to.
//!
//! Payloads are JSON documents addressed by a path such as `players`. A
//! store answers `Ok(None)` when nothing is stored under the path.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;
    async fn put(&self, path: &str, payload: &Value) -> Result<(), StoreError>;
}

/// A realtime-database style REST store: `{base}/{path}.json?auth={key}`.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_owned),
        }
    }

    pub fn url(&self, path: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}/{}.json?auth={}", self.base_url, path, key),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }
}

#[async_trait]
impl KeyValueStore for HttpStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn put(&self, path: &str, payload: &Value) -> Result<(), StoreError> {
        let response = self.client.put(self.url(path)).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        debug!(path, "payload written");
        Ok(())
    }
}

/// One JSON file per path inside a directory. Doubles as import/export.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, path: &str) -> PathBuf {
        self.dir.join(format!("{path}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let json = match tokio::fs::read(self.file(path)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&json)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn put(&self, path: &str, payload: &Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(self.file(path), json).await?;
        Ok(())
    }
}

/// In-process store. Can be switched offline to exercise failure paths.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(path: &str, payload: Value) -> Self {
        let store = Self::default();
        store.lock().insert(path.to_owned(), payload);
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn entry(&self, path: &str) -> Option<Value> {
        self.lock().get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // a poisoned map is still a valid map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.lock().get(path).cloned().filter(|v| !v.is_null()))
    }

    async fn put(&self, path: &str, payload: &Value) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.lock().insert(path.to_owned(), payload.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

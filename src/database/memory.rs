//! In-memory store
//!
//! Values live in a shared map keyed by database path, so reopening the same
//! path through one [`MemoryBackend`] sees what an earlier run wrote, unless it
//! is reopened with [`OpenMode::Create`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::database::{KeyValueStore, OpenMode, StoreBackend, StoreError};

type Values = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    values: Values,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_values(path.into(), Values::default())
    }

    fn with_values(path: PathBuf, values: Values) -> Self {
        Self {
            path,
            values,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::closed(&self.path));
        }
        Ok(())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn invalidate_entries(&self, keys: &[String]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut values = self.values.lock().await;
        Ok(keys.iter().filter(|key| values.remove(*key).is_some()).count())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens [`MemoryStore`]s that share values per path
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    databases: Arc<Mutex<HashMap<PathBuf, Values>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store directly, for inspecting what a run wrote
    pub async fn open_store(&self, path: &Path, mode: OpenMode) -> Result<MemoryStore, StoreError> {
        let mut databases = self.databases.lock().await;
        let values = match mode {
            OpenMode::ReadWrite => databases
                .get(path)
                .cloned()
                .ok_or_else(|| StoreError::not_found(path))?,
            OpenMode::Create => {
                let values = Values::default();
                databases.insert(path.to_path_buf(), values.clone());
                values
            }
        };
        Ok(MemoryStore::with_values(path.to_path_buf(), values))
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn KeyValueStore>, StoreError> {
        Ok(Box::new(self.open_store(path, mode).await?))
    }
}

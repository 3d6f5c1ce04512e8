//! Directory-backed store
//!
//! Each key is one file inside the database directory. Plain keys keep their
//! name (`sources.json`); keys with path separators or other punctuation are
//! hashed (`symbols-<sha256>.json`). Writes go to a temporary file in the same
//! directory and are renamed over the old value, so readers never observe a
//! partial document. Opening with [`OpenMode::Create`] removes the value files
//! of an earlier database; other files in the directory are left alone.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::database::{KeyValueStore, OpenMode, StoreBackend, StoreError, resolve_db_path};

const VALUE_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl FilesystemStore {
    pub async fn open(path: &Path, mode: OpenMode) -> Result<Self, StoreError> {
        let root = resolve_db_path(path);
        match mode {
            OpenMode::Create => {
                tokio::fs::create_dir_all(&root).await?;
                let dropped = clear_values(&root).await?;
                if dropped > 0 {
                    debug!("Dropped {} values of the previous database", dropped);
                }
            }
            OpenMode::ReadWrite => {
                if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
                    return Err(StoreError::not_found(&root));
                }
            }
        }
        debug!("Opened database {} ({:?})", root.display(), mode);
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::closed(&self.root));
        }
        Ok(())
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(file_name_for(key))
    }
}

/// Remove every value file directly inside `root`
async fn clear_values(root: &Path) -> Result<usize, StoreError> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == VALUE_EXTENSION)
            && entry.file_type().await?.is_file()
        {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// On-disk file name of `key`
fn file_name_for(key: &str) -> String {
    if key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return format!("{key}.{VALUE_EXTENSION}");
    }
    let prefix: String = key
        .split(':')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("{prefix}-{digest}.{VALUE_EXTENSION}")
}

#[async_trait]
impl KeyValueStore for FilesystemStore {
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.ensure_open()?;
        let root = self.root.clone();
        let destination = self.value_path(key);
        let value = value.to_vec();
        trace!("Writing {} ({} bytes)", key, value.len());

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut file = NamedTempFile::new_in(&root)?;
            file.write_all(&value)?;
            file.as_file().sync_all()?;
            file.persist(&destination).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        match tokio::fs::read(self.value_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn invalidate_entries(&self, keys: &[String]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut removed = 0;
        for key in keys {
            match tokio::fs::remove_file(self.value_path(key)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Invalidated {} of {} keys", removed, keys.len());
        Ok(removed)
    }

    fn path(&self) -> &Path {
        &self.root
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed database {}", self.root.display());
        }
        Ok(())
    }
}

/// Opens [`FilesystemStore`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemBackend;

#[async_trait]
impl StoreBackend for FilesystemBackend {
    async fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn KeyValueStore>, StoreError> {
        Ok(Box::new(FilesystemStore::open(path, mode).await?))
    }
}

//! Persistence
//!
//! The index is written through a small key-value interface so the storage
//! engine can be swapped. Values are JSON documents. Two engines ship with the
//! crate: [`FilesystemStore`], one file per key, and [`MemoryStore`].

pub mod filesystem;
pub mod memory;
pub mod writer;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use filesystem::{FilesystemBackend, FilesystemStore};
pub use memory::{MemoryBackend, MemoryStore};
pub use writer::{DatabaseError, DatabaseWriter, LoadedIndex};

/// Logical keys of the database
pub mod keys {
    pub const SOURCES: &str = "sources";
    pub const PCH: &str = "pch";
    pub const FILES_BY_NAME: &str = "filesByName";
    pub const ENTITIES: &str = "entities";
    pub const FILES: &str = "files";
    pub const SOURCE_DIR: &str = "sourceDir";

    const SYMBOLS_PREFIX: &str = "symbols:";

    /// Key listing the USRs that have a location in `path`
    pub fn symbols(path: &std::path::Path) -> String {
        format!("{SYMBOLS_PREFIX}{}", path.display())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database not found at {path}")]
    NotFound { path: String },

    #[error("Database at {path} is closed")]
    Closed { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.display().to_string(),
        }
    }

    pub fn closed(path: &Path) -> Self {
        Self::Closed {
            path: path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Start an empty database, creating the directory if needed
    Create,
    /// Open an existing database
    ReadWrite,
}

/// Minimal key-value interface the index is persisted through
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Replace the value stored under `key`
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Value stored under `key`, `None` when absent
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove every listed key; absent keys are ignored. Returns how many existed
    async fn invalidate_entries(&self, keys: &[String]) -> Result<usize, StoreError>;

    fn path(&self) -> &Path;

    /// Refuse further access; idempotent
    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens stores of one kind
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn KeyValueStore>, StoreError>;
}

/// Database directory a store at `path` keeps its files in
pub(crate) fn resolve_db_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

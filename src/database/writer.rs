//! Database writer
//!
//! Serializes the index state into the logical keys and reads it back for an
//! update. Only one task talks to the store, after the scheduler quiesced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::database::{KeyValueStore, OpenMode, StoreBackend, StoreError, keys};
use crate::index::{PchEntry, Source};
use crate::project::{ProjectError, list_source_tree};
use crate::symbol::{Entity, FileId, FileTable, Usr};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed value under {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Source directory error: {0}")]
    SourceDir(#[from] ProjectError),
}

/// Persisted state an update starts from
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub sources: Vec<Source>,
    pub pch: BTreeMap<String, PchEntry>,
    pub files: FileTable,
}

pub struct DatabaseWriter {
    store: Box<dyn KeyValueStore>,
}

impl DatabaseWriter {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn open(
        backend: &dyn StoreBackend,
        path: &Path,
        mode: OpenMode,
    ) -> Result<Self, DatabaseError> {
        Ok(Self::new(backend.open(path, mode).await?))
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    async fn write_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), DatabaseError> {
        let bytes = serde_json::to_vec(value).map_err(|source| DatabaseError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.write(key, &bytes).await?;
        Ok(())
    }

    async fn read_value<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, DatabaseError> {
        let Some(bytes) = self.store.read(key).await? else {
            return Ok(T::default());
        };
        serde_json::from_slice(&bytes).map_err(|source| DatabaseError::Malformed {
            key: key.to_string(),
            source,
        })
    }

    /// Read sources, the PCH map and the file table
    pub async fn load(&self) -> Result<LoadedIndex, DatabaseError> {
        let sources: Vec<Source> = self.read_value(keys::SOURCES).await?;
        let pch: BTreeMap<String, PchEntry> = self.read_value(keys::PCH).await?;
        let files: BTreeMap<PathBuf, FileId> = self.read_value(keys::FILES_BY_NAME).await?;
        debug!(
            sources = sources.len(),
            pch = pch.len(),
            files = files.len(),
            "Loaded database {}",
            self.path().display()
        );
        Ok(LoadedIndex {
            sources,
            pch,
            files: FileTable::from_map(files),
        })
    }

    /// Forget everything recorded for `dirty` files
    ///
    /// Removes their `symbols:` keys and prunes their locations from the
    /// stored entities, dropping entities left without any location. Returns
    /// the pruned entities, which seed the next graph.
    pub async fn invalidate(
        &self,
        dirty: &BTreeSet<PathBuf>,
        files: &FileTable,
    ) -> Result<BTreeMap<Usr, Entity>, DatabaseError> {
        let mut entities: BTreeMap<Usr, Entity> = self.read_value(keys::ENTITIES).await?;
        if dirty.is_empty() {
            return Ok(entities);
        }

        let symbol_keys: Vec<String> = dirty.iter().map(|path| keys::symbols(path)).collect();
        let removed_keys = self.store.invalidate_entries(&symbol_keys).await?;

        let dirty_ids: BTreeSet<FileId> = dirty.iter().filter_map(|path| files.id(path)).collect();
        let before = entities.len();
        let mut pruned = 0;
        entities.retain(|_, entity| {
            if entity.prune_files(&dirty_ids) {
                pruned += 1;
            }
            !entity.is_empty()
        });
        self.write_value(keys::ENTITIES, &entities).await?;

        info!(
            dirty_files = dirty.len(),
            removed_keys,
            pruned,
            dropped = before - entities.len(),
            "Invalidated database entries"
        );
        Ok(entities)
    }

    /// Write `entities` and one `symbols:<path>` key per file
    pub async fn write_entities(
        &self,
        entities: &BTreeMap<Usr, Entity>,
        files: &FileTable,
    ) -> Result<(), DatabaseError> {
        let mut by_file: BTreeMap<FileId, BTreeSet<&str>> = BTreeMap::new();
        for (usr, entity) in entities {
            for file in entity.files() {
                by_file.entry(file).or_default().insert(usr.as_str());
            }
        }
        for (file, usrs) in &by_file {
            let Some(path) = files.path(*file) else {
                continue;
            };
            self.write_value(&keys::symbols(path), usrs).await?;
        }
        self.write_value(keys::ENTITIES, entities).await?;
        debug!(entities = entities.len(), files = by_file.len(), "Wrote entities");
        Ok(())
    }

    pub async fn write_sources(&self, sources: &[Source]) -> Result<(), DatabaseError> {
        self.write_value(keys::SOURCES, sources).await
    }

    pub async fn write_pch(&self, pch: &BTreeMap<String, PchEntry>) -> Result<(), DatabaseError> {
        self.write_value(keys::PCH, pch).await
    }

    pub async fn write_file_table(&self, files: &FileTable) -> Result<(), DatabaseError> {
        self.write_value(keys::FILES_BY_NAME, &files.to_map()).await
    }

    /// Record the source root and the relative listing of its files
    pub async fn write_source_dir_listing(&self, root: &Path) -> Result<usize, DatabaseError> {
        let listing = list_source_tree(root)?;
        self.write_value(keys::SOURCE_DIR, root).await?;
        self.write_value(keys::FILES, &listing).await?;
        Ok(listing.len())
    }

    pub async fn close(&self) -> Result<(), DatabaseError> {
        self.store.close().await?;
        Ok(())
    }
}

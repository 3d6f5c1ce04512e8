use json_compilation_db::Entry;
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::project::CompileInvocation;

#[derive(Error, Debug)]
pub enum CompilationDatabaseError {
    #[error("Compilation database file not found: {path}")]
    FileNotFound { path: String },
    #[error("Failed to read compilation database file: {error}")]
    ReadError { error: String },
    #[error("Failed to parse compilation database JSON: {error}")]
    ParseError { error: String },
    #[error("Compilation database is empty")]
    EmptyDatabase,
}

/// Wrapper around a compilation database providing its entries as invocations
///
/// When serialized, only the path is included in the output to avoid
/// serializing large database content.
#[derive(Debug, Deserialize)]
pub struct CompilationDatabase {
    /// Path to the compilation database file (compile_commands.json)
    pub path: PathBuf,
    /// Parsed compilation database entries (loaded at initialization)
    #[serde(skip)]
    pub entries: Vec<Entry>,
}

impl CompilationDatabase {
    /// Load and parse the compilation database at the given path
    pub fn new(path: PathBuf) -> Result<Self, CompilationDatabaseError> {
        if !path.exists() {
            return Err(CompilationDatabaseError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let file = std::fs::File::open(&path).map_err(|e| CompilationDatabaseError::ReadError {
            error: e.to_string(),
        })?;

        let reader = std::io::BufReader::new(file);
        let entries: Vec<Entry> =
            serde_json::from_reader(reader).map_err(|e| CompilationDatabaseError::ParseError {
                error: e.to_string(),
            })?;

        if entries.is_empty() {
            return Err(CompilationDatabaseError::EmptyDatabase);
        }

        debug!(
            "Loaded compilation database {} with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Check if the database contains an entry for the specified file
    pub fn contains_file(&self, file_path: &Path) -> bool {
        self.entries.iter().any(|entry| entry.file == file_path)
    }

    /// Normalize every entry into a compiler invocation
    ///
    /// Entries that cannot be normalized are skipped with a warning; the
    /// remaining ones are returned in database order.
    pub fn invocations(&self) -> Vec<CompileInvocation> {
        self.entries
            .iter()
            .filter_map(|entry| {
                match CompileInvocation::from_arguments(
                    &entry.directory,
                    &entry.arguments,
                    Some(&entry.file),
                    entry.output.as_deref(),
                ) {
                    Ok(invocation) => Some(invocation),
                    Err(e) => {
                        warn!("Skipping entry for {}: {}", entry.file.display(), e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Custom serialization that only outputs the path field
impl Serialize for CompilationDatabase {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.path.serialize(serializer)
    }
}

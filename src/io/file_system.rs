//! File system abstraction layer
//!
//! Provides trait-based abstractions for the file system operations the indexer
//! depends on, chiefly modification timestamps, so dirtiness computation can be
//! tested against an in-memory file system.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// File Metadata
// ============================================================================

/// Custom file metadata abstraction
///
/// Provides a simplified, testable alternative to std::fs::Metadata
/// with controllable modification times and file sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// Last modification time
    pub modified: SystemTime,
    /// File size in bytes
    pub size: u64,
    /// Whether this is a regular file
    pub is_file: bool,
}

impl FileMetadata {
    /// Create new metadata for a regular file
    pub fn new(modified: SystemTime, size: u64) -> Self {
        Self {
            modified,
            size,
            is_file: true,
        }
    }

    /// Convert from standard library metadata
    pub fn from_std_metadata(metadata: &std::fs::Metadata) -> Result<Self, std::io::Error> {
        Ok(Self {
            modified: metadata.modified()?,
            size: metadata.len(),
            is_file: metadata.is_file(),
        })
    }

    /// Modification time as milliseconds since the Unix epoch
    pub fn modified_millis(&self) -> u64 {
        to_millis(self.modified)
    }
}

/// Convert a system time to milliseconds since the Unix epoch (0 before the epoch)
pub fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// File System Trait
// ============================================================================

/// Trait for file system operations
///
/// Enables dependency injection and testing through in-memory implementations.
pub trait FileSystemTrait: Clone + Send + Sync {
    /// Check if a file exists
    fn exists(&self, path: &Path) -> bool;

    /// Read file contents as bytes
    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error>;

    /// Get file metadata (modification time, size, etc.)
    fn metadata(&self, path: &Path) -> Result<FileMetadata, std::io::Error>;

    /// Last modification time in milliseconds, 0 when the file cannot be stat'ed
    fn last_modified(&self, path: &Path) -> u64 {
        self.metadata(path)
            .map(|metadata| metadata.modified_millis())
            .unwrap_or(0)
    }

    /// Whether the path names an existing regular file
    fn is_file(&self, path: &Path) -> bool {
        self.metadata(path)
            .map(|metadata| metadata.is_file)
            .unwrap_or(false)
    }
}

// ============================================================================
// Real File System Implementation
// ============================================================================

/// Real file system implementation using std::fs
#[derive(Debug, Clone)]
pub struct RealFileSystem;

impl FileSystemTrait for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        std::fs::read(path)
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, std::io::Error> {
        let metadata = std::fs::metadata(path)?;
        FileMetadata::from_std_metadata(&metadata)
    }
}

// ============================================================================
// Test File System Implementation
// ============================================================================


#[cfg(test)]
pub use test_filesystem::TestFileSystem;

// ============================================================================
// Tests
// ============================================================================

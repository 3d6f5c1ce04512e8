//! I/O layer
//!
//! - **FileSystem**: trait seam over stat/read so timestamp-driven dirtiness
//!   can be exercised against an in-memory file system

pub mod file_system;

pub use file_system::{FileMetadata, FileSystemTrait, RealFileSystem};

#[cfg(test)]
pub use file_system::TestFileSystem;

//! Incremental cross-reference indexer for C and C++
//!
//! Compiler invocations are parsed by a pluggable [`frontend`], turned into a
//! symbol graph by the [`index`] core, and persisted through [`database`].
//! [`engine::IndexEngine`] drives full builds and incremental updates.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod index;
pub mod io;
pub mod logging;
pub mod project;
pub mod symbol;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigOverrides, IndexerConfig, IndexerFlags};
pub use engine::{BuildRequest, IndexEngine, RunSummary};
pub use error::IndexerError;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::index::dependencies::Source;
use crate::index::pch::PchTable;
use crate::index::resolver::{EntityGraph, UnitContribution};
use crate::symbol::{FileId, FileTable};

/// All cross-job mutable state of a run
///
/// Guarded by one [`tokio::sync::Mutex`] (see [`SharedState`]), which is held
/// for merges, PCH slot bookkeeping and source appends, never across a parse.
#[derive(Debug, Default)]
pub struct IndexState {
    pub files: FileTable,
    pub graph: EntityGraph,
    pub pch: PchTable,
    pub sources: Vec<Source>,
}

pub type SharedState = Arc<Mutex<IndexState>>;

impl IndexState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Fold a finished unit into the graph and record its source
    ///
    /// Returns the ids of the files the unit visited.
    pub fn integrate(&mut self, contribution: &UnitContribution, source: Source) -> BTreeSet<FileId> {
        self.graph.merge(contribution, &mut self.files);
        let mut visited = BTreeSet::new();
        visited.insert(self.files.intern(source.input()));
        for dependency in source.dependencies.keys() {
            visited.insert(self.files.intern(dependency));
        }
        self.add_source(source);
        visited
    }

    /// Append a source, replacing any earlier one with the same signature
    pub fn add_source(&mut self, source: Source) {
        let signature = source.invocation.signature();
        let before = self.sources.len();
        self.sources
            .retain(|existing| existing.invocation.signature() != signature);
        if self.sources.len() != before {
            debug!("Replacing source for {}", source.input().display());
        }
        self.sources.push(source);
    }
}

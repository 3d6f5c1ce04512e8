//! Build and update drivers
//!
//! `build_db` indexes every invocation from scratch and writes a fresh
//! database. `update_db` reloads a database, asks the dependency tracker which
//! units went stale, invalidates what they contributed and re-indexes only
//! those. Both wait for the scheduler to quiesce before the store is touched.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Level, debug, info, warn};
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::database::{DatabaseWriter, OpenMode, StoreBackend};
use crate::error::IndexerError;
use crate::frontend::{Frontend, UnsavedFiles};
use crate::index::{
    DependencyTracker, EntityGraph, ErrorLog, IndexState, JobKind, JobScheduler, PchTable,
    ReconcileReport, RelocationReport, RunStats, SchedulerContext, SharedState,
};
use crate::io::FileSystemTrait;
use crate::log_timing;
use crate::project::{CompilationDatabase, CompileInvocation, ProjectError};

/// Inputs of an initial build
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// `compile_commands.json` files to read invocations from
    pub compile_commands: Vec<PathBuf>,
    /// Bare source files, compiled with a guessed language
    pub sources: Vec<PathBuf>,
    /// Invocations produced by other build-system introspection
    pub invocations: Vec<CompileInvocation>,
    /// Root whose file listing is recorded; the working directory by default
    pub source_dir: Option<PathBuf>,
}

/// Outcome of a build or update
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub submitted: usize,
    pub stats: Option<RunStats>,
    pub reconcile: ReconcileReport,
    pub relocation: RelocationReport,
    pub error_diagnostics: usize,
    pub error_log: Option<PathBuf>,
    /// Update found no stale unit
    pub nothing_changed: bool,
}

impl RunSummary {
    fn unchanged(run_id: Uuid) -> Self {
        Self {
            run_id,
            submitted: 0,
            stats: None,
            reconcile: ReconcileReport::default(),
            relocation: RelocationReport::default(),
            error_diagnostics: 0,
            error_log: None,
            nothing_changed: true,
        }
    }

    /// Every unit was indexed
    pub fn is_success(&self) -> bool {
        self.stats.as_ref().is_none_or(|stats| stats.failed == 0)
    }
}

pub struct IndexEngine<F: FileSystemTrait + 'static> {
    config: Arc<IndexerConfig>,
    frontend: Arc<dyn Frontend>,
    backend: Arc<dyn StoreBackend>,
    fs: F,
}

impl<F: FileSystemTrait + 'static> IndexEngine<F> {
    pub fn new(
        config: IndexerConfig,
        frontend: Arc<dyn Frontend>,
        backend: Arc<dyn StoreBackend>,
        fs: F,
    ) -> Self {
        Self {
            config: Arc::new(config),
            frontend,
            backend,
            fs,
        }
    }

    fn scheduler(
        &self,
        state: SharedState,
        unsaved: UnsavedFiles,
        errors: Arc<ErrorLog>,
        kind: JobKind,
    ) -> JobScheduler<F> {
        JobScheduler::new(
            SchedulerContext {
                config: self.config.clone(),
                frontend: self.frontend.clone(),
                fs: self.fs.clone(),
                state,
                unsaved: Arc::new(unsaved),
                errors,
            },
            kind,
        )
    }

    /// Collect the invocations a build request names
    ///
    /// Fails on the first missing source file or unreadable compilation
    /// database; the run then does nothing.
    fn collect_invocations(&self, request: &BuildRequest) -> Result<Vec<CompileInvocation>, IndexerError> {
        let mut invocations = Vec::new();
        for path in &request.compile_commands {
            let database = CompilationDatabase::new(path.clone()).map_err(ProjectError::from)?;
            let before = invocations.len();
            invocations.extend(database.invocations());
            debug!(
                "{} yielded {} invocations",
                path.display(),
                invocations.len() - before
            );
        }
        for source in &request.sources {
            if !self.fs.is_file(source) {
                return Err(ProjectError::NotAFile {
                    path: source.display().to_string(),
                }
                .into());
            }
            invocations.push(CompileInvocation::for_source(source));
        }
        invocations.extend(request.invocations.iter().cloned());
        Ok(invocations)
    }

    /// Index everything from scratch and write a new database
    pub async fn build_db(&self, request: BuildRequest) -> Result<RunSummary, IndexerError> {
        let started = Instant::now();
        let source_dir = request
            .source_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let source_dir = std::path::absolute(&source_dir)?;
        if !source_dir.is_dir() {
            return Err(ProjectError::SourceRootNotFound {
                path: source_dir.display().to_string(),
            }
            .into());
        }

        let invocations = self.collect_invocations(&request)?;
        if invocations.is_empty() {
            warn!("Nothing to do");
            return Err(IndexerError::NothingToDo);
        }

        let state = IndexState::new().into_shared();
        let errors = Arc::new(ErrorLog::new());
        let scheduler = self.scheduler(state.clone(), UnsavedFiles::new(), errors.clone(), JobKind::Compile);

        let submitted = submit_all(&scheduler, invocations).await;
        let stats = scheduler.wait_for_completion(None).await?;
        log_timing!(Level::INFO, "index", stats.elapsed);

        let writer = DatabaseWriter::open(self.backend.as_ref(), &self.config.db_path, OpenMode::Create).await?;
        let write_started = Instant::now();
        let mut state = state.lock().await;
        let reconcile = state.graph.reconcile();
        let relocation = state.pch.relocate_all(writer.path());

        writer.write_file_table(&state.files).await?;
        writer.write_entities(&state.graph.entities, &state.files).await?;
        writer.write_sources(&state.sources).await?;
        writer.write_pch(&state.pch.to_map()).await?;
        let listed = writer.write_source_dir_listing(&source_dir).await?;
        state.graph.clear_pending();
        drop(state);

        let summary = self
            .finish(writer, &errors, scheduler.run_id(), submitted, stats, reconcile, relocation)
            .await?;
        log_timing!(Level::INFO, "save", write_started.elapsed());
        info!(
            run_id = %summary.run_id,
            submitted,
            listed,
            total_ms = started.elapsed().as_millis() as u64,
            "Database built"
        );
        Ok(summary)
    }

    /// Re-index what changed since the database was written
    ///
    /// `unsaved` buffers are indexed in place of their files and always count
    /// as changed.
    pub async fn update_db(&self, unsaved: UnsavedFiles) -> Result<RunSummary, IndexerError> {
        let started = Instant::now();
        let writer = DatabaseWriter::open(self.backend.as_ref(), &self.config.db_path, OpenMode::ReadWrite).await?;
        let loaded = writer.load().await?;

        let tracker = DependencyTracker::new(self.fs.clone());
        let plan = tracker.plan(loaded.sources, unsaved.keys().cloned());
        if plan.is_empty() {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Nothing has changed");
            writer.close().await?;
            return Ok(RunSummary::unchanged(Uuid::new_v4()));
        }

        let mut pch = PchTable::from_map(loaded.pch);
        for key in &plan.invalidated_pch_keys {
            if pch.remove(key) {
                debug!("Invalidated precompiled header {}", key);
            }
        }

        let entities = writer.invalidate(&plan.dirty_files, &loaded.files).await?;
        let state = IndexState {
            files: loaded.files,
            graph: EntityGraph::from_entities(entities),
            pch,
            sources: plan.retained,
        }
        .into_shared();

        let errors = Arc::new(ErrorLog::new());
        let scheduler = self.scheduler(state.clone(), unsaved, errors.clone(), JobKind::Dirty);
        let submitted = submit_all(&scheduler, plan.reparse).await;
        let stats = scheduler.wait_for_completion(None).await?;
        log_timing!(Level::INFO, "reindex", stats.elapsed);

        let mut state = state.lock().await;
        let reconcile = state.graph.reconcile();
        let relocation = state.pch.relocate_all(writer.path());

        writer.write_file_table(&state.files).await?;
        writer.write_entities(&state.graph.entities, &state.files).await?;
        writer.write_sources(&state.sources).await?;
        writer.write_pch(&state.pch.to_map()).await?;
        state.graph.clear_pending();
        drop(state);

        let summary = self
            .finish(writer, &errors, scheduler.run_id(), submitted, stats, reconcile, relocation)
            .await?;
        info!(
            run_id = %summary.run_id,
            submitted,
            dirty_files = plan.dirty_files.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "Database updated"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        writer: DatabaseWriter,
        errors: &ErrorLog,
        run_id: Uuid,
        submitted: usize,
        stats: RunStats,
        reconcile: ReconcileReport,
        relocation: RelocationReport,
    ) -> Result<RunSummary, IndexerError> {
        writer.close().await?;
        let error_log = match errors.persist_into(writer.path()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to keep error log: {}", e);
                None
            }
        };
        if let Some(path) = &error_log {
            warn!("{} error diagnostics, see {}", errors.len(), path.display());
        }
        Ok(RunSummary {
            run_id,
            submitted,
            stats: Some(stats),
            reconcile,
            relocation,
            error_diagnostics: errors.len(),
            error_log,
            nothing_changed: false,
        })
    }
}

/// Queue every invocation, keeping completion open until the last one is in
async fn submit_all<F: FileSystemTrait + 'static>(
    scheduler: &JobScheduler<F>,
    invocations: Vec<CompileInvocation>,
) -> usize {
    scheduler.begin_introspection();
    let mut submitted = 0;
    for invocation in invocations {
        if scheduler.submit(invocation).await.is_some() {
            submitted += 1;
        }
    }
    scheduler.end_introspection().await;
    submitted
}

/// Read unsaved buffers given as `path=contents_file` pairs
pub fn read_unsaved_files(pairs: &[(PathBuf, PathBuf)]) -> Result<UnsavedFiles, IndexerError> {
    let mut unsaved = BTreeMap::new();
    for (path, contents) in pairs {
        let path = std::path::absolute(path)?;
        unsaved.insert(path, std::fs::read(contents)?);
    }
    Ok(unsaved.into_iter().collect())
}

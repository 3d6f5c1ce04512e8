//! Job scheduler
//!
//! A scheduler owns one run: every invocation submitted to it becomes an
//! [`IndexerJob`] executed on the tokio runtime. Frontend parses run in
//! `spawn_blocking`, bounded by a semaphore sized to the configured
//! concurrency. The pending-job counter drives a [`CompletionLatch`] that
//! fires once the last job finished and no introspection is outstanding.
//!
//! Lock order is `jobs` before the shared index state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, oneshot};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::frontend::{Frontend, FrontendError, ParseRequest, TranslationUnit, UnsavedFiles};
use crate::index::dependencies::Source;
use crate::index::diagnostics::ErrorLog;
use crate::index::job::{IndexerJob, JobError, JobId, JobKind, JobState};
use crate::index::latch::{CompletionLatch, LatchError};
use crate::index::pch::{PchEntry, PchReservation, Reservation, wait_ready};
use crate::index::resolver::{UnitContribution, UnitIndexer};
use crate::index::state::SharedState;
use crate::io::FileSystemTrait;
use crate::project::{CompileInvocation, InvocationSignature};

/// Result of a unit parsed on behalf of another process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub invocation: CompileInvocation,
    pub contribution: UnitContribution,
    pub source: Source,
}

/// Counters of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub run_id: Uuid,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub duplicates: usize,
    pub elapsed: Duration,
}

/// Collaborators every job needs
pub struct SchedulerContext<F: FileSystemTrait> {
    pub config: Arc<IndexerConfig>,
    pub frontend: Arc<dyn Frontend>,
    pub fs: F,
    pub state: SharedState,
    pub unsaved: Arc<UnsavedFiles>,
    pub errors: Arc<ErrorLog>,
}

struct ParsedUnit {
    contribution: UnitContribution,
    source: Source,
    unit: Option<Box<dyn TranslationUnit>>,
}

/// `-include-pch` arguments and bookkeeping for a unit's forced includes
#[derive(Default)]
struct PchUse {
    arguments: Vec<String>,
    origin_headers: Vec<PathBuf>,
    from_unsaved: bool,
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
    duplicates: AtomicUsize,
}

struct Inner<F: FileSystemTrait> {
    config: Arc<IndexerConfig>,
    frontend: Arc<dyn Frontend>,
    fs: F,
    state: SharedState,
    unsaved: Arc<UnsavedFiles>,
    unsaved_paths: HashSet<PathBuf>,
    system_includes: Arc<Vec<PathBuf>>,
    errors: Arc<ErrorLog>,
    kind: JobKind,

    permits: Semaphore,
    jobs: Mutex<HashMap<JobId, IndexerJob>>,
    queued: Mutex<HashSet<InvocationSignature>>,
    next_id: AtomicU64,
    pending: AtomicUsize,
    introspections: AtomicUsize,
    counters: Counters,
    latch: CompletionLatch,
    run_id: Uuid,
    started: Instant,
}

/// Dispatches indexing jobs for one build or update run
pub struct JobScheduler<F: FileSystemTrait + 'static> {
    inner: Arc<Inner<F>>,
}

impl<F: FileSystemTrait + 'static> Clone for JobScheduler<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: FileSystemTrait + 'static> JobScheduler<F> {
    /// Start a run whose jobs are of `kind`
    pub fn new(context: SchedulerContext<F>, kind: JobKind) -> Self {
        let concurrency = context.config.concurrency.max(1);
        let run_id = Uuid::new_v4();
        info!(%run_id, concurrency, ?kind, "Starting indexing run");
        let unsaved_paths = context.unsaved.keys().cloned().collect();
        let system_includes = Arc::new(context.config.system_includes.clone());
        Self {
            inner: Arc::new(Inner {
                config: context.config,
                frontend: context.frontend,
                fs: context.fs,
                state: context.state,
                unsaved: context.unsaved,
                unsaved_paths,
                system_includes,
                errors: context.errors,
                kind,
                permits: Semaphore::new(concurrency),
                jobs: Mutex::new(HashMap::new()),
                queued: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                introspections: AtomicUsize::new(0),
                counters: Counters::default(),
                latch: CompletionLatch::new(),
                run_id,
                started: Instant::now(),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Jobs still counted toward completion
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Queue an invocation
    ///
    /// Header invocations become precompiled-header jobs. Returns `None` when
    /// the invocation was skipped or is a duplicate of an earlier one.
    pub async fn submit(&self, invocation: CompileInvocation) -> Option<JobId> {
        if invocation.language.is_header() {
            return self.submit_pch(invocation).await;
        }

        if !self.inner.queued.lock().await.insert(invocation.signature()) {
            debug!("Skipping duplicate invocation for {}", invocation.input.display());
            self.inner.counters.duplicates.fetch_add(1, Ordering::SeqCst);
            return None;
        }

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let id = self
            .inner
            .create_job(self.inner.kind, invocation, false)
            .await;
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_local(id, 0).await });
        Some(id)
    }

    async fn submit_pch(&self, invocation: CompileInvocation) -> Option<JobId> {
        let flags = self.inner.config.flags;
        if flags.disable_pch || flags.dont_index {
            debug!("Skipping header {}", invocation.input.display());
            return None;
        }
        let Some(key) = invocation.pch_output_key() else {
            debug!("{} has no .gch output, skipping", invocation.input.display());
            return None;
        };

        let reservation = self.inner.state.lock().await.pch.reserve(&key);
        let Reservation::Reserved(reservation) = reservation else {
            debug!("Precompiled header {} already requested", key);
            self.inner.counters.duplicates.fetch_add(1, Ordering::SeqCst);
            return None;
        };

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.create_job(JobKind::Pch, invocation, false).await;
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_pch(id, reservation).await });
        Some(id)
    }

    /// Obtain the precompiled header an invocation produces
    ///
    /// Returns the live entry, waits for a compilation already in flight, or
    /// compiles it as a job of this run.
    pub async fn request_pch(&self, invocation: CompileInvocation) -> Result<PchEntry, JobError> {
        let key = invocation
            .pch_output_key()
            .ok_or_else(|| JobError::NotPrecompilable {
                path: invocation.input.display().to_string(),
            })?;

        let reservation = self.inner.state.lock().await.pch.reserve(&key);
        let reservation = match reservation {
            Reservation::Ready(entry) => return Ok(entry),
            Reservation::Wait(receiver) => {
                return wait_ready(receiver)
                    .await
                    .ok_or(JobError::PchUnavailable { key });
            }
            Reservation::Reserved(reservation) => reservation,
        };

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.create_job(JobKind::Pch, invocation, false).await;
        self.inner
            .clone()
            .run_pch(id, reservation)
            .await
            .ok_or(JobError::PchUnavailable { key })
    }

    /// Parse a unit for a remote peer; the result is sent back, not integrated
    pub async fn submit_from_remote(
        &self,
        invocation: CompileInvocation,
    ) -> oneshot::Receiver<Result<UnitResult, JobError>> {
        let (sender, receiver) = oneshot::channel();
        let id = self.inner.create_job(self.inner.kind, invocation, true).await;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.run_from_remote(id).await;
            if sender.send(result).is_err() {
                debug!("Result receiver for job {} went away", id);
            }
        });
        receiver
    }

    /// Hand a queued job to a remote worker
    pub async fn hand_off_remote(
        &self,
        id: JobId,
        destination: impl Into<String>,
        port: u16,
    ) -> Result<(), JobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        job.transition(JobState::Remote)?;
        job.destination = Some(destination.into());
        job.port = Some(port);
        debug!("Handed off {}", job);
        Ok(())
    }

    /// Integrate the result a remote worker produced for a handed-off job
    pub async fn complete_remote(&self, id: JobId, result: UnitResult) -> Result<(), JobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        if job.state == JobState::Aborted {
            return Err(JobError::Aborted(id));
        }
        job.transition(JobState::CompleteRemote)?;
        job.visited = self
            .inner
            .state
            .lock()
            .await
            .integrate(&result.contribution, result.source);
        self.inner.counters.completed.fetch_add(1, Ordering::SeqCst);
        drop(jobs);
        self.inner.job_done().await;
        Ok(())
    }

    /// Bring a handed-off job back for local execution
    pub async fn reschedule(&self, id: JobId) -> Result<(), JobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        job.transition(JobState::Rescheduled)?;
        job.attempts += 1;
        let attempt = job.attempts;
        drop(jobs);

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run_local(id, attempt).await });
        Ok(())
    }

    /// Stop counting a job; whatever it produces later is discarded
    pub async fn abort(&self, id: JobId) -> Result<(), JobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        job.transition(JobState::Aborted)?;
        let counted = !job.from_remote;
        info!("Aborted {}", job);
        drop(jobs);

        self.inner.counters.aborted.fetch_add(1, Ordering::SeqCst);
        if counted {
            self.inner.job_done().await;
        }
        Ok(())
    }

    /// Note that a remote worker found `path` blocked by another job
    pub async fn record_blocked_file(&self, id: JobId, path: PathBuf) -> Result<(), JobError> {
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        *job.blocked_files.entry(path).or_insert(0) += 1;
        Ok(())
    }

    pub async fn job_snapshot(&self, id: JobId) -> Option<IndexerJob> {
        self.inner.jobs.lock().await.get(&id).cloned()
    }

    pub async fn jobs(&self) -> Vec<IndexerJob> {
        let mut jobs: Vec<IndexerJob> = self.inner.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    /// Hold completion open while a build system is still producing invocations
    pub fn begin_introspection(&self) {
        self.inner.introspections.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn end_introspection(&self) {
        if self.inner.introspections.fetch_sub(1, Ordering::SeqCst) == 1
            && self.inner.pending.load(Ordering::SeqCst) == 0
        {
            self.inner.latch.trigger_success().await;
        }
    }

    /// Wait until every counted job finished
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> Result<RunStats, LatchError> {
        if self.inner.is_idle() {
            self.inner.latch.trigger_success().await;
        }
        self.inner.latch.wait(timeout).await?;
        let stats = self.stats();
        info!(
            run_id = %stats.run_id,
            completed = stats.completed,
            failed = stats.failed,
            aborted = stats.aborted,
            duplicates = stats.duplicates,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Indexing run finished"
        );
        Ok(stats)
    }

    pub fn stats(&self) -> RunStats {
        let counters = &self.inner.counters;
        RunStats {
            run_id: self.inner.run_id,
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            aborted: counters.aborted.load(Ordering::SeqCst),
            duplicates: counters.duplicates.load(Ordering::SeqCst),
            elapsed: self.inner.started.elapsed(),
        }
    }
}

impl<F: FileSystemTrait + 'static> Inner<F> {
    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0 && self.introspections.load(Ordering::SeqCst) == 0
    }

    async fn create_job(&self, kind: JobKind, invocation: CompileInvocation, from_remote: bool) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut job = IndexerJob::new(id, kind, invocation);
        job.from_remote = from_remote;
        trace!("Created {}", job);
        self.jobs.lock().await.insert(id, job);
        id
    }

    async fn job_done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1
            && self.introspections.load(Ordering::SeqCst) == 0
        {
            self.latch.trigger_success().await;
        }
    }

    /// Move a job to `RunningLocal` if this dispatch still owns it
    async fn start_local(&self, id: JobId, attempt: u32) -> Option<CompileInvocation> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id)?;
        if job.attempts != attempt || !matches!(job.state, JobState::Queued | JobState::Rescheduled) {
            trace!("Not running {} locally", job);
            return None;
        }
        if let Err(e) = job.transition(JobState::RunningLocal) {
            warn!("{}", e);
            return None;
        }
        Some(job.invocation.clone())
    }

    async fn run_local(self: Arc<Self>, id: JobId, attempt: u32) {
        let Some(invocation) = self.invocation_of(id).await else {
            return;
        };
        self.await_forced_includes(&invocation).await;

        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };
        let Some(invocation) = self.start_local(id, attempt).await else {
            return;
        };
        let outcome = self.parse_unit(&invocation).await;
        drop(_permit);

        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };
        if job.state == JobState::Aborted {
            debug!("Discarding results of aborted {}", job);
            return;
        }
        match outcome {
            Ok(parsed) => {
                job.visited = self
                    .state
                    .lock()
                    .await
                    .integrate(&parsed.contribution, parsed.source);
                advance(job, JobState::CompleteLocal);
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                error!("Failed to index {}: {}", job.source_file.display(), e);
                advance(job, JobState::Crashed);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        drop(jobs);
        self.job_done().await;
    }

    async fn run_pch(self: Arc<Self>, id: JobId, reservation: PchReservation) -> Option<PchEntry> {
        let permit = self.permits.acquire().await.ok();
        let Some(invocation) = self.start_local(id, 0).await else {
            self.state.lock().await.pch.release(reservation);
            return None;
        };

        let outcome = match self.parse_unit(&invocation).await {
            Ok(mut parsed) => self
                .stage_artifact(parsed.unit.take(), &invocation.input)
                .await
                .map(|artifact| (parsed, artifact)),
            Err(e) => Err(e),
        };
        drop(permit);

        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id)?;
        let mut state = self.state.lock().await;
        if job.state == JobState::Aborted {
            if let Ok((_, artifact)) = &outcome {
                let _ = std::fs::remove_file(artifact);
            }
            state.pch.release(reservation);
            debug!("Discarding results of aborted {}", job);
            return None;
        }

        let entry = match outcome {
            Ok((parsed, artifact)) => {
                let entry = PchEntry {
                    artifact_path: artifact,
                    origin_header: invocation.input.clone(),
                };
                let from_unsaved = parsed.contribution.from_unsaved;
                job.visited = state.integrate(&parsed.contribution, parsed.source);
                state.pch.complete(reservation, entry.clone(), from_unsaved);
                advance(job, JobState::CompleteLocal);
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Precompiled {} into {}",
                    invocation.input.display(),
                    entry.artifact_path.display()
                );
                Some(entry)
            }
            Err(e) => {
                error!("Failed to precompile {}: {}", invocation.input.display(), e);
                state.pch.release(reservation);
                advance(job, JobState::Crashed);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                None
            }
        };
        drop(state);
        drop(jobs);
        self.job_done().await;
        entry
    }

    async fn run_from_remote(self: Arc<Self>, id: JobId) -> Result<UnitResult, JobError> {
        let invocation = self.invocation_of(id).await.ok_or(JobError::UnknownJob(id))?;
        self.await_forced_includes(&invocation).await;

        let permit = self.permits.acquire().await.ok();
        let invocation = self
            .start_local(id, 0)
            .await
            .ok_or(JobError::Aborted(id))?;
        let outcome = self.parse_unit(&invocation).await;
        drop(permit);

        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::UnknownJob(id))?;
        if job.state == JobState::Aborted {
            return Err(JobError::Aborted(id));
        }
        match outcome {
            Ok(parsed) => {
                advance(job, JobState::CompleteLocal);
                Ok(UnitResult {
                    invocation,
                    contribution: parsed.contribution,
                    source: parsed.source,
                })
            }
            Err(e) => {
                advance(job, JobState::Crashed);
                Err(JobError::Failed {
                    id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn invocation_of(&self, id: JobId) -> Option<CompileInvocation> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .map(|job| job.invocation.clone())
    }

    /// Wait for precompiled headers named by `-include` that are still building
    ///
    /// Runs before a worker permit is taken so waiting never holds a pool slot.
    async fn await_forced_includes(&self, invocation: &CompileInvocation) {
        if self.config.flags.disable_pch {
            return;
        }
        for key in forced_include_keys(invocation) {
            let receiver = self.state.lock().await.pch.in_flight(&key);
            if let Some(receiver) = receiver {
                trace!("{} waits for precompiled header {}", invocation.input.display(), key);
                wait_ready(receiver).await;
            }
        }
    }

    async fn prepare_pch_use(&self, invocation: &CompileInvocation) -> PchUse {
        let mut pch_use = PchUse::default();
        if self.config.flags.disable_pch {
            return pch_use;
        }
        let keys = forced_include_keys(invocation);
        if keys.is_empty() {
            return pch_use;
        }

        let mut state = self.state.lock().await;
        for key in keys {
            let Some(entry) = state.pch.lookup_for_include(&key) else {
                continue;
            };
            pch_use.arguments.push("-include-pch".to_string());
            pch_use
                .arguments
                .push(entry.artifact_path.display().to_string());
            if state.pch.is_from_unsaved(&key) {
                pch_use.from_unsaved = true;
            }
            pch_use.origin_headers.push(entry.origin_header);
        }
        pch_use
    }

    async fn parse_unit(&self, invocation: &CompileInvocation) -> Result<ParsedUnit, FrontendError> {
        let started = Instant::now();
        let pch_use = self.prepare_pch_use(invocation).await;
        let mut arguments = self.config.frontend_arguments(invocation);
        arguments.extend(pch_use.arguments);

        let input = invocation.input.clone();
        let mut indexer = UnitIndexer::new(
            input.clone(),
            self.fs.clone(),
            self.unsaved_paths.clone(),
            self.system_includes.clone(),
            self.config.flags,
            self.errors.clone(),
        );
        if pch_use.from_unsaved {
            indexer.mark_unsaved();
        } else {
            for header in pch_use.origin_headers {
                indexer.add_dependency(header);
            }
        }

        let unit = if self.config.flags.dont_index {
            None
        } else {
            let frontend = self.frontend.clone();
            let unsaved = self.unsaved.clone();
            let owned = invocation.clone();
            let (result, returned) = tokio::task::spawn_blocking(move || {
                let request = ParseRequest {
                    invocation: &owned,
                    arguments,
                    unsaved: &unsaved,
                };
                let result = frontend.parse(&request, &mut indexer);
                (result, indexer)
            })
            .await
            .map_err(|e| FrontendError::Process(format!("parse task failed: {e}")))?;
            indexer = returned;
            Some(result?)
        };

        let errors = indexer.error_count();
        let contribution = indexer.finish();
        let source = Source {
            invocation: invocation.clone(),
            last_modified: self.fs.last_modified(&input),
            dependencies: contribution.dependencies.clone(),
            from_unsaved_file: contribution.from_unsaved,
        };
        debug!(
            input = %input.display(),
            errors,
            dependencies = source.dependencies.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Parsed unit"
        );
        Ok(ParsedUnit {
            contribution,
            source,
            unit,
        })
    }

    /// Save a parsed header into a private artifact in the staging directory
    async fn stage_artifact(
        &self,
        unit: Option<Box<dyn TranslationUnit>>,
        input: &Path,
    ) -> Result<PathBuf, FrontendError> {
        let unit = unit.ok_or_else(|| FrontendError::save_failed(input, "no translation unit"))?;
        let staging = self.config.staging_path();
        tokio::task::spawn_blocking(move || -> Result<PathBuf, FrontendError> {
            std::fs::create_dir_all(&staging)?;
            let path = tempfile::Builder::new()
                .prefix("cxref-pch-")
                .suffix(".pch")
                .tempfile_in(&staging)?
                .into_temp_path()
                .keep()
                .map_err(|e| FrontendError::Io(e.error))?;
            if let Err(e) = unit.save(&path) {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
            Ok(path)
        })
        .await
        .map_err(|e| FrontendError::Process(format!("staging task failed: {e}")))?
    }
}

fn advance(job: &mut IndexerJob, next: JobState) {
    if let Err(e) = job.transition(next) {
        warn!("{}", e);
    }
}

/// Cache keys named by `-include`, resolved against the working directory
fn forced_include_keys(invocation: &CompileInvocation) -> Vec<String> {
    invocation
        .includes()
        .into_iter()
        .map(|include| {
            let path = Path::new(&include);
            if path.is_absolute() {
                include
            } else {
                invocation.directory.join(path).display().to_string()
            }
        })
        .collect()
}

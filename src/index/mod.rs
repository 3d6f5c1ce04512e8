//! Indexing core
//!
//! - **dependencies**: timestamp-driven dirtiness propagation over stored sources
//! - **scheduler**: bounded job dispatch, remote hand-off and the completion latch
//! - **resolver**: frontend events to entity graph, with deferred references
//! - **pch**: precompiled header cache and artifact relocation
//! - **state**: the single lock-guarded aggregate shared by all jobs

pub mod dependencies;
pub mod diagnostics;
pub mod job;
pub mod latch;
pub mod pch;
pub mod resolver;
pub mod scheduler;
pub mod state;

pub use dependencies::{DependencyTracker, DirtyPlan, Source};
pub use diagnostics::ErrorLog;
pub use job::{IndexerJob, JobError, JobId, JobKind, JobState};
pub use latch::{CompletionLatch, LatchError};
pub use pch::{PchEntry, PchTable, RelocationReport};
pub use resolver::{EntityGraph, ReconcileReport, UnitContribution, UnitIndexer};
pub use scheduler::{JobScheduler, RunStats, SchedulerContext, UnitResult};
pub use state::{IndexState, SharedState};

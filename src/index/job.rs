//! Indexing jobs and their state machine

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::CompileInvocation;
use crate::symbol::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Unit of an initial build
    Compile,
    /// Unit re-parsed by an update
    Dirty,
    /// Header precompilation
    Pch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    RunningLocal,
    Remote,
    Rescheduled,
    CompleteLocal,
    CompleteRemote,
    Crashed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::CompleteLocal
                | JobState::CompleteRemote
                | JobState::Crashed
                | JobState::Aborted
        )
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, RunningLocal)
                | (Queued, Remote)
                | (Queued, Aborted)
                | (RunningLocal, CompleteLocal)
                | (RunningLocal, Crashed)
                | (RunningLocal, Aborted)
                | (Remote, CompleteRemote)
                | (Remote, Rescheduled)
                | (Remote, Aborted)
                | (Rescheduled, RunningLocal)
                | (Rescheduled, Remote)
                | (Rescheduled, Aborted)
        )
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    #[error("Job {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} was aborted")]
    Aborted(JobId),

    #[error("Job {id} failed: {reason}")]
    Failed { id: JobId, reason: String },

    #[error("{path} does not produce a precompiled header")]
    NotPrecompilable { path: String },

    #[error("Precompiled header {key} could not be built")]
    PchUnavailable { key: String },
}

/// Everything the scheduler knows about one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerJob {
    pub id: JobId,
    pub kind: JobKind,
    /// Executed on behalf of a remote peer; results are shipped back
    pub from_remote: bool,
    pub state: JobState,
    pub destination: Option<String>,
    pub port: Option<u16>,
    pub invocation: CompileInvocation,
    pub source_file: PathBuf,
    /// Files another job is indexing, with the number of times they were hit
    pub blocked_files: HashMap<PathBuf, u32>,
    pub visited: BTreeSet<FileId>,
    pub started: Option<DateTime<Utc>>,
    /// Local dispatches so far; bumped by every reschedule
    pub attempts: u32,
}

impl IndexerJob {
    pub fn new(id: JobId, kind: JobKind, invocation: CompileInvocation) -> Self {
        Self {
            id,
            kind,
            from_remote: false,
            state: JobState::Queued,
            destination: None,
            port: None,
            source_file: invocation.input.clone(),
            invocation,
            blocked_files: HashMap::new(),
            visited: BTreeSet::new(),
            started: None,
            attempts: 0,
        }
    }

    pub fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        if next == JobState::RunningLocal {
            self.started = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }
}

impl fmt::Display for IndexerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = vec![format!("{:?}", self.kind)];
        if self.from_remote {
            flags.push("FromRemote".to_string());
        }
        flags.push(format!("{:?}", self.state));
        write!(f, "{} {} [{}]", self.id, self.source_file.display(), flags.join("|"))?;
        if let (Some(destination), Some(port)) = (&self.destination, self.port) {
            write!(f, " -> {destination}:{port}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn job() -> IndexerJob {
        IndexerJob::new(
            JobId(7),
            JobKind::Compile,
            CompileInvocation::for_source(Path::new("/src/a.cpp")),
        )
    }

    #[test]
    fn test_local_lifecycle() {
        let mut job = job();
        job.transition(JobState::RunningLocal).unwrap();
        assert!(job.started.is_some());
        job.transition(JobState::CompleteLocal).unwrap();
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_remote_reschedule_lifecycle() {
        let mut job = job();
        job.transition(JobState::Remote).unwrap();
        job.transition(JobState::Rescheduled).unwrap();
        job.transition(JobState::Remote).unwrap();
        job.transition(JobState::CompleteRemote).unwrap();
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut job = job();
        assert!(matches!(
            job.transition(JobState::CompleteLocal),
            Err(JobError::InvalidTransition { .. })
        ));
        job.transition(JobState::RunningLocal).unwrap();
        job.transition(JobState::Crashed).unwrap();
        assert!(job.transition(JobState::RunningLocal).is_err());
        assert_eq!(job.state, JobState::Crashed);
    }

    #[test]
    fn test_display_dumps_flags() {
        let mut job = job();
        job.from_remote = true;
        job.transition(JobState::Remote).unwrap();
        job.destination = Some("builder-3".to_string());
        job.port = Some(12526);
        assert_eq!(
            job.to_string(),
            "#7 /src/a.cpp [Compile|FromRemote|Remote] -> builder-3:12526"
        );
    }
}

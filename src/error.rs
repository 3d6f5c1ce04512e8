use thiserror::Error;

use crate::database::DatabaseError;
use crate::frontend::FrontendError;
use crate::index::{JobError, LatchError};
use crate::project::ProjectError;

/// Top-level error of a build or update run
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Nothing to do: no compile commands or source files given")]
    NothingToDo,

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Frontend error: {0}")]
    Frontend(#[from] FrontendError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Run did not complete: {0}")]
    Latch(#[from] LatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

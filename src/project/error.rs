use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path does not exist: {path}")]
    PathNotFound { path: String },

    #[error("Not a regular file: {path}")]
    NotAFile { path: String },

    #[error("Source root directory not found: {path}")]
    SourceRootNotFound { path: String },

    #[error("Invalid compiler invocation: {reason}")]
    InvalidInvocation { reason: String },

    #[error("Compilation database error: {0}")]
    CompilationDatabase(#[from] super::CompilationDatabaseError),
}

impl ProjectError {
    pub fn invalid_invocation(reason: impl Into<String>) -> Self {
        Self::InvalidInvocation {
            reason: reason.into(),
        }
    }
}

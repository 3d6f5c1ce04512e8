//! Language frontend seam
//!
//! The indexer never parses source text. A [`Frontend`] parses one
//! translation unit and reports what it saw through an [`IndexListener`]:
//! inclusions, declarations, references and diagnostics. The listener is
//! strongly typed so the resolver can be driven by any frontend, including a
//! scripted one in tests.

pub mod process;

#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::CompileInvocation;
use crate::symbol::{SourcePosition, SymbolKind, Usr};

pub use process::ProcessFrontend;

/// In-memory buffers that shadow files on disk, keyed by absolute path
pub type UnsavedFiles = HashMap<PathBuf, Vec<u8>>;

/// Errors reported by a frontend
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("Failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Frontend executable failed: {0}")]
    Process(String),

    #[error("Malformed frontend event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("Failed to save translation unit to {path}: {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    pub fn parse_failed(path: &Path, reason: impl Into<String>) -> Self {
        Self::ParseFailed {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn save_failed(path: &Path, reason: impl Into<String>) -> Self {
        Self::SaveFailed {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// One link of a semantic-parent chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCursor {
    pub kind: SymbolKind,
    #[serde(default)]
    pub display_name: String,
}

/// A cursor as described by the frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub usr: Usr,
    pub kind: SymbolKind,
    #[serde(default)]
    pub display_name: String,
    /// Where the cursor itself is declared
    pub location: SourcePosition,
    /// Semantic parents, innermost first
    #[serde(default)]
    pub semantic_parents: Vec<ScopeCursor>,
    /// Generic template this cursor specializes, if any
    #[serde(default)]
    pub specialized_template: Option<Usr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationEvent {
    pub cursor: CursorInfo,
    pub location: SourcePosition,
    #[serde(default)]
    pub is_definition: bool,
    /// USR of the semantic container (the enclosing type for members)
    #[serde(default)]
    pub semantic_container: Option<Usr>,
    /// Methods this declaration overrides
    #[serde(default)]
    pub overridden: Vec<CursorInfo>,
    /// Type and template references found among the declaration's children
    #[serde(default)]
    pub child_references: Vec<ReferenceEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEvent {
    pub referenced: CursorInfo,
    pub location: SourcePosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionEvent {
    pub included_file: PathBuf,
    /// Include chain from the includer up to the main file; empty for the main file
    #[serde(default)]
    pub inclusion_stack: Vec<SourcePosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Ignored => "ignored",
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub location: Option<SourcePosition>,
}

/// Event stream element, as serialized by external frontends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FrontendEvent {
    Inclusion(InclusionEvent),
    Declaration(DeclarationEvent),
    Reference(ReferenceEvent),
    Diagnostic(DiagnosticEvent),
}

impl FrontendEvent {
    /// Forward this event to the matching listener callback
    pub fn dispatch(self, listener: &mut dyn IndexListener) {
        match self {
            FrontendEvent::Inclusion(e) => listener.on_inclusion(e),
            FrontendEvent::Declaration(e) => listener.on_declaration(e),
            FrontendEvent::Reference(e) => listener.on_reference(e),
            FrontendEvent::Diagnostic(e) => listener.on_diagnostic(e),
        }
    }
}

/// Receiver of frontend callbacks for one translation unit
pub trait IndexListener: Send {
    fn on_inclusion(&mut self, event: InclusionEvent);
    fn on_declaration(&mut self, event: DeclarationEvent);
    fn on_reference(&mut self, event: ReferenceEvent);
    fn on_diagnostic(&mut self, event: DiagnosticEvent);
}

/// Everything a frontend needs to parse one unit
#[derive(Debug)]
pub struct ParseRequest<'a> {
    pub invocation: &'a CompileInvocation,
    /// Full argument list: invocation flags plus configured extras
    pub arguments: Vec<String>,
    pub unsaved: &'a UnsavedFiles,
}

/// A parsed translation unit
pub trait TranslationUnit: Send {
    /// Serialize the unit (a precompiled header artifact) to `path`
    fn save(&self, path: &Path) -> Result<(), FrontendError>;
}

/// Parses translation units and reports events
pub trait Frontend: Send + Sync {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        listener: &mut dyn IndexListener,
    ) -> Result<Box<dyn TranslationUnit>, FrontendError>;
}

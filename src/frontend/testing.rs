//! Scripted frontend and event builders for tests

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::frontend::{
    CursorInfo, DeclarationEvent, DiagnosticEvent, Frontend, FrontendError, FrontendEvent,
    InclusionEvent, IndexListener, ParseRequest, ReferenceEvent, ScopeCursor, Severity,
    TranslationUnit,
};
use crate::symbol::{SourcePosition, SymbolKind};

/// Replays a fixed event list per input file
#[derive(Default)]
pub struct ScriptedFrontend {
    scripts: HashMap<PathBuf, Vec<FrontendEvent>>,
    failing: HashSet<PathBuf>,
    delay: Option<Duration>,
    parses: AtomicUsize,
    requests: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl ScriptedFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, input: impl Into<PathBuf>, events: Vec<FrontendEvent>) -> Self {
        self.scripts.insert(input.into(), events);
        self
    }

    pub fn fail(mut self, input: impl Into<PathBuf>) -> Self {
        self.failing.insert(input.into());
        self
    }

    /// Sleep inside every parse, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn parses_of(&self, input: &Path) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path == input)
            .count()
    }

    /// Argument lists received for `input`, in call order
    pub fn arguments_of(&self, input: &Path) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path == input)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

impl Frontend for ScriptedFrontend {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        listener: &mut dyn IndexListener,
    ) -> Result<Box<dyn TranslationUnit>, FrontendError> {
        let input = request.invocation.input.clone();
        self.parses.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((input.clone(), request.arguments.clone()));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        for event in self.scripts.get(&input).cloned().unwrap_or_default() {
            event.dispatch(listener);
        }

        if self.failing.contains(&input) {
            return Err(FrontendError::parse_failed(&input, "scripted failure"));
        }
        Ok(Box::new(ScriptedUnit { input }))
    }
}

struct ScriptedUnit {
    input: PathBuf,
}

impl TranslationUnit for ScriptedUnit {
    fn save(&self, path: &Path) -> Result<(), FrontendError> {
        std::fs::write(path, format!("unit:{}", self.input.display()))?;
        Ok(())
    }
}

/// Listener that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub inclusions: Vec<InclusionEvent>,
    pub declarations: Vec<DeclarationEvent>,
    pub references: Vec<ReferenceEvent>,
    pub diagnostics: Vec<DiagnosticEvent>,
}

impl IndexListener for RecordingListener {
    fn on_inclusion(&mut self, event: InclusionEvent) {
        self.inclusions.push(event);
    }

    fn on_declaration(&mut self, event: DeclarationEvent) {
        self.declarations.push(event);
    }

    fn on_reference(&mut self, event: ReferenceEvent) {
        self.references.push(event);
    }

    fn on_diagnostic(&mut self, event: DiagnosticEvent) {
        self.diagnostics.push(event);
    }
}

// ============================================================================
// Event builders
// ============================================================================

pub fn pos(path: &str, line: u32, column: u32) -> SourcePosition {
    SourcePosition::new(path, line, column)
}

pub fn cursor(usr: &str, kind: SymbolKind, name: &str, location: SourcePosition) -> CursorInfo {
    CursorInfo {
        usr: usr.to_string(),
        kind,
        display_name: name.to_string(),
        location,
        semantic_parents: Vec::new(),
        specialized_template: None,
    }
}

pub fn scope(kind: SymbolKind, name: &str) -> ScopeCursor {
    ScopeCursor {
        kind,
        display_name: name.to_string(),
    }
}

pub fn declaration(cursor: CursorInfo, is_definition: bool) -> DeclarationEvent {
    DeclarationEvent {
        location: cursor.location.clone(),
        cursor,
        is_definition,
        semantic_container: None,
        overridden: Vec::new(),
        child_references: Vec::new(),
    }
}

pub fn declare(cursor: CursorInfo, is_definition: bool) -> FrontendEvent {
    FrontendEvent::Declaration(declaration(cursor, is_definition))
}

pub fn reference(referenced: CursorInfo, location: SourcePosition) -> FrontendEvent {
    FrontendEvent::Reference(ReferenceEvent {
        referenced,
        location,
    })
}

/// `includer` includes `included`; `includer` is the top of the stack
pub fn include(included: &str, includer: &str) -> FrontendEvent {
    FrontendEvent::Inclusion(InclusionEvent {
        included_file: PathBuf::from(included),
        inclusion_stack: vec![pos(includer, 1, 1)],
    })
}

/// The main-file inclusion every frontend reports first
pub fn main_file(path: &str) -> FrontendEvent {
    FrontendEvent::Inclusion(InclusionEvent {
        included_file: PathBuf::from(path),
        inclusion_stack: Vec::new(),
    })
}

pub fn diagnostic(severity: Severity, message: &str, at: SourcePosition) -> FrontendEvent {
    FrontendEvent::Diagnostic(DiagnosticEvent {
        severity,
        message: message.to_string(),
        location: Some(at),
    })
}

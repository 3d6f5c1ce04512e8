//! Entity resolution
//!
//! Resolution is two-phase. While a unit is parsed, its [`UnitIndexer`]
//! collects a [`UnitContribution`] without touching shared state. When the
//! job finishes, the contribution is merged into the shared [`EntityGraph`]
//! under the coordination lock. After every job has finished,
//! [`EntityGraph::reconcile`] attaches pending references to their entities
//! and derives `subs` from `super`.
//!
//! Merging is order independent: names and scopes are first-seen, location
//! sets are additive, and pending references are keyed by location.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::config::IndexerFlags;
use crate::frontend::{
    CursorInfo, DeclarationEvent, DiagnosticEvent, InclusionEvent, IndexListener, ReferenceEvent,
    ScopeCursor,
};
use crate::index::diagnostics::ErrorLog;
use crate::io::FileSystemTrait;
use crate::symbol::{
    Entity, FileTable, Location, PendingReference, SourcePosition, SymbolKind, Usr,
};

// ============================================================================
// Unit contribution
// ============================================================================

/// A change to the entity graph recorded by one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntityOp {
    Declare {
        usr: Usr,
        name: String,
        scope: Vec<String>,
        location: SourcePosition,
        is_definition: bool,
        super_location: Option<SourcePosition>,
        overridden_usr: Option<Usr>,
    },
    /// Constructor or destructor site attributed to its enclosing type
    ExtraDeclaration { container: Usr, location: SourcePosition },
    /// Minimal entity for a template type parameter
    Synthesize {
        usr: Usr,
        name: String,
        definition: SourcePosition,
        scope: Vec<String>,
    },
}

/// Everything one translation unit adds to the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitContribution {
    pub ops: Vec<EntityOp>,
    /// First reference seen at each location
    #[serde(with = "position_pairs")]
    pub pending: BTreeMap<SourcePosition, PendingReference>,
    /// Included files and their timestamps at parse time
    pub dependencies: BTreeMap<PathBuf, u64>,
    pub from_unsaved: bool,
}

impl UnitContribution {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.pending.is_empty()
    }
}

/// JSON object keys must be strings, so positions travel as `[key, value]` pairs
mod position_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::symbol::{PendingReference, SourcePosition};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<SourcePosition, PendingReference>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<SourcePosition, PendingReference>, D::Error> {
        let pairs = Vec::<(SourcePosition, PendingReference)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ============================================================================
// Unit indexer
// ============================================================================

/// Listener that turns frontend events for one unit into a contribution
pub struct UnitIndexer<F: FileSystemTrait> {
    input: PathBuf,
    fs: F,
    unsaved_paths: HashSet<PathBuf>,
    system_includes: Arc<Vec<PathBuf>>,
    flags: IndexerFlags,
    errors: Arc<ErrorLog>,
    contribution: UnitContribution,
    error_count: usize,
}

impl<F: FileSystemTrait> UnitIndexer<F> {
    pub fn new(
        input: PathBuf,
        fs: F,
        unsaved_paths: HashSet<PathBuf>,
        system_includes: Arc<Vec<PathBuf>>,
        flags: IndexerFlags,
        errors: Arc<ErrorLog>,
    ) -> Self {
        let from_unsaved = unsaved_paths.contains(&input);
        Self {
            input,
            fs,
            unsaved_paths,
            system_includes,
            flags,
            errors,
            contribution: UnitContribution {
                from_unsaved,
                ..Default::default()
            },
            error_count: 0,
        }
    }

    /// Record a dependency that does not come from an inclusion event
    pub fn add_dependency(&mut self, path: PathBuf) {
        if self.contribution.from_unsaved {
            return;
        }
        let modified = self.fs.last_modified(&path);
        self.contribution.dependencies.insert(path, modified);
    }

    /// Mark the unit as built from an in-memory buffer
    pub fn mark_unsaved(&mut self) {
        self.contribution.from_unsaved = true;
        self.contribution.dependencies.clear();
    }

    /// Number of error diagnostics reported for this unit
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn finish(self) -> UnitContribution {
        self.contribution
    }

    fn is_system_header(&self, path: &std::path::Path) -> bool {
        self.system_includes.iter().any(|dir| path.starts_with(dir))
    }

    fn record_reference(&mut self, referenced: &CursorInfo, location: SourcePosition) {
        if self.flags.debug_all_symbols {
            trace!(
                "{}: ref of {:?} {} {}",
                location, referenced.kind, referenced.display_name, referenced.location
            );
        }

        if self.contribution.pending.contains_key(&location) {
            return;
        }
        if referenced.kind == SymbolKind::TemplateTypeParameter {
            self.contribution.ops.push(EntityOp::Synthesize {
                usr: referenced.usr.clone(),
                name: referenced.display_name.clone(),
                definition: referenced.location.clone(),
                scope: cursor_scope(&referenced.semantic_parents),
            });
        }
        self.contribution.pending.insert(
            location,
            PendingReference {
                usr: referenced.usr.clone(),
                specialized: referenced.specialized_template.clone(),
            },
        );
    }
}

impl<F: FileSystemTrait> IndexListener for UnitIndexer<F> {
    fn on_inclusion(&mut self, event: InclusionEvent) {
        if self.contribution.from_unsaved || event.inclusion_stack.is_empty() {
            return;
        }
        let included = event.included_file;
        if self.unsaved_paths.contains(&included) {
            debug!(
                "{} includes unsaved buffer {}",
                self.input.display(),
                included.display()
            );
            self.mark_unsaved();
            return;
        }
        if included == self.input {
            return;
        }
        if !self.flags.system_header_dependencies && self.is_system_header(&included) {
            return;
        }
        let modified = self.fs.last_modified(&included);
        self.contribution.dependencies.insert(included, modified);
    }

    fn on_declaration(&mut self, event: DeclarationEvent) {
        let DeclarationEvent {
            cursor,
            location,
            is_definition,
            semantic_container,
            overridden,
            child_references,
        } = event;

        if self.flags.debug_all_symbols {
            trace!(
                "{}: {:?} {} {}",
                location,
                cursor.kind,
                cursor.display_name,
                if is_definition { "definition" } else { "" }
            );
        }

        let (super_location, overridden_usr) = match overridden.as_slice() {
            [base] if cursor.kind.can_override() => {
                (Some(base.location.clone()), Some(base.usr.clone()))
            }
            _ => (None, None),
        };

        self.contribution.ops.push(EntityOp::Declare {
            usr: cursor.usr.clone(),
            name: cursor.display_name.clone(),
            scope: cursor_scope(&cursor.semantic_parents),
            location: location.clone(),
            is_definition,
            super_location,
            overridden_usr,
        });

        if matches!(cursor.kind, SymbolKind::Constructor | SymbolKind::Destructor) {
            match semantic_container {
                Some(container) => {
                    let mut site = location;
                    if cursor.kind == SymbolKind::Destructor {
                        // point past the '~'
                        site.column += 1;
                    }
                    self.contribution.ops.push(EntityOp::ExtraDeclaration {
                        container,
                        location: site,
                    });
                }
                None => warn!("{} has no semantic container", cursor.display_name),
            }
        }

        if cursor.kind.scans_children() {
            for child in child_references {
                self.record_reference(&child.referenced, child.location);
            }
        }
    }

    fn on_reference(&mut self, event: ReferenceEvent) {
        self.record_reference(&event.referenced, event.location);
    }

    fn on_diagnostic(&mut self, event: DiagnosticEvent) {
        let text = match &event.location {
            Some(at) => format!("{}: {}: {}", at, event.severity, event.message),
            None => format!("{}: {}", event.severity, event.message),
        };
        if event.severity.is_error() {
            self.error_count += 1;
            self.errors.append(&self.input, &text);
            error!("{}: {}", self.input.display(), text);
        } else if self.flags.verbose {
            info!("{}: {}", self.input.display(), text);
        }
    }
}

/// Namespace, class and struct names enclosing a cursor, outermost first
///
/// Walks the semantic parents and stops at the first unnamed one, so members
/// of anonymous scopes only get the part of the chain below them.
pub fn cursor_scope(semantic_parents: &[ScopeCursor]) -> Vec<String> {
    let mut scope: Vec<String> = semantic_parents
        .iter()
        .take_while(|parent| !parent.display_name.is_empty())
        .filter(|parent| parent.kind.is_scope())
        .map(|parent| parent.display_name.clone())
        .collect();
    scope.reverse();
    scope
}

// ============================================================================
// Entity graph
// ============================================================================

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// References attached to the entity they name
    pub resolved: usize,
    /// References attached through the specialized template instead
    pub via_specialization: usize,
    /// References whose target is unknown
    pub unresolved: usize,
}

/// Shared symbol graph plus the references still waiting for resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityGraph {
    pub entities: BTreeMap<Usr, Entity>,
    pub pending: BTreeMap<Location, PendingReference>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: BTreeMap<Usr, Entity>) -> Self {
        Self {
            entities,
            pending: BTreeMap::new(),
        }
    }

    /// Fold a unit's contribution into the graph, interning its paths
    pub fn merge(&mut self, contribution: &UnitContribution, files: &mut FileTable) {
        for op in &contribution.ops {
            match op {
                EntityOp::Declare {
                    usr,
                    name,
                    scope,
                    location,
                    is_definition,
                    super_location,
                    overridden_usr,
                } => {
                    let location = files.location(location);
                    let entity = self.entities.entry(usr.clone()).or_default();
                    if entity.symbol_name.is_empty() {
                        entity.symbol_name = name.clone();
                        entity.cursor_scope = scope.clone();
                    }
                    if *is_definition {
                        // first definition wins
                        if entity.definition.is_none() {
                            entity.set_definition(location);
                        }
                    } else {
                        entity.add_declaration(location);
                    }
                    if entity.super_location.is_none()
                        && let Some(base) = super_location
                    {
                        entity.super_location = Some(files.location(base));
                        entity.overridden_usr = overridden_usr.clone();
                    }
                }
                EntityOp::ExtraDeclaration {
                    container,
                    location,
                } => {
                    let location = files.location(location);
                    self.entities
                        .entry(container.clone())
                        .or_default()
                        .extra_declarations
                        .insert(location);
                }
                EntityOp::Synthesize {
                    usr,
                    name,
                    definition,
                    scope,
                } => {
                    let definition = files.location(definition);
                    self.entities.entry(usr.clone()).or_insert_with(|| Entity {
                        symbol_name: name.clone(),
                        definition: Some(definition),
                        cursor_scope: scope.clone(),
                        ..Default::default()
                    });
                }
            }
        }

        for (position, reference) in &contribution.pending {
            let location = files.location(position);
            self.pending
                .entry(location)
                .or_insert_with(|| reference.clone());
        }
    }

    /// Attach pending references and derive `subs`
    ///
    /// The pending table is left intact, so running this twice yields the
    /// same graph and the same report.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (location, reference) in &self.pending {
            if let Some(entity) = self.entities.get_mut(&reference.usr) {
                entity.references.insert(*location);
                report.resolved += 1;
            } else if let Some(entity) = reference
                .specialized
                .as_ref()
                .and_then(|usr| self.entities.get_mut(usr))
            {
                entity.references.insert(*location);
                report.via_specialization += 1;
            } else {
                trace!("Unresolved reference at {} to {}", location, reference.usr);
                report.unresolved += 1;
            }
        }

        self.rebuild_subs();

        debug!(
            resolved = report.resolved,
            via_specialization = report.via_specialization,
            unresolved = report.unresolved,
            "Reconciled pending references"
        );
        report
    }

    /// Drop the pending table once a cycle has been reconciled
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn rebuild_subs(&mut self) {
        let overrides: Vec<(Usr, Location)> = self
            .entities
            .values()
            .filter_map(|entity| {
                let base = entity.overridden_usr.clone()?;
                Some((base, entity.definition?))
            })
            .collect();

        for entity in self.entities.values_mut() {
            entity.subs.clear();
        }
        for (base, definition) in overrides {
            if let Some(entity) = self.entities.get_mut(&base) {
                entity.subs.insert(definition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::testing::{cursor, declaration, pos, scope};
    use crate::frontend::{FrontendEvent, Severity};
    use crate::io::TestFileSystem;
    use crate::symbol::FileId;

    fn indexer(fs: &TestFileSystem, input: &str) -> UnitIndexer<TestFileSystem> {
        UnitIndexer::new(
            PathBuf::from(input),
            fs.clone(),
            HashSet::new(),
            Arc::new(vec![PathBuf::from("/usr/include")]),
            IndexerFlags::default(),
            Arc::new(ErrorLog::new()),
        )
    }

    fn inclusion(included: &str, includer: &str) -> InclusionEvent {
        InclusionEvent {
            included_file: PathBuf::from(included),
            inclusion_stack: vec![pos(includer, 1, 1)],
        }
    }

    #[test]
    fn test_inclusions_become_dependencies() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.h", 10);
        let mut unit = indexer(&fs, "/src/a.cpp");

        unit.on_inclusion(InclusionEvent {
            included_file: PathBuf::from("/src/a.cpp"),
            inclusion_stack: Vec::new(),
        });
        unit.on_inclusion(inclusion("/src/a.h", "/src/a.cpp"));
        unit.on_inclusion(inclusion("/usr/include/stdio.h", "/src/a.cpp"));
        unit.on_inclusion(inclusion("/src/missing.h", "/src/a.cpp"));

        let contribution = unit.finish();
        assert_eq!(contribution.dependencies.len(), 2);
        assert_eq!(contribution.dependencies[&PathBuf::from("/src/a.h")], 10_000);
        assert_eq!(contribution.dependencies[&PathBuf::from("/src/missing.h")], 0);
    }

    #[test]
    fn test_system_headers_tracked_when_enabled() {
        let fs = TestFileSystem::new();
        let mut unit = UnitIndexer::new(
            PathBuf::from("/src/a.cpp"),
            fs,
            HashSet::new(),
            Arc::new(vec![PathBuf::from("/usr/include")]),
            IndexerFlags {
                system_header_dependencies: true,
                ..Default::default()
            },
            Arc::new(ErrorLog::new()),
        );
        unit.on_inclusion(inclusion("/usr/include/stdio.h", "/src/a.cpp"));
        assert_eq!(unit.finish().dependencies.len(), 1);
    }

    #[test]
    fn test_including_unsaved_buffer_clears_dependencies() {
        let fs = TestFileSystem::new();
        let mut unit = UnitIndexer::new(
            PathBuf::from("/src/a.cpp"),
            fs,
            [PathBuf::from("/src/b.h")].into_iter().collect(),
            Arc::new(Vec::new()),
            IndexerFlags::default(),
            Arc::new(ErrorLog::new()),
        );
        unit.on_inclusion(inclusion("/src/a.h", "/src/a.cpp"));
        unit.on_inclusion(inclusion("/src/b.h", "/src/a.cpp"));
        unit.on_inclusion(inclusion("/src/c.h", "/src/a.cpp"));

        let contribution = unit.finish();
        assert!(contribution.from_unsaved);
        assert!(contribution.dependencies.is_empty());
    }

    #[test]
    fn test_first_reference_per_location_wins() {
        let fs = TestFileSystem::new();
        let mut unit = indexer(&fs, "/src/a.cpp");
        let at = pos("/src/a.cpp", 5, 3);
        let f = cursor("c:@F@f#", SymbolKind::Function, "f()", pos("/src/a.h", 1, 6));
        let g = cursor("c:@F@g#", SymbolKind::Function, "g()", pos("/src/a.h", 2, 6));

        unit.on_reference(ReferenceEvent {
            referenced: f,
            location: at.clone(),
        });
        unit.on_reference(ReferenceEvent {
            referenced: g,
            location: at.clone(),
        });

        let contribution = unit.finish();
        assert_eq!(contribution.pending.len(), 1);
        assert_eq!(contribution.pending[&at].usr, "c:@F@f#");
    }

    #[test]
    fn test_constructor_and_destructor_extra_declarations() {
        let fs = TestFileSystem::new();
        let mut unit = indexer(&fs, "/src/a.cpp");

        let mut ctor = declaration(
            cursor("c:@S@A@F@A#", SymbolKind::Constructor, "A()", pos("/src/a.h", 3, 5)),
            false,
        );
        ctor.semantic_container = Some("c:@S@A".to_string());
        let mut dtor = declaration(
            cursor("c:@S@A@F@~A#", SymbolKind::Destructor, "~A()", pos("/src/a.h", 4, 5)),
            false,
        );
        dtor.semantic_container = Some("c:@S@A".to_string());
        unit.on_declaration(ctor);
        unit.on_declaration(dtor);

        let mut graph = EntityGraph::new();
        let mut files = FileTable::new();
        graph.merge(&unit.finish(), &mut files);

        let class = &graph.entities["c:@S@A"];
        let h = files.id(std::path::Path::new("/src/a.h")).unwrap();
        assert!(class.extra_declarations.contains(&Location::new(h, 3, 5)));
        assert!(class.extra_declarations.contains(&Location::new(h, 4, 6)));
        assert!(class.symbol_name.is_empty());
    }

    #[test]
    fn test_only_some_kinds_scan_children() {
        let fs = TestFileSystem::new();
        let mut unit = indexer(&fs, "/src/a.cpp");
        let ty = cursor("c:@S@T", SymbolKind::Struct, "T", pos("/src/t.h", 1, 8));

        let mut var = declaration(
            cursor("c:@x", SymbolKind::Variable, "x", pos("/src/a.cpp", 2, 3)),
            true,
        );
        var.child_references.push(ReferenceEvent {
            referenced: ty.clone(),
            location: pos("/src/a.cpp", 2, 1),
        });
        let mut typedef = declaration(
            cursor("c:@T@U", SymbolKind::Typedef, "U", pos("/src/a.cpp", 3, 11)),
            true,
        );
        typedef.child_references.push(ReferenceEvent {
            referenced: ty,
            location: pos("/src/a.cpp", 3, 9),
        });

        unit.on_declaration(var);
        unit.on_declaration(typedef);

        let contribution = unit.finish();
        assert_eq!(contribution.pending.len(), 1);
        assert!(contribution.pending.contains_key(&pos("/src/a.cpp", 2, 1)));
    }

    #[test]
    fn test_template_type_parameter_is_synthesized() {
        let fs = TestFileSystem::new();
        let mut unit = indexer(&fs, "/src/a.h");
        let mut param = cursor(
            "c:a.h@T",
            SymbolKind::TemplateTypeParameter,
            "T",
            pos("/src/a.h", 1, 19),
        );
        param.semantic_parents = vec![scope(SymbolKind::ClassTemplate, "Box<T>"), scope(SymbolKind::Namespace, "ns")];
        FrontendEvent::Reference(ReferenceEvent {
            referenced: param,
            location: pos("/src/a.h", 3, 5),
        })
        .dispatch(&mut unit);

        let mut graph = EntityGraph::new();
        let mut files = FileTable::new();
        graph.merge(&unit.finish(), &mut files);
        let report = graph.reconcile();

        let entity = &graph.entities["c:a.h@T"];
        assert_eq!(entity.symbol_name, "T");
        assert_eq!(entity.definition, Some(Location::new(FileId(1), 1, 19)));
        assert_eq!(entity.cursor_scope, vec!["ns".to_string()]);
        assert_eq!(entity.references.len(), 1);
        assert_eq!(report.resolved, 1);
    }

    #[test]
    fn test_cursor_scope_stops_at_unnamed_parent() {
        let parents = vec![
            scope(SymbolKind::Class, "Inner"),
            scope(SymbolKind::Function, "helper()"),
            scope(SymbolKind::Namespace, "detail"),
            scope(SymbolKind::Namespace, ""),
            scope(SymbolKind::Namespace, "outer"),
        ];
        assert_eq!(cursor_scope(&parents), vec!["detail", "Inner"]);
        assert!(cursor_scope(&[]).is_empty());
    }

    #[test]
    fn test_first_seen_name_and_override_are_kept() {
        let mut graph = EntityGraph::new();
        let mut files = FileTable::new();
        let declare = |name: &str, line: u32, base: Option<&str>| EntityOp::Declare {
            usr: "c:@S@D@F@f#".to_string(),
            name: name.to_string(),
            scope: vec!["D".to_string()],
            location: pos("/src/d.h", line, 10),
            is_definition: false,
            super_location: base.map(|_| pos("/src/b.h", 2, 10)),
            overridden_usr: base.map(str::to_string),
        };

        graph.merge(
            &UnitContribution {
                ops: vec![declare("f(int)", 1, Some("c:@S@B@F@f#"))],
                ..Default::default()
            },
            &mut files,
        );
        graph.merge(
            &UnitContribution {
                ops: vec![declare("f(long)", 2, Some("c:@S@C@F@f#"))],
                ..Default::default()
            },
            &mut files,
        );

        let entity = &graph.entities["c:@S@D@F@f#"];
        assert_eq!(entity.symbol_name, "f(int)");
        assert_eq!(entity.overridden_usr.as_deref(), Some("c:@S@B@F@f#"));
        assert_eq!(entity.declarations.len(), 2);
    }

    #[test]
    fn test_method_with_several_bases_has_no_super() {
        let fs = TestFileSystem::new();
        let mut unit = indexer(&fs, "/src/a.cpp");
        let mut decl = declaration(
            cursor("c:@S@D@F@f#", SymbolKind::InstanceMethod, "f()", pos("/src/a.cpp", 9, 10)),
            true,
        );
        decl.overridden = vec![
            cursor("c:@S@B@F@f#", SymbolKind::InstanceMethod, "f()", pos("/src/b.h", 2, 10)),
            cursor("c:@S@C@F@f#", SymbolKind::InstanceMethod, "f()", pos("/src/c.h", 2, 10)),
        ];
        unit.on_declaration(decl);

        match &unit.finish().ops[0] {
            EntityOp::Declare {
                super_location,
                overridden_usr,
                ..
            } => {
                assert!(super_location.is_none());
                assert!(overridden_usr.is_none());
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_specialization_fallback_and_unresolved() {
        let mut graph = EntityGraph::new();
        let mut files = FileTable::new();
        let contribution = UnitContribution {
            ops: vec![EntityOp::Declare {
                usr: "c:@ST>1#T@Box".to_string(),
                name: "Box".to_string(),
                scope: Vec::new(),
                location: pos("/src/box.h", 2, 8),
                is_definition: true,
                super_location: None,
                overridden_usr: None,
            }],
            pending: [
                (
                    pos("/src/a.cpp", 4, 1),
                    PendingReference {
                        usr: "c:@S@Box>#I".to_string(),
                        specialized: Some("c:@ST>1#T@Box".to_string()),
                    },
                ),
                (
                    pos("/src/a.cpp", 5, 1),
                    PendingReference {
                        usr: "c:@F@nowhere#".to_string(),
                        specialized: None,
                    },
                ),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        graph.merge(&contribution, &mut files);

        let report = graph.reconcile();
        assert_eq!(report.via_specialization, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.resolved, 0);
        assert_eq!(graph.entities["c:@ST>1#T@Box"].references.len(), 1);
        assert!(!graph.entities.contains_key("c:@F@nowhere#"));
    }

    #[test]
    fn test_reconcile_is_idempotent_and_subs_invert_super() {
        let mut graph = EntityGraph::new();
        let mut files = FileTable::new();
        let method = |usr: &str, line: u32, base: Option<&str>| EntityOp::Declare {
            usr: usr.to_string(),
            name: "f()".to_string(),
            scope: Vec::new(),
            location: pos("/src/h.h", line, 10),
            is_definition: true,
            super_location: base.map(|_| pos("/src/h.h", 1, 10)),
            overridden_usr: base.map(str::to_string),
        };
        graph.merge(
            &UnitContribution {
                ops: vec![
                    method("c:@S@B@F@f#", 1, None),
                    method("c:@S@D1@F@f#", 5, Some("c:@S@B@F@f#")),
                    method("c:@S@D2@F@f#", 9, Some("c:@S@B@F@f#")),
                ],
                pending: [(
                    pos("/src/a.cpp", 3, 3),
                    PendingReference {
                        usr: "c:@S@B@F@f#".to_string(),
                        specialized: None,
                    },
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            },
            &mut files,
        );

        let first = graph.reconcile();
        let snapshot = graph.clone();
        let second = graph.reconcile();
        assert_eq!(first, second);
        assert_eq!(graph, snapshot);

        let h = files.id(std::path::Path::new("/src/h.h")).unwrap();
        let base = &graph.entities["c:@S@B@F@f#"];
        assert_eq!(
            base.subs,
            [Location::new(h, 5, 10), Location::new(h, 9, 10)]
                .into_iter()
                .collect()
        );
        for (usr, entity) in &graph.entities {
            if let Some(base_usr) = &entity.overridden_usr {
                assert!(graph.entities[base_usr].subs.contains(&entity.definition.unwrap()), "{usr}");
            }
        }
    }

    #[test]
    fn test_error_diagnostics_go_to_the_error_log() {
        let fs = TestFileSystem::new();
        let errors = Arc::new(ErrorLog::new());
        let mut unit = UnitIndexer::new(
            PathBuf::from("/src/a.cpp"),
            fs,
            HashSet::new(),
            Arc::new(Vec::new()),
            IndexerFlags::default(),
            errors.clone(),
        );
        crate::frontend::testing::diagnostic(Severity::Warning, "unused", pos("/src/a.cpp", 1, 1))
            .dispatch(&mut unit);
        crate::frontend::testing::diagnostic(Severity::Error, "expected ';'", pos("/src/a.cpp", 2, 1))
            .dispatch(&mut unit);

        assert_eq!(unit.error_count(), 1);
        assert_eq!(errors.len(), 1);
    }
}

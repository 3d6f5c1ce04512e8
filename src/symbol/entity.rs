use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::symbol::{FileId, Location};

/// Frontend-assigned unique symbol reference
pub type Usr = String;

/// Kind of a declared entity or of a cursor in a semantic-parent chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    EnumConstant,
    Typedef,
    Function,
    InstanceMethod,
    StaticMethod,
    Constructor,
    Destructor,
    ConversionFunction,
    Variable,
    Field,
    Parameter,
    TemplateTypeParameter,
    ClassTemplate,
    FunctionTemplate,
    Macro,
    Other,
}

impl SymbolKind {
    /// Kinds whose children are scanned for type and template references
    pub fn scans_children(&self) -> bool {
        matches!(
            self,
            SymbolKind::Function
                | SymbolKind::InstanceMethod
                | SymbolKind::Variable
                | SymbolKind::Field
                | SymbolKind::Constructor
        )
    }

    /// Kinds that may override a single base method
    pub fn can_override(&self) -> bool {
        matches!(self, SymbolKind::InstanceMethod | SymbolKind::Destructor)
    }

    /// Kinds that contribute a name to `cursor_scope`
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            SymbolKind::Namespace | SymbolKind::Class | SymbolKind::Struct
        )
    }
}

/// Resolved record for one symbol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// First-seen display name (keeps argument lists of overloads)
    pub symbol_name: String,
    pub definition: Option<Location>,
    pub declarations: BTreeSet<Location>,
    /// Constructor and destructor sites attributed to the enclosing type
    pub extra_declarations: BTreeSet<Location>,
    pub references: BTreeSet<Location>,
    /// The single overridden method location (first seen wins)
    #[serde(rename = "super")]
    pub super_location: Option<Location>,
    /// USR of the overridden method, used to derive `subs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden_usr: Option<Usr>,
    /// Definitions of overriding methods, derived from their `super`
    pub subs: BTreeSet<Location>,
    /// Enclosing namespace/class/struct names, outermost first
    pub cursor_scope: Vec<String>,
}

impl Entity {
    /// Record the definition, keeping it out of `declarations`
    pub fn set_definition(&mut self, location: Location) {
        self.declarations.remove(&location);
        self.definition = Some(location);
    }

    /// Record a non-defining declaration unless it is the definition site
    pub fn add_declaration(&mut self, location: Location) -> bool {
        if self.definition == Some(location) {
            return false;
        }
        self.declarations.insert(location)
    }

    /// Whether the entity still carries any location at all
    pub fn is_empty(&self) -> bool {
        self.definition.is_none()
            && self.declarations.is_empty()
            && self.extra_declarations.is_empty()
            && self.references.is_empty()
    }

    /// Drop every location in the given files; returns whether anything changed
    pub fn prune_files(&mut self, files: &BTreeSet<FileId>) -> bool {
        let before = self.location_count();
        if self.definition.is_some_and(|l| files.contains(&l.file)) {
            self.definition = None;
        }
        if self.super_location.is_some_and(|l| files.contains(&l.file)) {
            self.super_location = None;
            self.overridden_usr = None;
        }
        self.declarations.retain(|l| !files.contains(&l.file));
        self.extra_declarations.retain(|l| !files.contains(&l.file));
        self.references.retain(|l| !files.contains(&l.file));
        self.subs.retain(|l| !files.contains(&l.file));
        before != self.location_count()
    }

    /// Every file this entity has a location in
    pub fn files(&self) -> BTreeSet<FileId> {
        self.definition
            .iter()
            .chain(self.declarations.iter())
            .chain(self.extra_declarations.iter())
            .chain(self.references.iter())
            .map(|l| l.file)
            .collect()
    }

    fn location_count(&self) -> usize {
        usize::from(self.definition.is_some())
            + usize::from(self.super_location.is_some())
            + self.declarations.len()
            + self.extra_declarations.len()
            + self.references.len()
            + self.subs.len()
    }
}

/// A not-yet-resolved pointer from a location to the symbol it names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReference {
    pub usr: Usr,
    /// Generic template of a referenced specialization, used as fallback
    pub specialized: Option<Usr>,
}

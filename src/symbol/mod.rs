//! Symbol model: interned locations and the entities they belong to

pub mod entity;
pub mod location;

pub use entity::{Entity, PendingReference, SymbolKind, Usr};
pub use location::{FileId, FileTable, Location, SourcePosition};

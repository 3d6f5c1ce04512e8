use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Dense id of an interned file path; the first file seen gets id 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in an interned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A position as reported by the frontend, before its path is interned
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(path: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// Interning table from absolute paths to file ids
///
/// Ids are handed out monotonically and never reused, so a table that is
/// persisted and reloaded keeps every previously issued location valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileTable {
    by_name: HashMap<PathBuf, FileId>,
    by_id: HashMap<FileId, PathBuf>,
    last_id: u32,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from its persisted `filesByName` form
    pub fn from_map(files_by_name: BTreeMap<PathBuf, FileId>) -> Self {
        let mut table = Self::new();
        for (path, id) in files_by_name {
            table.last_id = table.last_id.max(id.0);
            table.by_id.insert(id, path.clone());
            table.by_name.insert(path, id);
        }
        table
    }

    /// The persisted `filesByName` form
    pub fn to_map(&self) -> BTreeMap<PathBuf, FileId> {
        self.by_name
            .iter()
            .map(|(path, id)| (path.clone(), *id))
            .collect()
    }

    /// Return the id for `path`, assigning the next one on first sight
    pub fn intern(&mut self, path: &Path) -> FileId {
        if let Some(id) = self.by_name.get(path) {
            return *id;
        }
        self.last_id += 1;
        let id = FileId(self.last_id);
        self.by_name.insert(path.to_path_buf(), id);
        self.by_id.insert(id, path.to_path_buf());
        id
    }

    pub fn id(&self, path: &Path) -> Option<FileId> {
        self.by_name.get(path).copied()
    }

    pub fn path(&self, id: FileId) -> Option<&Path> {
        self.by_id.get(&id).map(PathBuf::as_path)
    }

    pub fn location(&mut self, position: &SourcePosition) -> Location {
        Location::new(self.intern(&position.path), position.line, position.column)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let mut table = FileTable::new();
        let a = table.intern(Path::new("/src/a.cpp"));
        let b = table.intern(Path::new("/src/b.h"));
        let again = table.intern(Path::new("/src/a.cpp"));

        assert_eq!(a, FileId(1));
        assert_eq!(b, FileId(2));
        assert_eq!(again, a);
        assert_eq!(table.path(b), Some(Path::new("/src/b.h")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reloaded_table_continues_numbering() {
        let mut table = FileTable::new();
        table.intern(Path::new("/a"));
        table.intern(Path::new("/b"));

        let mut reloaded = FileTable::from_map(table.to_map());
        assert_eq!(reloaded, table);
        assert_eq!(reloaded.id(Path::new("/b")), Some(FileId(2)));
        assert_eq!(reloaded.intern(Path::new("/c")), FileId(3));
    }

    #[test]
    fn test_location_from_position() {
        let mut table = FileTable::new();
        let loc = table.location(&SourcePosition::new("/x.cpp", 3, 7));
        assert_eq!(loc, Location::new(FileId(1), 3, 7));
        assert_eq!(loc.to_string(), "1:3:7");
    }
}

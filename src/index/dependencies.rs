//! Dependency tracking and dirtiness propagation
//!
//! Every indexed unit is stored as a [`Source`]: its invocation, the input's
//! timestamp and the timestamps of every file it included. On update the
//! [`DependencyTracker`] walks the stored sources in order and decides which
//! ones must be parsed again. Dirty inputs are fed back into the accumulator,
//! so a later unit that includes an earlier dirty unit's input is dirty too.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::io::FileSystemTrait;
use crate::project::CompileInvocation;

/// One indexed translation unit as persisted under `sources`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub invocation: CompileInvocation,
    /// Input modification time at index time, milliseconds since the epoch
    pub last_modified: u64,
    pub dependencies: BTreeMap<PathBuf, u64>,
    pub from_unsaved_file: bool,
}

impl Source {
    pub fn input(&self) -> &Path {
        &self.invocation.input
    }
}

/// What an update has to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyPlan {
    /// Sources carried forward verbatim
    pub retained: Vec<Source>,
    /// Invocations to parse again, in stored order
    pub reparse: Vec<CompileInvocation>,
    /// Every file considered changed, including dirty inputs
    pub dirty_files: BTreeSet<PathBuf>,
    /// Precompiled header keys whose origin went stale
    pub invalidated_pch_keys: Vec<String>,
}

impl DirtyPlan {
    pub fn is_empty(&self) -> bool {
        self.reparse.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DependencyTracker<F: FileSystemTrait> {
    fs: F,
}

impl<F: FileSystemTrait> DependencyTracker<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    /// Decide whether `source` must be parsed again
    ///
    /// Every dependency is examined even after the answer is known, so that
    /// each changed file lands in `dirty` for the units that follow.
    pub fn is_source_dirty(&self, source: &Source, dirty: &mut BTreeSet<PathBuf>) -> bool {
        let input = source.input();
        if source.from_unsaved_file {
            dirty.insert(input.to_path_buf());
            return true;
        }
        if dirty.contains(input) {
            return true;
        }

        let mut is_dirty = self.fs.last_modified(input) != source.last_modified;
        for (dependency, recorded) in &source.dependencies {
            if dirty.contains(dependency) {
                is_dirty = true;
            } else if self.fs.last_modified(dependency) != *recorded {
                trace!("{} changed", dependency.display());
                dirty.insert(dependency.clone());
                is_dirty = true;
            }
        }
        is_dirty
    }

    /// Split `sources` into retained and dirty units
    ///
    /// `changed` seeds the accumulator, typically with the paths of unsaved
    /// buffers.
    pub fn plan(&self, sources: Vec<Source>, changed: impl IntoIterator<Item = PathBuf>) -> DirtyPlan {
        let mut plan = DirtyPlan {
            dirty_files: changed.into_iter().collect(),
            ..Default::default()
        };

        for source in sources {
            if self.is_source_dirty(&source, &mut plan.dirty_files) {
                if source.invocation.language.is_header()
                    && let Some(key) = source.invocation.pch_output_key()
                {
                    plan.invalidated_pch_keys.push(key);
                }
                plan.dirty_files.insert(source.invocation.input.clone());
                plan.reparse.push(source.invocation);
            } else {
                plan.retained.push(source);
            }
        }

        debug!(
            retained = plan.retained.len(),
            reparse = plan.reparse.len(),
            dirty_files = plan.dirty_files.len(),
            "Planned update"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::TestFileSystem;

    fn source(fs: &TestFileSystem, input: &str, deps: &[&str]) -> Source {
        let invocation = CompileInvocation::for_source(Path::new(input));
        Source {
            last_modified: fs.last_modified(Path::new(input)),
            dependencies: deps
                .iter()
                .map(|d| (PathBuf::from(d), fs.last_modified(Path::new(d))))
                .collect(),
            invocation,
            from_unsaved_file: false,
        }
    }

    fn inputs(plan: &DirtyPlan) -> Vec<PathBuf> {
        plan.reparse.iter().map(|i| i.input.clone()).collect()
    }

    #[test]
    fn test_unrelated_change_keeps_independent_sources() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.cpp", 1);
        fs.add_file("/src/b.cpp", 1);
        fs.add_file("/src/h.h", 1);
        let sources = vec![
            source(&fs, "/src/a.cpp", &[]),
            source(&fs, "/src/b.cpp", &["/src/h.h"]),
        ];

        fs.touch("/src/h.h", 2);
        let plan = DependencyTracker::new(fs).plan(sources.clone(), []);

        assert_eq!(inputs(&plan), vec![PathBuf::from("/src/b.cpp")]);
        assert_eq!(plan.retained, vec![sources[0].clone()]);
        assert!(plan.dirty_files.contains(Path::new("/src/h.h")));
        assert!(plan.dirty_files.contains(Path::new("/src/b.cpp")));
    }

    #[test]
    fn test_dirty_input_cascades_to_later_units() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/gen.h", 1);
        fs.add_file("/src/user.cpp", 1);
        // a header precompilation followed by a unit that includes the header
        let mut header = source(&fs, "/src/gen.h", &[]);
        header.invocation.output = Some(PathBuf::from("/build/gen.h.gch"));
        let user = source(&fs, "/src/user.cpp", &["/src/gen.h"]);
        let sources = vec![header, user];

        let plan = DependencyTracker::new(fs.clone()).plan(sources, [PathBuf::from("/src/gen.h")]);

        assert_eq!(plan.reparse.len(), 2);
        assert_eq!(plan.invalidated_pch_keys, vec!["/build/gen.h".to_string()]);
    }

    #[test]
    fn test_unsaved_unit_is_always_dirty() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.cpp", 1);
        let mut unsaved = source(&fs, "/src/a.cpp", &[]);
        unsaved.from_unsaved_file = true;

        let mut dirty = BTreeSet::new();
        assert!(DependencyTracker::new(fs).is_source_dirty(&unsaved, &mut dirty));
        assert!(dirty.contains(Path::new("/src/a.cpp")));
    }

    #[test]
    fn test_all_dependencies_are_examined() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.cpp", 1);
        fs.add_file("/src/x.h", 1);
        fs.add_file("/src/y.h", 1);
        let unit = source(&fs, "/src/a.cpp", &["/src/x.h", "/src/y.h"]);
        fs.touch("/src/x.h", 5);
        fs.touch("/src/y.h", 5);

        let mut dirty = BTreeSet::new();
        assert!(DependencyTracker::new(fs).is_source_dirty(&unit, &mut dirty));
        assert_eq!(dirty.len(), 2);
    }

    #[test]
    fn test_removed_input_is_dirty() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.cpp", 1);
        let unit = source(&fs, "/src/a.cpp", &[]);
        fs.remove("/src/a.cpp");

        let plan = DependencyTracker::new(fs).plan(vec![unit], []);
        assert_eq!(plan.reparse.len(), 1);
    }

    #[test]
    fn test_nothing_changed() {
        let fs = TestFileSystem::new();
        fs.add_file("/src/a.cpp", 1);
        fs.add_file("/src/a.h", 1);
        let sources = vec![source(&fs, "/src/a.cpp", &["/src/a.h"])];

        let plan = DependencyTracker::new(fs).plan(sources, []);
        assert!(plan.is_empty());
        assert!(plan.dirty_files.is_empty());
        assert_eq!(plan.retained.len(), 1);
    }
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::project::ProjectError;

/// List every regular file under `root`, relative to it
///
/// Hidden directories (leading '.') are skipped and symbolic links are not
/// followed. Unreadable entries are logged and skipped.
pub fn list_source_tree(root: &Path) -> Result<BTreeSet<PathBuf>, ProjectError> {
    if !root.is_dir() {
        return Err(ProjectError::SourceRootNotFound {
            path: root.display().to_string(),
        });
    }

    let mut files = BTreeSet::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && entry.file_name().to_string_lossy().starts_with('.'))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to access directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.insert(relative.to_path_buf());
        }
    }

    Ok(files)
}

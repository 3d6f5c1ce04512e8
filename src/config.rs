//! Indexer configuration
//!
//! `IndexerConfig::from_env()` reads the `CXREF_*` environment variables and
//! `with_overrides` layers command-line values on top, mirroring how logging
//! is configured.

use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::project::CompileInvocation;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database directory, relative to the working directory
pub const DEFAULT_DB_DIR: &str = ".cxref";

/// Environment variable overriding the worker count
pub const THREAD_COUNT_ENV: &str = "CXREF_THREAD_COUNT";

pub const DB_PATH_ENV: &str = "CXREF_DB";

pub const STAGING_DIR_ENV: &str = "CXREF_STAGING_DIR";

/// Staging subdirectory of the database used when no staging dir is set
pub const STAGING_SUBDIR: &str = "staging";

/// Behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerFlags {
    /// Surface non-error diagnostics
    pub verbose: bool,
    /// Skip header precompilations and never pass `-include-pch`
    pub disable_pch: bool,
    /// Skip the frontend entirely; only invocations and sources are recorded
    pub dont_index: bool,
    /// Record dependencies on files under the system include directories
    pub system_header_dependencies: bool,
    /// Trace every declaration and reference event
    pub debug_all_symbols: bool,
}

/// Complete indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Database directory
    pub db_path: PathBuf,

    /// Maximum number of concurrent frontend parses
    pub concurrency: usize,

    pub flags: IndexerFlags,

    /// Extra `-D` definitions appended to every unit
    pub extra_defines: Vec<String>,

    /// Extra `-I` directories appended to every unit
    pub include_paths: Vec<PathBuf>,

    /// System include directories, passed as `-isystem` and excluded from
    /// dependency tracking unless `system_header_dependencies` is set
    pub system_includes: Vec<PathBuf>,

    /// Where precompiled headers are written before relocation; defaults to
    /// a directory inside the database so the final rename stays on one
    /// file system
    pub staging_dir: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_DIR),
            concurrency: default_concurrency(),
            flags: IndexerFlags::default(),
            extra_defines: Vec::new(),
            include_paths: Vec::new(),
            system_includes: vec![PathBuf::from("/usr/include"), PathBuf::from("/usr/local/include")],
            staging_dir: None,
        }
    }
}

/// Command-line values layered over the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub flags: IndexerFlags,
    pub extra_defines: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub system_includes: Vec<PathBuf>,
}

impl IndexerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var(THREAD_COUNT_ENV) {
            match parse_thread_count(&value) {
                Some(count) => config.concurrency = count,
                None => warn!("Ignoring invalid {}={:?}", THREAD_COUNT_ENV, value),
            }
        }
        if let Ok(path) = env::var(DB_PATH_ENV)
            && !path.is_empty()
        {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var(STAGING_DIR_ENV)
            && !path.is_empty()
        {
            config.staging_dir = Some(PathBuf::from(path));
        }

        config
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(db_path) = overrides.db_path {
            self.db_path = db_path;
        }
        if let Some(concurrency) = overrides.concurrency.filter(|c| *c > 0) {
            self.concurrency = concurrency;
        }
        let flags = overrides.flags;
        self.flags.verbose |= flags.verbose;
        self.flags.disable_pch |= flags.disable_pch;
        self.flags.dont_index |= flags.dont_index;
        self.flags.system_header_dependencies |= flags.system_header_dependencies;
        self.flags.debug_all_symbols |= flags.debug_all_symbols;
        self.extra_defines.extend(overrides.extra_defines);
        self.include_paths.extend(overrides.include_paths);
        self.system_includes.extend(overrides.system_includes);
        self
    }

    pub fn staging_path(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.db_path.join(STAGING_SUBDIR))
    }

    /// Argument list handed to the frontend for `invocation`
    pub fn frontend_arguments(&self, invocation: &CompileInvocation) -> Vec<String> {
        let mut args = invocation.arguments.clone();
        args.extend(self.extra_defines.iter().map(|d| format!("-D{d}")));
        args.extend(
            self.include_paths
                .iter()
                .map(|p| format!("-I{}", p.display())),
        );
        for dir in &self.system_includes {
            args.push("-isystem".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

fn parse_thread_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|count| *count > 0)
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_thread_count_parsing() {
        assert_eq!(parse_thread_count("4"), Some(4));
        assert_eq!(parse_thread_count(" 2 "), Some(2));
        assert_eq!(parse_thread_count("0"), None);
        assert_eq!(parse_thread_count("many"), None);
    }

    #[test]
    fn test_overrides_merge_with_environment() {
        let config = IndexerConfig {
            system_includes: Vec::new(),
            ..IndexerConfig::default()
        }
        .with_overrides(ConfigOverrides {
            db_path: Some(PathBuf::from("/tmp/db")),
            concurrency: Some(3),
            flags: IndexerFlags {
                disable_pch: true,
                ..Default::default()
            },
            extra_defines: vec!["NDEBUG".to_string()],
            include_paths: vec![PathBuf::from("/opt/inc")],
            system_includes: vec![PathBuf::from("/sys/inc")],
        });

        assert_eq!(config.db_path, PathBuf::from("/tmp/db"));
        assert_eq!(config.concurrency, 3);
        assert!(config.flags.disable_pch);
        assert!(!config.flags.verbose);

        let invocation = CompileInvocation::for_source(Path::new("/src/a.cpp"));
        let args = config.frontend_arguments(&invocation);
        assert_eq!(
            args,
            vec!["-x", "c++", "-DNDEBUG", "-I/opt/inc", "-isystem", "/sys/inc"]
        );
    }

    #[test]
    fn test_staging_defaults_inside_database() {
        let config = IndexerConfig {
            db_path: PathBuf::from("/work/.cxref"),
            ..IndexerConfig::default()
        };
        assert_eq!(config.staging_path(), PathBuf::from("/work/.cxref/staging"));

        let config = IndexerConfig {
            staging_dir: Some(PathBuf::from("/scratch")),
            ..config
        };
        assert_eq!(config.staging_path(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_zero_concurrency_override_is_ignored() {
        let base = IndexerConfig::default();
        let expected = base.concurrency;
        let config = base.with_overrides(ConfigOverrides {
            concurrency: Some(0),
            ..Default::default()
        });
        assert_eq!(config.concurrency, expected);
    }
}

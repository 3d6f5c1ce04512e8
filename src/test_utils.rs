//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and on-disk project
//! fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate. Add
    /// `#[ctor::ctor]` initialisation to a test module to get logs from all of
    /// its tests:
    ///
    /// ```bash
    /// RUST_LOG=cxref::index=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// On-disk projects for tests that go through real files
#[cfg(test)]
pub mod fixtures {
    use std::fs;
    use std::path::{Path, PathBuf};

    use serde_json::json;
    use tempfile::TempDir;

    /// A source tree with a `compile_commands.json` at its root
    pub struct TestProject {
        _temp_dir: TempDir,
        pub root: PathBuf,
    }

    impl TestProject {
        pub fn new() -> Result<Self, std::io::Error> {
            let temp_dir = TempDir::new()?;
            let root = temp_dir.path().to_path_buf();
            Ok(Self {
                _temp_dir: temp_dir,
                root,
            })
        }

        /// Write `relative` with `contents`, creating parent directories
        pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf, std::io::Error> {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
            Ok(path)
        }

        /// Write a compilation database compiling each of `sources` with `flags`
        pub fn write_compile_commands(
            &self,
            sources: &[&str],
            flags: &[&str],
        ) -> Result<PathBuf, std::io::Error> {
            let entries: Vec<_> = sources
                .iter()
                .map(|source| {
                    let mut arguments = vec!["c++".to_string()];
                    arguments.extend(flags.iter().map(|f| f.to_string()));
                    arguments.push("-c".to_string());
                    arguments.push(source.to_string());
                    json!({
                        "directory": self.root,
                        "file": self.root.join(source),
                        "arguments": arguments,
                    })
                })
                .collect();
            let path = self.root.join("compile_commands.json");
            fs::write(&path, serde_json::to_vec_pretty(&entries)?)?;
            Ok(path)
        }

        pub fn path(&self) -> &Path {
            &self.root
        }
    }
}

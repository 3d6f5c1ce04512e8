//! Per-run error log
//!
//! Error diagnostics from every unit are appended to a private temporary file
//! that is created on the first error. When the database is closed the file is
//! moved next to it as `errors_<timestamp>.log`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Local;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ErrorLog {
    file: Mutex<Option<NamedTempFile>>,
    count: AtomicUsize,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `<unit>: <message>`; write failures are logged and swallowed
    pub fn append(&self, unit: &Path, message: &str) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let Ok(mut guard) = self.file.lock() else {
            warn!("Error log lock poisoned, dropping diagnostic");
            return;
        };
        if guard.is_none() {
            match tempfile::Builder::new()
                .prefix("cxref-errors-")
                .suffix(".log")
                .tempfile()
            {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!("Failed to create error log: {}", e);
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut()
            && let Err(e) = writeln!(file, "{}: {}", unit.display(), message)
        {
            warn!("Failed to write error log: {}", e);
        }
    }

    /// Number of error diagnostics recorded
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the log into `db_dir`; returns the final path if anything was logged
    pub fn persist_into(&self, db_dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let Some(file) = self.file.lock().ok().and_then(|mut guard| guard.take()) else {
            return Ok(None);
        };
        let name = format!("errors_{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let destination = db_dir.join(name);
        file.as_file().sync_all()?;
        // The temporary file may live on another filesystem
        match file.persist(&destination) {
            Ok(_) => {}
            Err(e) => {
                std::fs::copy(e.file.path(), &destination)?;
            }
        }
        debug!("Error log written to {}", destination.display());
        Ok(Some(destination))
    }
}

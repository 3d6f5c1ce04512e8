//! Logging setup for the indexer binary
//!
//! The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
//! Output goes to stderr or to `CXREF_LOG_FILE`, plain or JSON
//! (`CXREF_LOG_JSON=true`). `CXREF_LOG_UNIQUE=true` suffixes the file name with
//! the process id so concurrent indexer runs do not interleave.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Indexer progress at info, everything else only when it warns
pub const DEFAULT_FILTER: &str = "warn,cxref=info";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub filter: String,
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let unique = env::var("CXREF_LOG_UNIQUE").is_ok_and(|v| v == "true");
        Self {
            filter: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            file_path: env::var("CXREF_LOG_FILE").ok().map(|path| {
                let path = PathBuf::from(path);
                if unique {
                    with_pid(&path, std::process::id())
                } else {
                    path
                }
            }),
            json_format: env::var("CXREF_LOG_JSON").is_ok_and(|v| v == "true"),
        }
    }

    /// Apply `--log-level`, `--log-file` and `--log-json`
    pub fn with_overrides(
        mut self,
        filter: Option<String>,
        file_path: Option<PathBuf>,
        json_format: bool,
    ) -> Self {
        if let Some(filter) = filter {
            self.filter = filter;
        }
        if file_path.is_some() {
            self.file_path = file_path;
        }
        self.json_format |= json_format;
        self
    }
}

/// `indexer.log` becomes `indexer.<pid>.log`
fn with_pid(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let name = match path.extension() {
        Some(ext) => format!("{}.{pid}.{}", stem.to_string_lossy(), ext.to_string_lossy()),
        None => format!("{}.{pid}", stem.to_string_lossy()),
    };
    path.with_file_name(name)
}

pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_new(&config.filter).or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(file), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let fmt_layer = if config.json_format {
        fmt::layer().json().with_writer(writer).with_ansi(false).boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;
    Ok(())
}

/// Log how long an indexing phase took
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $phase:expr, $duration:expr) => {
        tracing::event!(
            $level,
            phase = $phase,
            duration_ms = $duration.as_millis() as u64,
            "Phase finished"
        );
    };
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use cxref::config::{ConfigOverrides, IndexerConfig, IndexerFlags};
use cxref::database::FilesystemBackend;
use cxref::engine::{BuildRequest, IndexEngine, RunSummary, read_unsaved_files};
use cxref::frontend::ProcessFrontend;
use cxref::io::RealFileSystem;
use cxref::logging::{LogConfig, init_logging};

/// Incremental cross-reference indexer for C and C++
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    indexer: IndexerArgs,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file path (overrides CXREF_LOG_FILE env var)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index everything and write a new database
    Build {
        /// compile_commands.json files to index
        #[arg(short = 'c', long = "compile-commands", value_name = "FILE")]
        compile_commands: Vec<PathBuf>,

        /// Root directory whose file listing is recorded
        #[arg(long, value_name = "DIR")]
        source_dir: Option<PathBuf>,

        /// Source files to index with a guessed language
        #[arg(value_name = "SOURCE")]
        sources: Vec<PathBuf>,
    },
    /// Re-index whatever changed since the database was written
    Update {
        /// In-memory buffer for PATH, read from CONTENTS
        #[arg(long = "unsaved", value_name = "PATH=CONTENTS", value_parser = parse_unsaved)]
        unsaved: Vec<(PathBuf, PathBuf)>,
    },
}

#[derive(Args, Debug)]
struct IndexerArgs {
    /// Database directory (overrides CXREF_DB env var)
    #[arg(long, value_name = "DIR", global = true)]
    db: Option<PathBuf>,

    /// Number of concurrent parses (overrides CXREF_THREAD_COUNT env var)
    #[arg(short = 'j', long = "jobs", value_name = "N", global = true)]
    jobs: Option<usize>,

    /// Indexer executable (overrides CXREF_FRONTEND env var)
    #[arg(long, value_name = "PATH", global = true)]
    frontend: Option<String>,

    /// Extra macro definition for every unit
    #[arg(short = 'D', value_name = "MACRO", global = true)]
    defines: Vec<String>,

    /// Extra include directory for every unit
    #[arg(short = 'I', value_name = "DIR", global = true)]
    include_paths: Vec<PathBuf>,

    /// Extra system include directory
    #[arg(long = "isystem", value_name = "DIR", global = true)]
    system_includes: Vec<PathBuf>,

    /// Report warnings and notes as well as errors
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never build or use precompiled headers
    #[arg(long, global = true)]
    disable_pch: bool,

    /// Record invocations without running the indexer
    #[arg(long, global = true)]
    dont_index: bool,

    /// Track dependencies on system headers too
    #[arg(long, global = true)]
    system_header_dependencies: bool,

    /// Trace every declaration and reference
    #[arg(long, global = true)]
    debug_all_symbols: bool,
}

impl IndexerArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            db_path: self.db.clone(),
            concurrency: self.jobs,
            flags: IndexerFlags {
                verbose: self.verbose,
                disable_pch: self.disable_pch,
                dont_index: self.dont_index,
                system_header_dependencies: self.system_header_dependencies,
                debug_all_symbols: self.debug_all_symbols,
            },
            extra_defines: self.defines.clone(),
            include_paths: self.include_paths.clone(),
            system_includes: self.system_includes.clone(),
        }
    }
}

fn parse_unsaved(value: &str) -> Result<(PathBuf, PathBuf), String> {
    let (path, contents) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=CONTENTS, got {value:?}"))?;
    if path.is_empty() || contents.is_empty() {
        return Err(format!("expected PATH=CONTENTS, got {value:?}"));
    }
    Ok((PathBuf::from(path), PathBuf::from(contents)))
}

/// Resolve the indexer executable from CLI args and environment
fn resolve_frontend_path(frontend_arg: Option<String>) -> String {
    // Priority: CLI arg > CXREF_FRONTEND env var > "cxref-frontend" default
    frontend_arg
        .or_else(|| std::env::var("CXREF_FRONTEND").ok())
        .unwrap_or_else(|| "cxref-frontend".to_string())
}

fn report(summary: &RunSummary) -> ExitCode {
    if summary.nothing_changed {
        info!("Nothing has changed");
        return ExitCode::SUCCESS;
    }
    if let Some(stats) = &summary.stats {
        info!(
            "{} indexed, {} failed, {} aborted, {} duplicates in {} ms",
            stats.completed,
            stats.failed,
            stats.aborted,
            stats.duplicates,
            stats.elapsed.as_millis()
        );
    }
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env().with_overrides(
        cli.log_level.clone(),
        cli.log_file.clone(),
        cli.log_json,
    );
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = IndexerConfig::from_env().with_overrides(cli.indexer.overrides());
    let frontend_path = resolve_frontend_path(cli.indexer.frontend.clone());
    info!(
        "Using indexer {} with {} workers, database {}",
        frontend_path,
        config.concurrency,
        config.db_path.display()
    );

    let frontend = ProcessFrontend::new(frontend_path, config.staging_path());
    let engine = IndexEngine::new(
        config,
        Arc::new(frontend),
        Arc::new(FilesystemBackend),
        RealFileSystem,
    );

    let result = match cli.command {
        Command::Build {
            compile_commands,
            source_dir,
            sources,
        } => {
            engine
                .build_db(BuildRequest {
                    compile_commands,
                    sources,
                    invocations: Vec::new(),
                    source_dir,
                })
                .await
        }
        Command::Update { unsaved } => match read_unsaved_files(&unsaved) {
            Ok(unsaved) => engine.update_db(unsaved).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(summary) => report(&summary),
        Err(e) => {
            error!("{}", e);
            eprintln!("cxref: {e}");
            ExitCode::FAILURE
        }
    }
}

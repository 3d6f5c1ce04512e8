//! Frontend backed by an external indexer executable
//!
//! The executable is invoked once per translation unit as
//!
//! ```text
//! <program> [leading args] --emit-unit <artifact> [--unsaved <path>=<buffer>]... -- <arguments> <input>
//! ```
//!
//! and writes one JSON [`FrontendEvent`] per stdout line. A non-zero exit
//! status fails the parse. The serialized unit written to `<artifact>` is what
//! [`TranslationUnit::save`] later copies into place.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::{NamedTempFile, TempDir, TempPath};
use tracing::{debug, trace, warn};

use crate::frontend::{
    Frontend, FrontendError, FrontendEvent, IndexListener, ParseRequest, TranslationUnit,
};

#[derive(Debug, Clone)]
pub struct ProcessFrontend {
    program: PathBuf,
    leading_args: Vec<String>,
    staging_dir: PathBuf,
}

impl ProcessFrontend {
    /// Create a frontend that stages unit artifacts in `staging_dir`
    pub fn new(program: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Arguments passed before the indexer's own flags
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    fn stage_unsaved(
        &self,
        request: &ParseRequest<'_>,
    ) -> Result<(Option<TempDir>, Vec<String>), FrontendError> {
        if request.unsaved.is_empty() {
            return Ok((None, Vec::new()));
        }

        let dir = tempfile::Builder::new()
            .prefix("cxref-unsaved-")
            .tempdir_in(&self.staging_dir)?;
        let mut args = Vec::with_capacity(request.unsaved.len() * 2);
        for (index, (path, contents)) in request.unsaved.iter().enumerate() {
            let buffer = dir.path().join(format!("buffer-{index}"));
            std::fs::write(&buffer, contents)?;
            args.push("--unsaved".to_string());
            args.push(format!("{}={}", path.display(), buffer.display()));
        }
        Ok((Some(dir), args))
    }
}

impl Frontend for ProcessFrontend {
    fn parse(
        &self,
        request: &ParseRequest<'_>,
        listener: &mut dyn IndexListener,
    ) -> Result<Box<dyn TranslationUnit>, FrontendError> {
        std::fs::create_dir_all(&self.staging_dir)?;
        let artifact = tempfile::Builder::new()
            .prefix("cxref-unit-")
            .tempfile_in(&self.staging_dir)?
            .into_temp_path();
        let (_unsaved_dir, unsaved_args) = self.stage_unsaved(request)?;

        let input = &request.invocation.input;
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("--emit-unit")
            .arg(artifact.as_os_str())
            .args(&unsaved_args)
            .arg("--")
            .args(&request.arguments)
            .arg(input)
            .current_dir(&request.invocation.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.program.display(), input = %input.display(), "Spawning frontend");
        let mut child = command
            .spawn()
            .map_err(|e| FrontendError::Process(format!("{}: {e}", self.program.display())))?;

        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text);
            }
            text
        });

        let mut malformed = None;
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Lost frontend output for {}: {}", request.invocation.input.display(), e);
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stderr_reader.join();
                        return Err(e.into());
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FrontendEvent>(&line) {
                    Ok(event) => event.dispatch(listener),
                    Err(e) => {
                        warn!("Skipping malformed frontend event: {}", e);
                        malformed.get_or_insert(e);
                    }
                }
            }
        }

        let status = child.wait()?;
        let stderr_text = stderr_reader.join().unwrap_or_default();
        for line in stderr_text.lines() {
            trace!(target: "cxref::frontend", "{}", line);
        }

        if !status.success() {
            let reason = stderr_text
                .lines()
                .last()
                .map(str::to_string)
                .unwrap_or_else(|| format!("exited with {status}"));
            return Err(FrontendError::parse_failed(input, reason));
        }
        if let Some(e) = malformed {
            debug!("Frontend for {} emitted malformed events: {}", input.display(), e);
        }

        Ok(Box::new(ProcessUnit { artifact }))
    }
}

/// Unit serialized by the external indexer into a staging file
struct ProcessUnit {
    artifact: TempPath,
}

impl TranslationUnit for ProcessUnit {
    fn save(&self, path: &Path) -> Result<(), FrontendError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(dir)
            .map_err(|e| FrontendError::save_failed(path, e.to_string()))?;
        let mut source = std::fs::File::open(&self.artifact)
            .map_err(|e| FrontendError::save_failed(path, e.to_string()))?;
        std::io::copy(&mut source, staged.as_file_mut())
            .map_err(|e| FrontendError::save_failed(path, e.to_string()))?;
        staged
            .persist(path)
            .map_err(|e| FrontendError::save_failed(path, e.error.to_string()))?;
        Ok(())
    }
}

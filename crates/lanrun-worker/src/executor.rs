//! Sandboxed execution of work units.
//!
//! Each run gets a fresh directory under the work dir. The archive is
//! unpacked there, the entry point runs as a subprocess with a wall-clock
//! limit, and its stdout/stderr are captured to `stdout.txt` and
//! `stderr.txt` and zipped into the result.

use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use lanrun_core::{validate_unit_name, CoreError, ResultUnit, WorkUnit};

use crate::config::Config;

/// Capture file for standard output.
pub const STDOUT_FILE: &str = "stdout.txt";

/// Capture file for standard error.
pub const STDERR_FILE: &str = "stderr.txt";

/// Errors that can occur while running a work unit.
///
/// None of these are fatal to the worker; a failed run simply produces no
/// result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    InvalidName(#[from] CoreError),

    #[error("Failed to prepare working directory: {0}")]
    Workdir(#[source] std::io::Error),

    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the working directory: {0}")]
    UnsafePath(String),

    #[error("Entry point '{0}' not found in archive")]
    MissingEntryPoint(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Run exceeded {0:?}")]
    Timeout(Duration),

    #[error("Entry point exited with {}", exit_label(.code))]
    NonZeroExit { code: Option<i32> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Runs work units in isolated directories.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    work_dir: PathBuf,
    interpreter: String,
    entry_point: String,
    timeout: Duration,
    keep_workdirs: bool,
}

impl SandboxExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            interpreter: config.interpreter.clone(),
            entry_point: config.entry_point.clone(),
            timeout: config.exec_timeout(),
            keep_workdirs: config.keep_workdirs,
        }
    }

    /// Execute `unit` and package its captured output.
    pub async fn execute(&self, unit: &WorkUnit) -> Result<ResultUnit, ExecutorError> {
        validate_unit_name(&unit.name)?;

        fs::create_dir_all(&self.work_dir)
            .await
            .map_err(ExecutorError::Workdir)?;

        // create_dir fails on an existing path, so a directory is never reused.
        let run_dir = self
            .work_dir
            .join(format!("{}-{}", unit.name, Uuid::new_v4()));
        fs::create_dir(&run_dir)
            .await
            .map_err(ExecutorError::Workdir)?;

        info!(unit = %unit.name, dir = %run_dir.display(), "Executing work unit");
        let result = self.run_in(&run_dir, unit).await;

        if self.keep_workdirs {
            debug!(dir = %run_dir.display(), "Keeping working directory");
        } else if let Err(e) = fs::remove_dir_all(&run_dir).await {
            warn!(dir = %run_dir.display(), error = %e, "Failed to remove working directory");
        }

        result
    }

    async fn run_in(&self, dir: &Path, unit: &WorkUnit) -> Result<ResultUnit, ExecutorError> {
        let payload = unit.payload.clone();
        let target = dir.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract_archive(&payload, &target)).await??;
        debug!(unit = %unit.name, files = extracted, "Archive extracted");

        match fs::metadata(dir.join(&self.entry_point)).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ExecutorError::MissingEntryPoint(self.entry_point.clone())),
        }

        let child = Command::new(&self.interpreter)
            .arg(&self.entry_point)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(unit = %unit.name, timeout_secs = self.timeout.as_secs(), "Run timed out");
                return Err(ExecutorError::Timeout(self.timeout));
            }
        };

        fs::write(dir.join(STDOUT_FILE), &output.stdout).await?;
        fs::write(dir.join(STDERR_FILE), &output.stderr).await?;

        let exit_code = output.status.code();
        if !output.status.success() {
            warn!(
                unit = %unit.name,
                exit_code = ?exit_code,
                stderr_len = output.stderr.len(),
                "Entry point failed"
            );
            return Err(ExecutorError::NonZeroExit { code: exit_code });
        }

        let archive = tokio::task::spawn_blocking(move || {
            package_captures(&output.stdout, &output.stderr)
        })
        .await??;

        info!(
            unit = %unit.name,
            exit_code = ?exit_code,
            result_bytes = archive.len(),
            "Work unit completed"
        );
        Ok(ResultUnit::new(unit.name.clone(), archive))
    }
}

/// Unpack `bytes` into `dir`, refusing entries that would land outside it.
///
/// Returns the number of files written.
pub fn extract_archive(bytes: &[u8], dir: &Path) -> Result<usize, ExecutorError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExecutorError::UnsafePath(entry.name().to_string()));
        };
        let path = dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Streamed: the size in the entry header is untrusted.
        let mut file = File::create(&path)?;
        io::copy(&mut entry, &mut file)?;
        files += 1;
    }

    Ok(files)
}

/// Zip the two capture files.
pub fn package_captures(stdout: &[u8], stderr: &[u8]) -> Result<Vec<u8>, ExecutorError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file(STDOUT_FILE, options)?;
    writer.write_all(stdout)?;
    writer.start_file(STDERR_FILE, options)?;
    writer.write_all(stderr)?;

    Ok(writer.finish()?.into_inner())
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell command execution.
//!
//! Every unit of work, environment probe, and reboot trigger ends up as one
//! synchronous call to a shell. Failure detection is based on __stderr__
//! rather than exit status: package managers and friends happily exit with
//! zero while complaining on stderr, and some tools print harmless warnings on
//! stderr while succeeding. Thus, non-empty stderr means failure unless it
//! contains a __benign marker__, e.g., "warning".

use std::process::Command;
use tracing::{debug, instrument, warn};

/// Default listing of benign stderr markers.
pub const DEFAULT_BENIGN_MARKERS: &[&str] = &["warning"];

/// Run shell commands.
pub trait Shell {
    /// Run a command to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// - Return [`ExecutionError::CommandFailed`] if stderr is non-empty and
    ///   not benign.
    /// - Return [`ExecutionError::Spawn`] if the shell cannot be started.
    fn run(&self, command: &str) -> Result<Output>;
}

impl<S: Shell + ?Sized> Shell for &S {
    fn run(&self, command: &str) -> Result<Output> {
        (**self).run(command)
    }
}

/// Captured output of a successful command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    /// Standard output of command.
    pub stdout: String,

    /// Benign stderr that was let through, if any.
    pub warning: Option<String>,

    /// Exit code, absent if process was killed by signal.
    pub code: Option<i32>,
}

/// Shell executor through bash.
#[derive(Debug, Clone)]
pub struct Bash {
    benign_markers: Vec<String>,
}

impl Bash {
    /// Construct new bash executor with custom benign stderr markers.
    pub fn new(benign_markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            benign_markers: benign_markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for Bash {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_MARKERS.iter().copied())
    }
}

impl Shell for Bash {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, command: &str) -> Result<Output> {
        let output = Command::new("bash")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(ExecutionError::Spawn)?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        // INVARIANT: Exit status never decides failure on its own.
        if !output.status.success() {
            debug!("command exited with {}", output.status);
        }

        let warning = classify_stderr(stderr, &self.benign_markers)?;
        if let Some(warning) = &warning {
            warn!("{}", chomp(warning));
        }

        Ok(Output {
            stdout,
            warning,
            code: output.status.code(),
        })
    }
}

/// Classify captured stderr of a command.
///
/// Returns `Ok(None)` for empty stderr, `Ok(Some(stderr))` when stderr
/// contains any benign marker (case-insensitive), and fails otherwise.
///
/// # Errors
///
/// - Return [`ExecutionError::CommandFailed`] if stderr is non-empty, and
///   matches no benign marker.
pub fn classify_stderr(
    stderr: impl Into<String>,
    benign_markers: &[impl AsRef<str>],
) -> Result<Option<String>> {
    let stderr = stderr.into();
    if stderr.is_empty() {
        return Ok(None);
    }

    let lowered = stderr.to_lowercase();
    let benign = benign_markers
        .iter()
        .any(|marker| lowered.contains(marker.as_ref().to_lowercase().as_str()));
    if benign {
        return Ok(Some(stderr));
    }

    Err(ExecutionError::CommandFailed(stderr))
}

/// Quote text as a single bash word.
///
/// Wraps text in single quotes so nothing inside expands, escaping embedded
/// single quotes.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: &str) -> &str {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .unwrap_or(message)
}

/// Shell execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Command wrote non-benign output to stderr.
    #[error("{}", chomp(.0))]
    CommandFailed(String),

    /// Shell process could not be spawned.
    #[error("failed to spawn shell")]
    Spawn(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ExecutionError> = std::result::Result<T, E>;

//! Public types consumed by the session coordinator.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use cellbook_types::{CellId, SessionId};
use serde::Deserialize;
use thiserror::Error;

/// Identifies the one process a cell may have running.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub session: SessionId,
    pub cell: CellId,
}

impl ProcessKey {
    #[must_use]
    pub fn new(session: SessionId, cell: CellId) -> Self {
        Self { session, cell }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.cell)
    }
}

/// Everything needed to launch one execution.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub key: ProcessKey,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Layered over the inherited environment after secrets are stripped.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    #[must_use]
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// Streamed process output, in arrival order. `Exited` is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exited(ExitInfo),
}

#[derive(Debug, Error)]
pub enum SpawnFailure {
    #[error("executable '{program}' not found")]
    NotFound { program: String },
    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' started without a pid")]
    NoPid { program: String },
    #[error("'{program}' exited before it could be tracked")]
    ExitedImmediately { program: String },
    #[error("'{program}' did not expose its output pipes")]
    MissingPipes { program: String },
}

#[derive(Debug, Error)]
pub enum RunError {
    /// A process is already registered for this key.
    #[error("{0} already has a running process")]
    AlreadyRunning(ProcessKey),
    #[error(transparent)]
    Spawn(#[from] SpawnFailure),
}

/// Runner commands per cell kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// argv prefix for JavaScript cells; the filename is appended.
    pub javascript: Vec<String>,
    /// argv prefix for TypeScript cells; the filename is appended.
    pub typescript: Vec<String>,
    /// argv prefix for dependency installs; package names are appended.
    pub install: Vec<String>,
    /// Bound of each process's output queue.
    pub output_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            javascript: vec!["node".into()],
            typescript: vec!["npx".into(), "tsx".into()],
            install: vec!["npm".into(), "install".into()],
            output_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: ProcessConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.javascript, vec!["node"]);
        assert_eq!(config.typescript, vec!["npx", "tsx"]);
        assert_eq!(config.output_capacity, 256);
    }

    #[test]
    fn config_partial_override() {
        let config: ProcessConfig =
            serde_json::from_value(serde_json::json!({ "typescript": ["bun", "run"] })).unwrap();
        assert_eq!(config.typescript, vec!["bun", "run"]);
        assert_eq!(config.install, vec!["npm", "install"]);
    }

    #[test]
    fn exit_info_success() {
        assert!(ExitInfo { code: Some(0) }.success());
        assert!(!ExitInfo { code: Some(1) }.success());
        assert!(!ExitInfo { code: None }.success());
    }

    #[test]
    fn key_display() {
        let key = ProcessKey::new(SessionId::new("s"), CellId::new("c"));
        assert_eq!(key.to_string(), "s/c");
    }
}

//! Public types consumed by the session coordinator.
//!
//! The coordinator constructs [`LspConfig`], receives [`BridgeEvent`]s, and
//! gets navigation results as [`QuickInfo`], [`DefinitionLocation`] and
//! [`CompletionEntry`] values.

use serde::Deserialize;

use cellbook_types::{Diagnostic, LineOffset};

/// Configuration for the analysis service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    /// Executable command (e.g. "npx").
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
    /// How long a request waits for its response.
    pub request_timeout_ms: u64,
    /// `delay` passed along with every diagnostics request.
    pub diagnostics_delay_ms: u64,
    /// Diagnostic codes dropped from error/warning reports.
    pub ignored_diagnostic_codes: Vec<u32>,
    /// Diagnostic codes dropped from suggestion reports.
    pub ignored_suggestion_codes: Vec<u32>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec!["tsserver".to_string()],
            request_timeout_ms: 10_000,
            diagnostics_delay_ms: 0,
            ignored_diagnostic_codes: Vec::new(),
            // "File is a CommonJS module; it may be converted to an ES module."
            ignored_suggestion_codes: vec![80001],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The service is not running or died with the request in flight.
    #[error("analysis service unavailable")]
    Unavailable,
    #[error("analysis service did not answer '{command}' in time")]
    Timeout { command: &'static str },
    #[error("failed to launch analysis service: {0:#}")]
    Launch(anyhow::Error),
    #[error("file '{0}' is not open")]
    NotOpen(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStopReason {
    Exited,
    Failed(String),
}

/// A demultiplexed event, already attributed to an open file.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Union of the latest syntax and semantic diagnostics for a file.
    Diagnostics {
        filename: String,
        items: Vec<Diagnostic>,
    },
    Suggestions {
        filename: String,
        items: Vec<Diagnostic>,
    },
    ServiceStopped {
        reason: ServiceStopReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickInfo {
    pub display: String,
    pub documentation: String,
    pub start: LineOffset,
    pub end: LineOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionLocation {
    pub filename: String,
    pub start: LineOffset,
    pub end: LineOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    pub name: String,
    pub kind: String,
    pub sort_text: String,
    pub insert_text: Option<String>,
}

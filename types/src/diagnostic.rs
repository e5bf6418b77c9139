//! Diagnostics as the engine reports them to clients.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::position::LineOffset;

/// Internal severity taxonomy, independent of the analysis service's
/// category vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Hint => "hint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    pub severity: Severity,
    pub start: LineOffset,
    pub end: LineOffset,
    pub message: String,
    /// Rule identifier reported by the service (e.g. `2307`).
    pub code: u32,
}

impl Diagnostic {
    /// Format as `file:line:offset: severity: [code] message`.
    #[must_use]
    pub fn display_with_file(&self, filename: &str) -> String {
        format!(
            "{filename}:{}:{}: {}: [{}] {}",
            self.start.line,
            self.start.offset,
            self.severity.label(),
            self.code,
            self.message,
        )
    }
}

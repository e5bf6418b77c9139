//! Notebook cells.
//!
//! Cells are mutated in place by the session owner; `id` is stable across
//! edits and renames. Only code and package manifest cells can have a live
//! backing process, so only those carry a [`CellStatus`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::CellId;

/// Managed language of a session and of its code cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
}

impl Language {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
        }
    }

    /// Whether cells in this language can be served by the analysis service.
    #[must_use]
    pub fn is_statically_typed(self) -> bool {
        self == Self::TypeScript
    }

    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext {
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TextCell {
    pub id: CellId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeCell {
    pub id: CellId,
    pub source: String,
    pub filename: String,
    pub language: Language,
    #[serde(default)]
    pub status: CellStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PackageJsonCell {
    pub id: CellId,
    pub source: String,
    #[serde(default)]
    pub status: CellStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Cell {
    Title(TextCell),
    Markdown(TextCell),
    Code(CodeCell),
    PackageJson(PackageJsonCell),
}

impl Cell {
    #[must_use]
    pub fn id(&self) -> &CellId {
        match self {
            Self::Title(c) | Self::Markdown(c) => &c.id,
            Self::Code(c) => &c.id,
            Self::PackageJson(c) => &c.id,
        }
    }

    /// `None` for cells that never run.
    #[must_use]
    pub fn status(&self) -> Option<CellStatus> {
        match self {
            Self::Code(c) => Some(c.status),
            Self::PackageJson(c) => Some(c.status),
            Self::Title(_) | Self::Markdown(_) => None,
        }
    }

    /// Returns `false` when the cell kind has no status.
    pub fn set_status(&mut self, status: CellStatus) -> bool {
        match self {
            Self::Code(c) => c.status = status,
            Self::PackageJson(c) => c.status = status,
            Self::Title(_) | Self::Markdown(_) => return false,
        }
        true
    }

    #[must_use]
    pub fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }

    /// Replace the cell's editable text, whatever its kind.
    pub fn set_source(&mut self, source: String) {
        match self {
            Self::Title(c) | Self::Markdown(c) => c.text = source,
            Self::Code(c) => c.source = source,
            Self::PackageJson(c) => c.source = source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("filename must not be empty")]
    Empty,
    #[error("filename '{0}' must not contain path separators")]
    PathSeparator(String),
    #[error("filename '{filename}' must end in .{expected}")]
    WrongExtension { filename: String, expected: &'static str },
}

/// Validate a code cell filename for a session of the given language.
pub fn validate_filename(filename: &str, language: Language) -> Result<(), FilenameError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(FilenameError::Empty);
    }
    if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
        return Err(FilenameError::PathSeparator(filename.to_string()));
    }
    if Language::from_filename(trimmed) != Some(language) {
        return Err(FilenameError::WrongExtension {
            filename: filename.to_string(),
            expected: language.extension(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(id: &str, filename: &str) -> Cell {
        Cell::Code(CodeCell {
            id: CellId::new(id),
            source: String::new(),
            filename: filename.to_string(),
            language: Language::TypeScript,
            status: CellStatus::Idle,
        })
    }

    #[test]
    fn cell_serializes_with_kebab_tag() {
        let json = serde_json::to_value(code("c1", "a.ts")).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["filename"], "a.ts");
        assert_eq!(json["status"], "idle");

        let manifest = Cell::PackageJson(PackageJsonCell {
            id: CellId::new("p"),
            source: "{}".into(),
            status: CellStatus::Running,
        });
        let json = serde_json::to_value(manifest).unwrap();
        assert_eq!(json["type"], "package-json");
    }

    #[test]
    fn status_only_on_runnable_cells() {
        let mut title = Cell::Title(TextCell {
            id: CellId::new("t"),
            text: "Hello".into(),
        });
        assert_eq!(title.status(), None);
        assert!(!title.set_status(CellStatus::Running));

        let mut cell = code("c1", "a.ts");
        assert!(cell.set_status(CellStatus::Running));
        assert_eq!(cell.status(), Some(CellStatus::Running));
    }

    #[test]
    fn language_from_filename() {
        assert_eq!(Language::from_filename("a.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_filename("a.mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_filename("Makefile"), None);
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("main.ts", Language::TypeScript).is_ok());
        assert_eq!(
            validate_filename("  ", Language::TypeScript),
            Err(FilenameError::Empty)
        );
        assert!(matches!(
            validate_filename("../x.ts", Language::TypeScript),
            Err(FilenameError::PathSeparator(_))
        ));
        assert!(matches!(
            validate_filename("main.js", Language::TypeScript),
            Err(FilenameError::WrongExtension { expected: "ts", .. })
        ));
    }
}

//! Core domain types for cellbook.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the engine.

mod cell;
mod diagnostic;
mod ids;
mod position;
mod session;

pub use cell::{
    Cell, CellStatus, CodeCell, FilenameError, Language, PackageJsonCell, TextCell,
    validate_filename,
};
pub use diagnostic::{Diagnostic, Severity};
pub use ids::{CellId, CorrelationId, SessionId};
pub use position::{LineOffset, to_line_offset, to_offset, utf16_len};
pub use session::{MANIFEST_FILENAME, SRC_DIR, Session, SessionError};

/// Environment variable name patterns that must never reach a child process.
///
/// Globs support a leading and/or trailing `*`; matching is case-insensitive.
pub const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_TOKEN",
    "*_SECRET*",
    "*_PASSWORD*",
    "*_CREDENTIAL*",
    "AWS_*",
    "ANTHROPIC_*",
    "OPENAI_*",
];

/// Minimal glob matcher for [`ENV_SECRET_DENYLIST`] patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
#[must_use]
pub fn env_glob_matches(pattern: &str, key: &str) -> bool {
    let pat = pattern.to_uppercase();
    let key = key.to_uppercase();
    match (pat.starts_with('*'), pat.ends_with('*')) {
        (true, true) if pat.len() >= 2 => key.contains(&pat[1..pat.len() - 1]),
        (true, _) => key.ends_with(&pat[1..]),
        (false, true) => key.starts_with(&pat[..pat.len() - 1]),
        (false, false) => key == pat,
    }
}

/// Whether an inherited environment variable must be stripped before spawning.
#[must_use]
pub fn is_secret_env(key: &str) -> bool {
    ENV_SECRET_DENYLIST
        .iter()
        .any(|pat| env_glob_matches(pat, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_glob_suffix_matches() {
        assert!(env_glob_matches("*_KEY", "API_KEY"));
        assert!(env_glob_matches("*_KEY", "MY_SECRET_KEY"));
        assert!(!env_glob_matches("*_KEY", "KEYRING"));
    }

    #[test]
    fn env_glob_prefix_matches() {
        assert!(env_glob_matches("AWS_*", "AWS_ACCESS_KEY_ID"));
        assert!(!env_glob_matches("AWS_*", "MY_AWS"));
    }

    #[test]
    fn env_glob_infix_and_case() {
        assert!(env_glob_matches("*_CREDENTIAL*", "db_credential_file"));
        assert!(!env_glob_matches("*_CREDENTIAL*", "CREDENTIAL"));
    }

    #[test]
    fn secret_env_detection() {
        assert!(is_secret_env("GITHUB_TOKEN"));
        assert!(!is_secret_env("PATH"));
        assert!(!is_secret_env("NODE_ENV"));
    }
}

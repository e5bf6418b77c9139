//! Coordinator errors and the collaborator seams it consumes.

use std::collections::HashMap;
use std::path::PathBuf;

use cellbook_lsp::BridgeError;
use cellbook_types::{CellId, FilenameError, Language, SessionError, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("session {0} is already open")]
    SessionExists(SessionId),
    #[error("session {0} is not open")]
    UnknownSession(SessionId),
    #[error("session {0} stopped before answering")]
    SessionGone(SessionId),
    #[error("failed to prepare {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why one client intent was refused. Sent back to the requesting connection
/// only; nothing about the session changed.
#[derive(Debug, Error)]
pub(crate) enum IntentError {
    #[error("cell {0} not found")]
    UnknownCell(CellId),
    #[error("cell {0} cannot be executed")]
    NotRunnable(CellId),
    #[error("cell {0} is not a code cell")]
    NotCode(CellId),
    #[error("session already has a package manifest")]
    DuplicateManifest,
    #[error("session has no package manifest")]
    NoManifest,
    #[error("no runner configured for {0:?} cells")]
    NoRunner(Language),
    #[error("no dependency install command configured")]
    NoInstaller,
    #[error("language service requires a statically-typed session")]
    NotStaticallyTyped,
    #[error(transparent)]
    Filename(#[from] FilenameError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("failed to write cell file: {0}")]
    Io(#[from] std::io::Error),
}

/// Secrets and other variables injected into every spawned process.
pub trait EnvironmentSource: Send + Sync {
    fn environment(&self, session: &SessionId) -> HashMap<String, String>;
}

/// Injects nothing beyond the inherited environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnvironment;

impl EnvironmentSource for NoEnvironment {
    fn environment(&self, _session: &SessionId) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// A fixed map, handy for tests and single-tenant deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticEnvironment(pub HashMap<String, String>);

impl EnvironmentSource for StaticEnvironment {
    fn environment(&self, _session: &SessionId) -> HashMap<String, String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    CellExecuted {
        session: SessionId,
        language: Language,
    },
    DependenciesInstalled {
        session: SessionId,
        packages: usize,
        success: bool,
    },
    LanguageServiceStarted {
        session: SessionId,
    },
}

/// Fire-and-forget analytics sink. Implementations must not block.
pub trait Telemetry: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_environment_is_returned_verbatim() {
        let env = StaticEnvironment(HashMap::from([("API_BASE".into(), "http://x".into())]));
        let vars = env.environment(&SessionId::new("s"));
        assert_eq!(vars.get("API_BASE").map(String::as_str), Some("http://x"));
        assert!(NoEnvironment.environment(&SessionId::new("s")).is_empty());
    }

    #[test]
    fn intent_error_messages() {
        let err = IntentError::UnknownCell(CellId::new("c9"));
        assert_eq!(err.to_string(), "cell c9 not found");
        let err: IntentError = SessionError::DuplicateFilename("a.ts".into()).into();
        assert_eq!(err.to_string(), "a code cell named 'a.ts' already exists");
    }
}

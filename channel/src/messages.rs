//! Typed payloads for every event on a session topic.
//!
//! Events are adjacently tagged: the wire frame carries `event` (kebab-case)
//! and `payload` side by side, and the payload schema is derived from the
//! struct that backs the variant.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use cellbook_types::{Cell, CellId, CellStatus, CorrelationId, Diagnostic, LineOffset, SessionId};

/// Payload for events that carry no data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellRef {
    pub cell_id: CellId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreateCell {
    /// Position in the cell list; past the end appends.
    pub index: usize,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenameCell {
    pub cell_id: CellId,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateCellSource {
    pub cell_id: CellId,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstallDependency {
    /// Packages to add; empty installs what the manifest already lists.
    #[serde(default)]
    pub packages: Vec<String>,
}

/// A navigation request at a buffer offset in a cell's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PositionRequest {
    pub correlation_id: CorrelationId,
    pub cell_id: CellId,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    ExecuteCell(CellRef),
    StopCell(CellRef),
    CreateCell(CreateCell),
    RenameCell(RenameCell),
    DeleteCell(CellRef),
    UpdateCellSource(UpdateCellSource),
    InstallDependency(InstallDependency),
    StartLanguageService(Empty),
    StopLanguageService(Empty),
    RequestDiagnostics(Empty),
    RequestQuickinfo(PositionRequest),
    RequestDefinitionLocation(PositionRequest),
    RequestCompletions(PositionRequest),
}

impl InboundEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecuteCell(_) => "execute-cell",
            Self::StopCell(_) => "stop-cell",
            Self::CreateCell(_) => "create-cell",
            Self::RenameCell(_) => "rename-cell",
            Self::DeleteCell(_) => "delete-cell",
            Self::UpdateCellSource(_) => "update-cell-source",
            Self::InstallDependency(_) => "install-dependency",
            Self::StartLanguageService(_) => "start-language-service",
            Self::StopLanguageService(_) => "stop-language-service",
            Self::RequestDiagnostics(_) => "request-diagnostics",
            Self::RequestQuickinfo(_) => "request-quickinfo",
            Self::RequestDefinitionLocation(_) => "request-definition-location",
            Self::RequestCompletions(_) => "request-completions",
        }
    }
}

/// A validated inbound event addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub session: SessionId,
    pub event: InboundEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellStatusChanged {
    pub cell_id: CellId,
    pub status: CellStatus,
}

/// Authoritative replacement for a cell, keyed by its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellUpdated {
    pub cell: Cell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellOutputChunk {
    pub cell_id: CellId,
    pub stream: OutputStream,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellError {
    pub cell_id: Option<CellId>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CellDiagnostics {
    pub cell_id: CellId,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuickInfoBody {
    pub display: String,
    pub documentation: String,
    pub start: LineOffset,
    pub end: LineOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuickInfoResponse {
    pub correlation_id: CorrelationId,
    pub info: Option<QuickInfoBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DefinitionTarget {
    pub cell_id: CellId,
    pub filename: String,
    pub start: LineOffset,
    pub end: LineOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DefinitionLocationResponse {
    pub correlation_id: CorrelationId,
    pub location: Option<DefinitionTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompletionItem {
    pub name: String,
    pub kind: String,
    pub sort_text: String,
    pub insert_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompletionsResponse {
    pub correlation_id: CorrelationId,
    pub entries: Vec<CompletionItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Installing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DependencyInstallStatus {
    pub status: InstallStatus,
    pub packages: Vec<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LanguageServiceStatus {
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum OutboundEvent {
    CellStatusChanged(CellStatusChanged),
    CellUpdated(CellUpdated),
    CellDeleted(CellRef),
    CellOutputChunk(CellOutputChunk),
    CellError(CellError),
    DiagnosticsForCell(CellDiagnostics),
    SuggestionsForCell(CellDiagnostics),
    QuickinfoResponse(QuickInfoResponse),
    DefinitionLocationResponse(DefinitionLocationResponse),
    CompletionsResponse(CompletionsResponse),
    DependencyInstallStatus(DependencyInstallStatus),
    LanguageServiceStatus(LanguageServiceStatus),
}

impl OutboundEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CellStatusChanged(_) => "cell-status-changed",
            Self::CellUpdated(_) => "cell-updated",
            Self::CellDeleted(_) => "cell-deleted",
            Self::CellOutputChunk(_) => "cell-output-chunk",
            Self::CellError(_) => "cell-error",
            Self::DiagnosticsForCell(_) => "diagnostics-for-cell",
            Self::SuggestionsForCell(_) => "suggestions-for-cell",
            Self::QuickinfoResponse(_) => "quickinfo-response",
            Self::DefinitionLocationResponse(_) => "definition-location-response",
            Self::CompletionsResponse(_) => "completions-response",
            Self::DependencyInstallStatus(_) => "dependency-install-status",
            Self::LanguageServiceStatus(_) => "language-service-status",
        }
    }
}

/// An outbound event for every subscriber of one session's topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub session: SessionId,
    pub event: OutboundEvent,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(session: SessionId, event: OutboundEvent) -> Self {
        Self { session, event }
    }
}

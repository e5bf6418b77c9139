//! One task per open session.
//!
//! The actor owns the `Session`, its optional `LanguageBridge`, and the
//! bridge's message stream. Client intents, process exits and navigation
//! replies all arrive on one bounded mailbox, so everything that touches a
//! session's state is serialized. Long waits (process output, navigation
//! responses) happen in spawned tasks that post their result back.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use cellbook_channel::messages::{
    CellDiagnostics, CellError, CellOutputChunk, CellRef, CellStatusChanged, CellUpdated,
    CompletionItem, CompletionsResponse, CreateCell, DefinitionLocationResponse,
    DefinitionTarget, DependencyInstallStatus, InstallStatus, LanguageServiceStatus,
    OutputStream, PositionRequest, QuickInfoBody, QuickInfoResponse, RenameCell, ServiceStatus,
    UpdateCellSource,
};
use cellbook_channel::{ConnectionId, Hub, InboundEvent, OutboundEvent, OutboundMessage};
use cellbook_lsp::{
    BridgeError, BridgeEvent, CompletionEntry, DefinitionLocation, LanguageBridge, LspConfig,
    PendingReply, QuickInfo, ServiceLauncher, ServiceMessage,
};
use cellbook_process::{
    ExitInfo, ProcessConfig, ProcessEvent, ProcessHandle, ProcessKey, ProcessSupervisor,
    RunError, RunRequest,
};
use cellbook_types::{
    Cell, CellId, CellStatus, CodeCell, CorrelationId, Diagnostic, Language, Session,
    validate_filename,
};

use crate::files;
use crate::types::{EnvironmentSource, IntentError, Telemetry, TelemetryEvent};

pub(crate) const MAILBOX_CAPACITY: usize = 64;

pub(crate) enum Intent {
    Client {
        connection: ConnectionId,
        event: InboundEvent,
    },
    Exited {
        cell: CellId,
        pid: u32,
        run: RunKind,
        exit: ExitInfo,
    },
    Navigation(NavigationResult),
    Cells(oneshot::Sender<Vec<Cell>>),
    Close(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub(crate) enum RunKind {
    Cell,
    Install { packages: Vec<String> },
}

pub(crate) enum NavigationResult {
    QuickInfo {
        correlation_id: CorrelationId,
        info: Option<QuickInfo>,
    },
    Definition {
        correlation_id: CorrelationId,
        location: Option<DefinitionLocation>,
    },
    Completions {
        correlation_id: CorrelationId,
        entries: Vec<CompletionEntry>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Navigation {
    QuickInfo,
    Definition,
    Completions,
}

/// Everything the actors of one coordinator share.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) process: ProcessConfig,
    pub(crate) lsp: LspConfig,
    pub(crate) supervisor: Arc<ProcessSupervisor>,
    pub(crate) hub: Arc<Hub>,
    pub(crate) launcher: Arc<dyn ServiceLauncher>,
    pub(crate) environment: Arc<dyn EnvironmentSource>,
    pub(crate) telemetry: Arc<dyn Telemetry>,
}

pub(crate) struct SessionActor {
    session: Session,
    shared: Arc<Shared>,
    mailbox: mpsc::Receiver<Intent>,
    /// Weak so that dropping the coordinator's sender ends the actor.
    intents: mpsc::WeakSender<Intent>,
    bridge: Option<LanguageBridge>,
    service_rx: Option<mpsc::Receiver<ServiceMessage>>,
    /// Set when a bridge call failed part-way; the next use re-mirrors the
    /// session's code cells.
    bridge_stale: bool,
    /// Pid of the latest process started for each cell. An exit from any
    /// other pid belongs to a run that has already been replaced.
    runs: BTreeMap<CellId, u32>,
}

impl SessionActor {
    pub(crate) fn new(
        session: Session,
        shared: Arc<Shared>,
        mailbox: mpsc::Receiver<Intent>,
        intents: mpsc::WeakSender<Intent>,
    ) -> Self {
        Self {
            session,
            shared,
            mailbox,
            intents,
            bridge: None,
            service_rx: None,
            bridge_stale: false,
            runs: BTreeMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(session = %self.session.id(), "session opened");
        loop {
            tokio::select! {
                intent = self.mailbox.recv() => {
                    let flow = match intent {
                        Some(intent) => self.handle(intent).await,
                        None => {
                            self.teardown().await;
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Some(message) = next_service_message(&mut self.service_rx) => {
                    self.on_service_message(message);
                }
            }
        }
        tracing::info!(session = %self.session.id(), "session closed");
    }

    async fn handle(&mut self, intent: Intent) -> ControlFlow<()> {
        match intent {
            Intent::Client { connection, event } => self.on_client(connection, event).await,
            Intent::Exited {
                cell,
                pid,
                run,
                exit,
            } => self.on_exit(&cell, pid, run, exit).await,
            Intent::Navigation(result) => self.on_navigation(result),
            Intent::Cells(reply) => {
                let _ = reply.send(self.session.cells().to_vec());
            }
            Intent::Close(done) => {
                self.teardown().await;
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn teardown(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
        self.service_rx = None;
        let stopped = self.shared.supervisor.stop_session(self.session.id());
        if stopped > 0 {
            tracing::info!(session = %self.session.id(), stopped, "stopped session processes");
        }
    }

    fn broadcast(&self, event: OutboundEvent) {
        let message = OutboundMessage::new(self.session.id().clone(), event);
        self.shared.hub.broadcast(&message);
    }

    async fn on_client(&mut self, connection: ConnectionId, event: InboundEvent) {
        let name = event.name();
        tracing::debug!(session = %self.session.id(), %connection, event = name, "intent");
        let result = match event {
            InboundEvent::ExecuteCell(CellRef { cell_id }) => self.execute(&cell_id).await,
            InboundEvent::StopCell(CellRef { cell_id }) => {
                self.stop(&cell_id);
                Ok(())
            }
            InboundEvent::CreateCell(CreateCell { index, cell }) => self.create(index, cell).await,
            InboundEvent::RenameCell(RenameCell { cell_id, filename }) => {
                self.rename(&cell_id, &filename).await
            }
            InboundEvent::DeleteCell(CellRef { cell_id }) => self.delete(&cell_id).await,
            InboundEvent::UpdateCellSource(UpdateCellSource { cell_id, source }) => {
                self.update_source(&cell_id, source).await
            }
            InboundEvent::InstallDependency(install) => self.install(install.packages).await,
            InboundEvent::StartLanguageService(_) => self.start_language_service().await,
            InboundEvent::StopLanguageService(_) => {
                self.stop_language_service().await;
                Ok(())
            }
            InboundEvent::RequestDiagnostics(_) => self.request_diagnostics().await,
            InboundEvent::RequestQuickinfo(request) => {
                self.navigate(Navigation::QuickInfo, request).await;
                Ok(())
            }
            InboundEvent::RequestDefinitionLocation(request) => {
                self.navigate(Navigation::Definition, request).await;
                Ok(())
            }
            InboundEvent::RequestCompletions(request) => {
                self.navigate(Navigation::Completions, request).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!(session = %self.session.id(), event = name, "intent refused: {e}");
            let topic = self.session.id().topic();
            self.shared
                .hub
                .send_error(connection, Some(&topic), &e.to_string());
        }
    }

    fn code_cell(&self, cell_id: &CellId) -> Result<&CodeCell, IntentError> {
        match self.session.cell(cell_id) {
            Some(Cell::Code(code)) => Ok(code),
            Some(_) => Err(IntentError::NotCode(cell_id.clone())),
            None => Err(IntentError::UnknownCell(cell_id.clone())),
        }
    }

    fn set_status(&mut self, cell_id: &CellId, status: CellStatus) {
        let Some(cell) = self.session.cell_mut(cell_id) else {
            return;
        };
        if cell.set_status(status) {
            self.broadcast(OutboundEvent::CellStatusChanged(CellStatusChanged {
                cell_id: cell_id.clone(),
                status,
            }));
        }
    }

    /// Write a cell's file, logging rather than refusing on failure: the
    /// in-memory cell is authoritative and the next write catches up.
    async fn persist(&self, cell: &Cell) {
        if let Err(e) = files::write_cell(&self.session, cell).await {
            tracing::warn!(session = %self.session.id(), cell = %cell.id(), "failed to write cell file: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn execute(&mut self, cell_id: &CellId) -> Result<(), IntentError> {
        let cell = self
            .session
            .cell(cell_id)
            .cloned()
            .ok_or_else(|| IntentError::UnknownCell(cell_id.clone()))?;
        let code = match cell {
            Cell::Code(ref code) => code,
            Cell::PackageJson(_) => return self.install(Vec::new()).await,
            Cell::Title(_) | Cell::Markdown(_) => {
                return Err(IntentError::NotRunnable(cell_id.clone()));
            }
        };

        let runner = match code.language {
            Language::JavaScript => &self.shared.process.javascript,
            Language::TypeScript => &self.shared.process.typescript,
        };
        let Some((program, prefix)) = runner.split_first() else {
            return Err(IntentError::NoRunner(code.language));
        };
        let mut args = prefix.to_vec();
        args.push(
            self.session
                .path_for(&code.filename)
                .to_string_lossy()
                .into_owned(),
        );
        let program = program.clone();

        files::write_cell(&self.session, &cell).await?;

        if let Ok(handle) = self.spawn(cell_id, program, args) {
            self.forward(handle, RunKind::Cell);
            self.shared.telemetry.record(TelemetryEvent::CellExecuted {
                session: self.session.id().clone(),
                language: code.language,
            });
        }
        Ok(())
    }

    /// Start a process for `cell_id`. A spawn failure reverts the cell to
    /// idle and reports it; a busy key is left alone.
    fn spawn(
        &mut self,
        cell_id: &CellId,
        program: String,
        args: Vec<String>,
    ) -> Result<ProcessHandle, RunError> {
        let request = RunRequest {
            key: ProcessKey::new(self.session.id().clone(), cell_id.clone()),
            program,
            args,
            cwd: self.session.dir().to_path_buf(),
            env: self.shared.environment.environment(self.session.id()),
        };
        match self.shared.supervisor.run(request) {
            Ok(handle) => {
                self.runs.insert(cell_id.clone(), handle.pid());
                self.set_status(cell_id, CellStatus::Running);
                Ok(handle)
            }
            Err(RunError::AlreadyRunning(key)) => {
                tracing::debug!(%key, "cell already has a running process, ignoring");
                Err(RunError::AlreadyRunning(key))
            }
            Err(RunError::Spawn(failure)) => {
                tracing::warn!(session = %self.session.id(), cell = %cell_id, "spawn failed: {failure}");
                self.set_status(cell_id, CellStatus::Idle);
                self.broadcast(OutboundEvent::CellError(CellError {
                    cell_id: Some(cell_id.clone()),
                    message: failure.to_string(),
                }));
                Err(RunError::Spawn(failure))
            }
        }
    }

    /// Stream a process's output onto the topic and post its exit back.
    fn forward(&self, handle: ProcessHandle, run: RunKind) {
        let Some(intents) = self.intents.upgrade() else {
            return;
        };
        let hub = Arc::clone(&self.shared.hub);
        let session = self.session.id().clone();
        let cell_id = handle.key().cell.clone();
        let pid = handle.pid();

        tokio::spawn(async move {
            let mut events = handle.into_events();
            let publish = |stream: OutputStream, data: String| {
                let chunk = CellOutputChunk {
                    cell_id: cell_id.clone(),
                    stream,
                    data,
                };
                hub.broadcast(&OutboundMessage::new(
                    session.clone(),
                    OutboundEvent::CellOutputChunk(chunk),
                ));
            };
            let exit = loop {
                match events.recv().await {
                    Some(ProcessEvent::Stdout(data)) => publish(OutputStream::Stdout, data),
                    Some(ProcessEvent::Stderr(data)) => publish(OutputStream::Stderr, data),
                    Some(ProcessEvent::Exited(exit)) => break exit,
                    None => break ExitInfo { code: None },
                }
            };
            let _ = intents
                .send(Intent::Exited {
                    cell: cell_id,
                    pid,
                    run,
                    exit,
                })
                .await;
        });
    }

    fn stop(&self, cell_id: &CellId) {
        let key = ProcessKey::new(self.session.id().clone(), cell_id.clone());
        // Idle is broadcast when the exit is observed.
        self.shared.supervisor.stop(&key);
    }

    async fn on_exit(&mut self, cell_id: &CellId, pid: u32, run: RunKind, exit: ExitInfo) {
        let key = ProcessKey::new(self.session.id().clone(), cell_id.clone());
        if self.runs.get(cell_id) != Some(&pid) || self.shared.supervisor.is_running(&key) {
            // A newer run owns the cell's status.
            tracing::debug!(%key, pid, code = ?exit.code, "stale exit, ignoring");
            return;
        }
        self.runs.remove(cell_id);
        tracing::debug!(session = %self.session.id(), cell = %cell_id, pid, code = ?exit.code, "process exited");
        self.set_status(cell_id, CellStatus::Idle);
        if let RunKind::Install { packages } = run {
            self.finish_install(packages, exit).await;
        }
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    async fn install(&mut self, packages: Vec<String>) -> Result<(), IntentError> {
        let manifest = self
            .session
            .cells()
            .iter()
            .find(|c| matches!(c, Cell::PackageJson(_)))
            .cloned()
            .ok_or(IntentError::NoManifest)?;
        let Some((program, prefix)) = self.shared.process.install.split_first() else {
            return Err(IntentError::NoInstaller);
        };
        let program = program.clone();
        let mut args = prefix.to_vec();
        args.extend(packages.iter().cloned());

        files::write_cell(&self.session, &manifest).await?;

        match self.spawn(manifest.id(), program, args) {
            Ok(handle) => {
                self.broadcast(install_status(InstallStatus::Installing, &packages, None));
                self.forward(handle, RunKind::Install { packages });
            }
            Err(RunError::Spawn(_)) => {
                self.broadcast(install_status(InstallStatus::Failed, &packages, None));
            }
            Err(RunError::AlreadyRunning(_)) => {}
        }
        Ok(())
    }

    async fn finish_install(&mut self, packages: Vec<String>, exit: ExitInfo) {
        let status = if exit.success() {
            InstallStatus::Complete
        } else {
            InstallStatus::Failed
        };
        self.broadcast(install_status(status, &packages, exit.code));
        self.shared
            .telemetry
            .record(TelemetryEvent::DependenciesInstalled {
                session: self.session.id().clone(),
                packages: packages.len(),
                success: exit.success(),
            });
        if !exit.success() {
            return;
        }

        self.refresh_manifest().await;

        // New modules on disk: analysis can now resolve imports it could not before.
        if self.session.language().is_statically_typed() {
            let was_running = self.bridge.as_ref().is_some_and(LanguageBridge::is_running);
            let files = self.session.code_filenames();
            let result = async {
                let bridge = self.ensure_bridge().await?;
                bridge.start().await?;
                bridge.reload_project().await?;
                let delay = bridge.diagnostics_delay();
                bridge.request_diagnostics(&files, delay).await?;
                Ok::<_, IntentError>(())
            }
            .await;
            match result {
                Ok(()) if !was_running => {
                    self.broadcast(OutboundEvent::LanguageServiceStatus(LanguageServiceStatus {
                        status: ServiceStatus::Running,
                    }));
                    self.shared
                        .telemetry
                        .record(TelemetryEvent::LanguageServiceStarted {
                            session: self.session.id().clone(),
                        });
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(session = %self.session.id(), "language service after install: {e}");
                }
            }
        }
    }

    /// The installer may have rewritten the manifest; adopt what is on disk.
    async fn refresh_manifest(&mut self) {
        let Some(text) = files::read_manifest(&self.session).await else {
            return;
        };
        let Some(id) = self
            .session
            .cells()
            .iter()
            .find(|c| matches!(c, Cell::PackageJson(_)))
            .map(|c| c.id().clone())
        else {
            return;
        };
        let Some(cell) = self.session.cell_mut(&id) else {
            return;
        };
        if let Cell::PackageJson(manifest) = &mut *cell {
            if manifest.source == text {
                return;
            }
            manifest.source = text;
        }
        let cell = cell.clone();
        self.broadcast(OutboundEvent::CellUpdated(CellUpdated { cell }));
    }

    // ------------------------------------------------------------------
    // Cell structure
    // ------------------------------------------------------------------

    async fn create(&mut self, index: usize, mut cell: Cell) -> Result<(), IntentError> {
        cell.set_status(CellStatus::Idle);
        let language = self.session.language();
        match &mut cell {
            Cell::Code(code) => {
                validate_filename(&code.filename, language)?;
                code.filename = code.filename.trim().to_string();
                code.language = language;
            }
            Cell::PackageJson(_) => {
                if self
                    .session
                    .cells()
                    .iter()
                    .any(|c| matches!(c, Cell::PackageJson(_)))
                {
                    return Err(IntentError::DuplicateManifest);
                }
            }
            Cell::Title(_) | Cell::Markdown(_) => {}
        }

        self.session.insert_cell_at(index, cell.clone())?;
        self.persist(&cell).await;
        if let Cell::Code(code) = &cell {
            let result = match self.bridge.as_mut() {
                Some(bridge) => bridge.open(&code.filename, &code.source).await,
                None => Ok(()),
            };
            self.note_bridge(result);
        }
        self.broadcast(OutboundEvent::CellUpdated(CellUpdated { cell }));
        Ok(())
    }

    async fn rename(&mut self, cell_id: &CellId, filename: &str) -> Result<(), IntentError> {
        validate_filename(filename, self.session.language())?;
        let filename = filename.trim();
        let mut renamed = self.code_cell(cell_id)?.clone();
        let old = std::mem::replace(&mut renamed.filename, filename.to_string());
        if old == filename {
            self.broadcast(OutboundEvent::CellUpdated(CellUpdated {
                cell: Cell::Code(renamed),
            }));
            return Ok(());
        }

        let cell = Cell::Code(renamed);
        self.session.replace_cell(cell.clone())?;
        self.persist(&cell).await;
        if let Err(e) = files::remove_code_file(&self.session, &old).await {
            tracing::warn!(session = %self.session.id(), file = %old, "failed to remove renamed file: {e}");
        }

        if let Cell::Code(code) = &cell {
            let result = match self.bridge.as_mut() {
                Some(bridge) => bridge.rename(&old, &code.filename, &code.source).await,
                None => Ok(()),
            };
            self.note_bridge(result);
        }
        self.broadcast(OutboundEvent::CellUpdated(CellUpdated { cell }));
        Ok(())
    }

    async fn delete(&mut self, cell_id: &CellId) -> Result<(), IntentError> {
        let removed = self.session.remove_cell(cell_id)?;
        self.stop(cell_id);
        if let Cell::Code(code) = &removed {
            let result = match self.bridge.as_mut() {
                Some(bridge) => bridge.close(&code.filename).await,
                None => Ok(()),
            };
            self.note_bridge(result);
            if let Err(e) = files::remove_code_file(&self.session, &code.filename).await {
                tracing::warn!(session = %self.session.id(), file = %code.filename, "failed to remove cell file: {e}");
            }
        }
        self.broadcast(OutboundEvent::CellDeleted(CellRef {
            cell_id: cell_id.clone(),
        }));
        Ok(())
    }

    async fn update_source(&mut self, cell_id: &CellId, source: String) -> Result<(), IntentError> {
        let cell = self
            .session
            .cell_mut(cell_id)
            .ok_or_else(|| IntentError::UnknownCell(cell_id.clone()))?;
        cell.set_source(source);
        let cell = cell.clone();

        self.persist(&cell).await;
        if let Cell::Code(code) = &cell {
            let files = self.session.code_filenames();
            let result = match self.bridge.as_mut() {
                Some(bridge) => resync_file(bridge, code, &files).await,
                None => Ok(()),
            };
            self.note_bridge(result);
        }
        self.broadcast(OutboundEvent::CellUpdated(CellUpdated { cell }));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Language service
    // ------------------------------------------------------------------

    fn note_bridge(&mut self, result: Result<(), BridgeError>) {
        if let Err(e) = result {
            tracing::warn!(session = %self.session.id(), "analysis service call failed: {e}");
            self.bridge_stale = true;
        }
    }

    /// The session's bridge, created on first need with every code cell
    /// opened.
    async fn ensure_bridge(&mut self) -> Result<&mut LanguageBridge, IntentError> {
        if !self.session.language().is_statically_typed() {
            return Err(IntentError::NotStaticallyTyped);
        }
        let session = &self.session;
        let shared = &self.shared;
        let service_rx = &mut self.service_rx;
        let stale = &mut self.bridge_stale;
        let bridge = self.bridge.get_or_insert_with(|| {
            let (bridge, rx) = LanguageBridge::new(
                shared.lsp.clone(),
                session.dir(),
                Arc::clone(&shared.launcher),
            );
            *service_rx = Some(rx);
            *stale = true;
            bridge
        });
        if std::mem::take(stale)
            && let Err(e) = mirror_cells(bridge, session).await
        {
            *stale = true;
            return Err(e.into());
        }
        Ok(bridge)
    }

    async fn start_language_service(&mut self) -> Result<(), IntentError> {
        let bridge = self.ensure_bridge().await?;
        bridge.start().await?;
        self.broadcast(OutboundEvent::LanguageServiceStatus(LanguageServiceStatus {
            status: ServiceStatus::Running,
        }));
        self.shared
            .telemetry
            .record(TelemetryEvent::LanguageServiceStarted {
                session: self.session.id().clone(),
            });
        Ok(())
    }

    async fn stop_language_service(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
        self.service_rx = None;
        self.bridge_stale = false;
        self.broadcast(OutboundEvent::LanguageServiceStatus(LanguageServiceStatus {
            status: ServiceStatus::Stopped,
        }));
    }

    async fn request_diagnostics(&mut self) -> Result<(), IntentError> {
        let files = self.session.code_filenames();
        let bridge = self.ensure_bridge().await?;
        let delay = bridge.diagnostics_delay();
        bridge.request_diagnostics(&files, delay).await?;
        Ok(())
    }

    /// Issue a navigation request and answer it from a spawned task. Any
    /// failure answers with no result.
    async fn navigate(&mut self, kind: Navigation, request: PositionRequest) {
        let PositionRequest {
            correlation_id,
            cell_id,
            offset,
        } = request;
        let Some(intents) = self.intents.upgrade() else {
            return;
        };
        let Some(filename) = self
            .session
            .cell(&cell_id)
            .and_then(Cell::as_code)
            .map(|c| c.filename.clone())
        else {
            self.on_navigation(empty_navigation(kind, correlation_id));
            return;
        };
        let bridge = match self.ensure_bridge().await {
            Ok(bridge) => bridge,
            Err(e) => {
                tracing::debug!(cell = %cell_id, "navigation without analysis service: {e}");
                self.on_navigation(empty_navigation(kind, correlation_id));
                return;
            }
        };

        match kind {
            Navigation::QuickInfo => {
                let pending = bridge.quickinfo(&filename, offset).await;
                tokio::spawn(async move {
                    let info = settle(pending).await;
                    let result = NavigationResult::QuickInfo {
                        correlation_id,
                        info,
                    };
                    let _ = intents.send(Intent::Navigation(result)).await;
                });
            }
            Navigation::Definition => {
                let pending = bridge.definition(&filename, offset).await;
                tokio::spawn(async move {
                    let location = settle(pending).await;
                    let result = NavigationResult::Definition {
                        correlation_id,
                        location,
                    };
                    let _ = intents.send(Intent::Navigation(result)).await;
                });
            }
            Navigation::Completions => {
                let pending = bridge.completions(&filename, offset).await;
                tokio::spawn(async move {
                    let entries = settle(pending).await.unwrap_or_default();
                    let result = NavigationResult::Completions {
                        correlation_id,
                        entries,
                    };
                    let _ = intents.send(Intent::Navigation(result)).await;
                });
            }
        }
    }

    fn on_navigation(&self, result: NavigationResult) {
        let event = match result {
            NavigationResult::QuickInfo {
                correlation_id,
                info,
            } => OutboundEvent::QuickinfoResponse(QuickInfoResponse {
                correlation_id,
                info: info.map(|q| QuickInfoBody {
                    display: q.display,
                    documentation: q.documentation,
                    start: q.start,
                    end: q.end,
                }),
            }),
            NavigationResult::Definition {
                correlation_id,
                location,
            } => {
                // The target may belong to a cell deleted since the request.
                let location = location.and_then(|loc| {
                    let cell = self.session.code_cell_by_filename(&loc.filename)?;
                    Some(DefinitionTarget {
                        cell_id: cell.id.clone(),
                        filename: loc.filename,
                        start: loc.start,
                        end: loc.end,
                    })
                });
                OutboundEvent::DefinitionLocationResponse(DefinitionLocationResponse {
                    correlation_id,
                    location,
                })
            }
            NavigationResult::Completions {
                correlation_id,
                entries,
            } => OutboundEvent::CompletionsResponse(CompletionsResponse {
                correlation_id,
                entries: entries
                    .into_iter()
                    .map(|e| CompletionItem {
                        name: e.name,
                        kind: e.kind,
                        sort_text: e.sort_text,
                        insert_text: e.insert_text,
                    })
                    .collect(),
            }),
        };
        self.broadcast(event);
    }

    fn on_service_message(&mut self, message: ServiceMessage) {
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };
        let Some(event) = bridge.handle_message(message) else {
            return;
        };
        match event {
            BridgeEvent::Diagnostics { filename, items } => {
                self.publish_diagnostics(&filename, items, false);
            }
            BridgeEvent::Suggestions { filename, items } => {
                self.publish_diagnostics(&filename, items, true);
            }
            BridgeEvent::ServiceStopped { reason } => {
                // Relaunched lazily by the next call that needs it.
                tracing::warn!(session = %self.session.id(), ?reason, "analysis service stopped");
                self.broadcast(OutboundEvent::LanguageServiceStatus(LanguageServiceStatus {
                    status: ServiceStatus::Stopped,
                }));
            }
        }
    }

    fn publish_diagnostics(&self, filename: &str, items: Vec<Diagnostic>, suggestions: bool) {
        let Some(cell) = self.session.code_cell_by_filename(filename) else {
            tracing::debug!(session = %self.session.id(), file = %filename, "no cell owns diagnostics, dropping");
            return;
        };
        let payload = CellDiagnostics {
            cell_id: cell.id.clone(),
            diagnostics: items,
        };
        self.broadcast(if suggestions {
            OutboundEvent::SuggestionsForCell(payload)
        } else {
            OutboundEvent::DiagnosticsForCell(payload)
        });
    }
}

async fn next_service_message(
    rx: &mut Option<mpsc::Receiver<ServiceMessage>>,
) -> Option<ServiceMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Make the bridge's open set equal the session's code cells.
async fn mirror_cells(bridge: &mut LanguageBridge, session: &Session) -> Result<(), BridgeError> {
    let wanted: BTreeMap<&str, &str> = session
        .cells()
        .iter()
        .filter_map(Cell::as_code)
        .map(|c| (c.filename.as_str(), c.source.as_str()))
        .collect();
    let extra: Vec<String> = bridge
        .open_files()
        .filter(|f| !wanted.contains_key(f))
        .map(str::to_string)
        .collect();
    for filename in extra {
        bridge.close(&filename).await?;
    }
    for (filename, source) in wanted {
        bridge.open(filename, source).await?;
    }
    Ok(())
}

/// Push one cell's new source and re-check every open file, since other
/// cells may import it.
async fn resync_file(
    bridge: &mut LanguageBridge,
    code: &CodeCell,
    files: &[String],
) -> Result<(), BridgeError> {
    bridge.update(&code.filename, &code.source).await?;
    let delay = bridge.diagnostics_delay();
    bridge.request_diagnostics(files, delay).await
}

async fn settle<T>(pending: Result<PendingReply<T>, BridgeError>) -> Option<T> {
    let reply = match pending {
        Ok(pending) => pending.wait().await,
        Err(e) => Err(e),
    };
    reply.unwrap_or_else(|e| {
        tracing::debug!("navigation request failed: {e}");
        None
    })
}

fn empty_navigation(kind: Navigation, correlation_id: CorrelationId) -> NavigationResult {
    match kind {
        Navigation::QuickInfo => NavigationResult::QuickInfo {
            correlation_id,
            info: None,
        },
        Navigation::Definition => NavigationResult::Definition {
            correlation_id,
            location: None,
        },
        Navigation::Completions => NavigationResult::Completions {
            correlation_id,
            entries: Vec::new(),
        },
    }
}

fn install_status(
    status: InstallStatus,
    packages: &[String],
    exit_code: Option<i32>,
) -> OutboundEvent {
    OutboundEvent::DependencyInstallStatus(DependencyInstallStatus {
        status,
        packages: packages.to_vec(),
        exit_code,
    })
}

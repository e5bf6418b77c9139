//! `LanguageBridge`: one session's view of the analysis service.
//!
//! The bridge owns the Open File Record set and mirrors it into the service.
//! The service is launched on first need; if it dies, the bridge notices on
//! the next call, launches a fresh instance, and re-opens every record.
//! Running services live in `service`; `None` is the dead/not-started state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cellbook_types::{LineOffset, SRC_DIR, to_line_offset};

use crate::diagnostics::{DiagnosticsStore, Normalizer};
use crate::launcher::ServiceLauncher;
use crate::protocol::{self, DiagEventBody, DiagPass, FileSpan};
use crate::server::{MessageKind, PendingResponse, RunningService, ServiceMessage};
use crate::types::{
    BridgeError, BridgeEvent, CompletionEntry, DefinitionLocation, LspConfig, QuickInfo,
};

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

type Decode<T> = Box<dyn FnOnce(serde_json::Value) -> Option<T> + Send>;

/// A navigation request already written to the service.
///
/// Awaiting it yields `Ok(None)` when the service answers without a usable
/// result, which covers targets that no longer exist.
pub struct PendingReply<T> {
    response: PendingResponse,
    decode: Decode<T>,
}

impl<T> PendingReply<T> {
    pub async fn wait(self) -> Result<Option<T>, BridgeError> {
        let frame = self.response.wait().await?;
        if !frame
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(None);
        }
        match frame.get("body") {
            Some(body) => Ok((self.decode)(body.clone())),
            None => Ok(None),
        }
    }
}

pub struct LanguageBridge {
    config: LspConfig,
    project_dir: PathBuf,
    src_dir: PathBuf,
    launcher: Arc<dyn ServiceLauncher>,
    service: Option<RunningService>,
    next_generation: u64,
    /// Open File Records: filename -> content last sent to the service.
    open_files: BTreeMap<String, String>,
    normalizer: Normalizer,
    diagnostics: DiagnosticsStore,
    message_tx: mpsc::Sender<ServiceMessage>,
}

impl LanguageBridge {
    /// Create a bridge for the project at `project_dir`. No service is
    /// launched until the first call that needs one.
    ///
    /// The returned receiver carries raw service output; feed each message
    /// back through [`LanguageBridge::handle_message`].
    pub fn new(
        config: LspConfig,
        project_dir: &Path,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> (Self, mpsc::Receiver<ServiceMessage>) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let normalizer = Normalizer::new(
            config.ignored_diagnostic_codes.clone(),
            config.ignored_suggestion_codes.clone(),
        );
        let bridge = Self {
            config,
            project_dir: project_dir.to_path_buf(),
            src_dir: project_dir.join(SRC_DIR),
            launcher,
            service: None,
            next_generation: 1,
            open_files: BTreeMap::new(),
            normalizer,
            diagnostics: DiagnosticsStore::new(),
            message_tx,
        };
        (bridge, message_rx)
    }

    /// Whether a live service instance is attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.service.as_ref().is_some_and(RunningService::is_alive)
    }

    #[must_use]
    pub fn is_open(&self, filename: &str) -> bool {
        self.open_files.contains_key(filename)
    }

    pub fn open_files(&self) -> impl Iterator<Item = &str> {
        self.open_files.keys().map(String::as_str)
    }

    /// Delay configured for diagnostics requests.
    #[must_use]
    pub fn diagnostics_delay(&self) -> Duration {
        Duration::from_millis(self.config.diagnostics_delay_ms)
    }

    fn service_path(&self, filename: &str) -> String {
        self.src_dir.join(filename).to_string_lossy().into_owned()
    }

    /// Launch the service if needed.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        self.ensure_service().await.map(|_| ())
    }

    async fn ensure_service(&mut self) -> Result<&RunningService, BridgeError> {
        if !self.is_running() {
            if let Some(dead) = self.service.take() {
                tracing::info!(
                    generation = dead.generation(),
                    "analysis service is gone, relaunching"
                );
                dead.shutdown().await;
            }
            self.launch().await?;
        }
        self.service.as_ref().ok_or(BridgeError::Unavailable)
    }

    async fn launch(&mut self) -> Result<(), BridgeError> {
        let io = self
            .launcher
            .launch(&self.project_dir)
            .map_err(BridgeError::Launch)?;
        let generation = self.next_generation;
        self.next_generation += 1;
        let service = RunningService::start(
            io,
            generation,
            Duration::from_millis(self.config.request_timeout_ms),
            self.message_tx.clone(),
        );
        tracing::info!(
            generation,
            project = %self.project_dir.display(),
            "analysis service started"
        );

        // A fresh instance knows nothing; mirror every record again.
        self.diagnostics.clear();
        for (filename, content) in &self.open_files {
            let args = protocol::open_args(&self.service_path(filename), content);
            service.notify("open", Some(args)).await?;
        }
        if !self.open_files.is_empty() {
            let files: Vec<String> = self.open_files.keys().cloned().collect();
            let paths: Vec<String> = files.iter().map(|f| self.service_path(f)).collect();
            let args = protocol::geterr_args(&paths, self.config.diagnostics_delay_ms);
            service.notify("geterr", Some(args)).await?;
        }
        self.service = Some(service);
        Ok(())
    }

    /// Declare `filename` with `content`. Re-opening an open file replaces it.
    pub async fn open(&mut self, filename: &str, content: &str) -> Result<(), BridgeError> {
        if self.is_open(filename) {
            return self.update(filename, content).await;
        }
        let path = self.service_path(filename);
        let service = self.ensure_service().await?;
        service
            .notify("open", Some(protocol::open_args(&path, content)))
            .await?;
        self.open_files
            .insert(filename.to_string(), content.to_string());
        Ok(())
    }

    /// Retract `filename`. Closing a file that is not open is a no-op.
    pub async fn close(&mut self, filename: &str) -> Result<(), BridgeError> {
        if self.open_files.remove(filename).is_none() {
            return Ok(());
        }
        self.diagnostics.remove(filename);
        // A dead service has already forgotten the file.
        if let Some(service) = self.service.as_ref().filter(|s| s.is_alive()) {
            let path = self.service_path(filename);
            service
                .notify("close", Some(protocol::file_args(&path)))
                .await?;
        }
        Ok(())
    }

    /// Replace the content of `filename` by closing and reopening it.
    pub async fn update(&mut self, filename: &str, content: &str) -> Result<(), BridgeError> {
        let path = self.service_path(filename);
        let was_open = self.is_open(filename);
        let service = self.ensure_service().await?;
        if was_open {
            service
                .notify("close", Some(protocol::file_args(&path)))
                .await?;
        }
        service
            .notify("open", Some(protocol::open_args(&path, content)))
            .await?;
        self.open_files
            .insert(filename.to_string(), content.to_string());
        Ok(())
    }

    /// Move a record from `old` to `new`, reload the project, and re-request
    /// diagnostics for every open file.
    pub async fn rename(&mut self, old: &str, new: &str, content: &str) -> Result<(), BridgeError> {
        let old_path = self.service_path(old);
        let new_path = self.service_path(new);
        let was_open = self.is_open(old);
        let service = self.ensure_service().await?;
        if was_open {
            service
                .notify("close", Some(protocol::file_args(&old_path)))
                .await?;
        }
        service
            .notify("open", Some(protocol::open_args(&new_path, content)))
            .await?;
        self.open_files.remove(old);
        self.diagnostics.remove(old);
        self.open_files.insert(new.to_string(), content.to_string());

        self.reload_project().await?;
        let files: Vec<String> = self.open_files.keys().cloned().collect();
        let delay = self.diagnostics_delay();
        self.request_diagnostics(&files, delay).await
    }

    /// Ask for diagnostics for the open files among `filenames`. Results
    /// arrive later as events.
    pub async fn request_diagnostics(
        &mut self,
        filenames: &[String],
        delay: Duration,
    ) -> Result<(), BridgeError> {
        let paths: Vec<String> = filenames
            .iter()
            .filter(|f| self.is_open(f))
            .map(|f| self.service_path(f))
            .collect();
        if paths.is_empty() {
            return Ok(());
        }
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let service = self.ensure_service().await?;
        service
            .notify("geterr", Some(protocol::geterr_args(&paths, delay_ms)))
            .await
    }

    /// Make the service re-derive its module graph.
    pub async fn reload_project(&mut self) -> Result<(), BridgeError> {
        let service = self.ensure_service().await?;
        service.notify("reloadProjects", None).await
    }

    async fn navigation_request(
        &mut self,
        command: &'static str,
        filename: &str,
        offset: usize,
    ) -> Result<(PendingResponse, LineOffset), BridgeError> {
        let Some(content) = self.open_files.get(filename) else {
            return Err(BridgeError::NotOpen(filename.to_string()));
        };
        let position = to_line_offset(content, offset);
        let path = self.service_path(filename);
        let service = self.ensure_service().await?;
        let response = service
            .request(command, Some(protocol::location_args(&path, position)))
            .await?;
        Ok((response, position))
    }

    /// Hover information at `offset` in `filename`.
    pub async fn quickinfo(
        &mut self,
        filename: &str,
        offset: usize,
    ) -> Result<PendingReply<QuickInfo>, BridgeError> {
        let (response, _) = self.navigation_request("quickinfo", filename, offset).await?;
        Ok(PendingReply {
            response,
            decode: Box::new(decode_quickinfo),
        })
    }

    /// Where the symbol at `offset` is defined. Targets outside the
    /// session's source directory resolve to no result.
    pub async fn definition(
        &mut self,
        filename: &str,
        offset: usize,
    ) -> Result<PendingReply<DefinitionLocation>, BridgeError> {
        let (response, _) = self
            .navigation_request("definition", filename, offset)
            .await?;
        let src_dir = self.src_dir.clone();
        Ok(PendingReply {
            response,
            decode: Box::new(move |body| decode_definition(&src_dir, body)),
        })
    }

    pub async fn completions(
        &mut self,
        filename: &str,
        offset: usize,
    ) -> Result<PendingReply<Vec<CompletionEntry>>, BridgeError> {
        let (response, _) = self
            .navigation_request("completionInfo", filename, offset)
            .await?;
        Ok(PendingReply {
            response,
            decode: Box::new(decode_completions),
        })
    }

    /// Apply one message from the service. Diagnostics for files that are no
    /// longer open are dropped.
    pub fn handle_message(&mut self, message: ServiceMessage) -> Option<BridgeEvent> {
        let current = self.service.as_ref().map(RunningService::generation);
        if current != Some(message.generation) {
            tracing::trace!(
                generation = message.generation,
                "dropping message from a replaced analysis service"
            );
            return None;
        }

        match message.kind {
            MessageKind::Stopped(reason) => {
                // The dead instance is detached lazily by the next call.
                self.diagnostics.clear();
                Some(BridgeEvent::ServiceStopped { reason })
            }
            MessageKind::Event { event, body } => {
                let Some(pass) = DiagPass::from_event(&event) else {
                    tracing::trace!(event = %event, "ignoring analysis service event");
                    return None;
                };
                let body: DiagEventBody = match serde_json::from_value(body?) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::debug!(event = %event, "malformed diagnostics event: {e}");
                        return None;
                    }
                };
                let Some(filename) = filename_in(&self.src_dir, &body.file) else {
                    tracing::debug!(file = %body.file, "diagnostics for a path outside the project");
                    return None;
                };
                if !self.is_open(&filename) {
                    tracing::debug!(file = %filename, "dropping diagnostics for a closed file");
                    return None;
                }

                let items = self.normalizer.normalize(pass, &body.diagnostics);
                match pass {
                    DiagPass::Suggestion => Some(BridgeEvent::Suggestions { filename, items }),
                    DiagPass::Syntax | DiagPass::Semantic => {
                        let items = self.diagnostics.update(&filename, pass, items);
                        Some(BridgeEvent::Diagnostics { filename, items })
                    }
                }
            }
        }
    }

    /// Stop the service. Open File Records are kept so a later call can
    /// bring an identical instance back.
    pub async fn shutdown(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown().await;
        }
        self.diagnostics.clear();
    }
}

fn decode_quickinfo(body: serde_json::Value) -> Option<QuickInfo> {
    let display = body.get("displayString")?.as_str()?.to_string();
    let start = serde_json::from_value(body.get("start")?.clone()).ok()?;
    let end = serde_json::from_value(body.get("end")?.clone()).ok()?;
    Some(QuickInfo {
        display,
        documentation: protocol::display_text(body.get("documentation")),
        start,
        end,
    })
}

/// Map a service-reported path to a filename directly inside `src_dir`.
fn filename_in(src_dir: &Path, path: &str) -> Option<String> {
    let relative = Path::new(path).strip_prefix(src_dir).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    if components.next().is_some() {
        return None;
    }
    first.as_os_str().to_str().map(str::to_string)
}

fn decode_definition(src_dir: &Path, body: serde_json::Value) -> Option<DefinitionLocation> {
    let spans: Vec<FileSpan> = serde_json::from_value(body).ok()?;
    spans.into_iter().find_map(|span| {
        Some(DefinitionLocation {
            filename: filename_in(src_dir, &span.file)?,
            start: span.start,
            end: span.end,
        })
    })
}

fn decode_completions(body: serde_json::Value) -> Option<Vec<CompletionEntry>> {
    let entries = body.get("entries")?.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(|entry| {
                Some(CompletionEntry {
                    name: entry.get("name")?.as_str()?.to_string(),
                    kind: entry
                        .get("kind")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    sort_text: entry
                        .get("sortText")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    insert_text: entry
                        .get("insertText")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect(),
    )
}

//! `SessionCoordinator`: the registry of open sessions.
//!
//! Each open session is an actor task reached through a bounded mailbox.
//! The coordinator validates nothing itself; the channel has already checked
//! shapes, and the actor owns every session-level decision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use cellbook_channel::{ConnectionId, Dispatch, Hub, InboundMessage, Rejected};
use cellbook_lsp::{CommandLauncher, LspConfig, ServiceLauncher};
use cellbook_process::{ProcessConfig, ProcessSupervisor};
use cellbook_types::{Cell, Session, SessionId};

use crate::actor::{Intent, MAILBOX_CAPACITY, SessionActor, Shared};
use crate::files;
use crate::types::{CoordinatorError, EnvironmentSource, NoEnvironment, NoopTelemetry, Telemetry};

struct SessionHandle {
    intents: mpsc::Sender<Intent>,
    task: JoinHandle<()>,
}

pub struct SessionCoordinator {
    shared: Arc<Shared>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionCoordinator {
    /// Analysis services are launched from `lsp.command`; no extra
    /// environment is injected and telemetry is discarded until replaced.
    #[must_use]
    pub fn new(
        hub: Arc<Hub>,
        supervisor: Arc<ProcessSupervisor>,
        process: ProcessConfig,
        lsp: LspConfig,
    ) -> Self {
        let launcher = Arc::new(CommandLauncher::new(lsp.command.clone(), lsp.args.clone()));
        Self {
            shared: Arc::new(Shared {
                process,
                lsp,
                supervisor,
                hub,
                launcher,
                environment: Arc::new(NoEnvironment),
                telemetry: Arc::new(NoopTelemetry),
            }),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        Arc::make_mut(&mut self.shared).launcher = launcher;
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentSource>) -> Self {
        Arc::make_mut(&mut self.shared).environment = environment;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        Arc::make_mut(&mut self.shared).telemetry = telemetry;
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn is_open(&self, id: &SessionId) -> bool {
        self.sessions().contains_key(id)
    }

    /// Write the session's files and start its actor.
    pub async fn open_session(&self, session: Session) -> Result<(), CoordinatorError> {
        let id = session.id().clone();
        if self.is_open(&id) {
            return Err(CoordinatorError::SessionExists(id));
        }
        files::prepare(&session)
            .await
            .map_err(|source| CoordinatorError::Prepare {
                path: session.dir().to_path_buf(),
                source,
            })?;

        let (intents, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = SessionActor::new(
            session,
            Arc::clone(&self.shared),
            mailbox,
            intents.downgrade(),
        );

        let mut sessions = self.sessions();
        if sessions.contains_key(&id) {
            return Err(CoordinatorError::SessionExists(id));
        }
        let task = tokio::spawn(actor.run());
        sessions.insert(id, SessionHandle { intents, task });
        Ok(())
    }

    /// Stop the session's analysis service and processes, then drop it.
    /// Files on disk are left alone.
    pub async fn close_session(&self, id: &SessionId) -> Result<(), CoordinatorError> {
        let handle = self
            .sessions()
            .remove(id)
            .ok_or_else(|| CoordinatorError::UnknownSession(id.clone()))?;
        close(id, handle).await;
        Ok(())
    }

    /// Snapshot of a session's cells, in order.
    pub async fn cells(&self, id: &SessionId) -> Result<Vec<Cell>, CoordinatorError> {
        let intents = self
            .sessions()
            .get(id)
            .map(|h| h.intents.clone())
            .ok_or_else(|| CoordinatorError::UnknownSession(id.clone()))?;
        let (reply, rx) = oneshot::channel();
        intents
            .send(Intent::Cells(reply))
            .await
            .map_err(|_| CoordinatorError::SessionGone(id.clone()))?;
        rx.await
            .map_err(|_| CoordinatorError::SessionGone(id.clone()))
    }

    /// Close every session and kill anything still running.
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionId, SessionHandle)> = self.sessions().drain().collect();
        for (id, handle) in drained {
            close(&id, handle).await;
        }
        self.shared.supervisor.kill_all();
    }
}

async fn close(id: &SessionId, handle: SessionHandle) {
    let (done, ack) = oneshot::channel();
    if handle.intents.send(Intent::Close(done)).await.is_ok() {
        let _ = ack.await;
    }
    drop(handle.intents);
    if let Err(e) = handle.task.await {
        tracing::error!(session = %id, "session task failed: {e}");
    }
}

impl Dispatch for SessionCoordinator {
    fn dispatch(&self, connection: ConnectionId, message: InboundMessage) -> Result<(), Rejected> {
        let sessions = self.sessions();
        let Some(handle) = sessions.get(&message.session) else {
            return Err(Rejected(format!("session {} is not open", message.session)));
        };
        let intent = Intent::Client {
            connection,
            event: message.event,
        };
        handle.intents.try_send(intent).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(session = %message.session, "session mailbox full, refusing intent");
                Rejected(format!("session {} is busy", message.session))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Rejected(format!("session {} is closing", message.session))
            }
        })
    }
}

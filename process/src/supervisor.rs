//! Process supervisor: at most one live execution per `(session, cell)`.
//!
//! The registry is an explicit object owned by the coordinator. A record is
//! inserted only after a successful spawn and removed only by the process's
//! own monitor task, immediately before it emits [`ProcessEvent::Exited`].
//! That single removal point is what makes the exit notification fire
//! exactly once even when `stop` races a natural exit.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, mpsc};

use crate::types::{ExitInfo, ProcessEvent, ProcessKey, RunError, RunRequest, SpawnFailure};

const READ_CHUNK_BYTES: usize = 4096;

/// How long to keep draining pipes after the child exits. Grandchildren that
/// inherited the pipes can otherwise hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

struct RunningProcess {
    pid: u32,
    generation: u64,
    kill: Arc<Notify>,
}

impl RunningProcess {
    fn terminate(&self) -> bool {
        #[cfg(unix)]
        {
            match crate::os::signal_process_group(self.pid, libc::SIGTERM) {
                Ok(crate::os::SignalOutcome::Signaled) => true,
                Ok(crate::os::SignalOutcome::NotRunning) => false,
                Err(e) => {
                    tracing::warn!(pid = self.pid, "SIGTERM failed, forcing kill: {e}");
                    self.kill.notify_one();
                    true
                }
            }
        }
        #[cfg(not(unix))]
        {
            self.kill.notify_one();
            true
        }
    }

    fn force_kill(&self) {
        #[cfg(unix)]
        if let Err(e) = crate::os::signal_process_group(self.pid, libc::SIGKILL) {
            tracing::debug!(pid = self.pid, "SIGKILL failed: {e}");
        }
        self.kill.notify_one();
    }
}

type Registry = Arc<Mutex<HashMap<ProcessKey, RunningProcess>>>;

/// A tracked execution. Events arrive in order; `Exited` is last.
#[derive(Debug)]
pub struct ProcessHandle {
    key: ProcessKey,
    pid: u32,
    events: mpsc::Receiver<ProcessEvent>,
}

impl ProcessHandle {
    #[must_use]
    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next output chunk or the exit notification; `None` after `Exited`.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    #[must_use]
    pub fn into_events(self) -> mpsc::Receiver<ProcessEvent> {
        self.events
    }
}

pub struct ProcessSupervisor {
    running: Registry,
    output_capacity: usize,
    next_generation: AtomicU64,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(output_capacity: usize) -> Self {
        Self {
            running: Arc::new(Mutex::new(HashMap::new())),
            output_capacity: output_capacity.max(1),
            next_generation: AtomicU64::new(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ProcessKey, RunningProcess>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the requested process and start streaming its output.
    ///
    /// Rejects a second run for a key that still has a live record. The
    /// record check and insert happen under one lock, so concurrent callers
    /// cannot both spawn.
    pub fn run(&self, request: RunRequest) -> Result<ProcessHandle, RunError> {
        let mut running = self.registry();
        if running.contains_key(&request.key) {
            return Err(RunError::AlreadyRunning(request.key));
        }

        let mut child = spawn_child(&request)?;
        let program = request.program.clone();

        let Some(pid) = child.id() else {
            return Err(SpawnFailure::NoPid { program }.into());
        };
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(key = %request.key, ?status, "process exited before tracking");
            return Err(SpawnFailure::ExitedImmediately { program }.into());
        }
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(SpawnFailure::MissingPipes { program }.into());
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let kill = Arc::new(Notify::new());
        running.insert(
            request.key.clone(),
            RunningProcess {
                pid,
                generation,
                kill: kill.clone(),
            },
        );
        drop(running);

        tracing::info!(key = %request.key, pid, program = %request.program, "process started");

        let (tx, rx) = mpsc::channel(self.output_capacity);
        tokio::spawn(monitor(
            child,
            stdout,
            stderr,
            tx,
            kill,
            self.running.clone(),
            request.key.clone(),
            generation,
        ));

        Ok(ProcessHandle {
            key: request.key,
            pid,
            events: rx,
        })
    }

    /// Ask the process registered under `key` to terminate.
    ///
    /// Returns whether a record existed and was signalled. The record stays
    /// until the exit is observed, so a `run` issued before then is rejected.
    pub fn stop(&self, key: &ProcessKey) -> bool {
        let running = self.registry();
        match running.get(key) {
            Some(process) => {
                tracing::info!(key = %key, pid = process.pid, "stopping process");
                process.terminate()
            }
            None => {
                tracing::debug!(key = %key, "nothing to stop");
                false
            }
        }
    }

    /// Stop every process belonging to one session. Returns how many were signalled.
    pub fn stop_session(&self, session: &cellbook_types::SessionId) -> usize {
        let running = self.registry();
        running
            .iter()
            .filter(|(key, _)| &key.session == session)
            .filter(|(_, process)| process.terminate())
            .count()
    }

    /// Kill everything, used on engine shutdown.
    pub fn kill_all(&self) {
        let running = self.registry();
        for (key, process) in running.iter() {
            tracing::info!(key = %key, pid = process.pid, "killing process");
            process.force_kill();
        }
    }

    #[must_use]
    pub fn is_running(&self, key: &ProcessKey) -> bool {
        self.registry().contains_key(key)
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.registry().len()
    }

    /// Output chunks buffered per process before the pump waits.
    #[must_use]
    pub fn output_capacity(&self) -> usize {
        self.output_capacity
    }
}

fn resolve_program(program: &str, cwd: &Path) -> Result<std::path::PathBuf, SpawnFailure> {
    let not_found = || SpawnFailure::NotFound {
        program: program.to_string(),
    };
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = cwd.join(program);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        };
    }
    which::which(program).map_err(|_| not_found())
}

fn spawn_child(request: &RunRequest) -> Result<Child, SpawnFailure> {
    let resolved = resolve_program(&request.program, &request.cwd)?;
    let mut cmd = Command::new(&resolved);
    cmd.args(&request.args)
        .current_dir(&request.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, _) in std::env::vars_os() {
        if let Some(name) = key.to_str()
            && cellbook_types::is_secret_env(name)
        {
            cmd.env_remove(&key);
        }
    }
    cmd.envs(&request.env);

    #[cfg(unix)]
    crate::os::set_new_session(&mut cmd);

    cmd.spawn().map_err(|source| SpawnFailure::Io {
        program: request.program.clone(),
        source,
    })
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    // Bytes of a UTF-8 sequence split across reads.
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        let valid_up_to = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => pending.len(),
        };
        if valid_up_to == 0 {
            continue;
        }
        let chunk = String::from_utf8_lossy(&pending[..valid_up_to]).into_owned();
        pending.drain(..valid_up_to);
        if tx.send(wrap(chunk)).await.is_err() {
            break;
        }
    }
    if !pending.is_empty() {
        let _ = tx
            .send(wrap(String::from_utf8_lossy(&pending).into_owned()))
            .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn monitor(
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    tx: mpsc::Sender<ProcessEvent>,
    kill: Arc<Notify>,
    registry: Registry,
    key: ProcessKey,
    generation: u64,
) {
    let mut stdout_task = tokio::spawn(pump(stdout, tx.clone(), ProcessEvent::Stdout));
    let mut stderr_task = tokio::spawn(pump(stderr, tx.clone(), ProcessEvent::Stderr));

    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.notified() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let info = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
        },
        Err(e) => {
            tracing::warn!(key = %key, "waiting on process failed: {e}");
            ExitInfo { code: None }
        }
    };

    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    })
    .await;
    if drained.is_err() {
        tracing::debug!(key = %key, "output pipes still open after exit; abandoning them");
        stdout_task.abort();
        stderr_task.abort();
    }

    {
        let mut running = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if running
            .get(&key)
            .is_some_and(|process| process.generation == generation)
        {
            running.remove(&key);
        }
    }

    tracing::info!(key = %key, code = ?info.code, "process exited");
    let _ = tx.send(ProcessEvent::Exited(info)).await;
}

//! One running analysis service instance: writer task, reader task, and the
//! pending-request table that pairs responses with their waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameReader, LineWriter};
use crate::launcher::ServiceIo;
use crate::protocol::{Incoming, Request, parse_incoming};
use crate::types::{BridgeError, ServiceStopReason};

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Output of a service instance, tagged with the instance generation so a
/// late message from a replaced instance can be recognised.
#[derive(Debug)]
pub struct ServiceMessage {
    pub(crate) generation: u64,
    pub(crate) kind: MessageKind,
}

#[derive(Debug)]
pub(crate) enum MessageKind {
    Event {
        event: String,
        body: Option<serde_json::Value>,
    },
    Stopped(ServiceStopReason),
}

/// A request that has been written and is awaiting its response.
pub(crate) struct PendingResponse {
    seq: u64,
    command: &'static str,
    rx: oneshot::Receiver<serde_json::Value>,
    pending: PendingMap,
    timeout: Duration,
}

impl PendingResponse {
    /// Wait for the response frame. A dead service drops the waiter, which
    /// surfaces as [`BridgeError::Unavailable`].
    pub async fn wait(self) -> Result<serde_json::Value, BridgeError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(BridgeError::Unavailable),
            Err(_) => {
                self.pending.lock().await.remove(&self.seq);
                Err(BridgeError::Timeout {
                    command: self.command,
                })
            }
        }
    }
}

pub(crate) struct RunningService {
    generation: u64,
    child: Option<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_seq: AtomicU64,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl RunningService {
    pub fn start(
        io: ServiceIo,
        generation: u64,
        timeout: Duration,
        message_tx: mpsc::Sender<ServiceMessage>,
    ) -> Self {
        let ServiceIo {
            reader,
            writer,
            child,
        } = io;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = LineWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_line(&frame).await {
                            tracing::warn!(generation, "analysis service write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, generation, &reader_pending, &message_tx)
                            .await;
                    }
                    Ok(None) => {
                        tracing::info!(generation, "analysis service closed its output");
                        break ServiceStopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!(generation, "analysis service reader error: {e:#}");
                        break ServiceStopReason::Failed(format!("{e:#}"));
                    }
                }
            };
            reader_alive.store(false, Ordering::SeqCst);
            // Dropping the senders rejects every in-flight waiter.
            reader_pending.lock().await.clear();
            let _ = message_tx
                .send(ServiceMessage {
                    generation,
                    kind: MessageKind::Stopped(reason),
                })
                .await;
        });

        Self {
            generation,
            child,
            writer_tx,
            next_seq: AtomicU64::new(1),
            pending,
            alive,
            timeout,
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        generation: u64,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        message_tx: &mpsc::Sender<ServiceMessage>,
    ) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!(generation, "ignoring unrecognised frame from analysis service");
            return;
        };

        match incoming {
            Incoming::Response { request_seq, body } => {
                let sender = pending.lock().await.remove(&request_seq);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => tracing::trace!(request_seq, "response with no waiter"),
                }
            }
            Incoming::Event { event, body } => {
                let _ = message_tx
                    .send(ServiceMessage {
                        generation,
                        kind: MessageKind::Event { event, body },
                    })
                    .await;
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.writer_tx.is_closed()
    }

    /// Queue a command that expects no response.
    pub async fn notify(
        &self,
        command: &'static str,
        arguments: Option<serde_json::Value>,
    ) -> Result<(), BridgeError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.send(Request::new(seq, command, arguments)).await
    }

    /// Queue a request and register its waiter. The request is written in
    /// call order relative to every other command on this instance.
    pub async fn request(
        &self,
        command: &'static str,
        arguments: Option<serde_json::Value>,
    ) -> Result<PendingResponse, BridgeError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        if let Err(e) = self.send(Request::new(seq, command, arguments)).await {
            self.pending.lock().await.remove(&seq);
            return Err(e);
        }

        Ok(PendingResponse {
            seq,
            command,
            rx,
            pending: self.pending.clone(),
            timeout: self.timeout,
        })
    }

    async fn send(&self, request: Request) -> Result<(), BridgeError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BridgeError::Unavailable);
        }
        let frame = match serde_json::to_value(&request) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(command = request.command, "failed to serialize request: {e}");
                return Err(BridgeError::Unavailable);
            }
        };
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| BridgeError::Unavailable)
    }

    /// Stop the writer and wait briefly for the child before killing it.
    pub async fn shutdown(mut self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        self.pending.lock().await.clear();

        let Some(mut child) = self.child.take() else {
            self.reader_handle.abort();
            return;
        };
        let waited = tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            child.wait(),
        )
        .await;
        if waited.is_err() {
            tracing::debug!(
                generation = self.generation,
                "analysis service didn't exit in time, killing"
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct Harness {
        service: RunningService,
        messages: mpsc::Receiver<ServiceMessage>,
        /// What the service receives.
        requests: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        /// Where the service writes.
        output: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    }

    fn harness(timeout: Duration) -> Harness {
        let (client_end, service_end) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_end);
        let (service_read, service_write) = tokio::io::split(service_end);
        let (message_tx, messages) = mpsc::channel(16);
        let io = ServiceIo {
            reader: Box::new(client_read),
            writer: Box::new(client_write),
            child: None,
        };
        Harness {
            service: RunningService::start(io, 7, timeout, message_tx),
            messages,
            requests: BufReader::new(service_read).lines(),
            output: service_write,
        }
    }

    async fn next_request(h: &mut Harness) -> serde_json::Value {
        let line = h.requests.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn response_resolves_matching_waiter() {
        let mut h = harness(Duration::from_secs(5));
        let pending = h
            .service
            .request("quickinfo", Some(serde_json::json!({"file": "/s/a.ts"})))
            .await
            .unwrap();

        let request = next_request(&mut h).await;
        assert_eq!(request["type"], "request");
        assert_eq!(request["command"], "quickinfo");
        let seq = request["seq"].as_u64().unwrap();

        let response = serde_json::json!({
            "seq": 0, "type": "response", "request_seq": seq,
            "success": true, "body": {"displayString": "const x: number"}
        });
        h.output
            .write_all(format!("{response}\n").as_bytes())
            .await
            .unwrap();

        let frame = pending.wait().await.unwrap();
        assert_eq!(frame["body"]["displayString"], "const x: number");
    }

    #[tokio::test]
    async fn events_are_forwarded_with_generation() {
        let mut h = harness(Duration::from_secs(5));
        let event = serde_json::json!({
            "seq": 0, "type": "event", "event": "semanticDiag",
            "body": {"file": "/s/a.ts", "diagnostics": []}
        });
        let body = event.to_string();
        h.output
            .write_all(format!("Content-Length: {}\r\n\r\n{body}", body.len()).as_bytes())
            .await
            .unwrap();

        let message = h.messages.recv().await.unwrap();
        assert_eq!(message.generation, 7);
        match message.kind {
            MessageKind::Event { event, .. } => assert_eq!(event, "semanticDiag"),
            MessageKind::Stopped(_) => panic!("expected event"),
        }
    }

    #[tokio::test]
    async fn service_death_rejects_waiters_and_reports_stop() {
        let mut h = harness(Duration::from_secs(30));
        let pending = h.service.request("definition", None).await.unwrap();
        let _ = next_request(&mut h).await;

        drop(h.output);
        drop(h.requests);

        assert!(matches!(pending.wait().await, Err(BridgeError::Unavailable)));
        let message = h.messages.recv().await.unwrap();
        assert!(matches!(
            message.kind,
            MessageKind::Stopped(ServiceStopReason::Exited)
        ));
        assert!(!h.service.is_alive());
        assert!(matches!(
            h.service.notify("open", None).await,
            Err(BridgeError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn timeout_removes_waiter() {
        let mut h = harness(Duration::from_millis(50));
        let pending = h.service.request("completionInfo", None).await.unwrap();
        let _ = next_request(&mut h).await;

        assert!(matches!(
            pending.wait().await,
            Err(BridgeError::Timeout {
                command: "completionInfo"
            })
        ));
        assert!(h.service.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn commands_are_written_in_call_order() {
        let mut h = harness(Duration::from_secs(5));
        h.service.notify("close", None).await.unwrap();
        h.service.notify("open", None).await.unwrap();
        h.service.notify("reloadProjects", None).await.unwrap();
        h.service.notify("geterr", None).await.unwrap();

        let mut commands = Vec::new();
        let mut seqs = Vec::new();
        for _ in 0..4 {
            let request = next_request(&mut h).await;
            commands.push(request["command"].as_str().unwrap().to_string());
            seqs.push(request["seq"].as_u64().unwrap());
        }
        assert_eq!(commands, vec!["close", "open", "reloadProjects", "geterr"]);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn unmatched_response_is_ignored() {
        let mut h = harness(Duration::from_secs(5));
        let stray = serde_json::json!({
            "seq": 0, "type": "response", "request_seq": 999, "success": true
        });
        h.output
            .write_all(format!("{stray}\n").as_bytes())
            .await
            .unwrap();

        let pending = h.service.request("quickinfo", None).await.unwrap();
        let seq = next_request(&mut h).await["seq"].as_u64().unwrap();
        let response = serde_json::json!({
            "seq": 0, "type": "response", "request_seq": seq, "success": false
        });
        h.output
            .write_all(format!("{response}\n").as_bytes())
            .await
            .unwrap();
        assert_eq!(pending.wait().await.unwrap()["success"], false);
        assert!(h.service.is_alive());
    }
}

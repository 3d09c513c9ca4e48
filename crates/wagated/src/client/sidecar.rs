//! Session client backed by a worker process.
//!
//! The worker runs the browser automation and speaks newline-delimited JSON
//! (see [`wagate_protocol::worker`]). One reader task per worker routes its
//! output: call answers (`initialized`, `init_error`, `reply`) complete the
//! waiting call, everything else becomes a [`ClientEvent`].
//!
//! Each spawned worker gets a generation. `teardown()` and `connect()` bump
//! it, so output from a worker that is being replaced is ignored and its
//! exit is not reported as a disconnect.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A poisoned state lock reads as "no transport" in `probe()`

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use wagate_core::{ClientEvent, ClientInfo, TransportProbe};
use wagate_protocol::{parse_line, ChatId, WorkerEvent, WorkerRequest};

use super::{ClientError, MessageId, SessionClient, EVENT_BUFFER};
use crate::config::{AuthConfig, WorkerConfig};

/// Outstanding requests to one worker.
const REQUEST_BUFFER: usize = 32;

/// How long a send may wait for the worker's reply.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);

type InitReply = oneshot::Sender<Result<(), ClientError>>;
type SendReply = oneshot::Sender<Result<MessageId, ClientError>>;

// ============================================================================
// Shared State
// ============================================================================

struct Link {
    requests: mpsc::Sender<WorkerRequest>,
    child: Child,
}

#[derive(Default)]
struct Shared {
    generation: u64,
    link: Option<Link>,
    /// The worker reported its page up.
    launched: bool,
    identity: Option<ClientInfo>,
    init: Option<InitReply>,
    pending: HashMap<u64, SendReply>,
}

impl Shared {
    /// Fails every waiting call; used when the worker goes away.
    fn fail_waiters(&mut self) {
        if let Some(tx) = self.init.take() {
            let _ = tx.send(Err(ClientError::WorkerExited));
        }
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(ClientError::WorkerExited));
        }
    }

    fn clear_transport(&mut self) {
        self.launched = false;
        self.identity = None;
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Sidecar Client
// ============================================================================

/// [`SessionClient`] that drives a worker process over stdin/stdout.
pub struct SidecarClient {
    config: WorkerConfig,
    env: Vec<(String, String)>,
    events: mpsc::Sender<ClientEvent>,
    shared: Arc<Mutex<Shared>>,
    next_request: AtomicU64,
}

impl SidecarClient {
    /// Creates the client and the receiving end of its event channel.
    ///
    /// Nothing is spawned until `connect()`.
    pub fn new(config: WorkerConfig, auth: &AuthConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);

        let mut env = vec![
            ("WAGATE_AUTH_DIR".to_string(), auth.dir.display().to_string()),
            ("WAGATE_CLIENT_ID".to_string(), auth.client_id.clone()),
            ("WAGATE_BROWSER_ARGS".to_string(), config.browser_args.join(" ")),
        ];
        if let Some(exe) = &config.browser_executable {
            env.push((
                "WAGATE_BROWSER_EXECUTABLE".to_string(),
                exe.display().to_string(),
            ));
        }

        let client = Self {
            config,
            env,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            next_request: AtomicU64::new(0),
        };
        (client, rx)
    }

    fn spawn_worker(&self) -> Result<(Child, ChildStdin, ChildStdout), ClientError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Spawn {
                command: self.config.command.clone(),
                error: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Io("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Io("worker stdout unavailable".to_string()))?;
        Ok((child, stdin, stdout))
    }
}

#[async_trait]
impl SessionClient for SidecarClient {
    async fn connect(&self) -> Result<(), ClientError> {
        // A previous worker may still be around after a failed attempt.
        self.teardown().await;

        let (child, stdin, stdout) = self.spawn_worker()?;
        let pid = child.id();
        let (init_tx, init_rx) = oneshot::channel();
        let (req_tx, req_rx) = mpsc::channel(REQUEST_BUFFER);

        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.clear_transport();
            shared.init = Some(init_tx);
            shared.link = Some(Link {
                requests: req_tx,
                child,
            });
            shared.generation
        };

        info!(pid = ?pid, generation, command = %self.config.command, "Worker started");

        tokio::spawn(write_requests(stdin, req_rx));
        tokio::spawn(read_events(
            stdout,
            generation,
            Arc::clone(&self.shared),
            self.events.clone(),
        ));

        init_rx.await.unwrap_or(Err(ClientError::WorkerExited))
    }

    async fn teardown(&self) {
        let link = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.clear_transport();
            shared.fail_waiters();
            shared.link.take()
        };

        let Some(Link { requests, mut child }) = link else {
            return;
        };

        let _ = requests.send(WorkerRequest::Shutdown).await;
        // Closing the channel ends the writer, which closes the worker's stdin.
        drop(requests);

        match tokio::time::timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "Worker exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for worker"),
            Err(_) => {
                warn!(
                    grace_secs = self.config.shutdown_grace.as_secs(),
                    "Worker ignored shutdown, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill worker");
                }
            }
        }
    }

    async fn send_message(&self, chat: &ChatId, body: &str) -> Result<MessageId, ClientError> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        let requests = {
            let mut shared = lock(&self.shared);
            let Some(link) = shared.link.as_ref() else {
                return Err(ClientError::NotConnected);
            };
            let requests = link.requests.clone();
            shared.pending.insert(id, tx);
            requests
        };

        let request = WorkerRequest::Send {
            id,
            chat_id: chat.clone(),
            body: body.to_string(),
        };
        if requests.send(request).await.is_err() {
            lock(&self.shared).pending.remove(&id);
            return Err(ClientError::WorkerExited);
        }

        match tokio::time::timeout(SEND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::WorkerExited),
            Err(_) => {
                lock(&self.shared).pending.remove(&id);
                Err(ClientError::Send(format!(
                    "no reply from worker within {}s",
                    SEND_TIMEOUT.as_secs()
                )))
            }
        }
    }

    fn probe(&self) -> TransportProbe {
        match self.shared.lock() {
            Ok(shared) => TransportProbe {
                transport: shared.link.is_some() && shared.launched,
                identity: shared.identity.clone(),
            },
            Err(_) => TransportProbe::default(),
        }
    }
}

// ============================================================================
// Worker I/O Tasks
// ============================================================================

async fn write_requests(mut stdin: ChildStdin, mut requests: mpsc::Receiver<WorkerRequest>) {
    while let Some(request) = requests.recv().await {
        let line = match request.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode worker request");
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write to worker");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(error = %e, "Failed to flush worker stdin");
            break;
        }
    }
    debug!("Worker request writer stopped");
}

async fn read_events(
    stdout: ChildStdout,
    generation: u64,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(event)) => {
                    if let Some(forward) = route(event, generation, &shared) {
                        let _ = events.send(forward).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Ignoring malformed worker output"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read worker output");
                break;
            }
        }
    }

    let report_disconnect = {
        let mut shared = lock(&shared);
        if shared.generation != generation {
            // Replaced or torn down on purpose.
            false
        } else {
            let was_connected = shared.init.is_none();
            shared.fail_waiters();
            shared.clear_transport();
            shared.link = None;
            was_connected
        }
    };

    if report_disconnect {
        warn!(generation, "Worker exited unexpectedly");
        let _ = events
            .send(ClientEvent::Disconnected {
                reason: "worker exited".to_string(),
            })
            .await;
    }
}

/// Applies one worker line to the shared state. Returns the lifecycle
/// event to forward, if any.
fn route(event: WorkerEvent, generation: u64, shared: &Mutex<Shared>) -> Option<ClientEvent> {
    let mut shared = lock(shared);
    if shared.generation != generation {
        debug!(generation, "Dropping output from a replaced worker");
        return None;
    }

    match event {
        WorkerEvent::Initialized => {
            if let Some(tx) = shared.init.take() {
                let _ = tx.send(Ok(()));
            }
            None
        }
        WorkerEvent::InitError { message } => {
            if let Some(tx) = shared.init.take() {
                let _ = tx.send(Err(ClientError::Init(message)));
            }
            None
        }
        WorkerEvent::Reply {
            id,
            ok,
            message_id,
            error,
        } => {
            match shared.pending.remove(&id) {
                Some(tx) => {
                    let result = if ok {
                        Ok(message_id.unwrap_or_default())
                    } else {
                        Err(ClientError::Send(
                            error.unwrap_or_else(|| "worker rejected the message".to_string()),
                        ))
                    };
                    let _ = tx.send(result);
                }
                None => debug!(id, "Reply for unknown request"),
            }
            None
        }
        other => {
            match &other {
                WorkerEvent::Launched => shared.launched = true,
                WorkerEvent::Ready { info } => {
                    shared.launched = true;
                    shared.identity = Some(info.clone());
                }
                WorkerEvent::Disconnected { .. } => shared.clear_transport(),
                _ => {}
            }
            other.into_client_event()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(script: &str) -> (SidecarClient, mpsc::Receiver<ClientEvent>) {
        let config = WorkerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            shutdown_grace: Duration::from_secs(2),
            ..Default::default()
        };
        SidecarClient::new(config, &AuthConfig::default())
    }

    const LAUNCHED: &str = r#"{"type":"launched"}"#;
    const INITIALIZED: &str = r#"{"type":"initialized"}"#;
    const READY: &str = r#"{"type":"ready","info":{"wid":"15551234567@c.us","lastConnect":"2024-05-01T10:00:00Z"}}"#;

    #[tokio::test]
    async fn test_connect_resolves_on_initialized() {
        let script = format!("printf '%s\\n' '{LAUNCHED}' '{INITIALIZED}'; cat >/dev/null");
        let (client, mut rx) = client(&script);

        client.connect().await.unwrap();
        assert!(client.probe().transport);
        assert_eq!(rx.recv().await, Some(ClientEvent::Connected));

        client.teardown().await;
        assert_eq!(client.probe(), TransportProbe::default());
    }

    #[tokio::test]
    async fn test_init_error_fails_connect() {
        let script = r#"echo '{"type":"init_error","message":"Execution context was destroyed"}'; cat >/dev/null"#;
        let (client, _rx) = client(script);

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "Execution context was destroyed");
        client.teardown().await;
    }

    #[tokio::test]
    async fn test_worker_exit_before_initialized() {
        let (client, _rx) = client("exit 0");
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::WorkerExited));
        assert!(err.to_string().contains("Session closed"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = WorkerConfig {
            command: "/nonexistent/wagate-worker".to_string(),
            args: Vec::new(),
            ..Default::default()
        };
        let (client, _rx) = SidecarClient::new(config, &AuthConfig::default());
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_ready_and_send_round_trip() {
        let script = format!(
            "printf '%s\\n' '{LAUNCHED}' '{READY}' '{INITIALIZED}'; \
             read line; \
             echo '{{\"type\":\"reply\",\"id\":1,\"ok\":true,\"message_id\":\"ABC\"}}'; \
             cat >/dev/null"
        );
        let (client, _rx) = client(&script);
        client.connect().await.unwrap();

        let probe = client.probe();
        assert!(probe.transport);
        assert_eq!(probe.identity.unwrap().wid, "15551234567@c.us");

        let chat = ChatId::from_number("15551234567").unwrap();
        let id = client.send_message(&chat, "hi").await.unwrap();
        assert_eq!(id, "ABC");

        client.teardown().await;
    }

    #[tokio::test]
    async fn test_unexpected_exit_reports_disconnect() {
        let script = format!("printf '%s\\n' '{LAUNCHED}' '{INITIALIZED}'; exit 0");
        let (client, mut rx) = client(&script);
        client.connect().await.unwrap();

        assert_eq!(rx.recv().await, Some(ClientEvent::Connected));
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::Disconnected {
                reason: "worker exited".to_string()
            })
        );
        assert!(!client.probe().transport);
    }

    #[tokio::test]
    async fn test_send_without_worker() {
        let (client, _rx) = client("exit 0");
        let chat = ChatId::from_number("1").unwrap();
        assert!(matches!(
            client.send_message(&chat, "hi").await,
            Err(ClientError::NotConnected)
        ));
    }
}

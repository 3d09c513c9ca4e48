//! Fake session client for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use wagate_core::{ClientEvent, ClientInfo, TransportProbe};
use wagate_protocol::ChatId;

use super::{ClientError, MessageId, SessionClient, EVENT_BUFFER};

/// Recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Connect,
    Teardown,
    Send { chat_id: String, body: String },
}

/// How the next `connect()` behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectScript {
    /// Resolve successfully.
    Succeed,
    /// Fail with this message.
    Fail(String),
    /// Stay pending until the client is torn down, then fail with
    /// `WorkerExited` (a dead worker pipe does the same).
    Hang,
}

struct FakeState {
    calls: Vec<ClientCall>,
    scripts: VecDeque<ConnectScript>,
    default_script: ConnectScript,
    on_connect: Vec<ClientEvent>,
    transport: bool,
    identity: Option<ClientInfo>,
    send_result: Result<MessageId, ClientError>,
}

/// Scriptable in-memory client.
#[derive(Clone)]
pub struct FakeSessionClient {
    inner: Arc<Mutex<FakeState>>,
    events: mpsc::Sender<ClientEvent>,
    /// Bumped by every teardown; wakes hanging connects.
    teardowns: Arc<watch::Sender<u64>>,
}

impl FakeSessionClient {
    /// Creates the client and the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let client = Self {
            inner: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                scripts: VecDeque::new(),
                default_script: ConnectScript::Succeed,
                on_connect: Vec::new(),
                transport: false,
                identity: None,
                send_result: Ok("true_15551234567@c.us_FAKE".to_string()),
            })),
            events,
            teardowns: Arc::new(watch::Sender::new(0)),
        };
        (client, rx)
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.state().calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|c| matches!(c, ClientCall::Connect))
    }

    pub fn teardown_count(&self) -> usize {
        self.count(|c| matches!(c, ClientCall::Teardown))
    }

    pub fn send_count(&self) -> usize {
        self.count(|c| matches!(c, ClientCall::Send { .. }))
    }

    fn count(&self, pred: impl Fn(&ClientCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Queues the behaviour of the next `connect()`.
    pub fn push_connect(&self, script: ConnectScript) {
        self.state().scripts.push_back(script);
    }

    /// Behaviour once the queue is empty.
    pub fn set_default_connect(&self, script: ConnectScript) {
        self.state().default_script = script;
    }

    /// Events emitted during every `connect()`, before it resolves.
    pub fn emit_on_connect(&self, events: Vec<ClientEvent>) {
        self.state().on_connect = events;
    }

    pub fn set_send_result(&self, result: Result<MessageId, ClientError>) {
        self.state().send_result = result;
    }

    pub fn set_transport(&self, alive: bool) {
        self.state().transport = alive;
    }

    /// Applies `event` to the fake transport and delivers it.
    pub async fn emit(&self, event: ClientEvent) {
        self.apply(&event);
        let _ = self.events.send(event).await;
    }

    fn apply(&self, event: &ClientEvent) {
        let mut state = self.state();
        match event {
            ClientEvent::Connected => state.transport = true,
            ClientEvent::Ready(info) => {
                state.transport = true;
                state.identity = Some(info.clone());
            }
            ClientEvent::Disconnected { .. } => {
                state.transport = false;
                state.identity = None;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl SessionClient for FakeSessionClient {
    async fn connect(&self) -> Result<(), ClientError> {
        // Subscribed before any event goes out, so a teardown triggered by
        // those events is not missed.
        let mut torn_down = self.teardowns.subscribe();
        let (script, on_connect) = {
            let mut state = self.state();
            state.calls.push(ClientCall::Connect);
            state.transport = true;
            let script = state
                .scripts
                .pop_front()
                .unwrap_or_else(|| state.default_script.clone());
            (script, state.on_connect.clone())
        };

        for event in on_connect {
            self.emit(event).await;
        }

        match script {
            ConnectScript::Succeed => Ok(()),
            ConnectScript::Fail(message) => {
                self.state().transport = false;
                Err(ClientError::Init(message))
            }
            ConnectScript::Hang => {
                let _ = torn_down.changed().await;
                Err(ClientError::WorkerExited)
            }
        }
    }

    async fn teardown(&self) {
        {
            let mut state = self.state();
            state.calls.push(ClientCall::Teardown);
            state.transport = false;
            state.identity = None;
        }
        self.teardowns.send_modify(|count| *count += 1);
    }

    async fn send_message(&self, chat: &ChatId, body: &str) -> Result<MessageId, ClientError> {
        let mut state = self.state();
        state.calls.push(ClientCall::Send {
            chat_id: chat.to_string(),
            body: body.to_string(),
        });
        state.send_result.clone()
    }

    fn probe(&self) -> TransportProbe {
        let state = self.state();
        TransportProbe {
            transport: state.transport,
            identity: state.identity.clone(),
        }
    }
}

/// Identity used by tests that need a ready session.
pub fn test_identity() -> ClientInfo {
    ClientInfo {
        wid: "15550000000@c.us".to_string(),
        pushname: Some("wagate-test".to_string()),
        platform: Some("android".to_string()),
        last_connect: chrono::Utc::now(),
    }
}

//! Ready-gated message sending.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use wagate_core::{FailureClass, ReadinessView, SessionState};
use wagate_protocol::ChatId;

use crate::client::{ClientError, MessageId, SessionClient};
use crate::lifecycle::LifecycleHandle;

/// Errors from [`GatedSender::send`].
#[derive(Debug, Error)]
pub enum SendError {
    /// The number has no digits and is not a chat id.
    #[error("invalid phone number: {0:?}")]
    InvalidNumber(String),

    /// The session is not usable right now. Retryable.
    #[error("WhatsApp client is not fully connected")]
    NotReady {
        view: Box<ReadinessView>,
        state: Box<SessionState>,
    },

    /// The client rejected the send.
    #[error("failed to send message: {0}")]
    Failed(#[source] ClientError),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Sends only through a ready session.
///
/// A failure that looks like a dead transport asks the lifecycle manager
/// for a clean reconnect before the error is returned.
#[derive(Clone)]
pub struct GatedSender {
    client: Arc<dyn SessionClient>,
    lifecycle: LifecycleHandle,
}

impl GatedSender {
    pub fn new(client: Arc<dyn SessionClient>, lifecycle: LifecycleHandle) -> Self {
        Self { client, lifecycle }
    }

    pub async fn send(&self, number: &str, body: &str) -> Result<MessageId, SendError> {
        let chat = ChatId::from_number(number)
            .ok_or_else(|| SendError::InvalidNumber(number.to_string()))?;

        let view = self.lifecycle.readiness().query();
        if !view.is_ready {
            warn!(
                phase = %view.phase,
                verdict = ?view.verdict,
                "Rejecting send, session not ready"
            );
            return Err(SendError::NotReady {
                view: Box::new(view),
                state: Box::new(self.lifecycle.snapshot()),
            });
        }

        match self.client.send_message(&chat, body).await {
            Ok(id) => {
                info!(to = %chat, message_id = %id, "Message sent");
                Ok(id)
            }
            Err(e) => {
                let text = e.to_string();
                warn!(to = %chat, error = %text, "Send failed");
                if FailureClass::indicates_transport_problem(&text) {
                    self.lifecycle.report_transport_problem(text);
                }
                Err(SendError::Failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{test_identity, ClientCall, FakeSessionClient};
    use crate::config::Config;
    use crate::lifecycle::spawn_lifecycle;
    use std::time::Duration;
    use tempfile::TempDir;
    use wagate_core::{ClientEvent, Phase};

    async fn ready_sender(dir: &TempDir) -> (GatedSender, FakeSessionClient, LifecycleHandle) {
        let mut config = Config::default();
        config.auth.dir = dir.path().join("auth");
        let (client, events) = FakeSessionClient::new();
        let shared: Arc<dyn SessionClient> = Arc::new(client.clone());
        let handle = spawn_lifecycle(&config, Arc::clone(&shared), events);

        handle.request_initialize().await.unwrap();
        client.emit(ClientEvent::Ready(test_identity())).await;
        let mut state = handle.watch_state();
        state.wait_for(|s| s.phase == Phase::Ready).await.unwrap();

        (GatedSender::new(shared, handle.clone()), client, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_fails_fast_without_calling_client() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            auth: crate::config::AuthConfig {
                dir: dir.path().join("auth"),
                ..Default::default()
            },
            ..Default::default()
        };
        let (client, events) = FakeSessionClient::new();
        let shared: Arc<dyn SessionClient> = Arc::new(client.clone());
        let handle = spawn_lifecycle(&config, Arc::clone(&shared), events);
        let sender = GatedSender::new(shared, handle);

        let err = sender.send("15551234567", "hi").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_session_delegates() {
        let dir = TempDir::new().unwrap();
        let (sender, client, _handle) = ready_sender(&dir).await;

        let id = sender.send("+1 (555) 123-4567", "hi").await.unwrap();
        assert!(!id.is_empty());
        assert!(client.calls().contains(&ClientCall::Send {
            chat_id: "15551234567@c.us".into(),
            body: "hi".into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_number_rejected() {
        let dir = TempDir::new().unwrap();
        let (sender, client, _handle) = ready_sender(&dir).await;

        let err = sender.send("abc", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::InvalidNumber(_)));
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_forces_reconnect() {
        let dir = TempDir::new().unwrap();
        let (sender, client, handle) = ready_sender(&dir).await;
        client.set_send_result(Err(ClientError::Send(
            "Protocol error (Runtime.callFunctionOn): Session closed.".into(),
        )));

        let err = sender.send("15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::Failed(_)));

        let mut state = handle.watch_state();
        state
            .wait_for(|s| s.phase == Phase::Disconnected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.teardown_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordinary_failure_keeps_session() {
        let dir = TempDir::new().unwrap();
        let (sender, client, handle) = ready_sender(&dir).await;
        client.set_send_result(Err(ClientError::Send("chat not found".into())));

        sender.send("15551234567", "hi").await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.phase(), Phase::Ready);
        assert_eq!(client.teardown_count(), 0);
    }
}

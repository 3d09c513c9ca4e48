//! One initialization attempt: credential check, reap, settle, connect.
//!
//! Runs on its own task so client events emitted during `connect()` are
//! handled by the actor while the call is still pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, info, warn};

use wagate_core::{ErrorKind, ErrorRecord};

use super::commands::LifecycleEvent;
use crate::auth_store::AuthStore;
use crate::client::SessionClient;
use crate::reaper::Reaper;

/// Everything an attempt needs, cloned out of the actor.
#[derive(Clone)]
pub(crate) struct AttemptContext {
    pub client: Arc<dyn SessionClient>,
    pub auth_store: AuthStore,
    pub reaper: Reaper,
    pub settle_delay: Duration,
    pub init_timeout: Duration,
    pub events: broadcast::Sender<LifecycleEvent>,
}

/// Runs the sequence and returns once the connect call settles.
///
/// A failed or timed-out connect tears the transport down before
/// returning, so the next attempt starts from a clean worker.
pub(crate) async fn run_attempt(ctx: AttemptContext, purge_auth: bool) -> Result<(), ErrorRecord> {
    let store = ctx.auth_store.clone();
    match task::spawn_blocking(move || store.prepare(purge_auth)).await {
        Ok(Ok(report)) => {
            debug!(?report, "Credential directory prepared");
            let _ = ctx.events.send(LifecycleEvent::CredentialsChecked { report });
        }
        Ok(Err(e)) => return Err(ErrorRecord::new(ErrorKind::Other, e.to_string())),
        Err(e) => warn!(error = %e, "Credential check task failed, continuing"),
    }

    let report = ctx.reaper.reap().await;
    let _ = ctx.events.send(LifecycleEvent::WorkersReaped { report });

    // Killed browsers need a moment to hand their memory back.
    if !ctx.settle_delay.is_zero() {
        tokio::time::sleep(ctx.settle_delay).await;
    }

    match tokio::time::timeout(ctx.init_timeout, ctx.client.connect()).await {
        Ok(Ok(())) => {
            info!("Client initialization completed");
            Ok(())
        }
        Ok(Err(e)) => {
            ctx.client.teardown().await;
            Err(ErrorRecord::classified(e.to_string()))
        }
        Err(_) => {
            ctx.client.teardown().await;
            Err(ErrorRecord::new(
                ErrorKind::InitTimeout,
                format!(
                    "Initialization timed out after {}",
                    humantime::format_duration(ctx.init_timeout)
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientCall, ConnectScript, FakeSessionClient};
    use crate::config::AuthConfig;
    use tempfile::TempDir;

    fn context(client: &FakeSessionClient, dir: &TempDir) -> AttemptContext {
        AttemptContext {
            client: Arc::new(client.clone()),
            auth_store: AuthStore::new(&AuthConfig {
                dir: dir.path().join("auth"),
                ..Default::default()
            }),
            reaper: Reaper::disabled(),
            settle_delay: Duration::from_secs(3),
            init_timeout: Duration::from_secs(300),
            events: broadcast::channel(16).0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_prepares_directory() {
        let dir = TempDir::new().unwrap();
        let (client, _rx) = FakeSessionClient::new();
        let ctx = context(&client, &dir);

        run_attempt(ctx, false).await.unwrap();
        assert!(dir.path().join("auth").is_dir());
        assert_eq!(client.calls(), vec![ClientCall::Connect]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_is_classified_and_torn_down() {
        let dir = TempDir::new().unwrap();
        let (client, _rx) = FakeSessionClient::new();
        client.push_connect(ConnectScript::Fail(
            "Protocol error (Page.navigate): Session closed.".into(),
        ));

        let err = run_attempt(context(&client, &dir), false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionClosed);
        assert_eq!(client.calls(), vec![ClientCall::Connect, ClientCall::Teardown]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_init_timeout() {
        let dir = TempDir::new().unwrap();
        let (client, _rx) = FakeSessionClient::new();
        client.push_connect(ConnectScript::Hang);

        let err = run_attempt(context(&client, &dir), false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitTimeout);
        assert!(err.message.contains("5m"));
        assert_eq!(client.teardown_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_flag_clears_credentials() {
        let dir = TempDir::new().unwrap();
        let session = dir.path().join("auth/session-whatsapp-bot/Default");
        std::fs::create_dir_all(&session).unwrap();
        let (client, _rx) = FakeSessionClient::new();

        run_attempt(context(&client, &dir), true).await.unwrap();
        assert!(!session.exists());
    }
}

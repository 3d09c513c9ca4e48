//! Lifecycle actor - sole owner of the session state.
//!
//! The actor multiplexes three inputs: commands from handles, events from
//! the session client, and internal timer/task completions. Every state
//! mutation happens on its task; a cloned snapshot is published on a watch
//! channel after each one so readers never wait on the actor.
//!
//! Initialization attempts run on their own tasks and report back through
//! the internal channel, so client events emitted while `connect()` is
//! still pending (QR challenges, authentication) are processed immediately.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A panicking attempt task is caught through its `JoinHandle` and
//!   recorded as a failure; the in-flight flag is released by its permit
//! - Channel send failures are ignored (the receiver went away)

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use wagate_core::{
    ClientEvent, ClientInfo, ErrorKind, ErrorRecord, FailureClass, Phase, RetryDecision,
    RetryPolicy, SessionState, STATUS_BROADCAST,
};

use super::attempt::{run_attempt, AttemptContext};
use super::commands::{InitOutcome, LifecycleCommand, LifecycleError, LifecycleEvent};
use super::guard::{InitGuard, InitPermit};
use crate::auth_store::AuthStore;
use crate::client::SessionClient;
use crate::config::Config;
use crate::reaper::Reaper;
use crate::watchdog::Watchdog;

/// Longest message body written to the log.
const LOG_BODY_CHARS: usize = 120;

/// Width of the framed QR block printed in production.
const QR_FRAME_WIDTH: usize = 80;

// ============================================================================
// Internal Messages
// ============================================================================

/// Completions delivered back to the actor by its own tasks.
enum Internal {
    AttemptSettled {
        result: Result<(), ErrorRecord>,
        permit: InitPermit,
        respond_to: Option<oneshot::Sender<InitOutcome>>,
    },
    RetryDue {
        ticket: u64,
    },
    WatchdogFired {
        generation: u64,
    },
    CleanDone {
        result: Result<(), LifecycleError>,
        respond_to: Option<oneshot::Sender<Result<(), LifecycleError>>>,
    },
}

/// The single scheduled retry.
struct PendingRetry {
    ticket: u64,
    purge_auth: bool,
    task: JoinHandle<()>,
    /// The timer expired while an attempt was running.
    fired: bool,
}

// ============================================================================
// Lifecycle Actor
// ============================================================================

/// The lifecycle actor.
///
/// # Ownership
///
/// - `state`: the authoritative [`SessionState`]
/// - `guard`: the in-flight flag shared with attempt tasks via permits
/// - `watchdog` and `pending_retry`: the only two timers
pub struct LifecycleActor {
    receiver: mpsc::Receiver<LifecycleCommand>,
    client_events: mpsc::Receiver<ClientEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    event_publisher: broadcast::Sender<LifecycleEvent>,

    attempt: AttemptContext,
    policy: RetryPolicy,
    guard: InitGuard,
    watchdog: Watchdog,
    pending_retry: Option<PendingRetry>,
    next_ticket: u64,
    /// A forced clean is tearing things down.
    cleaning: bool,
    print_qr: bool,
    /// Ordered writes of the saved login challenge (`None` clears it).
    qr_file: mpsc::UnboundedSender<Option<String>>,
}

impl LifecycleActor {
    pub(crate) fn new(
        config: &Config,
        client: Arc<dyn SessionClient>,
        receiver: mpsc::Receiver<LifecycleCommand>,
        client_events: mpsc::Receiver<ClientEvent>,
        state_tx: watch::Sender<SessionState>,
        event_publisher: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let state = state_tx.borrow().clone();
        let auth_store = AuthStore::new(&config.auth);
        let qr_file = spawn_qr_writer(auth_store.clone());
        let attempt_events = event_publisher.clone();

        Self {
            receiver,
            client_events,
            internal_tx,
            internal_rx,
            state,
            state_tx,
            event_publisher,
            attempt: AttemptContext {
                client,
                auth_store,
                reaper: Reaper::new(&config.reaper, config.reaper_enabled()),
                settle_delay: config.lifecycle.settle_delay,
                init_timeout: config.lifecycle.init_timeout,
                events: attempt_events,
            },
            policy: config.retry.clone(),
            guard: InitGuard::new(),
            watchdog: Watchdog::new(config.lifecycle.watchdog_timeout),
            pending_retry: None,
            next_ticket: 0,
            cleaning: false,
            print_qr: config.environment.is_production(),
            qr_file,
        }
    }

    /// Runs the actor until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            max_attempts = self.state.max_attempts,
            "Lifecycle actor starting"
        );
        let mut events_open = true;

        loop {
            // Client events first: an attempt's own events must be applied
            // before its settlement.
            tokio::select! {
                biased;

                event = self.client_events.recv(), if events_open => match event {
                    Some(event) => self.handle_client_event(event),
                    None => {
                        debug!("Client event stream closed");
                        events_open = false;
                    }
                },
                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg),
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }

        self.watchdog.cancel();
        self.cancel_pending_retry();
        info!(phase = %self.state.phase, "Lifecycle actor stopped");
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, cmd: LifecycleCommand) {
        match cmd {
            LifecycleCommand::RequestInitialize { respond_to } => {
                self.start_attempt(Some(respond_to), false);
            }
            LifecycleCommand::ForceClean { respond_to } => {
                self.force_clean(Some(respond_to), "manual reconnect requested");
            }
            LifecycleCommand::ReportTransportProblem { error } => {
                if self.cleaning || self.guard.is_held() || self.pending_retry.is_some() {
                    debug!(error = %error, "Transport problem reported while recovery is underway");
                    return;
                }
                warn!(error = %error, "Send failed on a dead transport, forcing reconnect");
                self.force_clean(None, "transport problem during send");
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::AttemptSettled {
                result,
                permit,
                respond_to,
            } => self.on_attempt_settled(result, permit, respond_to),
            Internal::RetryDue { ticket } => self.on_retry_due(ticket),
            Internal::WatchdogFired { generation } => self.on_watchdog_fired(generation),
            Internal::CleanDone { result, respond_to } => self.on_clean_done(result, respond_to),
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        debug!(event = event.name(), phase = %self.state.phase, "Client event");

        match event {
            ClientEvent::Connected => debug!("Session worker launched"),
            ClientEvent::QrChallenge(code) => self.on_qr(code),
            ClientEvent::Authenticated => match self.state.phase {
                Phase::Authenticated | Phase::Ready => {
                    debug!("Duplicate authenticated notification");
                }
                _ => {
                    if self.transition(Phase::Authenticated) {
                        info!("Client authenticated successfully");
                    }
                }
            },
            ClientEvent::Ready(info) => self.on_ready(info),
            ClientEvent::Disconnected { reason } => self.on_disconnected(reason),
            ClientEvent::AuthFailed { message } => self.on_auth_failed(message),
            ClientEvent::MessageReceived { from, body } => self.on_message(from, body),
        }
    }

    // ------------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------------

    fn start_attempt(&mut self, respond_to: Option<oneshot::Sender<InitOutcome>>, purge_auth: bool) {
        if self.cleaning || self.guard.is_held() {
            debug!("Initialization already in progress");
            reply(respond_to, InitOutcome::AlreadyInProgress);
            return;
        }

        let phase = self.state.phase;
        if !phase.accepts_initialize() {
            debug!(phase = %phase, "Session already active, not initializing");
            reply(respond_to, InitOutcome::AlreadyActive { phase });
            return;
        }

        if !self.state.has_budget() {
            warn!(
                attempts = self.state.attempt_count,
                "Attempt budget exhausted; waiting for a manual reconnect"
            );
            reply(
                respond_to,
                InitOutcome::BudgetExhausted {
                    attempts: self.state.attempt_count,
                },
            );
            return;
        }

        let Some(permit) = self.guard.try_acquire() else {
            reply(respond_to, InitOutcome::AlreadyInProgress);
            return;
        };

        self.cancel_pending_retry();
        self.state.attempt_count += 1;
        if !self.transition(Phase::Initializing) {
            self.state.attempt_count -= 1;
            drop(permit);
            self.publish();
            reply(respond_to, InitOutcome::AlreadyActive { phase });
            return;
        }

        info!(
            attempt = self.state.attempt_count,
            max_attempts = self.state.max_attempts,
            purge_auth,
            "Initialization attempt starting"
        );

        let ctx = self.attempt.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::spawn(run_attempt(ctx, purge_auth)).await {
                Ok(result) => result,
                Err(e) => Err(ErrorRecord::new(
                    ErrorKind::Other,
                    format!("initialization task aborted: {e}"),
                )),
            };
            let _ = internal.send(Internal::AttemptSettled {
                result,
                permit,
                respond_to,
            });
        });
    }

    fn on_attempt_settled(
        &mut self,
        result: Result<(), ErrorRecord>,
        permit: InitPermit,
        respond_to: Option<oneshot::Sender<InitOutcome>>,
    ) {
        drop(permit);

        let outcome = match result {
            Ok(()) => {
                debug!(phase = %self.state.phase, "Initialization call settled");
                InitOutcome::Connected
            }
            Err(record) => {
                self.handle_failure(record.clone());
                InitOutcome::Failed(record)
            }
        };
        self.publish();
        reply(respond_to, outcome);

        if self.pending_retry.as_ref().is_some_and(|p| p.fired) {
            self.fire_pending_retry();
        }
    }

    /// Records a failure and asks the policy what to do next.
    fn handle_failure(&mut self, record: ErrorRecord) {
        let class = record.failure_class();

        if self.state.phase == Phase::Failed {
            if self.policy.is_exhausted(self.state.attempt_count) {
                debug!(error = %record.message, "Already failed with the budget spent");
                return;
            }
            debug!(error = %record.message, "Already failed, ensuring a retry is scheduled");
            self.schedule_retry(class);
            return;
        }
        if !self.state.phase.can_transition_to(Phase::Failed) {
            warn!(
                phase = %self.state.phase,
                error = %record.message,
                "Ignoring failure outside an attempt"
            );
            return;
        }

        warn!(
            kind = %record.kind,
            class = class.label(),
            attempt = self.state.attempt_count,
            error = %record.message,
            "Initialization failed"
        );
        self.state.last_error = Some(record);
        self.transition(Phase::Failed);
        self.schedule_retry(class);
    }

    /// Fails a session whose transport may still be up.
    ///
    /// Tearing down also settles a pending connect, so the attempt releases
    /// the in-flight flag and the scheduled retry can run.
    fn fail_live_session(&mut self, record: ErrorRecord) {
        if self.state.phase.is_live() {
            self.spawn_teardown();
        }
        self.handle_failure(record);
    }

    fn spawn_teardown(&self) {
        let client = Arc::clone(&self.attempt.client);
        tokio::spawn(async move { client.teardown().await });
    }

    // ------------------------------------------------------------------------
    // Retries
    // ------------------------------------------------------------------------

    fn schedule_retry(&mut self, class: FailureClass) {
        if self.cleaning {
            debug!("Forced clean in progress, it schedules the next attempt");
            return;
        }
        if self.pending_retry.is_some() {
            debug!("Retry already scheduled");
            return;
        }

        let attempts = self.state.attempt_count;
        match self.policy.decide(class, attempts) {
            RetryDecision::Retry { delay, purge_auth } => {
                self.arm_retry(delay, purge_auth);
                info!(
                    delay = %humantime::format_duration(delay),
                    class = class.label(),
                    attempt = attempts,
                    max_attempts = self.state.max_attempts,
                    purge_auth,
                    "Retry scheduled"
                );
                let _ = self.event_publisher.send(LifecycleEvent::RetryScheduled {
                    delay,
                    class,
                    purge_auth,
                });
            }
            RetryDecision::GiveUp => {
                error!(
                    attempts,
                    "Maximum retries exceeded. Waiting for a manual reconnect."
                );
                let _ = self
                    .event_publisher
                    .send(LifecycleEvent::GaveUp { attempts });
            }
        }
        self.publish();
    }

    fn arm_retry(&mut self, delay: Duration, purge_auth: bool) {
        self.cancel_pending_retry();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let internal = self.internal_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::RetryDue { ticket });
        });
        self.pending_retry = Some(PendingRetry {
            ticket,
            purge_auth,
            task,
            fired: false,
        });
    }

    fn cancel_pending_retry(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            pending.task.abort();
            debug!(ticket = pending.ticket, "Pending retry cancelled");
        }
    }

    fn on_retry_due(&mut self, ticket: u64) {
        let current = self
            .pending_retry
            .as_ref()
            .is_some_and(|p| p.ticket == ticket);
        if !current {
            debug!(ticket, "Ignoring stale retry timer");
            return;
        }

        if self.cleaning || self.guard.is_held() {
            if let Some(pending) = self.pending_retry.as_mut() {
                pending.fired = true;
            }
            debug!(ticket, "Retry due while an attempt is running, deferring");
            return;
        }
        self.fire_pending_retry();
    }

    fn fire_pending_retry(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            info!(purge_auth = pending.purge_auth, "Retrying initialization");
            self.start_attempt(None, pending.purge_auth);
            self.publish();
        }
    }

    // ------------------------------------------------------------------------
    // Forced clean
    // ------------------------------------------------------------------------

    fn force_clean(
        &mut self,
        respond_to: Option<oneshot::Sender<Result<(), LifecycleError>>>,
        reason: &str,
    ) {
        if self.cleaning {
            debug!("Forced clean already running");
            reply(respond_to, Ok(()));
            return;
        }

        info!(reason, "Forcing a clean reconnect");
        self.cancel_pending_retry();
        self.watchdog.cancel();
        self.state.attempt_count = 0;

        match self.state.phase {
            Phase::Authenticated | Phase::Ready => {
                self.state.last_error =
                    Some(ErrorRecord::new(ErrorKind::Disconnected, reason.to_string()));
                self.transition(Phase::Disconnected);
            }
            Phase::Initializing | Phase::AwaitingScan => {
                self.state.last_error =
                    Some(ErrorRecord::new(ErrorKind::Other, reason.to_string()));
                self.transition(Phase::Failed);
            }
            Phase::Idle | Phase::Disconnected | Phase::Failed => {}
        }
        self.cleaning = true;
        self.publish();

        let ctx = self.attempt.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            ctx.client.teardown().await;
            ctx.reaper.reap().await;

            let store = ctx.auth_store.clone();
            let result = match task::spawn_blocking(move || {
                let report = store.purge();
                store.ensure_dir().map(|_| report)
            })
            .await
            {
                Ok(Ok(report)) => {
                    info!(
                        removed = report.removed,
                        failed = report.failed,
                        "Credential directory cleared"
                    );
                    Ok(())
                }
                Ok(Err(e)) => Err(LifecycleError::CredentialDir(e.to_string())),
                Err(e) => Err(LifecycleError::CredentialDir(e.to_string())),
            };
            let _ = internal.send(Internal::CleanDone { result, respond_to });
        });
    }

    fn on_clean_done(
        &mut self,
        result: Result<(), LifecycleError>,
        respond_to: Option<oneshot::Sender<Result<(), LifecycleError>>>,
    ) {
        self.cleaning = false;

        match &result {
            Ok(()) => {
                let delay = self.policy.force_reconnect_delay;
                self.arm_retry(delay, false);
                info!(
                    delay = %humantime::format_duration(delay),
                    "Cleanup complete, fresh attempt scheduled"
                );
                let _ = self.event_publisher.send(LifecycleEvent::RetryScheduled {
                    delay,
                    class: FailureClass::Other,
                    purge_auth: false,
                });
            }
            Err(e) => error!(error = %e, "Forced clean failed"),
        }
        self.publish();
        reply(respond_to, result);
    }

    // ------------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------------

    fn on_qr(&mut self, code: String) {
        match self.state.phase {
            Phase::Initializing => {
                self.transition(Phase::AwaitingScan);
            }
            Phase::AwaitingScan => info!("QR code refreshed"),
            phase => {
                warn!(phase = %phase, "Dropping QR challenge outside initialization");
                return;
            }
        }

        self.state.last_qr_at = Some(chrono::Utc::now());
        self.publish();

        if self.print_qr {
            print_qr_block(&code);
        } else {
            info!(qr = %code, "QR code received, scan it with WhatsApp");
        }

        let _ = self.qr_file.send(Some(code.clone()));

        let _ = self
            .event_publisher
            .send(LifecycleEvent::QrChallenge { code });
    }

    fn on_ready(&mut self, info: ClientInfo) {
        let Some(path) = self.state.phase.path_to_ready() else {
            if self.state.phase == Phase::Ready {
                debug!("Duplicate ready notification");
                self.state.identity = Some(info);
                self.publish();
            } else {
                warn!(phase = %self.state.phase, "Dropping ready notification");
            }
            return;
        };

        for step in path {
            if !self.transition(*step) {
                return;
            }
        }

        self.cancel_pending_retry();
        info!(
            wid = %info.wid,
            pushname = info.pushname.as_deref().unwrap_or(""),
            "Client is ready and connected"
        );
        self.state.identity = Some(info);
        self.publish();

        let _ = self.qr_file.send(None);
    }

    fn on_disconnected(&mut self, reason: String) {
        match self.state.phase {
            Phase::Authenticated | Phase::Ready => {
                let class = FailureClass::classify(&reason);
                let kind = if class == FailureClass::AuthFailure {
                    ErrorKind::AuthRejected
                } else {
                    ErrorKind::Disconnected
                };
                warn!(reason = %reason, "Client disconnected");

                self.state.last_error = Some(ErrorRecord::new(kind, format!("disconnected: {reason}")));
                self.transition(Phase::Disconnected);
                self.spawn_teardown();
                self.schedule_retry(class);
            }
            Phase::Initializing | Phase::AwaitingScan => {
                self.fail_live_session(ErrorRecord::classified(format!(
                    "disconnected during initialization: {reason}"
                )));
            }
            phase => debug!(phase = %phase, reason = %reason, "Ignoring disconnect"),
        }
    }

    fn on_auth_failed(&mut self, message: String) {
        error!(message = %message, "Authentication failure, stored credentials will be purged");
        let record = ErrorRecord::new(ErrorKind::AuthRejected, message);

        if self.state.phase == Phase::Ready {
            self.state.last_error = Some(record);
            self.transition(Phase::Disconnected);
            self.spawn_teardown();
            self.schedule_retry(FailureClass::AuthFailure);
        } else {
            self.fail_live_session(record);
        }
    }

    fn on_message(&self, from: String, body: String) {
        if from == STATUS_BROADCAST {
            return;
        }
        info!(from = %from, body = %truncate(&body, LOG_BODY_CHARS), "Message received");
        let _ = self
            .event_publisher
            .send(LifecycleEvent::MessageReceived { from, body });
    }

    fn on_watchdog_fired(&mut self, generation: u64) {
        if !self.watchdog.accept_firing(generation) {
            return;
        }
        if self.state.phase != Phase::Authenticated {
            debug!(phase = %self.state.phase, "Watchdog fired outside authenticated");
            return;
        }

        let timeout = self.watchdog.timeout();
        warn!(
            timeout = %humantime::format_duration(timeout),
            "Session stuck between authenticated and ready, tearing down"
        );

        self.fail_live_session(ErrorRecord::new(
            ErrorKind::WatchdogStuck,
            format!(
                "not ready within {} of authentication",
                humantime::format_duration(timeout)
            ),
        ));
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Applies one edge of the phase graph. Returns false (and changes
    /// nothing) for an illegal edge.
    fn transition(&mut self, next: Phase) -> bool {
        let dwell_secs = self.state.phase_age_secs();
        let from = match self.state.enter(next) {
            Ok(from) => from,
            Err(e) => {
                warn!(error = %e, "Dropping transition with no edge");
                return false;
            }
        };

        if from == Phase::Authenticated {
            self.watchdog.cancel();
        }
        if next == Phase::Authenticated {
            self.watchdog
                .arm(self.internal_tx.clone(), |generation| Internal::WatchdogFired {
                    generation,
                });
        }

        info!(from = %from, to = %next, dwell_secs, "Phase changed");
        let _ = self.event_publisher.send(LifecycleEvent::PhaseChanged {
            from,
            to: next,
            at: self.state.phase_entered_at,
        });
        self.publish();
        true
    }

    fn publish(&mut self) {
        self.state.in_flight = self.guard.is_held() || self.cleaning;
        self.state.retry_pending = self.pending_retry.is_some();
        self.state_tx.send_replace(self.state.clone());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn reply<T>(respond_to: Option<oneshot::Sender<T>>, value: T) {
    if let Some(tx) = respond_to {
        // Ignore send error - caller may have given up waiting
        let _ = tx.send(value);
    }
}

/// Applies QR file updates one at a time so a clear never overtakes the
/// write it follows.
fn spawn_qr_writer(store: AuthStore) -> mpsc::UnboundedSender<Option<String>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let store = store.clone();
            let _ = task::spawn_blocking(move || match update {
                Some(code) => store.write_qr(&code),
                None => store.clear_qr(),
            })
            .await;
        }
    });
    tx
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", text.get(..end).unwrap_or(text)),
        None => text.to_string(),
    }
}

fn print_qr_block(code: &str) {
    let rule = "=".repeat(QR_FRAME_WIDTH);
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "WHATSAPP QR CODE - scan with the WhatsApp app");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{code}");
    let _ = writeln!(out, "{rule}\n");
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_reply_without_receiver_is_silent() {
        let (tx, rx) = oneshot::channel::<u8>();
        drop(rx);
        reply(Some(tx), 1);
        reply::<u8>(None, 2);
    }
}

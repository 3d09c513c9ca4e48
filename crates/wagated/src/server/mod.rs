//! HTTP facade for the gateway.
//!
//! Every route is served twice, at the root and under `/api`, so older
//! integrations keep working.
//!
//! ```text
//! GET  /                  banner
//! GET  /health            liveness + session summary
//! GET  /status            connection status
//! GET  /qr                latest login challenge (text/plain)
//! POST /force-reconnect   clean reconnect
//! POST /send-message      {number, message}
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler failures become JSON error bodies, never stack traces

mod routes;

use std::io;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wagate_protocol::MemoryUsage;

use crate::config::Environment;
use crate::lifecycle::LifecycleHandle;
use crate::sender::GatedSender;

/// Errors from binding or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[from] io::Error),
}

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    lifecycle: LifecycleHandle,
    sender: GatedSender,
    environment: Environment,
    started_at: Instant,
    memory: Option<watch::Receiver<Option<MemoryUsage>>>,
}

impl AppState {
    pub fn new(lifecycle: LifecycleHandle, sender: GatedSender, environment: Environment) -> Self {
        Self {
            lifecycle,
            sender,
            environment,
            started_at: Instant::now(),
            memory: None,
        }
    }

    /// Reports the monitor's latest sample in `/health`.
    #[must_use]
    pub fn with_memory(mut self, memory: watch::Receiver<Option<MemoryUsage>>) -> Self {
        self.memory = Some(memory);
        self
    }

    fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn memory(&self) -> Option<MemoryUsage> {
        self.memory.as_ref().and_then(|rx| *rx.borrow())
    }
}

/// Builds the router with every route mounted at `/` and `/api`.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(routes::banner))
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/qr", get(routes::qr))
        .route("/force-reconnect", post(routes::force_reconnect))
        .route("/send-message", post(routes::send_message));

    Router::new()
        .nest("/api", routes.clone())
        .merge(routes)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Binds the listener.
///
/// # Errors
///
/// Returns `ServerError::Bind` if the address is unavailable.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Serves until `cancel_token` is cancelled, then drains in-flight requests.
///
/// # Errors
///
/// Returns `ServerError::Serve` if the accept loop fails.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel_token: CancellationToken,
) -> Result<(), ServerError> {
    match listener.local_addr() {
        Ok(addr) => info!(addr = %addr, "HTTP server listening"),
        Err(_) => info!("HTTP server listening"),
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "HTTP request"
    );
    response
}

//! wagate daemon - self-healing supervisor for a single WhatsApp session
//!
//! This crate provides the runtime pieces of the gateway:
//! - `lifecycle` - actor owning the session state, attempts and retries
//! - `client` - the `SessionClient` seam and its sidecar implementation
//! - `auth_store` - credential directory checks and purges
//! - `reaper` - cleanup of orphaned browser processes
//! - `watchdog` - timer for sessions stuck before `Ready`
//! - `readiness` / `sender` - non-blocking readiness and ready-gated sends
//! - `server` - axum HTTP facade
//! - `monitor` - resident memory sampling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       wagated daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   axum Router   │────▶│       LifecycleActor        │    │
//! │  │  (HTTP facade)  │     │  (session state owner)      │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │ GatedSender                 │ connect/teardown  │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │          SessionClient (sidecar worker)             │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod auth_store;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod monitor;
pub mod reaper;
pub mod readiness;
pub mod sender;
pub mod server;
pub mod watchdog;

//! wagate protocol - payloads exchanged with HTTP callers and the worker
//!
//! This crate provides the JSON bodies served by the gateway's HTTP
//! routes, chat id normalization for outgoing messages, and the
//! newline-delimited JSON protocol spoken with the browser worker.

pub mod chat;
pub mod http;
pub mod worker;

pub use chat::ChatId;
pub use http::{
    Ack, ErrorResponse, HealthResponse, InitializationStatus, MemoryUsage, NotReadyDetails,
    NotReadyResponse, SendMessageRequest, SendMessageResponse, StatusDetails, StatusResponse,
    WhatsappHealth,
};
pub use worker::{parse_line, WorkerEvent, WorkerProtocolError, WorkerRequest, MAX_LINE_BYTES};

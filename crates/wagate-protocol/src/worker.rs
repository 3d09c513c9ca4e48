//! Newline-delimited JSON spoken with the session worker process.
//!
//! The worker (the browser automation runtime) writes one [`WorkerEvent`]
//! per line to stdout and reads one [`WorkerRequest`] per line from stdin.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wagate_core::{ClientEvent, ClientInfo};

use crate::chat::ChatId;

/// Longest line accepted from the worker. QR payloads are a few hundred
/// bytes; anything near this is garbage on the pipe.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Messages written by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Browser and page are up.
    Launched,

    /// Login challenge.
    Qr { code: String },

    /// Credentials accepted.
    Authenticated,

    /// Session fully usable.
    Ready { info: ClientInfo },

    /// Transport lost.
    Disconnected { reason: String },

    /// Credentials rejected.
    AuthFailure { message: String },

    /// Incoming chat message.
    Message { from: String, body: String },

    /// The initialize call returned.
    Initialized,

    /// The initialize call raised.
    InitError { message: String },

    /// Answer to a [`WorkerRequest::Send`] with the same id.
    Reply {
        id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WorkerEvent {
    /// Lifecycle notification carried by this line, if any.
    ///
    /// `Initialized`, `InitError` and `Reply` answer calls made by the
    /// client and are routed by it instead.
    pub fn into_client_event(self) -> Option<ClientEvent> {
        match self {
            Self::Launched => Some(ClientEvent::Connected),
            Self::Qr { code } => Some(ClientEvent::QrChallenge(code)),
            Self::Authenticated => Some(ClientEvent::Authenticated),
            Self::Ready { info } => Some(ClientEvent::Ready(info)),
            Self::Disconnected { reason } => Some(ClientEvent::Disconnected { reason }),
            Self::AuthFailure { message } => Some(ClientEvent::AuthFailed { message }),
            Self::Message { from, body } => Some(ClientEvent::MessageReceived { from, body }),
            Self::Initialized | Self::InitError { .. } | Self::Reply { .. } => None,
        }
    }
}

/// Messages written to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Send a text message; answered by a `reply` with the same id.
    Send { id: u64, chat_id: ChatId, body: String },

    /// Close the browser and exit.
    Shutdown,
}

impl WorkerRequest {
    /// Serializes to a single line including the trailing newline.
    pub fn to_line(&self) -> Result<String, WorkerProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Errors decoding a worker line.
#[derive(Debug, Error)]
pub enum WorkerProtocolError {
    #[error("line exceeds {max} bytes ({len})")]
    LineTooLong { len: usize, max: usize },

    #[error("malformed worker message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parses one line from the worker.
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<WorkerEvent>, WorkerProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(WorkerProtocolError::LineTooLong {
            len: line.len(),
            max: MAX_LINE_BYTES,
        });
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qr() {
        let event = parse_line(r#"{"type":"qr","code":"2@abc,def"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event.into_client_event(),
            Some(ClientEvent::QrChallenge("2@abc,def".into()))
        );
    }

    #[test]
    fn test_parse_ready_with_info() {
        let line = r#"{"type":"ready","info":{"wid":"15551234567@c.us","pushname":"Shop","lastConnect":"2024-05-01T10:00:00Z"}}"#;
        let event = parse_line(line).unwrap().unwrap();
        match event.into_client_event() {
            Some(ClientEvent::Ready(info)) => {
                assert_eq!(info.wid, "15551234567@c.us");
                assert_eq!(info.pushname.as_deref(), Some("Shop"));
                assert!(info.platform.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_reply() {
        let ok = parse_line(r#"{"type":"reply","id":7,"ok":true,"message_id":"ABC"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            ok,
            WorkerEvent::Reply {
                id: 7,
                ok: true,
                message_id: Some("ABC".into()),
                error: None
            }
        );
        assert!(ok.into_client_event().is_none());
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(parse_line("   \n").unwrap().is_none());
        assert!(matches!(
            parse_line("{not json"),
            Err(WorkerProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_line(r#"{"type":"teleport"}"#),
            Err(WorkerProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_line_rejected() {
        let line = "x".repeat(MAX_LINE_BYTES + 1);
        assert!(matches!(
            parse_line(&line),
            Err(WorkerProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_request_line_format() {
        let chat_id = ChatId::from_number("15551234567").unwrap();
        let line = WorkerRequest::Send {
            id: 1,
            chat_id,
            body: "hi".into(),
        }
        .to_line()
        .unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["chat_id"], "15551234567@c.us");

        let shutdown = WorkerRequest::Shutdown.to_line().unwrap();
        assert_eq!(shutdown, "{\"type\":\"shutdown\"}\n");
    }
}

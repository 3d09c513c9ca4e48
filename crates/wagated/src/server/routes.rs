//! Route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::task;
use tracing::{error, info, warn};

use wagate_core::Phase;
use wagate_protocol::{
    Ack, ErrorResponse, HealthResponse, InitializationStatus, NotReadyDetails, NotReadyResponse,
    SendMessageRequest, SendMessageResponse, StatusResponse,
};

use super::AppState;
use crate::sender::SendError;

const BANNER: &str = "WhatsApp Bot API is running";
const MISSING_FIELDS: &str = "Please provide both 'number' and 'message' in the request body";
const RECONNECT_STARTED: &str = "Reconnection process started. Check logs for QR code.";

pub(super) async fn banner() -> &'static str {
    BANNER
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let view = state.lifecycle.readiness().query();
    let snapshot = state.lifecycle.snapshot();
    let qr_available = snapshot.phase == Phase::AwaitingScan && snapshot.last_qr_at.is_some();

    Json(
        HealthResponse::new(
            &view,
            InitializationStatus::from(&snapshot),
            state.uptime(),
            state.environment.as_str(),
        )
        .with_qr_code_available(qr_available)
        .with_memory(state.memory()),
    )
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let view = state.lifecycle.readiness().query();
    Json(StatusResponse::new(&view, state.uptime()))
}

pub(super) async fn qr(State(state): State<AppState>) -> Response {
    let store = state.lifecycle.auth_store().clone();
    match task::spawn_blocking(move || store.read_qr()).await {
        Ok(Some(code)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            code,
        )
            .into_response(),
        Ok(None) | Err(_) => (StatusCode::NOT_FOUND, "No QR code available").into_response(),
    }
}

pub(super) async fn force_reconnect(State(state): State<AppState>) -> Response {
    info!("Manual reconnection requested");

    match state.lifecycle.force_clean_and_reinit().await {
        Ok(()) => (StatusCode::OK, Json(Ack::ok(RECONNECT_STARTED))).into_response(),
        Err(e) => {
            error!(error = %e, "Reconnection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "Error during reconnection process",
                    e.to_string(),
                )),
            )
                .into_response()
        }
    }
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected send-message body");
            return (StatusCode::BAD_REQUEST, Json(Ack::failed(MISSING_FIELDS))).into_response();
        }
    };

    let Some((number, message)) = request.required_fields() else {
        return (StatusCode::BAD_REQUEST, Json(Ack::failed(MISSING_FIELDS))).into_response();
    };

    match state.sender.send(number, message).await {
        Ok(id) => (StatusCode::OK, Json(SendMessageResponse::sent(id))).into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for SendError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidNumber(number) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "Invalid phone number",
                    format!("no digits in {number:?}"),
                )),
            )
                .into_response(),
            Self::NotReady { view, state } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(NotReadyResponse::new(
                    NotReadyDetails::from(view.as_ref()),
                    InitializationStatus::from(state.as_ref()),
                )),
            )
                .into_response(),
            Self::Failed(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to send message", e.to_string())),
            )
                .into_response(),
        }
    }
}

//! Page message endpoint.
//!
//! Lets a client without a bridge socket post page messages directly. The
//! reply mirrors what the shim would hand back to the page.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use modreport_core::{MessageSender, RouterError};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    /// Tab the message is posted on behalf of.
    #[serde(default)]
    pub sender: Option<MessageSender>,
    pub message: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Orchestration stage for report failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// HTTP status for a routing failure.
pub fn error_status(err: &RouterError) -> StatusCode {
    match err {
        RouterError::UnknownAction(_)
        | RouterError::InvalidPayload(_)
        | RouterError::MissingSender(_) => StatusCode::BAD_REQUEST,
        RouterError::Report(e) if e.is_queue_full() => StatusCode::TOO_MANY_REQUESTS,
        RouterError::Report(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        RouterError::Report(_) => StatusCode::BAD_GATEWAY,
        RouterError::Browser(modreport_core::BrowserError::Timeout(_)) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        RouterError::Browser(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: RouterError) -> Response {
    let status = error_status(&err);
    let stage = match &err {
        RouterError::Report(e) => Some(e.stage.to_string()),
        _ => None,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            stage,
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/messages
///
/// Route one page message. Report requests hold the connection until the
/// report completes.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PostMessageRequest>,
) -> Response {
    match state.router().dispatch(body.message, body.sender).await {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!("Page message failed: {}", e);
            error_response(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modreport_core::{QueueError, ReportError};

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&RouterError::UnknownAction("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&RouterError::Report(ReportError::queue(QueueError::Full {
                capacity: 3
            }))),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            error_status(&RouterError::Report(ReportError::ack_timeout(30_000))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_status(&RouterError::Report(ReportError::page_script("no result"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&RouterError::Browser(modreport_core::BrowserError::Disconnected)),
            StatusCode::BAD_GATEWAY
        );
    }
}

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("transport connection task is already running")]
    AlreadyRunning,

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("websocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },
}

impl TransportError {
    /// HTTP status attached to the failure, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(status.as_u16()),
            Self::Handshake(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                Some(response.status().as_u16())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    detail: Option<serde_json::Value>,
}

/// Extracts a readable message from an error response body.
///
/// Understands `{"detail": "..."}` bodies and falls back to the raw body or the
/// canonical status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.detail);

    match detail {
        Some(serde_json::Value::String(message)) if !message.is_empty() => message,
        Some(other) if !other.is_null() => other.to_string(),
        _ if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{parse_error_message, TransportError};

    #[test]
    fn detail_string_is_preferred() {
        let message = parse_error_message(
            StatusCode::NOT_FOUND,
            r#"{"detail":"Chat session with id s-1 not found"}"#,
        );
        assert_eq!(message, "Chat session with id s-1 not found");
    }

    #[test]
    fn empty_body_falls_back_to_reason() {
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
        assert_eq!(parse_error_message(StatusCode::BAD_GATEWAY, "upstream"), "upstream");
    }

    #[test]
    fn status_is_exposed_for_http_failures() {
        let error = TransportError::Status {
            status: StatusCode::NOT_FOUND,
            message: "missing".to_string(),
        };
        assert_eq!(error.status(), Some(404));
        assert_eq!(TransportError::NotConnected.status(), None);
    }
}

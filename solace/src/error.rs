//! Relay error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors raised while relaying a conversation.
///
/// Only `Validation` and `Unauthorized` ever reach an HTTP response. Once a
/// message is acknowledged, upstream failures travel over the user's channel
/// as `ai:error` events, and parse failures are recovered inside the chunk
/// parser.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Empty or missing message.
    #[error("Message is required")]
    Validation,

    /// No caller identity was attached to the request.
    #[error("Unauthorized")]
    Unauthorized,

    /// Backend unreachable, non-success response, timeout or truncated stream.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A stream segment that could not be parsed.
    #[error("malformed stream fragment: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RelayError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_fixed_message() {
        let err = RelayError::Validation;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Message is required");
    }

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(RelayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}

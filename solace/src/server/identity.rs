//! Caller identity, as resolved by the authenticating proxy in front of us.

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;

use crate::error::RelayError;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller's user id.
///
/// Read from the `x-user-id` header, falling back to a `user_id` query
/// parameter for WebSocket clients that cannot set headers. Requests with
/// neither are rejected as unauthorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = RelayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);

        let user_id = from_header.or_else(|| {
            Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.user_id)
                .filter(|id| !id.trim().is_empty())
        });

        user_id.map(Self).ok_or(RelayError::Unauthorized)
    }
}

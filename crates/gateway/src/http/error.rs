//! JSON error responses for the HTTP surface.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::TokenError;

/// A failed request, rendered as `{"error": ..., "reason"?: ...,
/// "retry_after_secs"?: ...}` with the matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    reason: Option<&'static str>,
    retry_after_secs: Option<u64>,
}

#[derive(Serialize)]
struct Body<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::plain(StatusCode::BAD_REQUEST, message)
    }

    /// 401 with a machine-readable reason (`login_required`).
    pub fn unauthorized(reason: &'static str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "authentication required".to_string(),
            reason: Some(reason),
            retry_after_secs: None,
        }
    }

    /// 403 with a machine-readable reason (`password_required`, `admin_required`).
    pub fn forbidden(reason: &'static str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: "access denied".to_string(),
            reason: Some(reason),
            retry_after_secs: None,
        }
    }

    pub fn not_found() -> Self {
        Self::plain(StatusCode::NOT_FOUND, "not found")
    }

    /// 429 carrying the retry hint both in the body and `Retry-After`.
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: "rate limit exceeded".to_string(),
            reason: None,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Mirrors an upstream error status verbatim; non-error or unparseable
    /// codes fall back to 500.
    pub fn upstream(status: u16) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::plain(status, "upstream request failed")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::plain(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn plain(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: message.into(),
            reason: None,
            retry_after_secs: None,
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Disabled => Self::plain(
                StatusCode::SERVICE_UNAVAILABLE,
                "share tokens are not configured",
            ),
            TokenError::LoginRequired => Self::unauthorized("login_required"),
            // Everything else (bad signature, expired, revoked, store
            // outage) reads the same from outside: the token does not work.
            _ => Self::unauthorized("invalid_token"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(Body {
            error: &self.error,
            reason: self.reason,
            retry_after_secs: self.retry_after_secs,
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_statuses_pass_through_verbatim() {
        assert_eq!(ApiError::upstream(403).status, StatusCode::FORBIDDEN);
        assert_eq!(ApiError::upstream(429).status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::upstream(500).status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::upstream(503).status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn non_error_upstream_status_falls_back_to_500() {
        assert_eq!(ApiError::upstream(302).status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::upstream(0).status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

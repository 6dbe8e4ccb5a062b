//! HTTP responses.
//!
//! This module provides [`ApiResponse`] and the mapping from
//! [`SessionError`] to status codes.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;

use notebook_runtime_common::SessionError;

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a JSON response from a serializable value.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::raw_json(status, body),
            Err(e) => Self::error(500, &format!("Failed to encode response: {e}"), "internal"),
        }
    }

    /// Create an error response with a JSON `{error, kind}` body.
    pub fn error(status: u16, message: &str, kind: &str) -> Self {
        let body = serde_json::json!({
            "error": message,
            "kind": kind,
        });
        Self::raw_json(status, body.to_string().into_bytes())
    }

    /// Create a binary response.
    pub fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body,
        }
    }

    /// Add a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Convert to Axum response.
    pub fn into_axum_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }

        response
    }

    fn raw_json(status: u16, body: Vec<u8>) -> Self {
        Self::bytes(status, "application/json", body)
    }
}

impl From<SessionError> for ApiResponse {
    fn from(error: SessionError) -> Self {
        error_to_response(&error)
    }
}

impl axum::response::IntoResponse for ApiResponse {
    fn into_response(self) -> Response<Body> {
        self.into_axum_response()
    }
}

/// HTTP status for a registry or engine error.
pub fn status_for(error: &SessionError) -> u16 {
    match error {
        SessionError::Validation { .. } => 400,
        SessionError::UnknownSession { .. } => 404,
        SessionError::DuplicateSession { .. }
        | SessionError::NoActiveSession
        | SessionError::SessionDead { .. } => 409,
        SessionError::SessionUnavailable { .. } => 503,
        SessionError::Spawn { .. } | SessionError::InvalidConfig { .. } | SessionError::Io(_) => 500,
    }
}

/// Convert a [`SessionError`] to an HTTP response.
pub fn error_to_response(error: &SessionError) -> ApiResponse {
    ApiResponse::error(status_for(error), &error.to_string(), error.kind())
}

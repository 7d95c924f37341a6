use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use rotv_core::ModuleError;

use crate::envelope::Envelope;

/// Boundary error: everything a handler can fail with, carrying the module
/// id so the error envelope names it. No error leaves a handler as a bare
/// exception; it always becomes an envelope with a matching status code.
#[derive(Debug)]
pub enum ApiError {
    Module { module: String, source: ModuleError },
    BadRequest { module: String, message: String },
}

impl ApiError {
    pub fn module(module: impl Into<String>, source: ModuleError) -> Self {
        Self::Module {
            module: module.into(),
            source,
        }
    }

    pub fn bad_request(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            module: module.into(),
            message: message.into(),
        }
    }
}

fn classify(source: &ModuleError) -> (StatusCode, &'static str) {
    match source {
        ModuleError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
        ModuleError::UpstreamBlocked(_) => (StatusCode::FORBIDDEN, "upstream_blocked"),
        ModuleError::UnknownModule(_) => (StatusCode::NOT_FOUND, "unknown_module"),
        ModuleError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ModuleError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
        ModuleError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        ModuleError::StreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "stream_unavailable"),
        ModuleError::AuthStore(_) | ModuleError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

/// Truncated for logs; upstream bodies can be arbitrarily large and must
/// never drag credentials or whole manifests into the log stream.
fn truncate(message: &str) -> &str {
    let limit = 200;
    match message.char_indices().nth(limit) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, module, message) = match self {
            ApiError::Module { module, source } => {
                let (status, kind) = classify(&source);
                (status, kind, module, source.to_string())
            }
            ApiError::BadRequest { module, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", module, message)
            }
        };

        warn!(
            module = %module,
            status = status.as_u16(),
            error = kind,
            message = truncate(&message),
            "Request failed"
        );

        let body = Envelope::error(module, kind, message);
        (status, axum::Json(body)).into_response()
    }
}

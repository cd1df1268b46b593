//! Error types for control-plane operations.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::servers::state::RebindPhase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing request input; raised before any runtime call.
    #[error("{0}")]
    InvalidInput(String),

    /// No container carries the requested name.
    #[error("server not found: {0}")]
    NotFound(String),

    /// The container runtime rejected or failed an operation.
    #[error("{0}")]
    RuntimeFailure(#[from] RuntimeError),

    /// A rebind removed the old container but could not bring up the new one.
    /// The data directory survives.
    #[error("rebind of {name} failed while {phase}: {source}")]
    PartialFailure {
        name: String,
        phase: RebindPhase,
        source: RuntimeError,
    },
}

impl Error {
    pub fn missing_image() -> Self {
        Error::InvalidInput("name and image required".to_string())
    }

    pub fn invalid_port(detail: impl std::fmt::Display) -> Self {
        Error::InvalidInput(format!("invalid port: {detail}"))
    }

    /// Machine-stable kind reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::RuntimeFailure(_) => "runtime_failure",
            Error::PartialFailure { .. } => "partial_failure",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RuntimeFailure(_) | Error::PartialFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Malformed, mistyped or non-JSON request bodies are client input errors.
impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidInput(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Error::PartialFailure { phase, .. } = &self {
            body["phase"] = json!(phase);
        }

        (status, axum::Json(body)).into_response()
    }
}

//! `ControlError` (spec.md §4.7, §7): the one error type every handler in
//! this crate returns. Each variant maps to a status code and a JSON body,
//! scoped to what the control server itself can fail on — it has no
//! database or auth-token errors of its own to represent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// No pairing exists yet. The paired-absent signal spec.md §4.7 calls
    /// for on `GET /pair`.
    #[error("not paired")]
    NotPaired,

    /// The request body's one-of fields were empty, malformed JSON, or
    /// named more than one variant at once.
    #[error("malformed request body: {0}")]
    BadRequest(String),

    /// Everything from `kr_enclave::EnclaveError` other than `NotPaired`,
    /// which gets its own 404 mapping above.
    #[error("enclave error: {0}")]
    Enclave(#[from] kr_enclave::EnclaveError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ControlError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotPaired => StatusCode::NOT_FOUND,
            Self::Enclave(kr_enclave::EnclaveError::NotPaired) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Enclave(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "control server request failed");
        }
        let body = ErrorResponse { error: self.to_string() };
        (status, Json(body)).into_response()
    }
}

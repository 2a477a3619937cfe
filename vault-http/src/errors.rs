//! Maps [`vault_core::error::KeyManagerError`] onto HTTP status codes.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use vault_core::error::KeyManagerError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Thin wrapper so [`KeyManagerError`] can be returned directly from an axum
/// handler.
pub(crate) struct ApiError(pub(crate) KeyManagerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            KeyManagerError::Validation(_) => StatusCode::BAD_REQUEST,
            KeyManagerError::MissingKey(_) => StatusCode::NOT_FOUND,
            KeyManagerError::CryptoImport | KeyManagerError::SigningFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            KeyManagerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self.0, "request failed");
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

impl From<KeyManagerError> for ApiError {
    fn from(value: KeyManagerError) -> Self {
        ApiError(value)
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use vanish_reclaim::ReclaimError;
use vanish_share::ShareError;

/// Errors that can occur when running the Vanish server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or wrong cleanup trigger credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An upload or download failed.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// A sweep could not run.
    #[error(transparent)]
    Reclaim(#[from] ReclaimError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Share(ShareError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Share(ShareError::NotFound) => StatusCode::NOT_FOUND,
            Self::Share(ShareError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Share(ShareError::Backend(_))
            | Self::Reclaim(_)
            | Self::Config(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client. Backend details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Unauthorized".to_owned(),
            Self::Share(ShareError::Validation(msg)) => msg.clone(),
            Self::Share(ShareError::NotFound) => "File not found or expired".to_owned(),
            Self::Share(ShareError::PayloadTooLarge { limit, .. }) => {
                format!("File too large; the limit is {limit} bytes")
            }
            Self::Share(ShareError::Backend(_)) => "Storage backend error".to_owned(),
            Self::Reclaim(_) => "Cleanup failed".to_owned(),
            Self::Config(_) | Self::Io(_) => "Internal server error".to_owned(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = serde_json::json!({ "error": self.public_message() });
        (status, axum::Json(body)).into_response()
    }
}

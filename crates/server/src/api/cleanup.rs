use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use super::AppState;
use super::schemas::{CleanupErrorResponse, CleanupResponse, ErrorResponse};
use crate::error::ServerError;

/// `POST /cleanup` (and `GET`) -- run one sweep now.
///
/// Meant for external schedulers driving deployments without a
/// long-lived process. When a trigger secret is configured the request
/// must carry it as `Authorization: Bearer <secret>`.
#[utoipa::path(
    post,
    path = "/cleanup",
    tag = "Reclaim",
    summary = "Trigger a sweep",
    description = "Deletes every stored file whose expiry has passed. Also accepts GET.",
    responses(
        (status = 200, description = "Sweep completed", body = CleanupResponse),
        (status = 401, description = "Missing or wrong trigger secret", body = ErrorResponse),
        (status = 500, description = "The store could not be listed", body = CleanupErrorResponse)
    )
)]
pub async fn cleanup(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(state.cleanup_secret.as_deref(), &headers) {
        warn!("cleanup trigger rejected");
        return e.into_response();
    }

    match state.sweeper.run().await {
        Ok(report) => {
            info!(
                checked = report.checked,
                deleted = report.deleted,
                errors = report.errors.len(),
                "triggered sweep finished"
            );
            Json(CleanupResponse::from(report)).into_response()
        }
        Err(e) => {
            error!(error = %e, "triggered sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CleanupErrorResponse {
                    success: false,
                    error: e.to_string(),
                    timestamp: state.sweeper.clock().now(),
                }),
            )
                .into_response()
        }
    }
}

/// Check the bearer credential against `secret`. No secret means open.
fn authorize(secret: Option<&str>, headers: &HeaderMap) -> Result<(), ServerError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ServerError::Unauthorized("missing bearer credential".into()))?;

    if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(ServerError::Unauthorized("wrong bearer credential".into()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn open_when_no_secret_configured() {
        assert!(authorize(None, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn requires_exact_bearer() {
        assert!(authorize(Some("s3cret"), &bearer("Bearer s3cret")).is_ok());
        assert!(authorize(Some("s3cret"), &HeaderMap::new()).is_err());
        assert!(authorize(Some("s3cret"), &bearer("Bearer s3cre")).is_err());
        assert!(authorize(Some("s3cret"), &bearer("Bearer s3cret2")).is_err());
        assert!(authorize(Some("s3cret"), &bearer("Basic s3cret")).is_err());
        assert!(authorize(Some("s3cret"), &bearer("s3cret")).is_err());
    }
}

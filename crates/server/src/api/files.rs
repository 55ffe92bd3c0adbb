use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::AppState;
use super::schemas::ErrorResponse;
use crate::error::ServerError;

/// `GET /files/{name}` -- download a file that has not expired yet.
#[utoipa::path(
    get,
    path = "/files/{name}",
    tag = "Files",
    summary = "Download a file",
    description = "Streams the stored bytes with the content type derived from the extension. Expired files are 404 even while still physically stored.",
    params(("name" = String, Path, description = "Stored name from the upload response")),
    responses(
        (status = 200, description = "File contents", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown or expired", body = ErrorResponse),
        (status = 405, description = "Method other than GET", body = ErrorResponse),
        (status = 500, description = "Storage backend failure", body = ErrorResponse)
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let file = state.file_server.serve(&name).await?;
    let disposition = HeaderValue::from_str(&file.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(file.content_type)),
            (header::CONTENT_LENGTH, HeaderValue::from(file.content_length)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from(file.data),
    )
        .into_response())
}

/// Fallback for unsupported methods on file and upload routes.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        axum::Json(ErrorResponse {
            error: "Method not allowed".to_owned(),
        }),
    )
}

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use bytes::BytesMut;
use tracing::debug;

use vanish_share::{IncomingUpload, ShareError};

use super::AppState;
use super::schemas::{ErrorResponse, UploadResponse};
use crate::error::ServerError;

/// Multipart form field carrying the file.
pub const FILE_FIELD: &str = "file";

/// `POST /upload` -- store a file and return its share link.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "Files",
    summary = "Upload a file",
    description = "Accepts a multipart form with a `file` field. The returned link stops working after the configured TTL and the file is then deleted.",
    request_body(content_type = "multipart/form-data", description = "Form with a `file` field"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "No file in the request", body = ErrorResponse),
        (status = 413, description = "File exceeds the upload limit", body = ErrorResponse),
        (status = 500, description = "Storage backend failure", body = ErrorResponse)
    )
)]
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut multipart = multipart.map_err(|e| ShareError::Validation(e.body_text()))?;
    let limit = state.ingestor.max_upload_bytes();
    let mut upload = IncomingUpload::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e, 0, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "ignoring form field");
            continue;
        }
        upload.filename = field.file_name().map(str::to_owned);
        upload.content_type = field.content_type().map(str::to_owned);

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(&e, buf.len() as u64, limit))?
        {
            let size = (buf.len() + chunk.len()) as u64;
            if size > limit {
                return Err(ShareError::PayloadTooLarge { size, limit }.into());
            }
            buf.extend_from_slice(&chunk);
        }
        upload.data = Some(buf.freeze());
        break;
    }

    let receipt = state.ingestor.ingest(upload, &state.base_url).await?;
    Ok(Json(receipt.into()))
}

fn multipart_error(err: &MultipartError, received: u64, limit: u64) -> ShareError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ShareError::PayloadTooLarge {
            size: received.max(limit.saturating_add(1)),
            limit,
        }
    } else {
        ShareError::Validation(err.body_text())
    }
}

#![allow(clippy::needless_for_each)]

use super::schemas::{
    CleanupErrorResponse, CleanupFailure, CleanupResponse, ErrorResponse, HealthResponse,
    ReclaimCounters, UploadResponse,
};

#[derive(utoipa::OpenApi)]
#[openapi(
    info(
        title = "Vanish API",
        version = "0.1.0",
        description = "Upload a file, share the link, and let it disappear. Every upload is deleted once its time to live has passed.",
        license(name = "Apache-2.0")
    ),
    tags(
        (name = "Health", description = "Service health and reclaim counters"),
        (name = "Files", description = "Upload and download of self-expiring files"),
        (name = "Reclaim", description = "Externally triggered deletion of expired files")
    ),
    paths(
        super::health::health,
        super::upload::upload,
        super::files::download,
        super::cleanup::cleanup,
    ),
    components(schemas(
        ErrorResponse,
        UploadResponse,
        CleanupResponse, CleanupFailure, CleanupErrorResponse,
        HealthResponse, ReclaimCounters,
    ))
)]
pub struct ApiDoc;

pub mod cleanup;
pub mod files;
pub mod health;
pub mod openapi;
pub mod schemas;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vanish_core::Clock;
use vanish_reclaim::{ExpiryTimers, ReclaimMetrics, SweepConfig, Sweeper};
use vanish_share::{FileServer, IngestConfig, UploadIngestor};
use vanish_store::{BlobStore, Locality};

use crate::config::VanishConfig;

use self::openapi::ApiDoc;

/// Room for multipart boundaries and part headers on top of the file size
/// limit. The exact limit is enforced while reading the file field.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<UploadIngestor>,
    pub file_server: Arc<FileServer>,
    pub sweeper: Arc<Sweeper>,
    /// In-process expiry timers; `None` for shared stores or when disabled.
    pub timers: Option<Arc<ExpiryTimers>>,
    pub metrics: Arc<ReclaimMetrics>,
    /// Name of the active store backend.
    pub backend: &'static str,
    /// Bearer secret guarding `/cleanup`.
    pub cleanup_secret: Option<Arc<str>>,
    /// Origin used to build share links.
    pub base_url: Arc<str>,
}

impl AppState {
    /// Wire the ingest, serve and reclaim components around `store`.
    ///
    /// Expiry timers are only created for process-local stores with
    /// `expiry.enable_timers` set.
    pub fn build(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: &VanishConfig) -> Self {
        let ttl = config.ttl();
        let operation_timeout = Duration::from_millis(config.store.operation_timeout_ms);
        let metrics = Arc::new(ReclaimMetrics::default());

        let timers = (config.expiry.enable_timers && store.locality() == Locality::ProcessLocal)
            .then(|| {
                Arc::new(
                    ExpiryTimers::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&metrics))
                        .with_delete_timeout(Duration::from_millis(
                            config.expiry.timer_delete_timeout_ms,
                        )),
                )
            });

        let mut ingestor = UploadIngestor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            IngestConfig {
                ttl,
                max_upload_bytes: config.expiry.max_upload_bytes,
                operation_timeout,
            },
        );
        if let Some(timers) = &timers {
            ingestor = ingestor.with_timers(Arc::clone(timers));
        }

        let file_server = FileServer::new(Arc::clone(&store), Arc::clone(&clock))
            .with_default_ttl(ttl)
            .with_operation_timeout(operation_timeout);

        let sweeper = Sweeper::new(
            Arc::clone(&store),
            clock,
            SweepConfig {
                default_ttl: ttl,
                concurrency: config.reclaim.concurrency,
                delete_timeout: Duration::from_millis(config.reclaim.delete_timeout_ms),
            },
            Arc::clone(&metrics),
        );

        Self {
            ingestor: Arc::new(ingestor),
            file_server: Arc::new(file_server),
            sweeper: Arc::new(sweeper),
            timers,
            metrics,
            backend: store.backend_name(),
            cleanup_secret: config.cleanup_secret().map(Arc::from),
            base_url: Arc::from(config.server.base_url()),
        }
    }
}

/// Build the Axum router with all API routes, middleware, and Swagger UI.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.ingestor.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health::health))
        .route(
            "/upload",
            post(upload::upload)
                .fallback(files::method_not_allowed)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/files/{name}",
            get(files::download).fallback(files::method_not_allowed),
        )
        .route("/cleanup", get(cleanup::cleanup).post(cleanup::cleanup))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

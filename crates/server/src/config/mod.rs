mod expiry;
mod server;
mod store;
mod telemetry;


pub use expiry::*;
pub use server::*;
pub use store::*;
pub use telemetry::*;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the Vanish server, loaded from a TOML file.
///
/// Every section is optional; a missing file yields the defaults. The
/// environment variables `TTL_MS`, `MAX_UPLOAD_BYTES`,
/// `CLEANUP_TRIGGER_SECRET`, `VANISH_ENV`, `PORT`, `OTEL_SERVICE_NAME` and
/// `OTEL_EXPORTER_OTLP_ENDPOINT` take precedence over the file (see
/// [`VanishConfig::apply_env_overrides`]).
#[derive(Debug, Default, Deserialize)]
pub struct VanishConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Upload lifetime and size limits.
    #[serde(default)]
    pub expiry: ExpiryConfig,
    /// Periodic sweep configuration.
    #[serde(default)]
    pub reclaim: ReclaimConfig,
    /// `/cleanup` trigger protection.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl VanishConfig {
    /// Read `path` if it exists, otherwise start from the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let contents = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        toml::from_str(&contents)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ServerError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get("TTL_MS") {
            self.expiry.ttl_ms = parse_number("TTL_MS", &raw)?;
        }
        if let Some(raw) = get("MAX_UPLOAD_BYTES") {
            self.expiry.max_upload_bytes = parse_number("MAX_UPLOAD_BYTES", &raw)?;
        }
        if let Some(secret) = get("CLEANUP_TRIGGER_SECRET") {
            self.cleanup.trigger_secret = Some(secret);
        }
        if let Some(env) = get("VANISH_ENV") {
            self.server.environment = env;
        }
        if let Some(raw) = get("PORT") {
            self.server.port = parse_number("PORT", &raw)?;
        }
        if let Some(name) = get("OTEL_SERVICE_NAME") {
            self.telemetry.service_name = name;
        }
        if let Some(endpoint) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.telemetry.endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// Reject configurations the server cannot run safely with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.expiry.ttl_ms == 0 {
            return Err(ServerError::Config("ttl_ms must be positive".to_owned()));
        }
        if self.expiry.max_upload_bytes == 0 {
            return Err(ServerError::Config(
                "max_upload_bytes must be positive".to_owned(),
            ));
        }
        if self.reclaim.concurrency == 0 {
            return Err(ServerError::Config(
                "reclaim.concurrency must be at least 1".to_owned(),
            ));
        }
        if self.reclaim.enabled && self.reclaim.interval_seconds == 0 {
            return Err(ServerError::Config(
                "reclaim.interval_seconds must be positive".to_owned(),
            ));
        }
        if self.server.is_production() && self.cleanup_secret().is_none() {
            return Err(ServerError::Config(
                "CLEANUP_TRIGGER_SECRET is required in production".to_owned(),
            ));
        }
        self.telemetry.validate().map_err(ServerError::Config)?;
        Ok(())
    }

    /// The configured cleanup secret, ignoring blank values.
    pub fn cleanup_secret(&self) -> Option<&str> {
        self.cleanup
            .trigger_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.expiry.ttl_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ServerError> {
    raw.trim()
        .parse()
        .map_err(|_| ServerError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// OTLP transport used to ship spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

impl OtlpProtocol {
    /// Collector address used when no endpoint is configured.
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Grpc => "http://localhost:4317",
            Self::Http => "http://localhost:4318/v1/traces",
        }
    }
}

/// Span export for uploads, downloads and sweeps.
///
/// Off by default; stdout logging is unaffected either way. Resources are
/// tagged with the server environment as `deployment.environment`, so one
/// collector can tell staging uploads from production ones.
///
/// ```toml
/// [telemetry]
/// enabled = true
/// protocol = "http"
/// sample_ratio = 0.1
///
/// [telemetry.resource_attributes]
/// "cloud.region" = "eu-west-1"
/// ```
#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub protocol: OtlpProtocol,
    /// Collector address. Defaults per protocol; `OTEL_EXPORTER_OTLP_ENDPOINT`
    /// overrides it.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// `service.name` on every span. `OTEL_SERVICE_NAME` overrides it.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Fraction of root spans kept, between 0 and 1.
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,
    /// Extra resource attributes, exported in key order.
    #[serde(default)]
    pub resource_attributes: BTreeMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: OtlpProtocol::default(),
            endpoint: None,
            service_name: default_service_name(),
            sample_ratio: default_sample_ratio(),
            export_timeout_ms: default_export_timeout_ms(),
            resource_attributes: BTreeMap::new(),
        }
    }
}

impl TelemetryConfig {
    /// The configured endpoint, or the protocol's default collector address.
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_endpoint())
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(format!(
                "telemetry.sample_ratio must be between 0 and 1, got {}",
                self.sample_ratio
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err("telemetry.service_name must not be empty".to_owned());
        }
        Ok(())
    }
}

fn default_service_name() -> String {
    "vanish".to_owned()
}

fn default_sample_ratio() -> f64 {
    1.0
}

fn default_export_timeout_ms() -> u64 {
    10_000
}

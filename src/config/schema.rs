//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the echo
//! service and its telemetry. All types derive Serde traits for
//! deserialization from config files; every section has defaults so an
//! empty file is a valid configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::batch::BatchConfig;
use crate::observability::record::Level;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Identity attached to all telemetry.
    pub service: ServiceConfig,

    /// Shared collector endpoint for logs and traces.
    pub collector: CollectorConfig,

    pub logging: LoggingConfig,

    pub tracing: TracingConfig,

    pub metrics: MetricsConfig,

    pub lifecycle: LifecycleConfig,

    pub server: ServerConfig,

    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,

    pub version: String,

    /// Extra resource attributes, `key1=value1,key2=value2`.
    pub resource_attributes: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "echo".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            resource_attributes: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Base URL; signal paths (`/v1/logs`, `/v1/traces`) are appended.
    pub endpoint: String,

    /// Accept invalid TLS certificates.
    pub insecure: bool,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Extra headers sent with every export.
    pub headers: BTreeMap<String, String>,

    /// OTLP encoding for logs and traces.
    pub protocol: OtlpProtocol,
}

/// OTLP/HTTP body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum OtlpProtocol {
    #[default]
    #[serde(rename = "http/protobuf")]
    HttpProtobuf,
    #[serde(rename = "http/json")]
    HttpJson,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318".to_string(),
            insecure: false,
            timeout_ms: 10_000,
            headers: BTreeMap::new(),
            protocol: OtlpProtocol::HttpProtobuf,
        }
    }
}

/// Queue and flush settings for a batching pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_queue_size: usize,
    pub max_batch_size: usize,
    pub scheduled_delay_ms: u64,
    pub export_timeout_ms: u64,
}

impl BatchSettings {
    pub fn to_batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size,
            max_batch_size: self.max_batch_size,
            scheduled_delay: Duration::from_millis(self.scheduled_delay_ms),
            export_timeout: Duration::from_millis(self.export_timeout_ms),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay_ms: 1000,
            export_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level written by every sink.
    pub level: Level,

    /// `tracing` filter directives used when `RUST_LOG` is unset.
    pub filter: String,

    /// Ship records to the collector's `/v1/logs`.
    pub export_to_collector: bool,

    /// Optional Loki push target.
    pub loki: Option<LokiConfig>,

    pub batch: BatchSettings,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            filter: "info".to_string(),
            export_to_collector: true,
            loki: None,
            batch: BatchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LokiConfig {
    /// Full push URL, e.g. `http://loki:3100/loki/api/v1/push`.
    pub endpoint: String,

    /// Sent as `X-Scope-OrgID` when set.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Static stream labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,

    /// Fraction of new traces recorded, 0.0 to 1.0.
    pub sampling_ratio: f64,

    pub batch: BatchSettings,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_ratio: 1.0,
            batch: BatchSettings {
                scheduled_delay_ms: 5000,
                ..BatchSettings::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsMode {
    /// Send to a push gateway on an interval.
    Push,
    /// Serve `/metrics` for a scraper.
    Pull,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    pub mode: MetricsMode,

    /// Push gateway URL (push mode).
    pub push_endpoint: String,

    pub export_interval_ms: u64,

    pub export_timeout_ms: u64,

    /// Listen address for `/metrics` (pull mode).
    pub scrape_address: String,

    /// Sampling interval for process and runtime gauges (push mode).
    pub runtime_stats_interval_ms: u64,

    /// Install the recorder as the process-global `metrics` recorder.
    pub install_recorder: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: MetricsMode::Push,
            push_endpoint: "http://localhost:9091/metrics/job/echo".to_string(),
            export_interval_ms: 60_000,
            export_timeout_ms: 30_000,
            scrape_address: "0.0.0.0:9464".to_string(),
            runtime_stats_interval_ms: 15_000,
            install_recorder: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Bound on each subsystem's shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the echo server.
    pub endpoint: String,

    /// Number of echo requests to send.
    pub requests: u32,

    pub timeout_secs: u64,

    pub message: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            requests: 5,
            timeout_secs: 5,
            message: "hello".to_string(),
        }
    }
}

//! Command-line and environment overrides.
//!
//! Flags mirror the standard OpenTelemetry environment variables, so a
//! deployment can configure the binaries without a config file. Values
//! given here win over the file.

use std::path::PathBuf;

use clap::Args;

use crate::config::schema::{AppConfig, LokiConfig, MetricsMode, OtlpProtocol};

#[derive(Debug, Clone, Default, Args)]
pub struct TelemetryArgs {
    /// Path to a TOML config file
    #[arg(short, long, env = "ECHO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Service name attached to all telemetry
    #[arg(long, env = "OTEL_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Extra resource attributes, key1=value1,key2=value2
    #[arg(long, env = "OTEL_RESOURCE_ATTRIBUTES")]
    pub resource_attributes: Option<String>,

    /// Collector base URL for logs and traces
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Accept invalid collector TLS certificates
    #[arg(long, env = "OTEL_EXPORTER_OTLP_INSECURE")]
    pub otlp_insecure: Option<bool>,

    /// OTLP encoding: http/protobuf or http/json
    #[arg(long, env = "OTEL_EXPORTER_OTLP_PROTOCOL", value_parser = parse_protocol)]
    pub otlp_protocol: Option<OtlpProtocol>,

    /// Metric export interval in milliseconds
    #[arg(long, env = "OTEL_METRIC_EXPORT_INTERVAL")]
    pub metric_export_interval: Option<u64>,

    /// Metric export timeout in milliseconds
    #[arg(long, env = "OTEL_METRIC_EXPORT_TIMEOUT")]
    pub metric_export_timeout: Option<u64>,

    /// Metrics mode: push or pull
    #[arg(long, env = "METRICS_MODE", value_parser = parse_mode)]
    pub metrics_mode: Option<MetricsMode>,

    /// Loki push URL; enables the Loki sink
    #[arg(long, env = "LOKI_PUSH_ENDPOINT")]
    pub loki_endpoint: Option<String>,

    /// Loki tenant, sent as X-Scope-OrgID
    #[arg(long, env = "LOKI_TENANT_ID")]
    pub loki_tenant_id: Option<String>,
}

fn parse_mode(value: &str) -> Result<MetricsMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "push" => Ok(MetricsMode::Push),
        "pull" => Ok(MetricsMode::Pull),
        other => Err(format!("unknown metrics mode '{}', expected push or pull", other)),
    }
}

fn parse_protocol(value: &str) -> Result<OtlpProtocol, String> {
    match value {
        "http/protobuf" => Ok(OtlpProtocol::HttpProtobuf),
        "http/json" => Ok(OtlpProtocol::HttpJson),
        other => Err(format!(
            "unsupported OTLP protocol '{}', expected http/protobuf or http/json",
            other
        )),
    }
}

impl TelemetryArgs {
    /// Overlay every flag that was given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(name) = &self.service_name {
            config.service.name = name.clone();
        }
        if let Some(attrs) = &self.resource_attributes {
            config.service.resource_attributes = attrs.clone();
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.collector.endpoint = endpoint.clone();
        }
        if let Some(insecure) = self.otlp_insecure {
            config.collector.insecure = insecure;
        }
        if let Some(protocol) = self.otlp_protocol {
            config.collector.protocol = protocol;
        }
        if let Some(interval) = self.metric_export_interval {
            config.metrics.export_interval_ms = interval;
        }
        if let Some(timeout) = self.metric_export_timeout {
            config.metrics.export_timeout_ms = timeout;
        }
        if let Some(mode) = self.metrics_mode {
            config.metrics.mode = mode;
        }
        if let Some(endpoint) = &self.loki_endpoint {
            let loki = config.logging.loki.get_or_insert_with(|| LokiConfig {
                endpoint: String::new(),
                tenant_id: None,
                labels: Default::default(),
            });
            loki.endpoint = endpoint.clone();
        }
        if let (Some(tenant), Some(loki)) = (&self.loki_tenant_id, config.logging.loki.as_mut()) {
            loki.tenant_id = Some(tenant.clone());
        }
    }
}

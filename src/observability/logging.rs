//! Structured logging.
//!
//! # Responsibilities
//! - Build the log sink fan-out: a text stream, the collector's OTLP log
//!   pipeline and, optionally, Loki
//! - Install the resulting [`Logger`] and [`LoggerProvider`] in the registry
//! - Drain every remote pipeline on shutdown, keeping all failures
//!
//! # Design Decisions
//! - Every remote backend gets its own batch pipeline, so a slow backend
//!   never delays the others
//! - The text sink writes synchronously and needs no shutdown

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry::trace::SpanContext;
use opentelemetry_otlp::{LogExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::logs::{self as sdklogs, BatchConfigBuilder, BatchLogProcessor};
use opentelemetry_sdk::runtime;
use serde::Serialize;

use crate::config::{BatchSettings, CollectorConfig, LoggingConfig, LokiConfig};
use crate::error::ErrorAggregate;
use crate::lifecycle::{ProviderError, Subsystem, TelemetryProvider};
use crate::observability::batch::BatchProcessor;
use crate::observability::exporter::{Encoder, ExportError, HttpExporter, HttpExporterConfig};
use crate::observability::fanout::fanout;
use crate::observability::logger::Logger;
use crate::observability::otel::{self, INSTRUMENTATION_NAME};
use crate::observability::record::{Attribute, Level, LogRecord, Value};
use crate::observability::registry::ProviderRegistry;
use crate::observability::remote::RemoteSink;
use crate::observability::resource::Resource;
use crate::observability::sink::{Scope, SharedSink, Sink, SinkError};
use crate::observability::text::TextSink;

/// Header carrying the Loki tenant.
pub const LOKI_TENANT_HEADER: &str = "X-Scope-OrgID";

const COLLECTOR_SINK: &str = "collector-logs";

fn severity(level: Level) -> Severity {
    match level {
        Level::Trace => Severity::Trace,
        Level::Debug => Severity::Debug,
        Level::Info => Severity::Info,
        Level::Warn => Severity::Warn,
        Level::Error => Severity::Error,
    }
}

fn any_value(value: &Value) -> AnyValue {
    match value {
        Value::Str(s) => AnyValue::from(s.clone()),
        Value::I64(v) => AnyValue::Int(*v),
        Value::U64(v) => match i64::try_from(*v) {
            Ok(v) => AnyValue::Int(v),
            Err(_) => AnyValue::from(v.to_string()),
        },
        Value::F64(v) => AnyValue::Double(*v),
        Value::Bool(v) => AnyValue::Boolean(*v),
    }
}

/// Hands records to the collector's OTLP log pipeline.
///
/// Reports itself disabled once the pipeline is shut down, like
/// [`RemoteSink`].
#[derive(Clone)]
pub struct CollectorSink {
    logger: Arc<sdklogs::Logger>,
    min_level: Level,
    scope: Scope,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for CollectorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSink")
            .field("min_level", &self.min_level)
            .field("scope", &self.scope)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CollectorSink {
    pub fn new(logger: sdklogs::Logger, min_level: Level, closed: Arc<AtomicBool>) -> Self {
        Self {
            logger: Arc::new(logger),
            min_level,
            scope: Scope::new(),
            closed,
        }
    }

    fn scoped(&self, scope: Scope) -> SharedSink {
        Arc::new(Self {
            logger: self.logger.clone(),
            min_level: self.min_level,
            scope,
            closed: self.closed.clone(),
        })
    }
}

impl Sink for CollectorSink {
    fn enabled(&self, level: Level, _context: Option<&SpanContext>) -> bool {
        level >= self.min_level && !self.closed.load(Ordering::Acquire)
    }

    fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed {
                sink: COLLECTOR_SINK.to_string(),
            });
        }
        let record = self.scope.apply(record);

        let mut otel_record = self.logger.create_log_record();
        otel_record.set_timestamp(record.timestamp);
        otel_record.set_severity_number(severity(record.level));
        otel_record.set_severity_text(record.level.as_str());
        otel_record.set_body(AnyValue::from(record.message));
        if !record.target.is_empty() {
            otel_record.set_target(record.target);
        }
        for attr in &record.attributes {
            otel_record.add_attribute(attr.key.clone(), any_value(&attr.value));
        }
        if let Some(context) = &record.context {
            otel_record.set_trace_context(
                context.trace_id(),
                context.span_id(),
                Some(context.trace_flags()),
            );
        }
        self.logger.emit(otel_record);
        Ok(())
    }

    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink {
        self.scoped(self.scope.with_attributes(attrs))
    }

    fn with_group(&self, name: &str) -> SharedSink {
        self.scoped(self.scope.with_group(name))
    }
}

/// The SDK log provider behind [`CollectorSink`].
#[derive(Debug)]
struct CollectorPipeline {
    sdk: sdklogs::LoggerProvider,
    closed: Arc<AtomicBool>,
}

/// Owns the remote log pipelines.
#[derive(Debug, Default)]
pub struct LoggerProvider {
    collector: Option<CollectorPipeline>,
    pipelines: Vec<Arc<BatchProcessor<LogRecord>>>,
    shut_down: AtomicBool,
}

impl LoggerProvider {
    pub fn new(
        collector: Option<sdklogs::LoggerProvider>,
        pipelines: Vec<Arc<BatchProcessor<LogRecord>>>,
    ) -> Self {
        Self {
            collector: collector.map(|sdk| CollectorPipeline {
                sdk,
                closed: Arc::new(AtomicBool::new(false)),
            }),
            pipelines,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of remote backends, the collector included.
    pub fn remote_count(&self) -> usize {
        self.pipelines.len() + usize::from(self.collector.is_some())
    }

    pub fn pipelines(&self) -> &[Arc<BatchProcessor<LogRecord>>] {
        &self.pipelines
    }

    /// One sink per backend: the collector first, then the batch pipelines
    /// in order.
    pub fn sinks(&self, min_level: Level) -> Vec<SharedSink> {
        let collector = self.collector.iter().map(|pipeline| {
            Arc::new(CollectorSink::new(
                pipeline.sdk.logger(INSTRUMENTATION_NAME),
                min_level,
                pipeline.closed.clone(),
            )) as SharedSink
        });
        let remote = self
            .pipelines
            .iter()
            .map(|pipeline| Arc::new(RemoteSink::new(pipeline.clone(), min_level)) as SharedSink);
        collector.chain(remote).collect()
    }

    async fn flush_collector(&self) -> Result<(), ProviderError> {
        let Some(pipeline) = &self.collector else {
            return Ok(());
        };
        let sdk = pipeline.sdk.clone();
        let results = otel::run_blocking(move || sdk.force_flush()).await?;
        ProviderError::from_aggregate(
            results
                .into_iter()
                .filter_map(Result::err)
                .map(ProviderError::from)
                .collect(),
        )
    }

    async fn shutdown_collector(&self) -> Result<(), ProviderError> {
        let Some(pipeline) = &self.collector else {
            return Ok(());
        };
        pipeline.closed.store(true, Ordering::Release);
        let sdk = pipeline.sdk.clone();
        otel::run_blocking(move || sdk.shutdown()).await??;
        Ok(())
    }
}

#[async_trait]
impl TelemetryProvider for LoggerProvider {
    async fn force_flush(&self) -> Result<(), ProviderError> {
        let (collector, remote) = tokio::join!(
            self.flush_collector(),
            join_all(self.pipelines.iter().map(|p| p.force_flush())),
        );
        let mut errors = ErrorAggregate::new();
        errors.record(collector);
        errors.extend(
            remote
                .into_iter()
                .filter_map(Result::err)
                .map(|e| ProviderError::Batch(e.into())),
        );
        ProviderError::from_aggregate(errors)
    }

    /// Shuts every pipeline down concurrently; one failing backend does not
    /// stop the others from draining.
    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(ProviderError::AlreadyShutdown);
        }
        let (collector, remote) = tokio::join!(
            self.shutdown_collector(),
            join_all(self.pipelines.iter().map(|p| p.shutdown())),
        );
        let mut errors = ErrorAggregate::new();
        errors.record(collector);
        errors.extend(
            remote
                .into_iter()
                .filter_map(Result::err)
                .map(|e| ProviderError::Batch(e.into())),
        );
        ProviderError::from_aggregate(errors)
    }
}

fn collector_batch_config(settings: &BatchSettings) -> sdklogs::BatchConfig {
    BatchConfigBuilder::default()
        .with_max_queue_size(settings.max_queue_size)
        .with_max_export_batch_size(settings.max_batch_size)
        .with_scheduled_delay(Duration::from_millis(settings.scheduled_delay_ms))
        .with_max_export_timeout(Duration::from_millis(settings.export_timeout_ms))
        .build()
}

/// The collector's OTLP/HTTP log pipeline.
fn collector_pipeline(
    config: &LoggingConfig,
    collector: &CollectorConfig,
    resource: &Resource,
) -> Result<sdklogs::LoggerProvider, ProviderError> {
    let http = HttpExporterConfig::for_collector(collector, "/v1/logs");
    let exporter = LogExporter::builder()
        .with_http()
        .with_http_client(http.client()?)
        .with_endpoint(http.url()?.as_str())
        .with_protocol(otel::protocol(collector.protocol))
        .with_timeout(http.timeout)
        .build()?;
    let processor = BatchLogProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(collector_batch_config(&config.batch))
        .build();
    Ok(sdklogs::LoggerProvider::builder()
        .with_log_processor(processor)
        .with_resource(otel::sdk_resource(resource))
        .build())
}

#[derive(Serialize)]
struct LokiStream {
    stream: BTreeMap<String, String>,
    values: Vec<[String; 2]>,
}

#[derive(Serialize)]
struct LokiPush {
    streams: Vec<LokiStream>,
}

/// Loki push body. One stream per level, labelled with the service name,
/// the level, and any configured static labels. Lines are logfmt.
#[derive(Debug, Clone)]
pub struct LokiEncoder {
    labels: BTreeMap<String, String>,
}

impl LokiEncoder {
    pub fn new(resource: &Resource, extra: &BTreeMap<String, String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("service_name".to_string(), resource.service_name().to_string());
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { labels }
    }
}

impl Encoder<LogRecord> for LokiEncoder {
    fn encode(&self, batch: &[LogRecord]) -> Result<Vec<u8>, ExportError> {
        let mut by_level: BTreeMap<Level, Vec<[String; 2]>> = BTreeMap::new();
        for record in batch {
            let line = crate::observability::text::format_line(record);
            by_level.entry(record.level).or_default().push([
                record.unix_nanos().to_string(),
                line.trim_end().to_string(),
            ]);
        }

        let streams = by_level
            .into_iter()
            .map(|(level, values)| {
                let mut stream = self.labels.clone();
                stream.insert("level".to_string(), level.as_str().to_lowercase());
                LokiStream { stream, values }
            })
            .collect();
        Ok(serde_json::to_vec(&LokiPush { streams })?)
    }
}

fn loki_exporter_config(loki: &LokiConfig, collector: &CollectorConfig) -> HttpExporterConfig {
    let mut headers = Vec::new();
    if let Some(tenant) = &loki.tenant_id {
        headers.push((LOKI_TENANT_HEADER.to_string(), tenant.clone()));
    }
    HttpExporterConfig {
        endpoint: loki.endpoint.clone(),
        timeout: Duration::from_millis(collector.timeout_ms),
        insecure: collector.insecure,
        headers,
    }
}

/// Starts the logger provider and installs the process logger.
#[derive(Debug, Clone)]
pub struct LoggingSubsystem {
    config: LoggingConfig,
    collector: CollectorConfig,
    resource: Resource,
    text: TextSink,
}

impl LoggingSubsystem {
    pub fn new(config: LoggingConfig, collector: CollectorConfig, resource: Resource) -> Self {
        let text = TextSink::stdout(config.level);
        Self {
            config,
            collector,
            resource,
            text,
        }
    }

    /// Replace the stdout text sink, e.g. with one writing to a buffer.
    pub fn with_text_sink(mut self, text: TextSink) -> Self {
        self.text = text;
        self
    }
}

impl Subsystem for LoggingSubsystem {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn start(&self, registry: &ProviderRegistry) -> Result<Arc<dyn TelemetryProvider>, ProviderError> {
        let collector = if self.config.export_to_collector {
            Some(collector_pipeline(&self.config, &self.collector, &self.resource)?)
        } else {
            None
        };

        let mut pipelines = Vec::new();
        if let Some(loki) = &self.config.loki {
            let exporter = HttpExporter::new(
                &loki_exporter_config(loki, &self.collector),
                LokiEncoder::new(&self.resource, &loki.labels),
            )?;
            pipelines.push(Arc::new(BatchProcessor::spawn(
                "loki",
                exporter,
                self.config.batch.to_batch_config(),
                registry.error_handler(),
            )));
        }

        let provider = Arc::new(LoggerProvider::new(collector, pipelines));
        let mut sinks: Vec<SharedSink> = vec![Arc::new(self.text.clone())];
        sinks.extend(provider.sinks(self.config.level));

        registry.set_logger(Logger::new(fanout(sinks)));
        registry.set_logger_provider(provider.clone());

        tracing::debug!(
            remote_sinks = provider.remote_count(),
            level = %self.config.level,
            "Logger provider started"
        );
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};
    use opentelemetry_sdk::testing::logs::InMemoryLogExporter;

    fn resource() -> Resource {
        let mut resource = Resource::default();
        resource.set("service.name", "echo-server");
        resource
    }

    fn in_memory() -> (sdklogs::LoggerProvider, InMemoryLogExporter) {
        let exporter = InMemoryLogExporter::default();
        let provider = sdklogs::LoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn test_collector_sink_emits_and_closes() {
        let (sdk, exporter) = in_memory();
        let closed = Arc::new(AtomicBool::new(false));
        let sink = CollectorSink::new(sdk.logger("test"), Level::Info, closed.clone());
        let context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        assert!(!sink.enabled(Level::Debug, None));
        sink.with_group("http")
            .handle(
                LogRecord::new(Level::Info, "got message")
                    .with_attribute("status", 200i64)
                    .with_context(Some(context)),
            )
            .unwrap();
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);

        closed.store(true, Ordering::Release);
        assert!(!sink.enabled(Level::Error, None));
        assert!(matches!(
            sink.handle(LogRecord::new(Level::Error, "late")),
            Err(SinkError::Closed { .. })
        ));
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
    }

    #[test]
    fn test_attribute_values_keep_their_type() {
        assert_eq!(any_value(&Value::I64(-3)), AnyValue::Int(-3));
        assert_eq!(any_value(&Value::U64(7)), AnyValue::Int(7));
        assert_eq!(any_value(&Value::U64(u64::MAX)), AnyValue::from(u64::MAX.to_string()));
        assert_eq!(any_value(&Value::Bool(true)), AnyValue::Boolean(true));
        assert_eq!(severity(Level::Warn), Severity::Warn);
    }

    #[test]
    fn test_loki_streams_split_by_level() {
        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "dev".to_string());
        let encoder = LokiEncoder::new(&resource(), &labels);

        let body = encoder
            .encode(&[
                LogRecord::new(Level::Info, "a"),
                LogRecord::new(Level::Error, "b"),
                LogRecord::new(Level::Info, "c"),
            ])
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let streams = json["streams"].as_array().unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0]["stream"]["level"], "info");
        assert_eq!(streams[0]["stream"]["env"], "dev");
        assert_eq!(streams[0]["stream"]["service_name"], "echo-server");
        assert_eq!(streams[0]["values"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_loki_tenant_header() {
        let loki = LokiConfig {
            endpoint: "http://loki:3100/loki/api/v1/push".to_string(),
            tenant_id: Some("team-a".to_string()),
            labels: BTreeMap::new(),
        };
        let config = loki_exporter_config(&loki, &CollectorConfig::default());
        assert_eq!(
            config.headers,
            vec![(LOKI_TENANT_HEADER.to_string(), "team-a".to_string())]
        );
    }

    #[tokio::test]
    async fn test_shutdown_with_no_pipelines_succeeds() {
        let provider = LoggerProvider::default();
        assert!(provider.shutdown().await.is_ok());
        assert!(matches!(
            provider.shutdown().await,
            Err(ProviderError::AlreadyShutdown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_collector_sink() {
        let (sdk, exporter) = in_memory();
        let provider = LoggerProvider::new(Some(sdk), Vec::new());
        let sinks = provider.sinks(Level::Info);
        assert_eq!(sinks.len(), 1);
        assert_eq!(provider.remote_count(), 1);

        sinks[0].handle(LogRecord::new(Level::Info, "before")).unwrap();
        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
        provider.shutdown().await.unwrap();

        assert!(!sinks[0].enabled(Level::Error, None));
        assert!(sinks[0].handle(LogRecord::new(Level::Error, "after")).is_err());
    }
}

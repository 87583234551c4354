//! Distributed tracing.
//!
//! # Responsibilities
//! - Build the OTLP span pipeline: exporter, batch processor, sampler
//! - Hand the subscriber a tracer so every `tracing` span becomes an
//!   OpenTelemetry span
//! - Expose the current span context for log correlation and propagation
//!
//! # Design Decisions
//! - Span ids and parent links live in `tracing-opentelemetry`'s span
//!   extensions; there is no separate context stack
//! - Sampling is decided once at the root and inherited by children,
//!   remote parents included

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::trace::{
    SamplingDecision, SpanContext, TraceContextExt, TraceFlags, TraceState, TracerProvider as _,
};
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{
    self as sdktrace, BatchConfigBuilder, BatchSpanProcessor, RandomIdGenerator, Sampler,
};
use tracing::Span;
use tracing_opentelemetry::{OpenTelemetrySpanExt, OtelData};
use tracing_subscriber::registry::{LookupSpan, SpanRef};

use crate::config::{BatchSettings, CollectorConfig, TracingConfig};
use crate::error::ErrorAggregate;
use crate::lifecycle::{ProviderError, Subsystem, TelemetryProvider};
use crate::observability::exporter::HttpExporterConfig;
use crate::observability::otel::{self, INSTRUMENTATION_NAME};
use crate::observability::registry::ProviderRegistry;
use crate::observability::resource::Resource;

/// Sampler for a configured ratio: parent-based, so a trace is kept or
/// dropped as a whole.
pub fn sampler(ratio: f64) -> Sampler {
    let root = if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 || ratio.is_nan() {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    };
    Sampler::ParentBased(Box::new(root))
}

fn batch_config(settings: &BatchSettings) -> sdktrace::BatchConfig {
    BatchConfigBuilder::default()
        .with_max_queue_size(settings.max_queue_size)
        .with_max_export_batch_size(settings.max_batch_size)
        .with_scheduled_delay(Duration::from_millis(settings.scheduled_delay_ms))
        .with_max_export_timeout(Duration::from_millis(settings.export_timeout_ms))
        .build()
}

/// Span context of the span the caller is currently in.
pub fn current_trace_context() -> Option<SpanContext> {
    span_trace_context(&Span::current())
}

/// Span context assigned to `span`. `None` when the span is disabled or
/// the subscriber has no OpenTelemetry layer.
pub fn span_trace_context(span: &Span) -> Option<SpanContext> {
    let context = span.context();
    let span_context = context.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}

/// Span context of a span already looked up in the registry.
///
/// Read straight from the layer's extension data, since the span may not be
/// the current one.
pub(crate) fn span_ref_context<'a, S>(span: &SpanRef<'a, S>) -> Option<SpanContext>
where
    S: LookupSpan<'a>,
{
    let extensions = span.extensions();
    let data = extensions.get::<OtelData>()?;
    let span_id = data.builder.span_id?;

    let parent = data.parent_cx.span();
    let parent = parent.span_context();
    let (trace_id, parent_sampled) = if parent.is_valid() {
        (parent.trace_id(), Some(parent.is_sampled()))
    } else {
        (data.builder.trace_id?, None)
    };

    let sampled = match &data.builder.sampling_result {
        Some(result) => result.decision == SamplingDecision::RecordAndSample,
        None => parent_sampled.unwrap_or(true),
    };
    let flags = if sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };
    Some(SpanContext::new(
        trace_id,
        span_id,
        flags,
        false,
        TraceState::default(),
    ))
}

/// Owns the SDK tracer provider and its span pipeline.
#[derive(Debug)]
pub struct TracerProvider {
    sdk: sdktrace::TracerProvider,
    shut_down: AtomicBool,
}

impl TracerProvider {
    pub fn new(sdk: sdktrace::TracerProvider) -> Self {
        Self {
            sdk,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Tracer for the subscriber's OpenTelemetry layer.
    pub fn tracer(&self) -> sdktrace::Tracer {
        self.sdk.tracer(INSTRUMENTATION_NAME)
    }

    pub fn sdk(&self) -> &sdktrace::TracerProvider {
        &self.sdk
    }
}

#[async_trait]
impl TelemetryProvider for TracerProvider {
    async fn force_flush(&self) -> Result<(), ProviderError> {
        let sdk = self.sdk.clone();
        let results = otel::run_blocking(move || sdk.force_flush()).await?;
        ProviderError::from_aggregate(
            results
                .into_iter()
                .filter_map(Result::err)
                .map(ProviderError::from)
                .collect::<ErrorAggregate<_>>(),
        )
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(ProviderError::AlreadyShutdown);
        }
        let sdk = self.sdk.clone();
        otel::run_blocking(move || sdk.shutdown()).await??;
        Ok(())
    }
}

/// Starts the tracer provider.
#[derive(Debug, Clone)]
pub struct TracingSubsystem {
    config: TracingConfig,
    collector: CollectorConfig,
    resource: Resource,
}

impl TracingSubsystem {
    pub fn new(config: TracingConfig, collector: CollectorConfig, resource: Resource) -> Self {
        Self {
            config,
            collector,
            resource,
        }
    }
}

impl Subsystem for TracingSubsystem {
    fn name(&self) -> &'static str {
        "tracer"
    }

    fn start(&self, registry: &ProviderRegistry) -> Result<Arc<dyn TelemetryProvider>, ProviderError> {
        let http = HttpExporterConfig::for_collector(&self.collector, "/v1/traces");
        let endpoint = http.url()?;
        let exporter = SpanExporter::builder()
            .with_http()
            .with_http_client(http.client()?)
            .with_endpoint(endpoint.as_str())
            .with_protocol(otel::protocol(self.collector.protocol))
            .with_timeout(http.timeout)
            .build()?;

        let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio)
            .with_batch_config(batch_config(&self.config.batch))
            .build();
        let sdk = sdktrace::TracerProvider::builder()
            .with_span_processor(processor)
            .with_sampler(sampler(self.config.sampling_ratio))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(otel::sdk_resource(&self.resource))
            .build();

        let provider = Arc::new(TracerProvider::new(sdk));
        registry.set_tracer_provider(provider.clone());

        tracing::debug!(
            endpoint = %endpoint,
            sampling_ratio = self.config.sampling_ratio,
            "Tracer provider started"
        );
        Ok(provider)
    }
}

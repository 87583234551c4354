//! Process-wide `tracing` subscriber assembly.

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::lifecycle::SetupError;
use crate::observability::bridge::LogBridgeLayer;
use crate::observability::registry::ProviderRegistry;

/// `RUST_LOG` when set, otherwise `fallback`.
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Registry + filter + OpenTelemetry spans + log bridge, reading handles
/// from `registry`.
///
/// The OpenTelemetry layer is only present when a tracer provider is
/// already registered. It sits below the bridge, so a span's context
/// exists by the time the bridge sees the span.
pub fn subscriber(
    registry: Arc<ProviderRegistry>,
    filter: EnvFilter,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let otel = registry
        .tracer_provider()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer()));

    Registry::default()
        .with(filter)
        .with(otel)
        .with(LogBridgeLayer::new(registry))
}

/// Install [`subscriber`] as the global default. Fails if one is already
/// installed.
///
/// OpenTelemetry's own internal errors are routed to the registry's error
/// handler as well.
pub fn init_subscriber(registry: Arc<ProviderRegistry>, filter: &str) -> Result<(), SetupError> {
    subscriber(registry.clone(), env_filter(filter))
        .try_init()
        .map_err(|e| SetupError::Subscriber(e.to_string()))?;

    opentelemetry::global::set_error_handler(move |error| registry.handle_error(&error))
        .map_err(|e| SetupError::Subscriber(e.to_string()))
}

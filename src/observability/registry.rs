//! The process-wide set of active telemetry handles.
//!
//! Exactly one logger, logger provider, tracer provider and meter provider
//! can be active at a time. Handles are written during startup and read
//! lock-free afterwards. Installing a handle replaces the previous one and
//! hands it back; it is never shut down implicitly.
//!
//! The registry is passed around as `Arc<ProviderRegistry>` instead of
//! living in a global, so tests can build as many as they like.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::observability::logger::Logger;
use crate::observability::logging::LoggerProvider;
use crate::observability::metrics::MeterProvider;
use crate::observability::traces::TracerProvider;

/// Receives telemetry-internal failures that have no caller to return to,
/// such as a scheduled batch export that the backend rejected.
#[derive(Clone)]
pub struct ErrorHandler(Arc<dyn Fn(&(dyn Error + 'static)) + Send + Sync>);

impl ErrorHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn handle(&self, error: &(dyn Error + 'static)) {
        (self.0)(error)
    }
}

impl Default for ErrorHandler {
    /// Logs the error through `tracing`.
    fn default() -> Self {
        Self::new(|error| {
            tracing::error!(error = %error, "telemetry error");
        })
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandler")
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    logger: ArcSwapOption<Logger>,
    logger_provider: ArcSwapOption<LoggerProvider>,
    tracer_provider: ArcSwapOption<TracerProvider>,
    meter_provider: ArcSwapOption<MeterProvider>,
    error_handler: ArcSwap<ErrorHandler>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("logger", &self.logger.load().is_some())
            .field("logger_provider", &self.logger_provider.load().is_some())
            .field("tracer_provider", &self.tracer_provider.load().is_some())
            .field("meter_provider", &self.meter_provider.load().is_some())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        self.error_handler.store(Arc::new(handler));
    }

    /// The handler installed right now. Background workers capture it when
    /// they start, which is why it is installed before any subsystem.
    pub fn error_handler(&self) -> ErrorHandler {
        self.error_handler.load().as_ref().clone()
    }

    pub fn handle_error(&self, error: &(dyn Error + 'static)) {
        self.error_handler.load().handle(error)
    }

    pub fn set_logger(&self, logger: Logger) -> Option<Arc<Logger>> {
        self.logger.swap(Some(Arc::new(logger)))
    }

    pub fn logger(&self) -> Option<Arc<Logger>> {
        self.logger.load_full()
    }

    pub fn set_logger_provider(&self, provider: Arc<LoggerProvider>) -> Option<Arc<LoggerProvider>> {
        self.logger_provider.swap(Some(provider))
    }

    pub fn logger_provider(&self) -> Option<Arc<LoggerProvider>> {
        self.logger_provider.load_full()
    }

    pub fn set_tracer_provider(&self, provider: Arc<TracerProvider>) -> Option<Arc<TracerProvider>> {
        self.tracer_provider.swap(Some(provider))
    }

    pub fn tracer_provider(&self) -> Option<Arc<TracerProvider>> {
        self.tracer_provider.load_full()
    }

    pub fn set_meter_provider(&self, provider: Arc<MeterProvider>) -> Option<Arc<MeterProvider>> {
        self.meter_provider.swap(Some(provider))
    }

    pub fn meter_provider(&self) -> Option<Arc<MeterProvider>> {
        self.meter_provider.load_full()
    }
}

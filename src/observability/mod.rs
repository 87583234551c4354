//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! tracing events/spans
//!     → subscriber.rs (filter, OpenTelemetry layer, log bridge)
//!     → traces.rs (SDK tracer provider → batch span processor → OTLP)
//!     → bridge.rs (events → LogRecord → current Logger)
//!
//! Logger
//!     → fanout.rs (one clone per enabled sink)
//!     → text.rs (stdout logfmt)
//!     | logging.rs (SDK logger → batch log processor → OTLP)
//!     | remote.rs (batch.rs → exporter.rs, Loki)
//!
//! MeterProvider::record / metrics facade
//!     → metrics.rs (push gateway or /metrics scrape)
//!     → runtime.rs (process/runtime gauges, push only)
//! ```
//!
//! # Design Decisions
//! - Handles live in an injected `ProviderRegistry`, not in globals
//! - Every remote backend is batched and flushed in the background
//! - Telemetry failures with no caller go to the registry's error handler

pub mod batch;
pub mod bridge;
pub mod exporter;
pub mod fanout;
pub mod fields;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod otel;
pub mod record;
pub mod registry;
pub mod remote;
pub mod resource;
pub mod runtime;
pub mod sink;
pub mod subscriber;
pub mod text;
pub mod traces;

pub use fanout::{fanout, FanoutSink};
pub use logger::Logger;
pub use logging::{LoggerProvider, LoggingSubsystem};
pub use metrics::{MeterProvider, MetricsSubsystem, SharedRecorder};
pub use record::{Attribute, Level, LogRecord, Value};
pub use registry::{ErrorHandler, ProviderRegistry};
pub use sink::{Scope, SharedSink, Sink, SinkError};
pub use text::TextSink;
pub use traces::{current_trace_context, TracerProvider, TracingSubsystem};

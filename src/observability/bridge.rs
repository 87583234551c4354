//! Bridge from `tracing` events to the log sink fan-out.
//!
//! # Responsibilities
//! - Turn every `tracing` event into a [`LogRecord`]
//! - Scope the logger with span fields, so events inside a span carry them
//! - Correlate records with the span's trace context
//! - Report delivery failures to the registry's error handler
//!
//! # Design Decisions
//! - Each span stores its scoped [`Logger`] in its extensions; children
//!   derive theirs from the parent's, never from the registry again
//! - Delivery failures are reported through the error handler, whose
//!   default emits another `tracing` event. An event raised while a record
//!   is being delivered on the same thread is written to stderr instead

use std::cell::Cell;
use std::io::Write;
use std::sync::Arc;

use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::observability::fields::FieldVisitor;
use crate::observability::logger::Logger;
use crate::observability::record::{Level, LogRecord};
use crate::observability::registry::ProviderRegistry;
use crate::observability::text::format_line;
use crate::observability::traces::span_ref_context;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Clears the delivery flag when dropped.
struct Delivering;

impl Delivering {
    /// `None` when this thread is already delivering a record.
    fn enter() -> Option<Self> {
        if DELIVERING.with(|flag| flag.replace(true)) {
            None
        } else {
            Some(Delivering)
        }
    }
}

impl Drop for Delivering {
    fn drop(&mut self) {
        DELIVERING.with(|flag| flag.set(false));
    }
}

/// Logger scoped with a span's fields.
struct ScopedLogger(Logger);

#[derive(Debug, Clone)]
pub struct LogBridgeLayer {
    registry: Arc<ProviderRegistry>,
}

impl LogBridgeLayer {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    fn installed_logger(&self) -> Option<Logger> {
        self.registry.logger().map(|logger| logger.as_ref().clone())
    }
}

impl<S> Layer<S> for LogBridgeLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let parent = span
            .parent()
            .and_then(|parent| parent.extensions().get::<ScopedLogger>().map(|l| l.0.clone()));
        let Some(base) = parent.or_else(|| self.installed_logger()) else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut()
            .insert(ScopedLogger(base.with(visitor.attributes)));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        if let Some(scoped) = extensions.get_mut::<ScopedLogger>() {
            scoped.0 = scoped.0.with(visitor.attributes);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let span = ctx.event_span(event);
        let context = span.as_ref().and_then(span_ref_context);
        let record = LogRecord::new(
            Level::from(metadata.level()),
            visitor.message.unwrap_or_default(),
        )
        .with_target(metadata.target())
        .with_attributes(visitor.attributes)
        .with_context(context);

        let Some(_delivering) = Delivering::enter() else {
            let _ = std::io::stderr().write_all(format_line(&record).as_bytes());
            return;
        };

        let logger = span
            .as_ref()
            .and_then(|span| span.extensions().get::<ScopedLogger>().map(|l| l.0.clone()))
            .or_else(|| self.installed_logger());
        let Some(logger) = logger else {
            return;
        };

        if let Err(e) = logger.emit(record) {
            self.registry.handle_error(&e);
        }
    }
}

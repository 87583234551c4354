//! The application-facing logger handle.

use std::sync::Arc;

use crate::observability::fanout::FanoutSink;
use crate::observability::record::{Attribute, Level, LogRecord};
use crate::observability::sink::{SharedSink, SinkError};
use crate::observability::traces;

/// A cheap, cloneable handle over a (usually fan-out) sink.
///
/// `with` and `with_group` return new loggers; the original keeps its
/// scope.
#[derive(Debug, Clone)]
pub struct Logger {
    sink: SharedSink,
}

impl Logger {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// A logger with no sinks. Every call is a no-op.
    pub fn discard() -> Self {
        Self::new(Arc::new(FanoutSink::default()))
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn with(&self, attrs: Vec<Attribute>) -> Logger {
        if attrs.is_empty() {
            return self.clone();
        }
        Logger::new(self.sink.with_attributes(attrs))
    }

    pub fn with_group(&self, name: &str) -> Logger {
        if name.is_empty() {
            return self.clone();
        }
        Logger::new(self.sink.with_group(name))
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.sink.enabled(level, None)
    }

    /// Deliver a fully built record, skipping sinks not enabled for it.
    pub fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
        if !self.sink.enabled(record.level, record.context.as_ref()) {
            return Ok(());
        }
        self.sink.handle(record)
    }

    /// Log `message` correlated with the current tracing span, if any.
    pub fn log(&self, level: Level, message: &str, attrs: Vec<Attribute>) -> Result<(), SinkError> {
        let context = traces::current_trace_context();
        if !self.sink.enabled(level, context.as_ref()) {
            return Ok(());
        }
        let record = LogRecord::new(level, message)
            .with_attributes(attrs)
            .with_context(context);
        self.sink.handle(record)
    }

    pub fn debug(&self, message: &str, attrs: Vec<Attribute>) -> Result<(), SinkError> {
        self.log(Level::Debug, message, attrs)
    }

    pub fn info(&self, message: &str, attrs: Vec<Attribute>) -> Result<(), SinkError> {
        self.log(Level::Info, message, attrs)
    }

    pub fn warn(&self, message: &str, attrs: Vec<Attribute>) -> Result<(), SinkError> {
        self.log(Level::Warn, message, attrs)
    }

    pub fn error(&self, message: &str, attrs: Vec<Attribute>) -> Result<(), SinkError> {
        self.log(Level::Error, message, attrs)
    }
}

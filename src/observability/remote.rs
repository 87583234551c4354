//! Sinks backed by a remote log backend.

use std::sync::Arc;

use opentelemetry::trace::SpanContext;

use crate::observability::batch::{BatchError, BatchProcessor};
use crate::observability::record::{Attribute, Level, LogRecord};
use crate::observability::sink::{Scope, SharedSink, Sink, SinkError};

/// Queues records on a batching pipeline that ships them to one backend.
///
/// Once the pipeline is shut down the sink reports itself disabled, so a
/// fan-out stops routing records to it instead of collecting errors.
#[derive(Debug, Clone)]
pub struct RemoteSink {
    pipeline: Arc<BatchProcessor<LogRecord>>,
    min_level: Level,
    scope: Scope,
}

impl RemoteSink {
    pub fn new(pipeline: Arc<BatchProcessor<LogRecord>>, min_level: Level) -> Self {
        Self {
            pipeline,
            min_level,
            scope: Scope::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.pipeline.name()
    }

    fn scoped(&self, scope: Scope) -> SharedSink {
        Arc::new(Self {
            pipeline: self.pipeline.clone(),
            min_level: self.min_level,
            scope,
        })
    }
}

impl Sink for RemoteSink {
    fn enabled(&self, level: Level, _context: Option<&SpanContext>) -> bool {
        level >= self.min_level && !self.pipeline.is_closed()
    }

    fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
        self.pipeline
            .emit(self.scope.apply(record))
            .map_err(|e| match e {
                BatchError::Closed { pipeline } => SinkError::Closed { sink: pipeline },
                BatchError::QueueFull { pipeline } => SinkError::Rejected {
                    sink: pipeline,
                    reason: "queue full".to_string(),
                },
                BatchError::Export { pipeline, source } => SinkError::Rejected {
                    sink: pipeline,
                    reason: source.to_string(),
                },
            })
    }

    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink {
        self.scoped(self.scope.with_attributes(attrs))
    }

    fn with_group(&self, name: &str) -> SharedSink {
        self.scoped(self.scope.with_group(name))
    }
}

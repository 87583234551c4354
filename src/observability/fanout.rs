//! Fan-out of log records to several sinks.

use std::sync::Arc;

use opentelemetry::trace::SpanContext;

use crate::error::ErrorAggregate;
use crate::observability::record::{Attribute, Level, LogRecord};
use crate::observability::sink::{SharedSink, Sink, SinkError};

/// A sink that forwards every record to all of its children.
///
/// Delivery is best effort to every child: a failing sink never prevents
/// delivery to the ones after it. With no children the fan-out is inert.
#[derive(Debug, Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn into_shared(self) -> SharedSink {
        Arc::new(self)
    }
}

/// Shorthand for a shared fan-out over `sinks`.
pub fn fanout(sinks: Vec<SharedSink>) -> SharedSink {
    FanoutSink::new(sinks).into_shared()
}

impl Sink for FanoutSink {
    fn enabled(&self, level: Level, context: Option<&SpanContext>) -> bool {
        self.sinks.iter().any(|sink| sink.enabled(level, context))
    }

    fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
        let mut errors = ErrorAggregate::new();
        for sink in &self.sinks {
            if sink.enabled(record.level, record.context.as_ref()) {
                errors.record(sink.handle(record.clone()));
            }
        }
        errors.into_result().map_err(SinkError::Fanout)
    }

    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink {
        let sinks = self
            .sinks
            .iter()
            .map(|sink| sink.with_attributes(attrs.clone()))
            .collect();
        Arc::new(FanoutSink { sinks })
    }

    fn with_group(&self, name: &str) -> SharedSink {
        let sinks = self
            .sinks
            .iter()
            .map(|sink| sink.with_group(name))
            .collect();
        Arc::new(FanoutSink { sinks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct LevelSink {
        min: Level,
        seen: Arc<Mutex<Vec<LogRecord>>>,
    }

    impl Sink for LevelSink {
        fn enabled(&self, level: Level, _context: Option<&SpanContext>) -> bool {
            level >= self.min
        }

        fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(record);
            Ok(())
        }

        fn with_attributes(&self, _attrs: Vec<Attribute>) -> SharedSink {
            Arc::new(LevelSink { min: self.min, seen: self.seen.clone() })
        }

        fn with_group(&self, _name: &str) -> SharedSink {
            Arc::new(LevelSink { min: self.min, seen: self.seen.clone() })
        }
    }

    fn level_sink(min: Level) -> (SharedSink, Arc<Mutex<Vec<LogRecord>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(LevelSink { min, seen: seen.clone() }), seen)
    }

    #[test]
    fn test_empty_fanout_is_inert() {
        let sink = FanoutSink::default();
        assert!(!sink.enabled(Level::Error, None));
        assert!(sink.handle(LogRecord::new(Level::Error, "x")).is_ok());
    }

    #[test]
    fn test_enabled_if_any_child_enabled() {
        let (debug, _) = level_sink(Level::Debug);
        let (error, _) = level_sink(Level::Error);
        let sink = FanoutSink::new(vec![error, debug]);

        assert!(sink.enabled(Level::Debug, None));
        assert!(!sink.enabled(Level::Trace, None));
    }

    #[test]
    fn test_handle_respects_per_sink_level() {
        let (info, info_seen) = level_sink(Level::Info);
        let (error, error_seen) = level_sink(Level::Error);
        let sink = FanoutSink::new(vec![info, error]);

        sink.handle(LogRecord::new(Level::Warn, "warned")).unwrap();

        assert_eq!(info_seen.lock().unwrap().len(), 1);
        assert!(error_seen.lock().unwrap().is_empty());
    }
}

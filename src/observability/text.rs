//! Text stream sink.
//!
//! Writes one logfmt-style line per record:
//!
//! ```text
//! time=2024-05-01T10:00:00.000Z level=INFO msg="got message" request_body=hi trace_id=... span_id=...
//! ```

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::SpanContext;

use crate::observability::record::{Attribute, Level, LogRecord, Value};
use crate::observability::sink::{Scope, SharedSink, Sink, SinkError};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// A sink writing formatted lines to a byte stream.
#[derive(Clone)]
pub struct TextSink {
    writer: SharedWriter,
    min_level: Level,
    scope: Scope,
}

impl std::fmt::Debug for TextSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSink")
            .field("min_level", &self.min_level)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TextSink {
    pub fn new<W>(writer: W, min_level: Level) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            min_level,
            scope: Scope::new(),
        }
    }

    pub fn stdout(min_level: Level) -> Self {
        Self::new(io::stdout(), min_level)
    }

    fn scoped(&self, scope: Scope) -> SharedSink {
        Arc::new(Self {
            writer: self.writer.clone(),
            min_level: self.min_level,
            scope,
        })
    }
}

impl Sink for TextSink {
    fn enabled(&self, level: Level, _context: Option<&SpanContext>) -> bool {
        level >= self.min_level
    }

    fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
        let record = self.scope.apply(record);
        let line = format_line(&record);

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| SinkError::Io {
                sink: "text".to_string(),
                source,
            })
    }

    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink {
        self.scoped(self.scope.with_attributes(attrs))
    }

    fn with_group(&self, name: &str) -> SharedSink {
        self.scoped(self.scope.with_group(name))
    }
}

/// Format a record as a single newline-terminated logfmt line.
pub fn format_line(record: &LogRecord) -> String {
    let time: DateTime<Utc> = record.timestamp.into();
    let mut line = String::with_capacity(128);

    let _ = write!(
        line,
        "time={} level={} msg={}",
        time.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.level,
        quote(&record.message)
    );
    for attr in &record.attributes {
        let value = match &attr.value {
            Value::Str(s) => quote(s),
            other => other.to_string(),
        };
        let _ = write!(line, " {}={}", attr.key, value);
    }
    if let Some(ctx) = &record.context {
        let _ = write!(line, " trace_id={} span_id={}", ctx.trace_id(), ctx.span_id());
    }
    line.push('\n');
    line
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"' || c.is_control());
    if needs_quotes {
        format!("{:?}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_format_line_quotes_when_needed() {
        let record = LogRecord::new(Level::Info, "got message")
            .with_attribute("request_body", "hi")
            .with_attribute("note", "two words")
            .with_attribute("count", 3i64);
        let line = format_line(&record);

        assert!(line.contains("level=INFO msg=\"got message\""));
        assert!(line.contains(" request_body=hi"));
        assert!(line.contains(" note=\"two words\""));
        assert!(line.contains(" count=3"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_scoped_sink_writes_to_same_stream() {
        let buffer = Buffer::default();
        let sink = TextSink::new(buffer.clone(), Level::Info);
        let scoped = sink
            .with_group("req")
            .with_attributes(vec![Attribute::new("id", 7i64)]);

        sink.handle(LogRecord::new(Level::Info, "plain")).unwrap();
        scoped.handle(LogRecord::new(Level::Info, "scoped")).unwrap();

        let out = buffer.contents();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("req.id"));
        assert!(lines[1].contains("req.id=7"));
    }

    #[test]
    fn test_correlated_line_carries_ids() {
        use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};

        let context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        let line = format_line(&LogRecord::new(Level::Info, "x").with_context(Some(context)));
        assert!(line.contains(" trace_id=4bf92f3577b34da6a3ce929d0e0e4736 span_id=00f067aa0ba902b7"));
    }

    #[test]
    fn test_level_threshold() {
        let sink = TextSink::new(Buffer::default(), Level::Warn);
        assert!(!sink.enabled(Level::Info, None));
        assert!(sink.enabled(Level::Error, None));
    }
}

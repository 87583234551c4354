//! The log sink abstraction.
//!
//! A sink decides whether it wants a record at a given level, handles
//! records, and produces scoped copies of itself. Scoping never mutates the
//! receiver: `with_attributes` and `with_group` return a new sink so that
//! callers holding differently-scoped loggers never interfere.

use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::SpanContext;
use thiserror::Error;

use crate::error::ErrorAggregate;
use crate::observability::record::{Attribute, Level, LogRecord};

/// Shared, immutable sink handle.
pub type SharedSink = Arc<dyn Sink>;

pub trait Sink: Send + Sync + fmt::Debug {
    /// Whether a record at `level` would be handled.
    fn enabled(&self, level: Level, context: Option<&SpanContext>) -> bool;

    /// Deliver a record. The sink owns its copy.
    fn handle(&self, record: LogRecord) -> Result<(), SinkError>;

    /// A new sink that adds `attrs` to every record it handles.
    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink;

    /// A new sink that qualifies subsequent attributes with `name`.
    fn with_group(&self, name: &str) -> SharedSink;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{sink}: write failed: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{sink}: record rejected: {reason}")]
    Rejected { sink: String, reason: String },

    #[error("{sink}: sink is closed")]
    Closed { sink: String },

    #[error("{0}")]
    Fanout(ErrorAggregate<SinkError>),
}

impl SinkError {
    /// Name of the sink that failed, if it is a single-sink error.
    pub fn sink(&self) -> Option<&str> {
        match self {
            SinkError::Io { sink, .. }
            | SinkError::Rejected { sink, .. }
            | SinkError::Closed { sink } => Some(sink),
            SinkError::Fanout(_) => None,
        }
    }
}

/// Attribute and group state carried by a scoped sink.
///
/// Groups qualify attribute keys with a dotted prefix, so
/// `with_group("http").with_attributes([status=200])` renders `http.status=200`.
/// Attributes added before a group was opened keep their unqualified key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    prefix: String,
    attributes: Vec<Attribute>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(&self, attrs: Vec<Attribute>) -> Self {
        let mut scope = self.clone();
        scope
            .attributes
            .extend(attrs.into_iter().map(|attr| self.qualify(attr)));
        scope
    }

    /// Empty group names are ignored.
    pub fn with_group(&self, name: &str) -> Self {
        let mut scope = self.clone();
        if !name.is_empty() {
            scope.prefix.push_str(name);
            scope.prefix.push('.');
        }
        scope
    }

    /// Attributes bound to this scope, already qualified.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Prepend scope attributes and qualify the record's own attributes with
    /// the open groups.
    pub fn apply(&self, mut record: LogRecord) -> LogRecord {
        if self.prefix.is_empty() && self.attributes.is_empty() {
            return record;
        }
        let own = std::mem::take(&mut record.attributes);
        record.attributes = self.attributes.clone();
        record
            .attributes
            .extend(own.into_iter().map(|attr| self.qualify(attr)));
        record
    }

    fn qualify(&self, attr: Attribute) -> Attribute {
        if self.prefix.is_empty() {
            attr
        } else {
            Attribute {
                key: format!("{}{}", self.prefix, attr.key),
                value: attr.value,
            }
        }
    }
}

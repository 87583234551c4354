//! Collecting `tracing` fields into attributes.

use std::fmt;

use tracing::field::{Field, Visit};

use crate::observability::record::{Attribute, Value};

/// Visitor splitting a field set into the message and everything else.
#[derive(Debug, Default)]
pub struct FieldVisitor {
    pub message: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            // Span controls read by the OpenTelemetry layer.
            name if name.starts_with("otel.") => {}
            // Bookkeeping fields added by the `log` compatibility layer.
            name if name.starts_with("log.") => {}
            name => self.attributes.push(Attribute::new(name, value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, Value::from(format!("{:?}", value)));
    }
}

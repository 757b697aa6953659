//! Conversion of OTLP resource log groups into table rows.

use crate::logs::attributes::{body_to_json, flatten, AttributeValue, FlatAttributes, ScalarValue};
use chrono::{DateTime, Utc};
use opentelemetry::otel_debug;
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use std::sync::Arc;

/// One log record, denormalized into the shape of the logs table.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRow {
    /// Event time of the record.
    pub timestamp: DateTime<Utc>,
    /// Lowercase hex trace id, empty when the record carries none.
    pub trace_id: String,
    /// Lowercase hex span id, empty when the record carries none.
    pub span_id: String,
    /// W3C trace flags.
    pub flags: u32,
    /// Severity as reported by the source.
    pub severity_text: String,
    /// Numeric severity.
    pub severity_number: i32,
    /// `service.name` of the owning resource, empty when absent.
    pub service_name: Arc<str>,
    /// Body as JSON text.
    pub body: String,
    /// Attributes of the owning resource. Shared by every row of the group.
    pub resource_attributes: Arc<FlatAttributes>,
    /// Attributes of the record.
    pub log_attributes: Arc<FlatAttributes>,
}

/// Lazily turns every log record of `resource_logs` into a [`LogRow`].
///
/// Rows are produced in resource, scope, record order. Resource attributes are
/// flattened and the service name is resolved once per resource group.
pub fn transform(resource_logs: &[ResourceLogs]) -> impl Iterator<Item = LogRow> + '_ {
    resource_logs.iter().flat_map(|group| {
        let resource = ResourceContext::new(group);
        group
            .scope_logs
            .iter()
            .flat_map(|scope| scope.log_records.iter())
            .map(move |record| resource.row(record))
    })
}

struct ResourceContext {
    service_name: Arc<str>,
    attributes: Arc<FlatAttributes>,
}

impl ResourceContext {
    fn new(group: &ResourceLogs) -> Self {
        let attributes = group
            .resource
            .as_ref()
            .map(|resource| flatten(&resource.attributes))
            .unwrap_or_default();
        // Only a string `service.name` names the service.
        let service_name: Arc<str> = match attributes.get(SERVICE_NAME) {
            Some(AttributeValue::Scalar(ScalarValue::String(name))) => Arc::from(name.as_str()),
            _ => Arc::from(""),
        };

        ResourceContext {
            service_name,
            attributes: Arc::new(attributes),
        }
    }

    fn row(&self, record: &LogRecord) -> LogRow {
        let body = match body_to_json(record.body.as_ref()) {
            Ok(body) => body,
            Err(err) => {
                otel_debug!(
                    name: "CassandraExporter.BodySerializationFailed",
                    error = format!("{err}"),
                    service_name = self.service_name.as_ref()
                );
                String::new()
            }
        };

        LogRow {
            timestamp: timestamp(record.time_unix_nano),
            trace_id: render_id(&record.trace_id),
            span_id: render_id(&record.span_id),
            flags: record.flags,
            severity_text: record.severity_text.clone(),
            severity_number: record.severity_number,
            service_name: Arc::clone(&self.service_name),
            body,
            resource_attributes: Arc::clone(&self.attributes),
            log_attributes: Arc::new(flatten(&record.attributes)),
        }
    }
}

fn timestamp(time_unix_nano: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(i64::try_from(time_unix_nano).unwrap_or(i64::MAX))
}

// An all-zero id is the OTLP encoding of "no id".
fn render_id(id: &[u8]) -> String {
    if id.iter().all(|b| *b == 0) {
        String::new()
    } else {
        hex::encode(id)
    }
}

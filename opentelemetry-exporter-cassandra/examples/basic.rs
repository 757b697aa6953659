//! Run with `cargo run --example basic --features testing`.
//!
//! Writes a small batch into the in-memory cluster. Replace the connector with
//! a driver backed one to target a real cluster.

use opentelemetry_exporter_cassandra::testing::InMemoryCluster;
use opentelemetry_exporter_cassandra::{CassandraExporterConfig, CassandraLogsExporter, ExportContext};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
dsn: "127.0.0.1"
keyspace: demo
logs_table: app_logs
compression:
  algorithm: ZstdCompressor
consistency: local_one
"#;

fn string_value(value: &str) -> Option<AnyValue> {
    Some(AnyValue {
        value: Some(Value::StringValue(value.to_string())),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let config = CassandraExporterConfig::from_yaml_str(CONFIG)?;
    let cluster = InMemoryCluster::new();
    let exporter = CassandraLogsExporter::new(config, Arc::new(cluster.connector()));

    exporter
        .start(&ExportContext::new().with_timeout(Duration::from_secs(5)))
        .await?;

    let request = ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "service.name".to_string(),
                    value: string_value("basic-example"),
                }],
                ..Default::default()
            }),
            scope_logs: vec![ScopeLogs {
                log_records: ["user logged in", "cart updated"]
                    .into_iter()
                    .map(|message| LogRecord {
                        severity_number: 9,
                        severity_text: "INFO".to_string(),
                        body: string_value(message),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let outcome = exporter
        .push_request(
            &ExportContext::new().with_timeout(Duration::from_secs(5)),
            &request,
        )
        .await?;
    println!(
        "delivered {} rows, {} failed",
        outcome.delivered(),
        outcome.failed()
    );

    for row in cluster.rows("demo.app_logs") {
        println!("{row:?}");
    }

    exporter.shutdown(&ExportContext::new()).await?;
    Ok(())
}

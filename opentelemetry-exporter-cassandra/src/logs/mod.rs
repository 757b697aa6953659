mod attributes;
mod exporter;
mod schema;
mod transform;
mod writer;

pub use attributes::{flatten, AttributeValue, FlatAttributes, ScalarValue};
pub use exporter::CassandraLogsExporter;
pub use schema::{create_keyspace_cql, create_logs_table_cql, insert_log_cql, SchemaInitializer};
pub use transform::{transform, LogRow};
pub use writer::{LogWriter, WriteOutcome};

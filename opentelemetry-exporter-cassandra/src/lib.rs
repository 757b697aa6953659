//! The Cassandra exporter persists OpenTelemetry logs into a Cassandra (or
//! Cassandra compatible) table, one row per log record.
//!
//! On [`CassandraLogsExporter::start`] the exporter opens a session, creates the
//! keyspace and logs table if they are missing, and then writes each pushed log
//! record with its own `INSERT`. A failed insert is logged and counted but never
//! fails the rest of the batch.
//!
//! The crate does not link a Cassandra driver. A driver adapter implements
//! [`SessionConnector`] and [`CqlSession`]; the `testing` feature ships an
//! in-memory implementation.
//!
//! ```rust
//! # #[cfg(feature = "testing")]
//! # futures_executor::block_on(async {
//! use opentelemetry_exporter_cassandra::testing::InMemoryCluster;
//! use opentelemetry_exporter_cassandra::{
//!     CassandraExporterConfig, CassandraLogsExporter, ExportContext,
//! };
//! use std::sync::Arc;
//!
//! let cluster = InMemoryCluster::new();
//! let config = CassandraExporterConfig::builder()
//!     .with_keyspace("telemetry")
//!     .build()
//!     .unwrap();
//! let exporter = CassandraLogsExporter::new(config, Arc::new(cluster.connector()));
//!
//! exporter.start(&ExportContext::new()).await.unwrap();
//! assert!(cluster.has_table("telemetry.otel_logs"));
//! exporter.shutdown(&ExportContext::new()).await.unwrap();
//! # });
//! ```

#![warn(missing_debug_implementations, missing_docs)]

mod config;
mod context;
mod error;
mod logs;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    AuthConfig, CassandraExporterConfig, CassandraExporterConfigBuilder, CompressionConfig,
    ReplicationConfig,
};
pub use context::{ContextDone, ExportContext};
pub use error::{Error, Result};
pub use logs::*;
pub use session::{
    Consistency, CqlSession, CqlValue, Credentials, SessionConnector, SessionError, SessionOptions,
};

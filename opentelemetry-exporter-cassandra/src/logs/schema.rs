//! CQL statements for the logs table and the startup schema bootstrap.

use crate::config::CassandraExporterConfig;
use crate::context::ExportContext;
use crate::error::{Error, Result};
use crate::session::{CqlSession, SessionConnector, SessionOptions};
use opentelemetry::{otel_debug, otel_warn};
use std::sync::Arc;

const CREATE_KEYSPACE_CQL: &str = "CREATE KEYSPACE IF NOT EXISTS %%KEYSPACE%% \
WITH REPLICATION = { 'class' : '%%CLASS%%', 'replication_factor' : %%FACTOR%% }";

const CREATE_LOGS_TABLE_CQL: &str = "CREATE TABLE IF NOT EXISTS %%TABLE%% (\
time timestamp, \
traceId text, \
spanId text, \
flags bigint, \
severityText text, \
severityNumber int, \
serviceName text, \
body text, \
resourceAttributes map<text, text>, \
logAttributes map<text, text>, \
id timeuuid, \
PRIMARY KEY ((serviceName), time, id)\
) WITH CLUSTERING ORDER BY (time DESC, id ASC) \
AND compression = { 'class' : '%%COMPRESSION%%' }";

const INSERT_LOG_CQL: &str = "INSERT INTO %%TABLE%% (\
time, traceId, spanId, flags, severityText, severityNumber, serviceName, body, \
resourceAttributes, logAttributes, id\
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, now())";

fn replace_placeholders(template: &str, replacements: &[(&str, &str)]) -> String {
    replacements
        .iter()
        .fold(template.to_string(), |sql, (key, value)| {
            sql.replace(&format!("%%{key}%%"), value)
        })
}

/// `CREATE KEYSPACE IF NOT EXISTS` for the configured keyspace and replication.
pub fn create_keyspace_cql(config: &CassandraExporterConfig) -> String {
    replace_placeholders(
        CREATE_KEYSPACE_CQL,
        &[
            ("KEYSPACE", config.keyspace.as_str()),
            ("CLASS", config.replication.class.as_str()),
            ("FACTOR", config.replication.replication_factor.to_string().as_str()),
        ],
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the logs table.
pub fn create_logs_table_cql(config: &CassandraExporterConfig) -> String {
    replace_placeholders(
        CREATE_LOGS_TABLE_CQL,
        &[
            ("TABLE", config.qualified_table().as_str()),
            ("COMPRESSION", config.compression.algorithm.as_str()),
        ],
    )
}

/// Parameterized insert of one row. Values bind in column order; `id` is
/// generated by the server with `now()`.
pub fn insert_log_cql(config: &CassandraExporterConfig) -> String {
    replace_placeholders(
        INSERT_LOG_CQL,
        &[("TABLE", config.qualified_table().as_str())],
    )
}

/// Ensures the keyspace and logs table exist before any write.
#[derive(Debug)]
pub struct SchemaInitializer<'a> {
    config: &'a CassandraExporterConfig,
}

impl<'a> SchemaInitializer<'a> {
    /// Bootstrap for `config`.
    pub fn new(config: &'a CassandraExporterConfig) -> Self {
        SchemaInitializer { config }
    }

    /// Opens a short-lived session, creates the keyspace and then the table.
    ///
    /// Both statements use `IF NOT EXISTS`, so running this against an
    /// initialized cluster succeeds. The session is closed on every path.
    pub async fn initialize(
        &self,
        ctx: &ExportContext,
        connector: &dyn SessionConnector,
    ) -> Result<()> {
        let options = SessionOptions::from(self.config);
        let session = ctx
            .run(connector.connect(&options))
            .await
            .map_err(Error::Startup)?
            .map_err(Error::Connect)?;

        let result = self.create_schema(ctx, &session).await;

        match (ctx.run(session.close()).await, &result) {
            (Ok(Ok(())), _) => {}
            (Ok(Err(err)), Ok(())) => return Err(Error::Close(err)),
            (Err(done), Ok(())) => return Err(Error::Startup(done)),
            (Ok(Err(err)), Err(_)) => {
                otel_warn!(
                    name: "CassandraExporter.SchemaSessionCloseFailed",
                    error = format!("{err}")
                );
            }
            (Err(done), Err(_)) => {
                otel_warn!(
                    name: "CassandraExporter.SchemaSessionCloseFailed",
                    error = format!("{done}")
                );
            }
        }
        result
    }

    async fn create_schema(
        &self,
        ctx: &ExportContext,
        session: &Arc<dyn CqlSession>,
    ) -> Result<()> {
        let keyspace_cql = create_keyspace_cql(self.config);
        ctx.run(session.execute(&keyspace_cql, &[]))
            .await
            .map_err(Error::Startup)?
            .map_err(|source| Error::CreateKeyspace {
                keyspace: self.config.keyspace.clone(),
                source,
            })?;
        otel_debug!(
            name: "CassandraExporter.KeyspaceReady",
            keyspace = self.config.keyspace.as_str()
        );

        let table = self.config.qualified_table();
        let table_cql = create_logs_table_cql(self.config);
        ctx.run(session.execute(&table_cql, &[]))
            .await
            .map_err(Error::Startup)?
            .map_err(|source| Error::CreateTable {
                table: table.clone(),
                source,
            })?;
        otel_debug!(
            name: "CassandraExporter.TableReady",
            table = table.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDone;
    use crate::testing::InMemoryCluster;
    use tokio_util::sync::CancellationToken;

    fn config() -> CassandraExporterConfig {
        CassandraExporterConfig::builder()
            .with_keyspace("telemetry")
            .with_logs_table("app_logs")
            .with_replication("NetworkTopologyStrategy", 3)
            .with_compression("ZstdCompressor")
            .build()
            .unwrap()
    }

    #[test]
    fn test_keyspace_cql() {
        assert_eq!(
            create_keyspace_cql(&config()),
            "CREATE KEYSPACE IF NOT EXISTS telemetry WITH REPLICATION = \
             { 'class' : 'NetworkTopologyStrategy', 'replication_factor' : 3 }"
        );
    }

    #[test]
    fn test_table_cql() {
        let cql = create_logs_table_cql(&config());
        assert!(cql.starts_with("CREATE TABLE IF NOT EXISTS telemetry.app_logs (time timestamp, "));
        assert!(cql.contains("resourceAttributes map<text, text>, logAttributes map<text, text>"));
        assert!(cql.contains("id timeuuid, PRIMARY KEY ((serviceName), time, id)"));
        assert!(cql.contains("CLUSTERING ORDER BY (time DESC, id ASC)"));
        assert!(cql.ends_with("compression = { 'class' : 'ZstdCompressor' }"));
        assert!(!cql.contains("%%"));
    }

    #[test]
    fn test_insert_cql_binds_ten_values() {
        let cql = insert_log_cql(&config());
        assert!(cql.starts_with("INSERT INTO telemetry.app_logs (time, traceId, spanId, flags, "));
        assert_eq!(cql.matches('?').count(), 10);
        assert!(cql.ends_with("logAttributes, id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, now())"));
    }

    #[tokio::test]
    async fn test_initialize_creates_keyspace_then_table() {
        let cluster = InMemoryCluster::new();
        let config = config();

        SchemaInitializer::new(&config)
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap();

        assert!(cluster.has_keyspace("telemetry"));
        assert!(cluster.has_table("telemetry.app_logs"));
        let statements = cluster.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE KEYSPACE"));
        assert!(statements[1].starts_with("CREATE TABLE"));
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_idempotent() {
        let cluster = InMemoryCluster::new();
        let config = config();
        let initializer = SchemaInitializer::new(&config);

        initializer
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap();
        initializer
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap();

        assert!(cluster.has_table("telemetry.app_logs"));
        assert_eq!(cluster.sessions_opened(), 2);
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_keyspace_failure_skips_table() {
        let cluster = InMemoryCluster::new();
        cluster.fail_statements_containing("CREATE KEYSPACE");
        let config = config();

        let err = SchemaInitializer::new(&config)
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CreateKeyspace { ref keyspace, .. } if keyspace == "telemetry"));
        assert!(!cluster.has_table("telemetry.app_logs"));
        assert!(cluster.statements().iter().all(|s| !s.starts_with("CREATE TABLE")));
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_table_failure_is_reported() {
        let cluster = InMemoryCluster::new();
        cluster.fail_statements_containing("CREATE TABLE");
        let config = config();

        let err = SchemaInitializer::new(&config)
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CreateTable { ref table, .. } if table == "telemetry.app_logs"));
        assert!(cluster.has_keyspace("telemetry"));
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let cluster = InMemoryCluster::new();
        cluster.fail_connect(true);
        let config = config();

        let err = SchemaInitializer::new(&config)
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
        assert!(cluster.statements().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_bootstrap() {
        let cluster = InMemoryCluster::new();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExportContext::new().with_cancellation(token);
        let config = config();

        let err = SchemaInitializer::new(&config)
            .initialize(&ctx, &cluster.connector())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Startup(ContextDone::Cancelled)));
        assert!(cluster.statements().is_empty());
    }
}

//! Row-at-a-time persistence of transformed log rows.

use crate::config::CassandraExporterConfig;
use crate::context::{ContextDone, ExportContext};
use crate::error::{Error, Result};
use crate::logs::schema::insert_log_cql;
use crate::logs::transform::LogRow;
use crate::session::{CqlSession, CqlValue};
use opentelemetry::{otel_debug, otel_error, otel_warn};
use std::time::Instant;

/// Per-batch delivery counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    delivered: usize,
    failed: usize,
}

impl WriteOutcome {
    /// Rows the session accepted.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Rows whose insert failed.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Rows dispatched to the session.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    /// True when no row failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Turns any row failure into [`Error::PartialDelivery`].
    pub fn into_strict_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::PartialDelivery {
                attempted: self.attempted(),
                failed: self.failed,
            })
        }
    }
}

/// Issues one insert per row. A failed row is logged and skipped, the rest of
/// the batch is still written.
#[derive(Debug)]
pub struct LogWriter {
    table: String,
    insert_cql: String,
}

impl LogWriter {
    /// Writer targeting the configured logs table.
    pub fn new(config: &CassandraExporterConfig) -> Self {
        LogWriter {
            table: config.qualified_table(),
            insert_cql: insert_log_cql(config),
        }
    }

    /// Inserts `rows` in order.
    ///
    /// Returns `Ok` even when rows failed; inspect the [`WriteOutcome`]. Only a
    /// cancelled or expired `ctx` aborts the batch, with [`Error::Interrupted`].
    pub async fn write<I>(
        &self,
        ctx: &ExportContext,
        session: &dyn CqlSession,
        rows: I,
    ) -> Result<WriteOutcome>
    where
        I: IntoIterator<Item = LogRow>,
    {
        let start = Instant::now();
        let mut outcome = WriteOutcome::default();
        let mut rows = rows.into_iter();

        while let Some(row) = rows.next() {
            if let Some(reason) = ctx.done() {
                let skipped = 1 + rows.count();
                return Err(self.interrupted(reason, outcome, skipped));
            }

            let values = bind(&row);
            match ctx.run(session.execute(&self.insert_cql, &values)).await {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    self.log_failure(&row, format!("{err}"));
                }
                Err(reason) => {
                    outcome.failed += 1;
                    self.log_failure(&row, format!("{reason}"));
                    let skipped = rows.count();
                    return Err(self.interrupted(reason, outcome, skipped));
                }
            }
        }

        otel_debug!(
            name: "CassandraExporter.LogsInserted",
            table = self.table.as_str(),
            records = outcome.attempted(),
            failed = outcome.failed,
            cost_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
        );
        Ok(outcome)
    }

    fn log_failure(&self, row: &LogRow, error: String) {
        otel_error!(
            name: "CassandraExporter.InsertFailed",
            error = error.as_str(),
            table = self.table.as_str(),
            timestamp = row.timestamp.to_rfc3339(),
            service_name = row.service_name.as_ref(),
            trace_id = row.trace_id.as_str()
        );
    }

    fn interrupted(
        &self,
        reason: ContextDone,
        outcome: WriteOutcome,
        skipped: usize,
    ) -> Error {
        otel_warn!(
            name: "CassandraExporter.BatchInterrupted",
            reason = format!("{reason}"),
            table = self.table.as_str(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            skipped = skipped
        );
        Error::Interrupted {
            reason,
            outcome,
            skipped,
        }
    }
}

// Column order of the insert statement.
fn bind(row: &LogRow) -> [CqlValue; 10] {
    [
        CqlValue::Timestamp(row.timestamp),
        CqlValue::Text(row.trace_id.clone()),
        CqlValue::Text(row.span_id.clone()),
        CqlValue::BigInt(i64::from(row.flags)),
        CqlValue::Text(row.severity_text.clone()),
        CqlValue::Int(row.severity_number),
        CqlValue::Text(row.service_name.to_string()),
        CqlValue::Text(row.body.clone()),
        CqlValue::Attributes(row.resource_attributes.clone()),
        CqlValue::Attributes(row.log_attributes.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::attributes::FlatAttributes;
    use crate::logs::schema::SchemaInitializer;
    use crate::testing::InMemoryCluster;
    use chrono::DateTime;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn row(n: i64) -> LogRow {
        LogRow {
            timestamp: DateTime::from_timestamp_nanos(n * 1_000_000),
            trace_id: format!("{n:032x}"),
            span_id: String::new(),
            flags: 1,
            severity_text: "WARN".to_string(),
            severity_number: 13,
            service_name: Arc::from("svc"),
            body: format!("\"row {n}\""),
            resource_attributes: Arc::new(FlatAttributes::new()),
            log_attributes: Arc::new(FlatAttributes::new()),
        }
    }

    async fn ready_cluster(config: &CassandraExporterConfig) -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        SchemaInitializer::new(config)
            .initialize(&ExportContext::new(), &cluster.connector())
            .await
            .unwrap();
        cluster
    }

    #[test]
    fn test_outcome_strict_result() {
        let complete = WriteOutcome {
            delivered: 3,
            failed: 0,
        };
        assert!(complete.is_complete());
        assert_eq!(complete.into_strict_result().unwrap(), complete);

        let partial = WriteOutcome {
            delivered: 2,
            failed: 1,
        };
        assert_eq!(partial.attempted(), 3);
        assert!(matches!(
            partial.into_strict_result(),
            Err(Error::PartialDelivery {
                attempted: 3,
                failed: 1
            })
        ));
    }

    #[test]
    fn test_bind_follows_column_order() {
        let values = bind(&row(7));
        assert_eq!(
            values[0],
            CqlValue::Timestamp(DateTime::from_timestamp_nanos(7_000_000))
        );
        assert_eq!(values[3], CqlValue::BigInt(1));
        assert_eq!(values[5], CqlValue::Int(13));
        assert_eq!(values[6], CqlValue::Text("svc".to_string()));
        assert_eq!(values[7], CqlValue::Text("\"row 7\"".to_string()));
    }

    #[tokio::test]
    async fn test_writes_every_row() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        let session = cluster.connector().open_session();

        let outcome = LogWriter::new(&config)
            .write(&ExportContext::new(), &*session, (1..=3).map(row))
            .await
            .unwrap();

        assert_eq!(outcome.delivered(), 3);
        assert!(outcome.is_complete());
        assert_eq!(cluster.rows("otel.otel_logs").len(), 3);
    }

    #[tokio::test]
    async fn test_rows_sharing_service_and_time_are_not_overwritten() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        let session = cluster.connector().open_session();

        let rows = (1..=3).map(|n| LogRow {
            trace_id: String::new(),
            body: format!("\"copy {n}\""),
            ..row(5)
        });
        let outcome = LogWriter::new(&config)
            .write(&ExportContext::new(), &*session, rows)
            .await
            .unwrap();

        assert_eq!(outcome.delivered(), 3);
        let stored = cluster.rows("otel.otel_logs");
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2][7], CqlValue::Text("\"copy 3\"".to_string()));
    }

    #[tokio::test]
    async fn test_failed_row_does_not_abort_batch() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        cluster.fail_insert_number(2);
        let session = cluster.connector().open_session();

        let outcome = LogWriter::new(&config)
            .write(&ExportContext::new(), &*session, (1..=3).map(row))
            .await
            .unwrap();

        assert_eq!(outcome.delivered(), 2);
        assert_eq!(outcome.failed(), 1);
        let stored = cluster.rows("otel.otel_logs");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0][7], CqlValue::Text("\"row 1\"".to_string()));
        assert_eq!(stored[1][7], CqlValue::Text("\"row 3\"".to_string()));
    }

    #[tokio::test]
    async fn test_missing_table_fails_every_row() {
        let config = CassandraExporterConfig::default();
        let cluster = InMemoryCluster::new();
        let session = cluster.connector().open_session();

        let outcome = LogWriter::new(&config)
            .write(&ExportContext::new(), &*session, (1..=2).map(row))
            .await
            .unwrap();
        assert_eq!(outcome.delivered(), 0);
        assert_eq!(outcome.failed(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        let session = cluster.connector().open_session();

        let outcome = LogWriter::new(&config)
            .write(&ExportContext::new(), &*session, std::iter::empty())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::default());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_row_skips_batch() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        let session = cluster.connector().open_session();
        let token = CancellationToken::new();
        token.cancel();

        let err = LogWriter::new(&config)
            .write(
                &ExportContext::new().with_cancellation(token),
                &*session,
                (1..=4).map(row),
            )
            .await
            .unwrap_err();

        match err {
            Error::Interrupted {
                reason,
                outcome,
                skipped,
            } => {
                assert_eq!(reason, ContextDone::Cancelled);
                assert_eq!(outcome, WriteOutcome::default());
                assert_eq!(skipped, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cluster.rows("otel.otel_logs").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_hanging_insert() {
        let config = CassandraExporterConfig::default();
        let cluster = ready_cluster(&config).await;
        let session = cluster.connector().open_session();
        cluster.hang_inserts_after(1);

        let ctx = ExportContext::new().with_timeout(Duration::from_secs(1));
        let err = LogWriter::new(&config)
            .write(&ctx, &*session, (1..=4).map(row))
            .await
            .unwrap_err();

        match err {
            Error::Interrupted {
                reason,
                outcome,
                skipped,
            } => {
                assert_eq!(reason, ContextDone::DeadlineExceeded);
                assert_eq!(outcome.delivered(), 1);
                assert_eq!(outcome.failed(), 1);
                assert_eq!(skipped, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.rows("otel.otel_logs").len(), 1);
    }
}

use crate::config::CassandraExporterConfig;
use crate::context::ExportContext;
use crate::error::{Error, Result};
use crate::logs::schema::SchemaInitializer;
use crate::logs::transform::transform;
use crate::logs::writer::{LogWriter, WriteOutcome};
use crate::session::{CqlSession, SessionConnector, SessionOptions};
use core::fmt;
use opentelemetry::{otel_debug, otel_info, otel_warn};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::transform::common::tonic::ResourceAttributesWithSchema;
use opentelemetry_proto::transform::logs::tonic::group_logs_by_resource_and_scope;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::logs::LogBatch;
use std::sync::{Arc, Mutex, MutexGuard};

enum LifecycleState {
    Uninitialized,
    Started(Arc<dyn CqlSession>),
    ShutDown,
}

impl LifecycleState {
    fn start_conflict(&self) -> Option<Error> {
        match self {
            LifecycleState::Uninitialized => None,
            LifecycleState::Started(_) => Some(Error::AlreadyStarted),
            LifecycleState::ShutDown => Some(Error::ShutDown),
        }
    }
}

/// Exports OTLP logs to a Cassandra table, one row per log record.
///
/// Call [`CassandraLogsExporter::start`] once before pushing logs. The exporter
/// can also be installed in an `SdkLoggerProvider` through its
/// [`opentelemetry_sdk::logs::LogExporter`] implementation.
pub struct CassandraLogsExporter {
    config: CassandraExporterConfig,
    connector: Arc<dyn SessionConnector>,
    writer: LogWriter,
    state: Mutex<LifecycleState>,
    resource: ResourceAttributesWithSchema,
}

impl CassandraLogsExporter {
    /// Create an exporter that opens its sessions through `connector`.
    pub fn new(config: CassandraExporterConfig, connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            writer: LogWriter::new(&config),
            config,
            connector,
            state: Mutex::new(LifecycleState::Uninitialized),
            resource: ResourceAttributesWithSchema::default(),
        }
    }

    /// Exporter configuration.
    pub fn config(&self) -> &CassandraExporterConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, LifecycleState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("exporter state lock poisoned".to_string()))
    }

    /// Opens the persistent session and makes sure the keyspace and table exist.
    ///
    /// If the schema cannot be created the session is closed again and the
    /// exporter stays unstarted.
    pub async fn start(&self, ctx: &ExportContext) -> Result<()> {
        let conflict = self.lock()?.start_conflict();
        if let Some(err) = conflict {
            return Err(err);
        }

        let options = SessionOptions::from(&self.config);
        let session = ctx
            .run(self.connector.connect(&options))
            .await
            .map_err(Error::Startup)?
            .map_err(Error::Connect)?;

        if let Err(err) = SchemaInitializer::new(&self.config)
            .initialize(ctx, self.connector.as_ref())
            .await
        {
            self.discard(&session).await;
            return Err(err);
        }

        let conflict = {
            let mut state = self.lock()?;
            let conflict = state.start_conflict();
            if conflict.is_none() {
                *state = LifecycleState::Started(Arc::clone(&session));
            }
            conflict
        };
        if let Some(err) = conflict {
            self.discard(&session).await;
            return Err(err);
        }

        otel_info!(
            name: "CassandraExporter.Started",
            contact_points = self.config.dsn.as_str(),
            table = self.config.qualified_table(),
            consistency = format!("{}", self.config.consistency)
        );
        Ok(())
    }

    async fn discard(&self, session: &Arc<dyn CqlSession>) {
        if let Err(err) = session.close().await {
            otel_warn!(
                name: "CassandraExporter.SessionCloseFailed",
                error = format!("{err}")
            );
        }
    }

    fn session(&self) -> Result<Arc<dyn CqlSession>> {
        match &*self.lock()? {
            LifecycleState::Started(session) => Ok(Arc::clone(session)),
            LifecycleState::Uninitialized => Err(Error::NotStarted),
            LifecycleState::ShutDown => Err(Error::ShutDown),
        }
    }

    /// Transforms and writes every log record of `resource_logs`.
    ///
    /// Row failures are logged and counted in the returned [`WriteOutcome`]; they
    /// do not fail the call. Only an interrupted `ctx` returns an error once the
    /// exporter is started.
    pub async fn push_logs(
        &self,
        ctx: &ExportContext,
        resource_logs: &[ResourceLogs],
    ) -> Result<WriteOutcome> {
        let session = self.session()?;
        self.writer
            .write(ctx, session.as_ref(), transform(resource_logs))
            .await
    }

    /// [`CassandraLogsExporter::push_logs`] for an OTLP export request.
    pub async fn push_request(
        &self,
        ctx: &ExportContext,
        request: &ExportLogsServiceRequest,
    ) -> Result<WriteOutcome> {
        self.push_logs(ctx, &request.resource_logs).await
    }

    /// Closes the session if one is open. Calling it again is a no-op.
    ///
    /// The exporter cannot be started again afterwards.
    pub async fn shutdown(&self, ctx: &ExportContext) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock()?, LifecycleState::ShutDown);
        let LifecycleState::Started(session) = previous else {
            otel_debug!(name: "CassandraExporter.ShutdownNoSession");
            return Ok(());
        };

        ctx.run(session.close())
            .await
            .map_err(|done| Error::Close(Box::new(done)))?
            .map_err(Error::Close)?;
        otel_info!(name: "CassandraExporter.ShutDown");
        Ok(())
    }
}

impl fmt::Debug for CassandraLogsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cassandra logs exporter")
    }
}

impl opentelemetry_sdk::logs::LogExporter for CassandraLogsExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let otlp = group_logs_by_resource_and_scope(batch, &self.resource);
        let ctx = ExportContext::new();

        match self.push_logs(&ctx, &otlp).await {
            Ok(_) => Ok(()),
            Err(e) => Err(OTelSdkError::InternalFailure(e.to_string())),
        }
    }

    fn set_resource(&mut self, resource: &opentelemetry_sdk::Resource) {
        self.resource = resource.into();
    }
}

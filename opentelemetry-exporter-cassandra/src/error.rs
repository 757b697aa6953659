use crate::context::ContextDone;
use crate::logs::WriteOutcome;
use crate::session::SessionError;
use thiserror::Error;

/// Errors returned by the Cassandra exporter.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// The YAML configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    /// The storage session could not be opened.
    #[error("Failed to open session: {0}")]
    Connect(#[source] SessionError),
    /// The keyspace DDL failed.
    #[error("Failed to create keyspace `{keyspace}`: {source}")]
    CreateKeyspace {
        /// Keyspace named in the statement.
        keyspace: String,
        /// Driver error.
        #[source]
        source: SessionError,
    },
    /// The log table DDL failed.
    #[error("Failed to create table `{table}`: {source}")]
    CreateTable {
        /// Fully qualified table name.
        table: String,
        /// Driver error.
        #[source]
        source: SessionError,
    },
    /// The start context was cancelled or ran past its deadline.
    #[error("Startup interrupted: {0}")]
    Startup(ContextDone),

    /// `push_logs` was called before `start`.
    #[error("Exporter has not been started")]
    NotStarted,
    /// `start` was called on a started exporter.
    #[error("Exporter has already been started")]
    AlreadyStarted,
    /// The exporter was shut down.
    #[error("Exporter is shut down")]
    ShutDown,

    /// A batch was aborted because its context was cancelled or timed out.
    #[error(
        "Export interrupted ({reason}): {delivered} rows delivered, {failed} failed, {skipped} skipped",
        delivered = .outcome.delivered(),
        failed = .outcome.failed()
    )]
    Interrupted {
        /// Why the context ended.
        reason: ContextDone,
        /// Rows handled before the interruption, including the one in flight.
        outcome: WriteOutcome,
        /// Rows never dispatched.
        skipped: usize,
    },
    /// Strict delivery was requested and at least one row failed.
    #[error("{failed} of {attempted} rows failed to insert")]
    PartialDelivery {
        /// Rows dispatched to the session.
        attempted: usize,
        /// Rows whose insert failed.
        failed: usize,
    },

    /// Closing the storage session failed.
    #[error("Failed to close session: {0}")]
    Close(#[source] SessionError),
    /// Unexpected internal state, such as a poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type used throughout the exporter.
pub type Result<T> = std::result::Result<T, Error>;

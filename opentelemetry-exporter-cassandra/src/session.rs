//! Storage collaborator seams.
//!
//! The exporter never talks to a Cassandra driver directly. A driver adapter
//! implements [`SessionConnector`] to open sessions and [`CqlSession`] to run
//! parameterized CQL statements.

use crate::config::CassandraExporterConfig;
use crate::logs::FlatAttributes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::Duration;

/// Error type surfaced by driver adapters.
pub type SessionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A value bound to a `?` placeholder of a CQL statement.
#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    /// `timestamp`
    Timestamp(DateTime<Utc>),
    /// `text`
    Text(String),
    /// `int`
    Int(i32),
    /// `bigint`
    BigInt(i64),
    /// `map<text, text>`. The adapter chooses how nested values are written,
    /// [`FlatAttributes::column_entries`] gives the lossless text form.
    Attributes(Arc<FlatAttributes>),
}

/// An open connection to the storage cluster.
///
/// Implementations must be safe to share between concurrent export calls.
#[async_trait]
pub trait CqlSession: Send + Sync + Debug {
    /// Execute one statement with positional bound values.
    async fn execute(&self, statement: &str, values: &[CqlValue]) -> Result<(), SessionError>;

    /// Release the session. Statements issued afterwards fail.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens sessions against the storage cluster.
#[async_trait]
pub trait SessionConnector: Send + Sync + Debug {
    /// Connect using `options`.
    async fn connect(&self, options: &SessionOptions) -> Result<Arc<dyn CqlSession>, SessionError>;
}

/// Replica acknowledgement level requested for every statement of a session.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// `ANY`
    Any,
    /// `ONE`
    One,
    /// `TWO`
    Two,
    /// `THREE`
    Three,
    /// `QUORUM`
    #[default]
    Quorum,
    /// `ALL`
    All,
    /// `LOCAL_QUORUM`
    LocalQuorum,
    /// `EACH_QUORUM`
    EachQuorum,
    /// `LOCAL_ONE`
    LocalOne,
}

impl Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Username and password for the cluster's password authenticator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password, never printed by `Debug`.
    pub password: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a connector needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Hosts used to discover the cluster.
    pub contact_points: Vec<String>,
    /// Native protocol port.
    pub port: u16,
    /// Consistency applied to every statement.
    pub consistency: Consistency,
    /// Upper bound for establishing the connection.
    pub connect_timeout: Duration,
    /// Optional password authentication.
    pub credentials: Option<Credentials>,
}

impl From<&CassandraExporterConfig> for SessionOptions {
    fn from(config: &CassandraExporterConfig) -> Self {
        SessionOptions {
            contact_points: config.contact_points(),
            port: config.port,
            consistency: config.consistency,
            connect_timeout: config.timeout(),
            credentials: config.auth.as_ref().map(|auth| Credentials {
                username: auth.username.clone(),
                password: auth.password.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_display_uses_cql_names() {
        assert_eq!(Consistency::Quorum.to_string(), "QUORUM");
        assert_eq!(Consistency::LocalQuorum.to_string(), "LOCAL_QUORUM");
        assert_eq!(Consistency::default(), Consistency::Quorum);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "otel".to_string(),
            password: "s3cret".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("otel"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_session_options_from_config() {
        let config = CassandraExporterConfig::builder()
            .with_dsn("10.0.0.1, 10.0.0.2")
            .with_consistency(Consistency::LocalOne)
            .with_auth("otel", "pw")
            .build()
            .unwrap();

        let options = SessionOptions::from(&config);
        assert_eq!(options.contact_points, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(options.port, 9042);
        assert_eq!(options.consistency, Consistency::LocalOne);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.credentials.unwrap().username, "otel");
    }
}

//! # Exporter configuration
//!
//! The configuration can be deserialized from YAML or assembled with
//! [`CassandraExporterConfigBuilder`]. Both paths run the same validation.
//!
//! ```yaml
//! dsn: "cassandra-0.local,cassandra-1.local"
//! keyspace: otel
//! logs_table: otel_logs
//! replication:
//!   class: SimpleStrategy
//!   replication_factor: 3
//! compression:
//!   algorithm: ZstdCompressor
//! consistency: local_quorum
//! ```

use crate::error::{Error, Result};
use crate::session::Consistency;
use opentelemetry::otel_warn;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const DEFAULT_DSN: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9042;
const DEFAULT_KEYSPACE: &str = "otel";
const DEFAULT_LOGS_TABLE: &str = "otel_logs";
const DEFAULT_REPLICATION_CLASS: &str = "SimpleStrategy";
const DEFAULT_COMPRESSION: &str = "LZ4Compressor";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// Cassandra rejects longer keyspace and table names.
const MAX_IDENTIFIER_LEN: usize = 48;

/// Configuration for the Cassandra logs exporter.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct CassandraExporterConfig {
    /// Comma separated list of contact points.
    pub dsn: String,
    /// Native protocol port.
    pub port: u16,
    /// Keyspace holding the log table.
    pub keyspace: String,
    /// Name of the log table.
    pub logs_table: String,
    /// Replication settings used when the keyspace is created.
    pub replication: ReplicationConfig,
    /// Table compression settings.
    pub compression: CompressionConfig,
    /// Consistency level of the exporter's sessions.
    pub consistency: Consistency,
    /// Connect timeout in milliseconds.
    pub timeout_ms: u64,
    /// Optional password authentication.
    pub auth: Option<AuthConfig>,
}

/// Keyspace replication strategy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ReplicationConfig {
    /// Replication strategy class, e.g. `SimpleStrategy`.
    pub class: String,
    /// Number of replicas.
    pub replication_factor: u32,
}

/// Table compression.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct CompressionConfig {
    /// Compressor class, e.g. `LZ4Compressor`.
    pub algorithm: String,
}

/// Password authenticator credentials.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for CassandraExporterConfig {
    fn default() -> Self {
        CassandraExporterConfig {
            dsn: DEFAULT_DSN.to_string(),
            port: DEFAULT_PORT,
            keyspace: DEFAULT_KEYSPACE.to_string(),
            logs_table: DEFAULT_LOGS_TABLE.to_string(),
            replication: ReplicationConfig::default(),
            compression: CompressionConfig::default(),
            consistency: Consistency::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auth: None,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            class: DEFAULT_REPLICATION_CLASS.to_string(),
            replication_factor: 1,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            algorithm: DEFAULT_COMPRESSION.to_string(),
        }
    }
}

impl CassandraExporterConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> CassandraExporterConfigBuilder {
        CassandraExporterConfigBuilder::default()
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CassandraExporterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Contact points parsed from `dsn`.
    pub fn contact_points(&self) -> Vec<String> {
        self.dsn
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Connect timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `keyspace.table` as used in statements.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.keyspace, self.logs_table)
    }

    /// Checks every field that ends up inside CQL text or driver options.
    pub fn validate(&self) -> Result<()> {
        if let Err(reason) = self.check() {
            otel_warn!(name: "CassandraExporter.Config.Invalid", reason = reason.as_str());
            return Err(Error::InvalidConfig(reason));
        }
        Ok(())
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.contact_points().is_empty() {
            return Err("DSN must name at least one contact point.".to_string());
        }
        if self.port == 0 {
            return Err("Port must be greater than zero.".to_string());
        }
        validate_identifier("Keyspace", &self.keyspace)?;
        validate_identifier("Logs table", &self.logs_table)?;
        validate_class_name("Replication class", &self.replication.class)?;
        if self.replication.replication_factor == 0 {
            return Err("Replication factor must be at least 1.".to_string());
        }
        validate_class_name("Compression algorithm", &self.compression.algorithm)?;
        if self.timeout_ms == 0 {
            return Err("Timeout must be greater than zero.".to_string());
        }
        if let Some(auth) = &self.auth {
            if auth.username.is_empty() {
                return Err("Auth username cannot be empty.".to_string());
            }
        }
        Ok(())
    }
}

/// Builder for [`CassandraExporterConfig`].
#[derive(Debug, Default)]
pub struct CassandraExporterConfigBuilder {
    inner: CassandraExporterConfig,
}

impl CassandraExporterConfigBuilder {
    /// Comma separated contact points.
    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.inner.dsn = dsn.into();
        self
    }

    /// Native protocol port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    /// Target keyspace.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.inner.keyspace = keyspace.into();
        self
    }

    /// Target table.
    pub fn with_logs_table(mut self, table: impl Into<String>) -> Self {
        self.inner.logs_table = table.into();
        self
    }

    /// Keyspace replication strategy.
    pub fn with_replication(mut self, class: impl Into<String>, replication_factor: u32) -> Self {
        self.inner.replication = ReplicationConfig {
            class: class.into(),
            replication_factor,
        };
        self
    }

    /// Table compressor class.
    pub fn with_compression(mut self, algorithm: impl Into<String>) -> Self {
        self.inner.compression.algorithm = algorithm.into();
        self
    }

    /// Session consistency level.
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.inner.consistency = consistency;
        self
    }

    /// Connect timeout. Sub-millisecond precision is dropped.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Password authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.inner.auth = Some(AuthConfig {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Validates the options given by consuming itself and returning the config or an error.
    pub fn build(self) -> Result<CassandraExporterConfig> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

fn validate_identifier(what: &str, name: &str) -> std::result::Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(format!("{what} cannot be empty.")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(format!("{what} must start with an ASCII letter."));
        }
        Some(_) => {}
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "{what} must be at most {MAX_IDENTIFIER_LEN} characters."
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "{what} must contain only ASCII letters, digits, and '_'."
        ));
    }
    Ok(())
}

fn validate_class_name(what: &str, name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err(format!("{what} cannot be empty."));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(format!(
            "{what} must contain only ASCII letters, digits, '_', and '.'."
        ));
    }
    Ok(())
}

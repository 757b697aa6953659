//! In-memory stand-in for a Cassandra cluster.
//!
//! [`InMemoryCluster`] understands the statements this crate issues: it tracks
//! keyspaces and tables, honors `IF NOT EXISTS`, and rejects inserts into
//! tables that do not exist. Inserted rows are upserted by the table's primary
//! key, so a row whose key is already present replaces the stored one. Failures
//! can be injected to exercise error paths.

use crate::session::{CqlSession, CqlValue, SessionConnector, SessionError, SessionOptions};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Error produced by the in-memory cluster.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InMemoryError(String);

impl InMemoryError {
    fn boxed(message: impl Into<String>) -> SessionError {
        Box::new(InMemoryError(message.into()))
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    keyspaces: HashSet<String>,
    // Table name to primary key columns, partition key first.
    tables: HashMap<String, Vec<String>>,
    rows: HashMap<String, Vec<StoredRow>>,
    generated: u64,
    statements: Vec<String>,
    inserts_seen: usize,
    sessions_opened: usize,
    sessions_closed: usize,
    last_options: Option<SessionOptions>,
    fail_connect: bool,
    fail_close: bool,
    fail_insert_numbers: HashSet<usize>,
    fail_patterns: Vec<String>,
    hang_inserts_after: Option<usize>,
}

/// A simulated cluster shared by every session opened through its connector.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    /// An empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector opening sessions against this cluster.
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            cluster: self.clone(),
        }
    }

    /// Make every connection attempt fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Make session close fail.
    pub fn fail_close(&self, fail: bool) {
        self.state().fail_close = fail;
    }

    /// Fail the `n`-th insert (1-based) seen by the cluster.
    pub fn fail_insert_number(&self, n: usize) {
        self.state().fail_insert_numbers.insert(n);
    }

    /// Fail every statement whose text contains `pattern`.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.state().fail_patterns.push(pattern.into());
    }

    /// Inserts after the first `n` never complete.
    pub fn hang_inserts_after(&self, n: usize) {
        self.state().hang_inserts_after = Some(n);
    }

    /// Every statement received, in order, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Bound values of the rows stored in `table` (`keyspace.table`), in order
    /// of first insert.
    pub fn rows(&self, table: &str) -> Vec<Vec<CqlValue>> {
        self.state()
            .rows
            .get(table)
            .map(|rows| rows.iter().map(|row| row.values.clone()).collect())
            .unwrap_or_default()
    }

    /// True when `keyspace` was created.
    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.state().keyspaces.contains(keyspace)
    }

    /// True when `table` (`keyspace.table`) was created.
    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        let state = self.state();
        state.sessions_opened - state.sessions_closed
    }

    /// Options passed to the most recent connection attempt.
    pub fn last_options(&self) -> Option<SessionOptions> {
        self.state().last_options.clone()
    }

    fn execute(&self, statement: &str, values: &[CqlValue]) -> Result<Execution, SessionError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.statements.push(statement.to_string());

        if let Some(pattern) = state
            .fail_patterns
            .iter()
            .find(|pattern| statement.contains(pattern.as_str()))
        {
            return Err(InMemoryError::boxed(format!(
                "injected failure for statement matching `{pattern}`"
            )));
        }

        match Statement::parse(statement)? {
            Statement::CreateKeyspace {
                name,
                if_not_exists,
            } => {
                if !state.keyspaces.insert(name.clone()) && !if_not_exists {
                    return Err(InMemoryError::boxed(format!(
                        "keyspace {name} already exists"
                    )));
                }
            }
            Statement::CreateTable {
                name,
                if_not_exists,
                primary_key,
            } => {
                let keyspace = name.split('.').next().unwrap_or_default();
                if !state.keyspaces.contains(keyspace) {
                    return Err(InMemoryError::boxed(format!(
                        "keyspace {keyspace} does not exist"
                    )));
                }
                if state.tables.contains_key(&name) {
                    if !if_not_exists {
                        return Err(InMemoryError::boxed(format!("table {name} already exists")));
                    }
                } else {
                    state.tables.insert(name, primary_key);
                }
            }
            Statement::Insert {
                table,
                columns,
                markers,
            } => {
                state.inserts_seen += 1;
                let number = state.inserts_seen;
                if state
                    .hang_inserts_after
                    .is_some_and(|after| number > after)
                {
                    return Ok(Execution::Hang);
                }
                if state.fail_insert_numbers.contains(&number) {
                    return Err(InMemoryError::boxed(format!(
                        "injected failure for insert #{number}"
                    )));
                }
                let Some(primary_key) = state.tables.get(&table) else {
                    return Err(InMemoryError::boxed(format!(
                        "unconfigured table {table}"
                    )));
                };
                let row = StoredRow::bind(
                    primary_key,
                    &columns,
                    &markers,
                    values,
                    &mut state.generated,
                )?;
                let rows = state.rows.entry(table).or_default();
                match rows.iter_mut().find(|stored| stored.key == row.key) {
                    Some(stored) => *stored = row,
                    None => rows.push(row),
                }
            }
        }
        Ok(Execution::Done)
    }
}

// A column value as the cluster sees it: bound by the client or generated by
// a server function such as `now()`.
#[derive(Clone, Debug, PartialEq)]
enum Cell {
    Bound(CqlValue),
    Generated(u64),
}

#[derive(Clone, Debug)]
struct StoredRow {
    key: Vec<Cell>,
    values: Vec<CqlValue>,
}

impl StoredRow {
    fn bind(
        primary_key: &[String],
        columns: &[String],
        markers: &[Marker],
        values: &[CqlValue],
        generated: &mut u64,
    ) -> Result<StoredRow, SessionError> {
        if columns.len() != markers.len() {
            return Err(InMemoryError::boxed(format!(
                "{} columns but {} values",
                columns.len(),
                markers.len()
            )));
        }
        let expected = markers.iter().filter(|m| **m == Marker::Bind).count();
        if expected != values.len() {
            return Err(InMemoryError::boxed(format!(
                "expected {expected} bound values, got {}",
                values.len()
            )));
        }

        let mut bound = values.iter().cloned();
        let cells: Vec<Cell> = markers
            .iter()
            .filter_map(|marker| match marker {
                Marker::Bind => bound.next().map(Cell::Bound),
                Marker::Now => {
                    *generated += 1;
                    Some(Cell::Generated(*generated))
                }
            })
            .collect();

        let key = primary_key
            .iter()
            .map(|column| {
                columns
                    .iter()
                    .position(|c| c == column)
                    .map(|i| cells[i].clone())
                    .ok_or_else(|| {
                        InMemoryError::boxed(format!("missing primary key column {column}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoredRow {
            key,
            values: values.to_vec(),
        })
    }
}

enum Execution {
    Done,
    Hang,
}

enum Statement {
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
    },
    CreateTable {
        name: String,
        if_not_exists: bool,
        primary_key: Vec<String>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        markers: Vec<Marker>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Marker {
    Bind,
    Now,
}

impl Statement {
    fn parse(statement: &str) -> Result<Statement, SessionError> {
        let words: Vec<&str> = statement.split_whitespace().collect();
        let (kind, rest) = match words.as_slice() {
            ["CREATE", "KEYSPACE", rest @ ..] => ("KEYSPACE", rest),
            ["CREATE", "TABLE", rest @ ..] => ("TABLE", rest),
            ["INSERT", "INTO", rest @ ..] => ("INSERT", rest),
            _ => {
                return Err(InMemoryError::boxed(format!(
                    "unsupported statement: {statement}"
                )))
            }
        };

        let (if_not_exists, rest) = match rest {
            ["IF", "NOT", "EXISTS", rest @ ..] => (true, rest),
            rest => (false, rest),
        };
        let name = rest
            .first()
            .map(|name| name.trim_end_matches('(').to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| InMemoryError::boxed(format!("missing name: {statement}")))?;

        Ok(match kind {
            "KEYSPACE" => Statement::CreateKeyspace {
                name,
                if_not_exists,
            },
            "TABLE" => Statement::CreateTable {
                name,
                if_not_exists,
                primary_key: primary_key(statement)?,
            },
            _ => {
                let (columns, markers) = insert_columns(statement)?;
                Statement::Insert {
                    table: name,
                    columns,
                    markers,
                }
            }
        })
    }
}

// Contents of the first balanced `( .. )` in `text`, and the text after it.
fn parenthesized(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let close = open + i;
                    return Some((&text[open + 1..close], &text[close + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

fn column_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|column| column.trim_matches(|c: char| c.is_whitespace() || c == '(' || c == ')'))
        .filter(|column| !column.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn primary_key(statement: &str) -> Result<Vec<String>, SessionError> {
    let columns = statement
        .find("PRIMARY KEY")
        .and_then(|at| parenthesized(&statement[at..]))
        .map(|(key, _)| column_list(key))
        .unwrap_or_default();
    if columns.is_empty() {
        return Err(InMemoryError::boxed(format!(
            "missing primary key: {statement}"
        )));
    }
    Ok(columns)
}

fn insert_columns(statement: &str) -> Result<(Vec<String>, Vec<Marker>), SessionError> {
    let malformed = || InMemoryError::boxed(format!("malformed insert: {statement}"));
    let (columns, rest) = parenthesized(statement).ok_or_else(malformed)?;
    let rest = rest.trim_start().strip_prefix("VALUES").ok_or_else(malformed)?;
    let (values, _) = parenthesized(rest).ok_or_else(malformed)?;

    let markers = values
        .split(',')
        .map(|value| match value.trim() {
            "?" => Ok(Marker::Bind),
            "now()" => Ok(Marker::Now),
            other => Err(InMemoryError::boxed(format!(
                "unsupported value `{other}`"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((column_list(columns), markers))
}

/// [`SessionConnector`] for an [`InMemoryCluster`].
#[derive(Clone, Debug)]
pub struct InMemoryConnector {
    cluster: InMemoryCluster,
}

impl InMemoryConnector {
    /// Opens a session without going through [`SessionConnector::connect`].
    pub fn open_session(&self) -> Arc<dyn CqlSession> {
        self.cluster.state().sessions_opened += 1;
        Arc::new(InMemorySession {
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SessionConnector for InMemoryConnector {
    async fn connect(&self, options: &SessionOptions) -> Result<Arc<dyn CqlSession>, SessionError> {
        {
            let mut state = self.cluster.state();
            state.last_options = Some(options.clone());
            if state.fail_connect {
                return Err(InMemoryError::boxed("no hosts available"));
            }
        }
        Ok(self.open_session())
    }
}

/// Session opened by an [`InMemoryConnector`].
#[derive(Debug)]
pub struct InMemorySession {
    cluster: InMemoryCluster,
    closed: AtomicBool,
}

#[async_trait]
impl CqlSession for InMemorySession {
    async fn execute(&self, statement: &str, values: &[CqlValue]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(InMemoryError::boxed("session is closed"));
        }
        match self.cluster.execute(statement, values)? {
            Execution::Done => Ok(()),
            Execution::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.cluster.state();
        state.sessions_closed += 1;
        if state.fail_close {
            return Err(InMemoryError::boxed("close failed"));
        }
        Ok(())
    }
}

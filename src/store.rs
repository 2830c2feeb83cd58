//! Relational store primitives
//!
//! The graph only needs three things from a database: its table names, a
//! schema summary for some tables, and the rows of a query.

mod postgres;
mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Longest text value shown in query results
pub const RESULT_VALUE_CHARS: usize = 300;

/// Longest cell shown in schema sample rows
pub const SAMPLE_VALUE_CHARS: usize = 100;

/// Sample rows shown with each table schema
pub const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store unreachable or misconfigured
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("table_names {} not found in database", .0.join(", "))]
    UnknownTables(Vec<String>),
    /// Store-reported failure for one statement
    #[error("{0}")]
    Query(String),
}

impl StoreError {
    /// Fatal errors end the question; the rest are shown to the oracle
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Primitives a relational store must provide
#[async_trait]
pub trait SqlStore: Send + Sync {
    /// SQL dialect named in the oracle directives
    fn dialect(&self) -> &str;

    /// All user tables, ordered by name
    async fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    /// DDL plus sample rows for exactly the given tables
    async fn describe_schema(&self, tables: &[String]) -> Result<String, StoreError>;

    /// Execute one statement and return its rows
    async fn run_query(&self, sql: &str) -> Result<QueryRows, StoreError>;
}

#[async_trait]
impl<T: SqlStore + ?Sized> SqlStore for std::sync::Arc<T> {
    fn dialect(&self) -> &str {
        (**self).dialect()
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_tables().await
    }

    async fn describe_schema(&self, tables: &[String]) -> Result<String, StoreError> {
        (**self).describe_schema(tables).await
    }

    async fn run_query(&self, sql: &str) -> Result<QueryRows, StoreError> {
        (**self).run_query(sql).await
    }
}

/// A single result cell
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    /// Exact numeric, kept as its decimal text
    Numeric(String),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Bare rendering used in schema sample rows
    pub fn plain(&self) -> String {
        match self {
            SqlValue::Numeric(digits) => digits.clone(),
            SqlValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Renders the way the value reads inside a Python tuple
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("None"),
            SqlValue::Bool(true) => f.write_str("True"),
            SqlValue::Bool(false) => f.write_str("False"),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => write!(f, "{r:?}"),
            SqlValue::Numeric(digits) => write!(f, "Decimal('{digits}')"),
            SqlValue::Text(s) => f.write_str(&quote_text(&truncate_words(s, RESULT_VALUE_CHARS))),
            SqlValue::Blob(bytes) => f.write_str(&quote_bytes(bytes)),
        }
    }
}

/// Quote and escape text; double quotes are used only when that avoids
/// escaping a single quote
fn quote_text(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('\'');
    out
}

/// Cut text longer than `max` characters back to a word boundary and mark
/// the cut; the result never exceeds `max` characters
pub fn truncate_words(s: &str, max: usize) -> String {
    const SUFFIX: &str = "...";
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(SUFFIX.len())).collect();
    let head = match head.rsplit_once(' ') {
        Some((words, _)) => words.to_string(),
        None => head,
    };
    format!("{head}{SUFFIX}")
}

/// Comment block listing up to [`SAMPLE_ROWS`] rows of `table`
pub fn sample_block(table: &str, sample: &QueryRows) -> String {
    let mut lines = vec![
        "/*".to_string(),
        format!("{SAMPLE_ROWS} rows from {table} table:"),
        sample.columns.join("\t"),
    ];
    for row in &sample.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|value| value.plain().chars().take(SAMPLE_VALUE_CHARS).collect())
            .collect();
        lines.push(cells.join("\t"));
    }
    lines.push("*/".to_string());
    lines.join("\n")
}

/// Rows returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }
}

/// Renders as a list of tuples: `[(150,), ('red', 3)]`
impl fmt::Display for QueryRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str("(")?;
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{value}")?;
            }
            if row.len() == 1 {
                f.write_str(",")?;
            }
            f.write_str(")")?;
        }
        f.write_str("]")
    }
}

/// Where a question's store lives
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    SqliteFile(PathBuf),
    SqliteMemory,
    /// `postgresql://` URL, driver suffix removed
    Postgres(String),
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDescriptor::SqliteFile(path) => f.debug_tuple("SqliteFile").field(path).finish(),
            ConnectionDescriptor::SqliteMemory => f.write_str("SqliteMemory"),
            ConnectionDescriptor::Postgres(url) => f.debug_tuple("Postgres").field(&redact(url)).finish(),
        }
    }
}

impl ConnectionDescriptor {
    /// Accepted forms: `postgresql://…`, `postgres://…` and
    /// `postgresql+<driver>://…`; `sqlite://<path>`, `sqlite:<path>`,
    /// `sqlite::memory:`, `file:<path>`, or a bare filesystem path.
    pub fn parse(descriptor: &str) -> Result<Self, StoreError> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(StoreError::Connection(
                "connection descriptor is empty".to_string(),
            ));
        }

        if matches!(descriptor, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
            return Ok(ConnectionDescriptor::SqliteMemory);
        }

        let path = if let Some(rest) = descriptor.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = descriptor.strip_prefix("sqlite:") {
            rest
        } else if let Some(rest) = descriptor.strip_prefix("file:") {
            rest
        } else if let Some((scheme, rest)) = descriptor.split_once("://") {
            return match scheme.split_once('+').map_or(scheme, |(base, _driver)| base) {
                "postgresql" | "postgres" if !rest.is_empty() => {
                    Ok(ConnectionDescriptor::Postgres(format!("postgresql://{rest}")))
                }
                "postgresql" | "postgres" => Err(StoreError::Connection(
                    "connection descriptor has no PostgreSQL host".to_string(),
                )),
                _ => Err(StoreError::Connection(format!(
                    "unsupported connection scheme '{scheme}'"
                ))),
            };
        } else {
            descriptor
        };

        // Query parameters are not used by the SQLite adapter
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() {
            return Err(StoreError::Connection(
                "connection descriptor has no database path".to_string(),
            ));
        }
        Ok(ConnectionDescriptor::SqliteFile(PathBuf::from(path)))
    }
}

/// Descriptor with credentials removed, safe for logs and error messages
pub fn redact(descriptor: &str) -> String {
    match descriptor.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{scheme}://***@{host}"),
            None => descriptor.to_string(),
        },
        None => descriptor.to_string(),
    }
}

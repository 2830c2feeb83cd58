//! SQLite store adapter

use super::{sample_block, ConnectionDescriptor, QueryRows, SqlStore, SqlValue, StoreError, SAMPLE_ROWS};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::sync::{Arc, Mutex};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// One SQLite connection, owned by a single question
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open the database named by `descriptor`.
    ///
    /// Never creates a database file. With `read_only` the connection
    /// refuses writes at the SQLite level as well.
    pub fn open(descriptor: &ConnectionDescriptor, read_only: bool) -> Result<Self, StoreError> {
        let conn = match descriptor {
            ConnectionDescriptor::SqliteMemory => Connection::open_in_memory(),
            ConnectionDescriptor::Postgres(_) => {
                return Err(StoreError::Connection(
                    "not a SQLite descriptor".to_string(),
                ))
            }
            ConnectionDescriptor::SqliteFile(path) => {
                let access = if read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                };
                Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            }
        }
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        // Fails on files that are not SQLite databases
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-open connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Connection("connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl SqlStore for SqliteStore {
    fn dialect(&self) -> &str {
        "SQLite"
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(table_names).await
    }

    async fn describe_schema(&self, tables: &[String]) -> Result<String, StoreError> {
        let tables = tables.to_vec();
        self.with_conn(move |conn| describe(conn, &tables)).await
    }

    async fn run_query(&self, sql: &str) -> Result<QueryRows, StoreError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query(conn, &sql)).await
    }
}

fn table_names(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn describe(conn: &Connection, tables: &[String]) -> Result<String, StoreError> {
    let known = table_names(conn)?;
    let missing: Vec<String> = tables
        .iter()
        .filter(|t| !known.contains(t))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::UnknownTables(missing));
    }

    let mut sections = Vec::with_capacity(tables.len());
    for table in tables {
        let ddl: Option<String> = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            [table],
            |row| row.get(0),
        )?;
        let ddl = ddl.unwrap_or_else(|| format!("CREATE TABLE {table} (...)"));
        sections.push(format!("{}\n\n{}", ddl.trim(), sample_rows(conn, table)?));
    }
    Ok(sections.join("\n\n"))
}

fn sample_rows(conn: &Connection, table: &str) -> Result<String, StoreError> {
    let sql = format!(
        "SELECT * FROM \"{}\" LIMIT {SAMPLE_ROWS}",
        table.replace('"', "\"\"")
    );
    Ok(sample_block(table, &query(conn, &sql)?))
}

fn query(conn: &Connection, sql: &str) -> Result<QueryRows, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_value(row.get_ref(i)?));
        }
        rows.push(values);
    }
    Ok(QueryRows::new(columns, rows))
}

fn to_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

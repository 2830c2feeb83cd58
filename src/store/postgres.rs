//! PostgreSQL store adapter
//!
//! Tables come from `information_schema` for the connection's current
//! schema. Values are decoded by column type name; types without a native
//! mapping fall back to their text form.

use super::{sample_block, QueryRows, SqlStore, SqlValue, StoreError, SAMPLE_ROWS};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on establishing the connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const LIST_TABLES: &str = "
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = current_schema()
      AND table_type IN ('BASE TABLE', 'VIEW')
    ORDER BY table_name";

const TABLE_COLUMNS: &str = "
    SELECT column_name::text, data_type::text, is_nullable = 'YES'
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position";

const PRIMARY_KEY: &str = "
    SELECT kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
     AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_schema = current_schema()
      AND tc.table_name = $1
    ORDER BY kcu.ordinal_position";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => StoreError::Query(db.message().to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            _ => StoreError::Query(e.to_string()),
        }
    }
}

/// One column as reported by `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    name: String,
    data_type: String,
    nullable: bool,
}

/// A single-connection pool, owned by one question
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `url`. With `read_only` every transaction on the session
    /// defaults to READ ONLY, so the server refuses writes as well.
    pub async fn connect(url: &str, read_only: bool) -> Result<Self, StoreError> {
        let mut options =
            PgConnectOptions::from_str(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        if read_only {
            options = options.options([("default_transaction_read_only", "on")]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(TABLE_COLUMNS)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo {
                name,
                data_type,
                nullable,
            })
            .collect())
    }

    async fn sample_rows(&self, table: &str, columns: &[ColumnInfo]) -> Result<String, StoreError> {
        let sql = format!(
            "SELECT * FROM \"{}\" LIMIT {SAMPLE_ROWS}",
            table.replace('"', "\"\"")
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut sample = to_query_rows(&rows);
        // An empty table still gets a header line
        if sample.columns.is_empty() {
            sample.columns = columns.iter().map(|c| c.name.clone()).collect();
        }
        Ok(sample_block(table, &sample))
    }
}

#[async_trait]
impl SqlStore for PgStore {
    fn dialect(&self) -> &str {
        "PostgreSQL"
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(LIST_TABLES)
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn describe_schema(&self, tables: &[String]) -> Result<String, StoreError> {
        let known = self.list_tables().await?;
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
            let columns = self.columns(table).await?;
            let key: Vec<String> = sqlx::query_scalar(PRIMARY_KEY)
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
            let ddl = create_table(table, &columns, &key);
            sections.push(format!("{ddl}\n\n{}", self.sample_rows(table, &columns).await?));
        }
        Ok(sections.join("\n\n"))
    }

    async fn run_query(&self, sql: &str) -> Result<QueryRows, StoreError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(to_query_rows(&rows))
    }
}

/// `CREATE TABLE` text rebuilt from catalog rows
fn create_table(table: &str, columns: &[ColumnInfo], primary_key: &[String]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("\t{} {}{null}", c.name, c.data_type.to_uppercase())
        })
        .collect();
    if !primary_key.is_empty() {
        lines.push(format!("\tPRIMARY KEY ({})", primary_key.join(", ")));
    }
    format!("CREATE TABLE {table} (\n{}\n)", lines.join(", \n"))
}

fn to_query_rows(rows: &[PgRow]) -> QueryRows {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let values = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode(row, i)).collect())
        .collect();
    QueryRows::new(columns, values)
}

fn decode(row: &PgRow, index: usize) -> SqlValue {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return SqlValue::Null,
    }

    let type_name = row.column(index).type_info().name();
    let decoded = match type_name {
        "BOOL" => row.try_get::<bool, _>(index).map(SqlValue::Bool),
        "INT2" => row.try_get::<i16, _>(index).map(|v| SqlValue::Integer(v.into())),
        "INT4" => row.try_get::<i32, _>(index).map(|v| SqlValue::Integer(v.into())),
        "INT8" => row.try_get::<i64, _>(index).map(SqlValue::Integer),
        "FLOAT4" => row.try_get::<f32, _>(index).map(|v| SqlValue::Real(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(index).map(SqlValue::Real),
        "NUMERIC" => row
            .try_get::<Decimal, _>(index)
            .map(|d| SqlValue::Numeric(d.to_string())),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(SqlValue::Blob),
        "UUID" => row
            .try_get::<Uuid, _>(index)
            .map(|u| SqlValue::Text(u.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<JsonValue, _>(index)
            .map(|j| SqlValue::Text(j.to_string())),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|d| SqlValue::Text(d.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|t| SqlValue::Text(t.to_string())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|t| SqlValue::Text(t.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|t| SqlValue::Text(t.to_string())),
        _ => row.try_get_unchecked::<String, _>(index).map(SqlValue::Text),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!(column = index, type_name, error = %e, "Undecodable value");
        SqlValue::Text(format!("<{}>", type_name.to_lowercase()))
    })
}

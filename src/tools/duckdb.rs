//! Embedded DuckDB used by the CSV and dataframe toolkits.
//!
//! Queries run on the blocking pool; rows come back as JSON objects keyed
//! by column name.

use std::path::Path;
use std::sync::{Arc, Mutex};

use duckdb::types::Value as DuckValue;
use duckdb::Connection;
use serde_json::{json, Map, Value};

use crate::error::{Result, SayrError};

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryResult {
    pub fn into_json(self) -> Value {
        json!({
            "columns": self.columns,
            "row_count": self.rows.len(),
            "rows": self.rows,
        })
    }
}

#[derive(Clone)]
pub struct DuckDbEngine {
    conn: Arc<Mutex<Connection>>,
}

fn duck_err(context: &str) -> impl Fn(duckdb::Error) -> SayrError + '_ {
    move |err| SayrError::Storage(format!("{context}: {err}"))
}

impl DuckDbEngine {
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(duck_err("failed to open DuckDB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SayrError::Storage("DuckDB connection lock poisoned".into()))?;
            work(&conn)
        })
        .await
        .map_err(|err| SayrError::Storage(format!("DuckDB task failed: {err}")))?
    }

    pub async fn execute(&self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(duck_err("statement failed"))
        })
        .await
    }

    /// Column names and types a query would produce.
    pub async fn describe(&self, sql: impl Into<String>) -> Result<Vec<(String, String)>> {
        let sql = sql.into();
        self.with_conn(move |conn| describe_blocking(conn, &sql)).await
    }

    pub async fn query(&self, sql: impl Into<String>) -> Result<QueryResult> {
        let sql = sql.into();
        self.with_conn(move |conn| {
            let sql = sql.trim().trim_end_matches(';');
            let columns: Vec<String> = describe_blocking(conn, sql)?
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            let mut stmt = conn.prepare(sql).map_err(duck_err("prepare failed"))?;
            let mut rows = stmt.query([]).map_err(duck_err("query failed"))?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().map_err(duck_err("row error"))? {
                let mut record = Map::new();
                for (idx, name) in columns.iter().enumerate() {
                    let value: DuckValue = row.get(idx).map_err(duck_err("column read failed"))?;
                    record.insert(name.clone(), to_json(value));
                }
                results.push(record);
            }
            Ok(QueryResult {
                columns,
                rows: results,
            })
        })
        .await
    }
}

fn describe_blocking(conn: &Connection, sql: &str) -> Result<Vec<(String, String)>> {
    let sql = sql.trim().trim_end_matches(';');
    let mut stmt = conn
        .prepare(&format!("DESCRIBE {sql}"))
        .map_err(duck_err("describe failed"))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(duck_err("describe failed"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(duck_err("describe failed"))?;
    Ok(columns)
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(v) => json!(v),
        DuckValue::TinyInt(v) => json!(v),
        DuckValue::SmallInt(v) => json!(v),
        DuckValue::Int(v) => json!(v),
        DuckValue::BigInt(v) => json!(v),
        DuckValue::HugeInt(v) => i64::try_from(v)
            .map(|v| json!(v))
            .unwrap_or_else(|_| json!(v.to_string())),
        DuckValue::UTinyInt(v) => json!(v),
        DuckValue::USmallInt(v) => json!(v),
        DuckValue::UInt(v) => json!(v),
        DuckValue::UBigInt(v) => json!(v),
        DuckValue::Float(v) => json!(v),
        DuckValue::Double(v) => json!(v),
        DuckValue::Text(v) => Value::String(v),
        DuckValue::Date32(days) => chrono::NaiveDate::from_num_days_from_ce_opt(
            days + UNIX_EPOCH_DAYS_FROM_CE,
        )
        .map(|date| Value::String(date.to_string()))
        .unwrap_or(Value::Null),
        DuckValue::List(items) => Value::Array(items.into_iter().map(to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a file path as a SQL string literal.
pub(crate) fn quote_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// Only plain reads are allowed through the query tools.
pub(crate) fn is_read_only(query: &str) -> bool {
    let upper = query.trim_start().to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return false;
    }
    let blocked = [
        "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "COPY", "ATTACH",
        "INSTALL", "LOAD", "PRAGMA",
    ];
    !upper
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| blocked.contains(&word))
}

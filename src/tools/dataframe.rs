//! Dataframe toolkit.
//!
//! Named in-memory tables loaded from CSV files, with a fixed menu of
//! pandas-style operations run as DuckDB SQL.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use super::duckdb::{quote_ident, quote_path, DuckDbEngine};
use crate::error::{Result, SayrError};
use crate::tool::{optional_usize, required_str, Tool, ToolRegistry};

const OPERATIONS: &[&str] = &[
    "head",
    "tail",
    "shape",
    "columns",
    "describe",
    "mean",
    "median",
    "mode",
    "value_counts",
    "group_mean",
    "drop_duplicates",
    "dropna",
];

struct DataFrames {
    engine: DuckDbEngine,
    names: RwLock<HashSet<String>>,
}

impl DataFrames {
    async fn ensure(&self, name: &str) -> Result<String> {
        if self.names.read().await.contains(name) {
            Ok(quote_ident(name))
        } else {
            Err(SayrError::Protocol(format!(
                "dataframe `{name}` does not exist; create it first"
            )))
        }
    }

    async fn numeric_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .engine
            .describe(format!("SELECT * FROM {table}"))
            .await?
            .into_iter()
            .filter(|(_, ty)| is_numeric(ty))
            .map(|(name, _)| name)
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<Value> {
        let result = self
            .engine
            .query(format!("SELECT COUNT(*) AS n FROM {table}"))
            .await?;
        Ok(result
            .rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("n"))
            .unwrap_or(Value::Null))
    }

    /// One aggregate per column, e.g. `avg` over every numeric column.
    async fn aggregate(&self, table: &str, function: &str, column: Option<&str>) -> Result<Value> {
        let columns = match column {
            Some(column) => vec![column.to_string()],
            None => self.numeric_columns(table).await?,
        };
        if columns.is_empty() {
            return Err(SayrError::Protocol("no numeric columns to aggregate".into()));
        }
        let select = columns
            .iter()
            .map(|c| format!("{function}({ident}) AS {ident}", ident = quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let result = self
            .engine
            .query(format!("SELECT {select} FROM {table}"))
            .await?;
        Ok(result
            .rows
            .into_iter()
            .next()
            .map(Value::Object)
            .unwrap_or(Value::Null))
    }

    async fn describe(&self, table: &str) -> Result<Value> {
        let mut stats = Map::new();
        for column in self.numeric_columns(table).await? {
            let ident = quote_ident(&column);
            let result = self
                .engine
                .query(format!(
                    "SELECT COUNT({ident}) AS count, avg({ident}) AS mean, stddev_samp({ident}) AS std, \
                     min({ident}) AS min, quantile_cont({ident}, 0.25) AS \"25%\", \
                     quantile_cont({ident}, 0.5) AS \"50%\", quantile_cont({ident}, 0.75) AS \"75%\", \
                     max({ident}) AS max FROM {table}"
                ))
                .await?;
            if let Some(row) = result.rows.into_iter().next() {
                stats.insert(column, Value::Object(row));
            }
        }
        Ok(Value::Object(stats))
    }
}

fn is_numeric(ty: &str) -> bool {
    let ty = ty.to_uppercase();
    [
        "TINYINT", "SMALLINT", "INTEGER", "BIGINT", "HUGEINT", "UTINYINT", "USMALLINT",
        "UINTEGER", "UBIGINT", "FLOAT", "DOUBLE", "DECIMAL", "REAL",
    ]
    .iter()
    .any(|numeric| ty.starts_with(numeric))
}

/// Builder for the dataframe tools.
pub struct DataFrameTools {
    enable_create: bool,
}

impl Default for DataFrameTools {
    fn default() -> Self {
        Self {
            enable_create: true,
        }
    }
}

impl DataFrameTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_create_dataframe(mut self, enabled: bool) -> Self {
        self.enable_create = enabled;
        self
    }

    pub fn into_registry(self) -> Result<ToolRegistry> {
        let frames = Arc::new(DataFrames {
            engine: DuckDbEngine::in_memory()?,
            names: RwLock::new(HashSet::new()),
        });
        let mut registry = ToolRegistry::new();
        if self.enable_create {
            registry.register(CreateDataFrameTool(frames.clone()));
        }
        registry.register(RunDataFrameOperationTool(frames));
        Ok(registry)
    }
}

struct CreateDataFrameTool(Arc<DataFrames>);

#[async_trait]
impl Tool for CreateDataFrameTool {
    fn name(&self) -> &str {
        "create_dataframe"
    }

    fn description(&self) -> &str {
        "Load a CSV file into a named dataframe. Expects {\"dataframe_name\": string, \"path\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "dataframe_name": {"type": "string"},
                "path": {"type": "string", "description": "Path of the CSV file to load"}
            },
            "required": ["dataframe_name", "path"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let name = required_str(&input, "dataframe_name", self.name())?;
        let path = PathBuf::from(required_str(&input, "path", self.name())?);
        if name.trim().is_empty() {
            return Err(SayrError::Protocol("dataframe_name must not be empty".into()));
        }
        let table = quote_ident(name);
        self.0
            .engine
            .execute(format!(
                "CREATE OR REPLACE TABLE {table} AS SELECT * FROM read_csv_auto({})",
                quote_path(&path)
            ))
            .await?;
        self.0.names.write().await.insert(name.to_string());

        let columns = self.0.engine.describe(format!("SELECT * FROM {table}")).await?;
        Ok(json!({
            "dataframe_name": name,
            "rows": self.0.row_count(&table).await?,
            "columns": columns.into_iter().map(|(name, _)| name).collect::<Vec<_>>(),
        }))
    }
}

struct RunDataFrameOperationTool(Arc<DataFrames>);

#[async_trait]
impl Tool for RunDataFrameOperationTool {
    fn name(&self) -> &str {
        "run_dataframe_operation"
    }

    fn description(&self) -> &str {
        "Run an operation on a dataframe: head, tail, shape, columns, describe, mean, median, mode, value_counts, group_mean, drop_duplicates or dropna. Expects {\"dataframe_name\": string, \"operation\": string, \"column\": string?, \"by\": string?, \"n\": number?}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "dataframe_name": {"type": "string"},
                "operation": {"type": "string", "enum": OPERATIONS},
                "column": {"type": "string", "description": "Column the operation applies to"},
                "by": {"type": "string", "description": "Grouping column for group_mean"},
                "n": {"type": "integer", "description": "Row count for head, tail and value_counts"}
            },
            "required": ["dataframe_name", "operation"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let name = required_str(&input, "dataframe_name", self.name())?;
        let operation = required_str(&input, "operation", self.name())?;
        let column = input.get("column").and_then(Value::as_str);
        let n = optional_usize(&input, "n").unwrap_or(5);
        let table = self.0.ensure(name).await?;
        let engine = &self.0.engine;

        let result = match operation {
            "head" => engine
                .query(format!("SELECT * FROM {table} LIMIT {n}"))
                .await?
                .into_json(),
            "tail" => engine
                .query(format!(
                    "SELECT * EXCLUDE (__row) FROM (SELECT *, row_number() OVER () AS __row FROM {table}) \
                     WHERE __row > (SELECT COUNT(*) FROM {table}) - {n} ORDER BY __row"
                ))
                .await?
                .into_json(),
            "shape" => {
                let columns = engine.describe(format!("SELECT * FROM {table}")).await?;
                json!({ "rows": self.0.row_count(&table).await?, "columns": columns.len() })
            }
            "columns" => {
                let columns = engine.describe(format!("SELECT * FROM {table}")).await?;
                Value::Array(
                    columns
                        .into_iter()
                        .map(|(name, ty)| json!({"name": name, "type": ty}))
                        .collect(),
                )
            }
            "describe" => self.0.describe(&table).await?,
            "mean" => self.0.aggregate(&table, "avg", column).await?,
            "median" => self.0.aggregate(&table, "median", column).await?,
            "mode" => {
                let column = column.ok_or_else(|| {
                    SayrError::Protocol("`mode` needs a `column`".into())
                })?;
                self.0.aggregate(&table, "mode", Some(column)).await?
            }
            "value_counts" => {
                let column = column.ok_or_else(|| {
                    SayrError::Protocol("`value_counts` needs a `column`".into())
                })?;
                let n = optional_usize(&input, "n").unwrap_or(20);
                engine
                    .query(format!(
                        "SELECT {col} AS value, COUNT(*) AS count FROM {table} GROUP BY 1 ORDER BY count DESC, value LIMIT {n}",
                        col = quote_ident(column)
                    ))
                    .await?
                    .into_json()
            }
            "group_mean" => {
                let column = column.ok_or_else(|| {
                    SayrError::Protocol("`group_mean` needs a `column`".into())
                })?;
                let by = required_str(&input, "by", self.name())?;
                engine
                    .query(format!(
                        "SELECT {by} AS {by}, avg({col}) AS mean FROM {table} GROUP BY 1 ORDER BY 1",
                        by = quote_ident(by),
                        col = quote_ident(column)
                    ))
                    .await?
                    .into_json()
            }
            "drop_duplicates" => {
                let before = self.0.row_count(&table).await?;
                engine
                    .execute(format!(
                        "CREATE OR REPLACE TABLE {table} AS SELECT DISTINCT * FROM {table}"
                    ))
                    .await?;
                json!({ "rows_before": before, "rows_after": self.0.row_count(&table).await? })
            }
            "dropna" => {
                let columns: Vec<String> = match column {
                    Some(column) => vec![column.to_string()],
                    None => engine
                        .describe(format!("SELECT * FROM {table}"))
                        .await?
                        .into_iter()
                        .map(|(name, _)| name)
                        .collect(),
                };
                let predicate = columns
                    .iter()
                    .map(|c| format!("{} IS NOT NULL", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let before = self.0.row_count(&table).await?;
                engine
                    .execute(format!(
                        "CREATE OR REPLACE TABLE {table} AS SELECT * FROM {table} WHERE {predicate}"
                    ))
                    .await?;
                json!({ "rows_before": before, "rows_after": self.0.row_count(&table).await? })
            }
            other => {
                return Err(SayrError::Protocol(format!(
                    "unsupported operation `{other}`; expected one of {}",
                    OPERATIONS.join(", ")
                )))
            }
        };

        Ok(json!({
            "dataframe_name": name,
            "operation": operation,
            "result": result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loaded() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.csv");
        std::fs::write(
            &path,
            "student,school,score\nana,North,80\nbo,South,90\nbo,South,90\ncy,North,\n",
        )
        .unwrap();
        let tools = DataFrameTools::new().into_registry().unwrap();
        tools
            .call(
                "create_dataframe",
                json!({"dataframe_name": "perf", "path": path.display().to_string()}),
            )
            .await
            .unwrap();
        (dir, tools)
    }

    async fn op(tools: &ToolRegistry, args: Value) -> Value {
        tools
            .call("run_dataframe_operation", args)
            .await
            .unwrap()["result"]
            .clone()
    }

    #[tokio::test]
    async fn shape_head_and_tail() {
        let (_dir, tools) = loaded().await;
        let shape = op(&tools, json!({"dataframe_name": "perf", "operation": "shape"})).await;
        assert_eq!(shape, json!({"rows": 4, "columns": 3}));

        let head = op(&tools, json!({"dataframe_name": "perf", "operation": "head", "n": 1})).await;
        assert_eq!(head["rows"][0]["student"], "ana");

        let tail = op(&tools, json!({"dataframe_name": "perf", "operation": "tail", "n": 1})).await;
        assert_eq!(tail["rows"][0]["student"], "cy");
        assert!(tail["rows"][0].get("__row").is_none());
    }

    #[tokio::test]
    async fn statistics_and_grouping() {
        let (_dir, tools) = loaded().await;
        let mean = op(
            &tools,
            json!({"dataframe_name": "perf", "operation": "mean", "column": "score"}),
        )
        .await;
        assert!((mean["score"].as_f64().unwrap() - 260.0 / 3.0).abs() < 1e-9);

        let grouped = op(
            &tools,
            json!({"dataframe_name": "perf", "operation": "group_mean", "column": "score", "by": "school"}),
        )
        .await;
        assert_eq!(grouped["rows"][0]["school"], "North");
        assert_eq!(grouped["rows"][1]["mean"], json!(90.0));

        let described =
            op(&tools, json!({"dataframe_name": "perf", "operation": "describe"})).await;
        assert_eq!(described["score"]["count"], 3);
    }

    #[tokio::test]
    async fn cleaning_operations_mutate_the_frame() {
        let (_dir, tools) = loaded().await;
        let dedup =
            op(&tools, json!({"dataframe_name": "perf", "operation": "drop_duplicates"})).await;
        assert_eq!(dedup, json!({"rows_before": 4, "rows_after": 3}));
        let dropped = op(&tools, json!({"dataframe_name": "perf", "operation": "dropna"})).await;
        assert_eq!(dropped, json!({"rows_before": 3, "rows_after": 2}));
    }

    #[tokio::test]
    async fn rejects_unknown_frames_and_operations() {
        let (_dir, tools) = loaded().await;
        assert!(tools
            .call(
                "run_dataframe_operation",
                json!({"dataframe_name": "ghost", "operation": "head"}),
            )
            .await
            .is_err());
        assert!(tools
            .call(
                "run_dataframe_operation",
                json!({"dataframe_name": "perf", "operation": "pivot"}),
            )
            .await
            .is_err());

        let read_only = DataFrameTools::new()
            .enable_create_dataframe(false)
            .into_registry()
            .unwrap();
        assert!(!read_only.contains("create_dataframe"));
    }
}

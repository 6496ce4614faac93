//! CSV toolkit.
//!
//! Lists, reads and queries a fixed set of CSV files through DuckDB. Each
//! file is addressed by its stem (`docs/Student_Performance.csv` is
//! `Student_Performance`) and is exposed to SQL as a table of that name.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::duckdb::{is_read_only, quote_ident, quote_path, DuckDbEngine};
use crate::error::{Result, SayrError};
use crate::tool::{optional_usize, required_str, Tool, ToolRegistry};

struct CsvState {
    csvs: Vec<PathBuf>,
    default_row_limit: Option<usize>,
    engine: DuckDbEngine,
}

impl CsvState {
    fn stem(path: &std::path::Path) -> String {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn find(&self, csv_name: &str) -> Result<&PathBuf> {
        let wanted = csv_name.trim_end_matches(".csv");
        self.csvs
            .iter()
            .find(|path| Self::stem(path) == wanted)
            .ok_or_else(|| {
                SayrError::Protocol(format!(
                    "unknown csv `{csv_name}`; available: {}",
                    self.names().join(", ")
                ))
            })
    }

    fn names(&self) -> Vec<String> {
        self.csvs.iter().map(|path| Self::stem(path)).collect()
    }

    fn source(&self, csv_name: &str) -> Result<String> {
        Ok(format!("read_csv_auto({})", quote_path(self.find(csv_name)?)))
    }
}

/// Builder for the CSV tools.
pub struct CsvTools {
    csvs: Vec<PathBuf>,
    row_limit: Option<usize>,
}

impl CsvTools {
    pub fn new<I, P>(csvs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            csvs: csvs.into_iter().map(Into::into).collect(),
            row_limit: None,
        }
    }

    /// Default number of rows `read_csv_file` returns.
    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = Some(row_limit);
        self
    }

    pub fn into_registry(self) -> Result<ToolRegistry> {
        let state = Arc::new(CsvState {
            csvs: self.csvs,
            default_row_limit: self.row_limit,
            engine: DuckDbEngine::in_memory()?,
        });
        let mut registry = ToolRegistry::new();
        registry.register(ListCsvFilesTool(state.clone()));
        registry.register(ReadCsvFileTool(state.clone()));
        registry.register(GetColumnsTool(state.clone()));
        registry.register(QueryCsvFileTool(state));
        Ok(registry)
    }
}

struct ListCsvFilesTool(Arc<CsvState>);

#[async_trait]
impl Tool for ListCsvFilesTool {
    fn name(&self) -> &str {
        "list_csv_files"
    }

    fn description(&self) -> &str {
        "List the CSV files available to query, by name."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({"type": "object", "properties": {}}))
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        Ok(json!({ "csv_files": self.0.names() }))
    }
}

struct ReadCsvFileTool(Arc<CsvState>);

#[async_trait]
impl Tool for ReadCsvFileTool {
    fn name(&self) -> &str {
        "read_csv_file"
    }

    fn description(&self) -> &str {
        "Read rows of a CSV file. Expects {\"csv_name\": string, \"row_limit\": number?}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "csv_name": {"type": "string", "description": "Name of the CSV file without extension"},
                "row_limit": {"type": "integer", "description": "Maximum number of rows to return"}
            },
            "required": ["csv_name"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let csv_name = required_str(&input, "csv_name", self.name())?;
        let mut sql = format!("SELECT * FROM {}", self.0.source(csv_name)?);
        if let Some(limit) = optional_usize(&input, "row_limit").or(self.0.default_row_limit) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Ok(self.0.engine.query(sql).await?.into_json())
    }
}

struct GetColumnsTool(Arc<CsvState>);

#[async_trait]
impl Tool for GetColumnsTool {
    fn name(&self) -> &str {
        "get_columns"
    }

    fn description(&self) -> &str {
        "Get the column names and types of a CSV file. Expects {\"csv_name\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "csv_name": {"type": "string", "description": "Name of the CSV file without extension"}
            },
            "required": ["csv_name"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let csv_name = required_str(&input, "csv_name", self.name())?;
        let columns = self
            .0
            .engine
            .describe(format!("SELECT * FROM {}", self.0.source(csv_name)?))
            .await?;
        let columns: Vec<Value> = columns
            .into_iter()
            .map(|(name, ty)| json!({"name": name, "type": ty}))
            .collect();
        Ok(json!({ "csv_name": csv_name, "columns": columns }))
    }
}

struct QueryCsvFileTool(Arc<CsvState>);

#[async_trait]
impl Tool for QueryCsvFileTool {
    fn name(&self) -> &str {
        "query_csv_file"
    }

    fn description(&self) -> &str {
        "Run a read-only DuckDB SQL query against a CSV file. The file is available as a table named after the csv_name. Expects {\"csv_name\": string, \"sql_query\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "csv_name": {"type": "string", "description": "Name of the CSV file without extension"},
                "sql_query": {"type": "string", "description": "SELECT statement to run"}
            },
            "required": ["csv_name", "sql_query"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let csv_name = required_str(&input, "csv_name", self.name())?;
        let sql_query = required_str(&input, "sql_query", self.name())?;
        if !is_read_only(sql_query) {
            return Err(SayrError::Protocol(
                "only read-only SELECT queries are allowed".into(),
            ));
        }
        let table = CsvState::stem(self.0.find(csv_name)?);
        self.0
            .engine
            .execute(format!(
                "CREATE OR REPLACE VIEW {} AS SELECT * FROM {}",
                quote_ident(&table),
                self.0.source(csv_name)?
            ))
            .await?;
        let result = self.0.engine.query(sql_query).await?;
        Ok(json!({
            "csv_name": csv_name,
            "query": sql_query,
            "columns": result.columns,
            "row_count": result.rows.len(),
            "rows": result.rows,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        std::fs::write(
            &path,
            "name,school_type,study_hours,math\nana,Public,5,80\nbo,Private,8,92\ncy,Public,3,70\n",
        )
        .unwrap();
        let tools = CsvTools::new([path]).into_registry().unwrap();
        (dir, tools)
    }

    #[tokio::test]
    async fn lists_and_reads() {
        let (_dir, tools) = sample();
        let listed = tools.call("list_csv_files", json!({})).await.unwrap();
        assert_eq!(listed["csv_files"], json!(["students"]));

        let rows = tools
            .call("read_csv_file", json!({"csv_name": "students", "row_limit": 2}))
            .await
            .unwrap();
        assert_eq!(rows["row_count"], 2);
        assert_eq!(rows["rows"][0]["name"], "ana");

        let columns = tools
            .call("get_columns", json!({"csv_name": "students"}))
            .await
            .unwrap();
        assert_eq!(columns["columns"][2]["name"], "study_hours");
    }

    #[tokio::test]
    async fn queries_by_stem_table() {
        let (_dir, tools) = sample();
        let result = tools
            .call(
                "query_csv_file",
                json!({
                    "csv_name": "students",
                    "sql_query": "SELECT school_type, max(study_hours) AS hours FROM students GROUP BY school_type ORDER BY hours DESC"
                }),
            )
            .await
            .unwrap();
        assert_eq!(result["rows"][0]["school_type"], "Private");
        assert_eq!(result["rows"][0]["hours"], 8);

        let blocked = tools
            .call(
                "query_csv_file",
                json!({"csv_name": "students", "sql_query": "DROP VIEW students"}),
            )
            .await;
        assert!(blocked.is_err());
        assert!(tools
            .call("read_csv_file", json!({"csv_name": "nope"}))
            .await
            .is_err());
    }
}

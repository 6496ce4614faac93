//! Toolkits agents can be given.
//!
//! - CSV: list, read and query CSV files (DuckDB)
//! - DataFrame: named tables with pandas-style operations (DuckDB)
//! - Visualization: Vega-Lite chart files
//! - Hacker News: top stories and user profiles
//! - Knowledge: search a knowledge base and save learnings into it

#[cfg(feature = "duckdb")]
pub mod csv;
#[cfg(feature = "duckdb")]
pub mod dataframe;
#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod hackernews;
pub mod knowledge;
pub mod visualization;

#[cfg(feature = "duckdb")]
pub use csv::CsvTools;
#[cfg(feature = "duckdb")]
pub use dataframe::DataFrameTools;
pub use hackernews::{hackernews_toolkit, HackerNewsConfig};
pub use knowledge::{knowledge_toolkit, SaveLearningTool, SearchKnowledgeTool};
pub use visualization::visualization_toolkit;

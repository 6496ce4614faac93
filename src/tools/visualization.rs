//! Visualization toolkit.
//!
//! Charts are written as Vega-Lite specifications (`<name>.vl.json`) into an
//! output directory; any Vega-Lite viewer renders them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Result, SayrError};
use crate::tool::{optional_usize, Tool, ToolRegistry};

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// Create the chart tools writing into `output_dir`.
pub fn visualization_toolkit(output_dir: impl Into<PathBuf>) -> ToolRegistry {
    let output = Arc::new(ChartOutput {
        dir: output_dir.into(),
    });
    let mut registry = ToolRegistry::new();
    for kind in [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Histogram,
    ] {
        registry.register(ChartTool {
            kind,
            output: output.clone(),
        });
    }
    registry
}

struct ChartOutput {
    dir: PathBuf,
}

impl ChartOutput {
    async fn write(&self, name: &str, spec: &Value) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.vl.json", file_stem(name)));
        tokio::fs::write(&path, serde_json::to_vec_pretty(spec)?).await?;
        Ok(path)
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let stem = stem.trim_matches('_').to_string();
    if stem.is_empty() {
        "chart".to_string()
    } else {
        stem
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
}

impl ChartKind {
    fn tool_name(&self) -> &'static str {
        match self {
            ChartKind::Bar => "create_bar_chart",
            ChartKind::Line => "create_line_chart",
            ChartKind::Pie => "create_pie_chart",
            ChartKind::Scatter => "create_scatter_plot",
            ChartKind::Histogram => "create_histogram",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ChartKind::Bar => "Create a bar chart. Expects {\"data\": {label: number} or [{label, value}], \"title\": string?, \"x_label\": string?, \"y_label\": string?}.",
            ChartKind::Line => "Create a line chart. Expects {\"data\": {x: number} or [{label, value}], \"title\": string?, \"x_label\": string?, \"y_label\": string?}.",
            ChartKind::Pie => "Create a pie chart. Expects {\"data\": {category: number} or [{label, value}], \"title\": string?}.",
            ChartKind::Scatter => "Create a scatter plot. Expects {\"x_data\": [number], \"y_data\": [number], \"title\": string?, \"x_label\": string?, \"y_label\": string?}.",
            ChartKind::Histogram => "Create a histogram. Expects {\"data\": [number], \"bins\": number?, \"title\": string?, \"x_label\": string?}.",
        }
    }

    fn parameters(&self) -> Value {
        let labels = json!({
            "title": {"type": "string"},
            "x_label": {"type": "string"},
            "y_label": {"type": "string"},
            "filename": {"type": "string", "description": "Output file name without extension"}
        });
        let mut properties = labels.as_object().cloned().unwrap_or_default();
        let required = match self {
            ChartKind::Scatter => {
                properties.insert(
                    "x_data".into(),
                    json!({"type": "array", "items": {"type": "number"}}),
                );
                properties.insert(
                    "y_data".into(),
                    json!({"type": "array", "items": {"type": "number"}}),
                );
                json!(["x_data", "y_data"])
            }
            ChartKind::Histogram => {
                properties.insert(
                    "data".into(),
                    json!({"type": "array", "items": {"type": "number"}}),
                );
                properties.insert("bins".into(), json!({"type": "integer"}));
                json!(["data"])
            }
            _ => {
                properties.insert(
                    "data".into(),
                    json!({"description": "Object of label to value, or array of {label, value} objects"}),
                );
                json!(["data"])
            }
        };
        json!({"type": "object", "properties": properties, "required": required})
    }
}

struct ChartTool {
    kind: ChartKind,
    output: Arc<ChartOutput>,
}

fn text_arg<'a>(input: &'a Value, field: &str, default: &'a str) -> &'a str {
    input.get(field).and_then(Value::as_str).unwrap_or(default)
}

fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}

/// Accept `{label: value}` or `[{label, value}]` (also `x`/`y` or `category`/`count`).
fn labelled_points(data: &Value) -> Result<Vec<(String, f64)>> {
    let points: Vec<(String, f64)> = match data {
        Value::Object(map) => map
            .iter()
            .filter_map(|(label, value)| as_number(value).map(|v| (label.clone(), v)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let label = ["label", "x", "category", "name"]
                    .iter()
                    .find_map(|key| item.get(*key))
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))?;
                let value = ["value", "y", "count"]
                    .iter()
                    .find_map(|key| item.get(*key))
                    .and_then(as_number)?;
                Some((label, value))
            })
            .collect(),
        _ => Vec::new(),
    };
    if points.is_empty() {
        return Err(SayrError::Protocol(
            "`data` must hold at least one label with a numeric value".into(),
        ));
    }
    Ok(points)
}

fn numbers(input: &Value, field: &str) -> Result<Vec<f64>> {
    let values: Vec<f64> = input
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(as_number).collect())
        .unwrap_or_default();
    if values.is_empty() {
        return Err(SayrError::Protocol(format!(
            "`{field}` must be a non-empty array of numbers"
        )));
    }
    Ok(values)
}

impl ChartTool {
    fn build_spec(&self, input: &Value) -> Result<(Value, usize)> {
        let title = text_arg(input, "title", "Chart");
        let x_label = text_arg(input, "x_label", "x");
        let y_label = text_arg(input, "y_label", "y");

        let (body, points) = match self.kind {
            ChartKind::Bar | ChartKind::Line => {
                let points = labelled_points(input.get("data").unwrap_or(&Value::Null))?;
                let values: Vec<Value> = points
                    .iter()
                    .map(|(label, value)| json!({"label": label, "value": value}))
                    .collect();
                let mark = if self.kind == ChartKind::Bar { "bar" } else { "line" };
                let x_type = if self.kind == ChartKind::Bar { "nominal" } else { "ordinal" };
                (
                    json!({
                        "data": {"values": values},
                        "mark": {"type": mark, "tooltip": true},
                        "encoding": {
                            "x": {"field": "label", "type": x_type, "title": x_label, "sort": null},
                            "y": {"field": "value", "type": "quantitative", "title": y_label}
                        }
                    }),
                    points.len(),
                )
            }
            ChartKind::Pie => {
                let points = labelled_points(input.get("data").unwrap_or(&Value::Null))?;
                let values: Vec<Value> = points
                    .iter()
                    .map(|(label, value)| json!({"label": label, "value": value}))
                    .collect();
                (
                    json!({
                        "data": {"values": values},
                        "mark": {"type": "arc", "tooltip": true},
                        "encoding": {
                            "theta": {"field": "value", "type": "quantitative"},
                            "color": {"field": "label", "type": "nominal"}
                        }
                    }),
                    points.len(),
                )
            }
            ChartKind::Scatter => {
                let xs = numbers(input, "x_data")?;
                let ys = numbers(input, "y_data")?;
                if xs.len() != ys.len() {
                    return Err(SayrError::Protocol(format!(
                        "x_data has {} values but y_data has {}",
                        xs.len(),
                        ys.len()
                    )));
                }
                let values: Vec<Value> = xs
                    .iter()
                    .zip(ys.iter())
                    .map(|(x, y)| json!({"x": x, "y": y}))
                    .collect();
                (
                    json!({
                        "data": {"values": values},
                        "mark": {"type": "point", "tooltip": true},
                        "encoding": {
                            "x": {"field": "x", "type": "quantitative", "title": x_label},
                            "y": {"field": "y", "type": "quantitative", "title": y_label}
                        }
                    }),
                    xs.len(),
                )
            }
            ChartKind::Histogram => {
                let data = numbers(input, "data")?;
                let bins = optional_usize(input, "bins").unwrap_or(10).max(1);
                let values: Vec<Value> = data.iter().map(|v| json!({"value": v})).collect();
                (
                    json!({
                        "data": {"values": values},
                        "mark": "bar",
                        "encoding": {
                            "x": {"field": "value", "bin": {"maxbins": bins}, "type": "quantitative", "title": x_label},
                            "y": {"aggregate": "count", "type": "quantitative", "title": text_arg(input, "y_label", "count")}
                        }
                    }),
                    data.len(),
                )
            }
        };

        let mut spec = json!({"$schema": VEGA_LITE_SCHEMA, "title": title});
        if let (Some(spec_map), Value::Object(body)) = (spec.as_object_mut(), body) {
            spec_map.extend(body);
        }
        Ok((spec, points))
    }
}

#[async_trait]
impl Tool for ChartTool {
    fn name(&self) -> &str {
        self.kind.tool_name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn parameters(&self) -> Option<Value> {
        Some(self.kind.parameters())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let (spec, data_points) = self.build_spec(&input)?;
        let name = input
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or_else(|| text_arg(&input, "title", self.kind.tool_name()));
        let path = self.output.write(name, &spec).await?;
        tracing::debug!(chart = self.kind.tool_name(), path = %path.display(), "chart written");
        Ok(json!({
            "chart_type": self.kind.tool_name().trim_start_matches("create_"),
            "file_path": display(&path),
            "data_points": data_points,
        }))
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_bar_chart_spec() {
        let dir = tempfile::tempdir().unwrap();
        let tools = visualization_toolkit(dir.path().join("visualizations"));
        assert_eq!(tools.len(), 5);

        let result = tools
            .call(
                "create_bar_chart",
                json!({"data": {"Math": 71.5, "Reading": "68"}, "title": "Average Scores", "y_label": "score"}),
            )
            .await
            .unwrap();
        assert_eq!(result["data_points"], 2);
        let path = PathBuf::from(result["file_path"].as_str().unwrap());
        assert!(path.ends_with("average_scores.vl.json"));

        let spec: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(spec["mark"]["type"], "bar");
        assert_eq!(spec["title"], "Average Scores");
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scatter_requires_matching_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let tools = visualization_toolkit(dir.path());
        assert!(tools
            .call("create_scatter_plot", json!({"x_data": [1, 2], "y_data": [3]}))
            .await
            .is_err());

        let ok = tools
            .call(
                "create_histogram",
                json!({"data": [1, 2, 2, 3], "bins": 3, "filename": "hours"}),
            )
            .await
            .unwrap();
        assert_eq!(ok["chart_type"], "histogram");
        assert!(dir.path().join("hours.vl.json").exists());
    }

    #[tokio::test]
    async fn pie_accepts_labelled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let tools = visualization_toolkit(dir.path());
        let result = tools
            .call(
                "create_pie_chart",
                json!({"data": [{"category": "Public", "count": 3}, {"category": "Private", "count": 2}]}),
            )
            .await
            .unwrap();
        assert_eq!(result["data_points"], 2);
        assert!(tools.call("create_line_chart", json!({"data": []})).await.is_err());
    }
}

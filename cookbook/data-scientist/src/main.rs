use std::path::PathBuf;

use sayr_agents::{build_model, init_tracing, recipes, AppConfig, Result, TracingFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let model = build_model(&cfg.model)?;
    let agent = recipes::data_scientist(
        model,
        &[PathBuf::from("docs/Student_Performance.csv")],
        "visualizations",
    )?
    .with_defaults(&cfg.agent)
    .with_streaming(cfg.model.stream);

    let output = agent
        .run("Give me summary statistics for the subject wise performance of the students.")
        .await?;
    println!("{}", output.content);
    tracing::info!(
        model_calls = output.metrics.model_calls,
        tool_calls = output.metrics.tool_calls,
        "done"
    );
    Ok(())
}

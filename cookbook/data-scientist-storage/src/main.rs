use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sayr_agents::{
    build_model, init_tracing, recipes, AgentOs, AppConfig, Result, SayrError, SqliteDb,
    TracingFormat,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let db = SqliteDb::open("tmp/agent_storage.db").await?;
    let agent = recipes::data_scientist_with_storage(
        build_model(&cfg.model)?,
        db.session_store().await?,
        &[PathBuf::from("docs/Student_Performance.csv")],
        "visualizations",
    )?;

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| SayrError::Config(format!("invalid server address: {err}")))?;
    AgentOs::new(
        "data_science_os",
        "A data scientist for analyzing and manipulating data.",
    )
    .with_agent(Arc::new(agent))
    .serve(addr)
    .await
}

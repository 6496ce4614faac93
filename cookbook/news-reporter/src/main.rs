use std::net::SocketAddr;
use std::sync::Arc;

use sayr_agents::tools::HackerNewsConfig;
use sayr_agents::{
    build_model, init_tracing, recipes, AgentOs, AppConfig, Result, SayrError, SqliteDb,
    TracingFormat,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let db = SqliteDb::open("tmp/agent_storage.db").await?;
    let knowledge = Arc::new(
        recipes::learning_knowledge(
            recipes::embedder(&cfg.knowledge, std::env::var("OPENAI_API_KEY").ok()),
            db.vector_store("self_learning_table").await?,
        )
        .with_min_score(cfg.knowledge.min_score),
    );
    let agent = recipes::news_reporter(
        build_model(&cfg.model)?,
        knowledge,
        db.session_store().await?,
        HackerNewsConfig::default(),
    )?
    .with_max_tool_calls(cfg.agent.max_tool_calls);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| SayrError::Config(format!("invalid server address: {err}")))?;
    AgentOs::new(
        "self_learning_os",
        "A news reporter agent that learns and improves over time by saving and reusing insights.",
    )
    .with_agent(Arc::new(agent))
    .serve(addr)
    .await
}

use std::net::SocketAddr;
use std::sync::Arc;

use sayr_agents::{
    build_model, init_tracing, recipes, AgentOs, AppConfig, ContentSource, Result, SayrError,
    SqliteDb, TracingFormat,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let db = SqliteDb::open("tmp/agent_storage.db").await?;
    let knowledge = Arc::new(
        recipes::story_knowledge(
            recipes::embedder(&cfg.knowledge, std::env::var("OPENAI_API_KEY").ok()),
            db.vector_store("knowledge_embeddings").await?,
        )
        .with_chunking(cfg.knowledge.chunk_size, cfg.knowledge.chunk_overlap)
        .with_min_score(cfg.knowledge.min_score),
    );
    let report = knowledge
        .add_content(
            ContentSource::path("story_embeddings", "docs/story_book.pdf"),
            true,
        )
        .await?;
    tracing::info!(content = %report.name, chunks = report.chunks, skipped = report.skipped, "story book ready");

    let agent = recipes::storyteller(
        build_model(&cfg.model)?,
        knowledge,
        db.session_store().await?,
    );

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| SayrError::Config(format!("invalid server address: {err}")))?;
    AgentOs::new(
        "storyteller_os",
        "A storyteller agent for narrating and answering questions about stories.",
    )
    .with_agent(Arc::new(agent))
    .serve(addr)
    .await
}

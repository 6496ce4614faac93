use std::path::PathBuf;
use std::sync::Arc;

use sayr_agents::{
    build_model, init_tracing, recipes, AppConfig, Result, RunInput, SqliteDb, TracingFormat,
};

const USER_ID: &str = "abc@example.com";

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let db = SqliteDb::open("tmp/agent_storage.db").await?;
    let model = build_model(&cfg.model)?;
    let manager = Arc::new(recipes::memory_manager(
        model.clone(),
        db.memory_store().await?,
    ));
    let agent = recipes::memory_agent(
        model,
        manager,
        db.session_store().await?,
        &[PathBuf::from("docs/Student_Performance.csv")],
        "visualizations",
    )?;

    for prompt in [
        "I prefer visualizations over tables. I like visualizations that are easy to interpret. Give me summary statistics for the subject wise performance of the students.",
        "Can you show me a summary of the Student_Performance.csv dataset?",
    ] {
        let output = agent.run(RunInput::new(prompt).with_user(USER_ID)).await?;
        println!("{}\n", output.content);
    }

    println!("Memories for {USER_ID}:");
    for memory in agent.get_user_memories(USER_ID).await? {
        println!("- {} {:?}", memory.memory, memory.topics);
    }
    Ok(())
}

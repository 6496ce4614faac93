use std::io::{self, Write};

use sayr_agents::config::{ModelConfig, ModelProvider};
use sayr_agents::{
    build_model, init_tracing, recipes, AppConfig, Message, MessagesState, Result, TracingFormat,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Reads `.env` for GOOGLE_API_KEY.
    AppConfig::load("sayr.toml")?;
    init_tracing(TracingFormat::Pretty)?;

    let model = build_model(
        &ModelConfig::new(ModelProvider::Gemini, "gemini-2.5-flash").with_env_credentials(),
    )?;
    let graph = recipes::chat_graph(model)?;

    print!("Enter a message: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let state = graph
        .invoke(MessagesState::new(vec![Message::user(input.trim())]))
        .await?;
    if let Some(reply) = state.last() {
        println!("{}", reply.content);
    }
    println!("{}", graph.draw_ascii());
    Ok(())
}

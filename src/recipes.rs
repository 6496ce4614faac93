//! Ready-made agent configurations used by the cookbook binaries.
//!
//! Every preset takes its model and stores as arguments so the same wiring
//! runs against a real backend or a [`StubModel`](crate::llm::StubModel).

use std::sync::Arc;

use crate::agent::Agent;
use crate::config::KnowledgeConfig;
use crate::error::Result;
use crate::graph::{ChatbotNode, CompiledGraph, StateGraph, END, START};
use crate::knowledge::{
    Embedder, KnowledgeBase, OpenAiEmbedder, SearchType, VectorStore, WhitespaceEmbedder,
};
use crate::llm::LanguageModel;
use crate::memory::{MemoryManager, UserMemoryStore};
use crate::session::SessionStore;
use crate::tools::{hackernews_toolkit, knowledge_toolkit, HackerNewsConfig};

#[cfg(feature = "duckdb")]
use std::path::PathBuf;

#[cfg(feature = "duckdb")]
use crate::tool::ToolRegistry;
#[cfg(feature = "duckdb")]
use crate::tools::{visualization_toolkit, CsvTools, DataFrameTools};

pub const DATA_SCIENTIST_INSTRUCTIONS: &str = "\
You are a junior data scientist agent. Your responsibilities include:

1. Loading and inspecting datasets using the dataframe and CSV tools.
2. Cleaning data: handle missing values, remove duplicates, and ensure data consistency.
3. Performing exploratory data analysis (EDA):
    - Generate summary statistics (mean, median, mode, etc.).
    - Identify data types and distributions.
    - Detect outliers and anomalies.
4. Visualizing data using the visualization tools:
    - Create histograms, scatter plots, line, pie and bar charts.
    - Use appropriate plots to explore relationships between variables.
5. Preparing data for modeling:
    - Encode categorical variables.
    - Normalize or scale features if needed.
6. Building and evaluating simple models (e.g., linear regression, classification) if required.
7. Reporting findings in a clear, concise, and beginner-friendly manner.

Always use the provided tools (dataframe, CSV, visualization) for your tasks. If you are unsure, ask for clarification or suggest next steps.";

pub const STORYTELLER_INSTRUCTIONS: &str = "\
You are a friendly and engaging storyteller agent with access to the full text of 'story_book.pdf', which contains multiple classic children's stories. Your responsibilities include:

1. Narrating any story from 'story_book.pdf' in a captivating and child-friendly manner when asked.
2. Answering questions about the stories, characters, morals, and events from any story in the PDF.
3. Summarizing stories or sections from the PDF in a way that is easy to understand and enjoyable.
4. Providing details, quotes, or explanations based on the content of any story in the PDF.
5. Always search the knowledge base (containing the full PDF) first for any question or storytelling request, and use information from the PDF in your responses.
6. If you cannot find the answer or story in the knowledge base, let the user know or ask for clarification.

If you are unsure, ask for clarification or suggest next steps.";

pub const NEWS_REPORTER_INSTRUCTIONS: &str = "\
You are a News Reporter Agent that learns and improves over time.

You have two special abilities:
1. Search your knowledge base for previously saved learnings
2. Save new insights using the save_learning tool

## Workflow

1. Check Knowledge First
   - Before answering, search for relevant prior learnings
   - Apply any relevant insights to your response

2. Gather Information
   - Use HackerNews tools for news, articles.
   - Combine with your knowledge base insights

3. Propose Learnings
   - After answering, consider: is there a reusable insight here?
   - If yes, propose it in this format:

---
**Proposed Learning**

Title: [concise title]
Learning: [the insight - specific and actionable]

Save this? (yes/no)
---

- Only call save_learning AFTER the user says \"yes\"
- If user says \"no\", acknowledge and move on

## What Makes a Good Learning

- Specific: \"Tech P/E ratios typically range 20-35x\" not \"P/E varies\"
- Actionable: Can be applied to future questions
- Reusable: Useful beyond this one conversation

Don't save: Raw data, one-off facts, or obvious information.";

pub const MEMORY_CAPTURE_INSTRUCTIONS: &str =
    "Capture the user's behaviours, interests, their preferences, and their goals.";

pub const STORY_KNOWLEDGE_DESCRIPTION: &str = "A knowledge base containing the full text of 5 different stories. The agent can answer questions, narrate, and summarize stories, and provide details about characters, morals, and events from the book.";

pub const LEARNING_KNOWLEDGE_DESCRIPTION: &str = "A knowledge base for self-learning resources including articles, tutorials, and documentation on various topics.";

/// OpenAI embeddings when a key is available, the local hashed embedder otherwise.
pub fn embedder(cfg: &KnowledgeConfig, openai_api_key: Option<String>) -> Arc<dyn Embedder> {
    match openai_api_key.filter(|key| !key.is_empty()) {
        Some(key) => Arc::new(OpenAiEmbedder::new(key)),
        None => Arc::new(WhitespaceEmbedder::new(cfg.embedding_buckets)),
    }
}

/// CSV, dataframe and chart tools over the given files.
#[cfg(feature = "duckdb")]
pub fn data_science_tools(
    csvs: &[PathBuf],
    output_dir: impl Into<PathBuf>,
    enable_create_dataframe: bool,
) -> Result<ToolRegistry> {
    let mut tools = DataFrameTools::new()
        .enable_create_dataframe(enable_create_dataframe)
        .into_registry()?;
    tools.extend(CsvTools::new(csvs.iter().cloned()).into_registry()?);
    tools.extend(visualization_toolkit(output_dir));
    Ok(tools)
}

#[cfg(feature = "duckdb")]
pub fn data_scientist(
    model: Arc<dyn LanguageModel>,
    csvs: &[PathBuf],
    output_dir: impl Into<PathBuf>,
) -> Result<Agent> {
    Ok(Agent::new("Junior Data Scientist Agent", model)
        .with_instructions([DATA_SCIENTIST_INSTRUCTIONS])
        .with_tools(data_science_tools(csvs, output_dir, true)?)
        .with_markdown(true))
}

/// The data scientist with persisted sessions and the last five runs in context.
#[cfg(feature = "duckdb")]
pub fn data_scientist_with_storage(
    model: Arc<dyn LanguageModel>,
    sessions: Arc<dyn SessionStore>,
    csvs: &[PathBuf],
    output_dir: impl Into<PathBuf>,
) -> Result<Agent> {
    Ok(Agent::new("Junior Data Scientist Agent 2.0", model)
        .with_instructions([DATA_SCIENTIST_INSTRUCTIONS])
        .with_tools(data_science_tools(csvs, output_dir, true)?)
        .with_session_store(sessions)
        .with_history(5)
        .with_markdown(true))
}

pub fn story_knowledge(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> KnowledgeBase {
    KnowledgeBase::new("story_knowledge_base", embedder, store)
        .with_description(STORY_KNOWLEDGE_DESCRIPTION)
        .with_search_type(SearchType::Hybrid)
        .with_max_results(5)
}

pub fn storyteller(
    model: Arc<dyn LanguageModel>,
    knowledge: Arc<KnowledgeBase>,
    sessions: Arc<dyn SessionStore>,
) -> Agent {
    Agent::new("Storyteller Agent", model)
        .with_instructions([STORYTELLER_INSTRUCTIONS])
        .with_knowledge(knowledge, true)
        .with_session_store(sessions)
        .with_history(3)
        .with_markdown(true)
}

pub fn learning_knowledge(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
) -> KnowledgeBase {
    KnowledgeBase::new("self_learning_kb", embedder, store)
        .with_description(LEARNING_KNOWLEDGE_DESCRIPTION)
        .with_search_type(SearchType::Hybrid)
        .with_max_results(5)
}

pub fn news_reporter(
    model: Arc<dyn LanguageModel>,
    knowledge: Arc<KnowledgeBase>,
    sessions: Arc<dyn SessionStore>,
    hackernews: HackerNewsConfig,
) -> Result<Agent> {
    let mut tools = hackernews_toolkit(hackernews)?;
    tools.extend(knowledge_toolkit(knowledge.clone()));
    Ok(Agent::new("News Reporter Agent", model)
        .with_instructions([NEWS_REPORTER_INSTRUCTIONS])
        .with_tools(tools)
        .with_knowledge(knowledge, true)
        .with_session_store(sessions)
        .with_history(5)
        .with_markdown(true))
}

pub fn memory_manager(
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn UserMemoryStore>,
) -> MemoryManager {
    MemoryManager::new(model, store).with_additional_instructions(MEMORY_CAPTURE_INSTRUCTIONS)
}

/// The data scientist that remembers each user's preferences after every run.
#[cfg(feature = "duckdb")]
pub fn memory_agent(
    model: Arc<dyn LanguageModel>,
    manager: Arc<MemoryManager>,
    sessions: Arc<dyn SessionStore>,
    csvs: &[PathBuf],
    output_dir: impl Into<PathBuf>,
) -> Result<Agent> {
    Ok(Agent::new("Junior Data Scientist Agent", model)
        .with_instructions([DATA_SCIENTIST_INSTRUCTIONS])
        .with_tools(data_science_tools(csvs, output_dir, false)?)
        .with_session_store(sessions)
        .with_memory_manager(manager)
        .enable_user_memories()
        .with_history(5)
        .with_markdown(true))
}

/// `START -> chatbot -> END`.
pub fn chat_graph(model: Arc<dyn LanguageModel>) -> Result<CompiledGraph> {
    let mut builder = StateGraph::new();
    builder.add_node("chatbot", Arc::new(ChatbotNode::new(model)))?;
    builder.add_edge(START, "chatbot").add_edge("chatbot", END);
    builder.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryVectorStore;
    use crate::llm::StubModel;
    use crate::session::InMemorySessionStore;

    #[test]
    fn news_reporter_has_news_and_learning_tools() {
        let kb = Arc::new(learning_knowledge(
            Arc::new(WhitespaceEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
        ));
        let agent = news_reporter(
            StubModel::new(vec![]),
            kb,
            Arc::new(InMemorySessionStore::new()),
            HackerNewsConfig::default(),
        )
        .unwrap();
        assert_eq!(
            agent.tool_names(),
            vec![
                "get_top_hackernews_stories",
                "get_user_details",
                "save_learning",
                "search_knowledge_base"
            ]
        );
        assert_eq!(agent.knowledge().unwrap().name(), "self_learning_kb");
    }

    #[tokio::test]
    async fn local_embedder_without_a_key() {
        let cfg = KnowledgeConfig {
            embedding_buckets: 32,
            ..KnowledgeConfig::default()
        };
        let local = embedder(&cfg, Some(String::new()));
        assert_eq!(local.embed("hello world").await.unwrap().len(), 32);
    }

    #[cfg(feature = "duckdb")]
    #[test]
    fn memory_agent_cannot_create_dataframes() {
        let store: Arc<dyn UserMemoryStore> = Arc::new(crate::memory::InMemoryMemoryStore::new());
        let model = StubModel::new(vec![]);
        let manager = Arc::new(memory_manager(model.clone(), store));
        let dir = tempfile::tempdir().unwrap();
        let agent = memory_agent(
            model,
            manager,
            Arc::new(InMemorySessionStore::new()),
            &[dir.path().join("Student_Performance.csv")],
            dir.path().join("visualizations"),
        )
        .unwrap();
        let tools = agent.tool_names();
        assert!(!tools.contains(&"create_dataframe".to_string()));
        assert!(tools.contains(&"query_csv_file".to_string()));
        assert_eq!(agent.memory_policy(), crate::memory::MemoryPolicy::Guaranteed);
    }

    #[tokio::test]
    async fn chat_graph_replies_once() {
        let graph = chat_graph(StubModel::new(vec!["Hi! How can I help?".into()])).unwrap();
        let state = graph
            .invoke(crate::graph::MessagesState::new(vec![crate::message::Message::user("hello")]))
            .await
            .unwrap();
        assert_eq!(state.last().unwrap().content, "Hi! How can I help?");
    }
}

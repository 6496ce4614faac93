//! Building blocks for running tool-using, knowledge-grounded agents.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with OpenAI-compatible and Gemini backends.
//! - A tool interface (`Tool` and `ToolRegistry`) plus ready toolkits.
//! - Session, knowledge and user-memory stores, in memory or on SQLite.
//! - An `Agent` that runs one turn at a time: context assembly, the
//!   model/tool loop, persistence and memory capture.
//! - A message `StateGraph`, and `AgentOs`, an HTTP shell over agents.

pub mod agent;
pub mod config;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod recipes;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
#[cfg(feature = "persistence")]
pub mod storage;
pub mod telemetry;
pub mod tool;
pub mod tools;

pub use agent::{Agent, RunInput, RunOutput, DEFAULT_USER_ID};
pub use config::{
    AgentDefaults, AppConfig, KnowledgeConfig, ModelConfig, ModelProvider, ServerConfig,
    StorageBackend, StorageConfig,
};
pub use error::{Result, SayrError};
pub use graph::{
    add_messages, ChatbotNode, CompiledGraph, FunctionNode, GraphNode, MessagesState, Router,
    StateGraph, END, START,
};
pub use hooks::AgentHook;
pub use knowledge::{
    chunk_text, Chunk, ContentSource, Embedder, InMemoryVectorStore, IngestReport, KnowledgeBase,
    OpenAiEmbedder, ScoredChunk, SearchType, VectorStore, WhitespaceEmbedder,
};
pub use llm::{build_model, GeminiClient, LanguageModel, ModelCompletion, OpenAiClient, StubModel};
pub use memory::{
    InMemoryMemoryStore, MemoryManager, MemoryPolicy, MemoryProvenance, MemoryRecord,
    UpdateUserMemoryTool, UserMemoryStore,
};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use metrics::RunMetrics;
#[cfg(feature = "server")]
pub use server::AgentOs;
pub use session::{
    session_store_from_config, FileSessionStore, InMemorySessionStore, SessionRun, SessionStore,
};
#[cfg(feature = "persistence")]
pub use storage::SqliteDb;
pub use telemetry::{init_tracing, TracingFormat};
pub use tool::{Tool, ToolDescription, ToolRegistry};

#[cfg(feature = "persistence")]
pub use knowledge::SqliteVectorStore;
#[cfg(feature = "persistence")]
pub use memory::SqliteMemoryStore;
#[cfg(feature = "persistence")]
pub use session::SqliteSessionStore;

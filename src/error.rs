use thiserror::Error;

pub type Result<T> = std::result::Result<T, SayrError>;

#[derive(Debug, Error)]
pub enum SayrError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("agent `{agent}` exceeded {limit} tool calls without a final reply")]
    ToolCallLimit { agent: String, limit: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("knowledge error: {0}")]
    Knowledge(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl SayrError {
    /// Wrap any error raised while a tool was executing.
    pub fn tool(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        SayrError::ToolInvocation {
            name: name.into(),
            source: source.into(),
        }
    }
}

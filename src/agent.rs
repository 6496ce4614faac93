use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::{default_max_tool_calls, AgentDefaults};
use crate::error::{Result, SayrError};
use crate::hooks::AgentHook;
use crate::knowledge::{KnowledgeBase, ScoredChunk};
use crate::llm::LanguageModel;
use crate::memory::{
    MemoryManager, MemoryPolicy, MemoryProvenance, MemoryRecord, UpdateUserMemoryTool,
    UserMemoryStore,
};
use crate::message::{Message, Role, ToolCall};
use crate::metrics::{RunGuard, RunMetrics};
use crate::session::{InMemorySessionStore, SessionRun, SessionStore};
use crate::tool::{ToolDescription, ToolRegistry};

/// User id memories are filed under when a run names none.
pub const DEFAULT_USER_ID: &str = "default";

const MARKDOWN_INSTRUCTION: &str = "Use markdown to format your answers.";
const NO_REFERENCES_NOTE: &str = "No matching references were found in the knowledge base for \
this query. If the answer depends on the knowledge base, say that the information was not found \
instead of guessing.";

/// One user turn handed to [`Agent::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RunInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            user_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl From<&str> for RunInput {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RunInput {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The outcome of one turn. `run_id` matches the stored [`SessionRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub session_id: String,
    pub agent_name: String,
    pub content: String,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub metrics: RunMetrics,
}

/// A configured agent: instructions, a model, tools and the stores it reads
/// and writes during a turn. Build it with the `with_*` methods, then share
/// it behind an `Arc`.
pub struct Agent {
    name: String,
    description: String,
    instructions: Vec<String>,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    knowledge: Option<Arc<KnowledgeBase>>,
    search_knowledge: bool,
    session_store: Arc<dyn SessionStore>,
    add_history_to_context: bool,
    num_history_runs: usize,
    memory_store: Option<Arc<dyn UserMemoryStore>>,
    memory_manager: Option<Arc<MemoryManager>>,
    memory_policy: MemoryPolicy,
    add_memories_to_context: bool,
    max_tool_calls: usize,
    markdown: bool,
    stream: bool,
    hooks: Vec<Arc<dyn AgentHook>>,
    session_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: Vec::new(),
            model,
            tools: ToolRegistry::new(),
            knowledge: None,
            search_knowledge: false,
            session_store: Arc::new(InMemorySessionStore::new()),
            add_history_to_context: false,
            num_history_runs: 3,
            memory_store: None,
            memory_manager: None,
            memory_policy: MemoryPolicy::Disabled,
            add_memories_to_context: true,
            max_tool_calls: default_max_tool_calls(),
            markdown: false,
            stream: false,
            hooks: Vec::new(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions<I, S>(mut self, instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instructions = instructions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Attach a knowledge base. With `search_knowledge` it is queried with
    /// every user message before the model is called.
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>, search_knowledge: bool) -> Self {
        self.knowledge = Some(knowledge);
        self.search_knowledge = search_knowledge;
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Put the last `num_history_runs` runs of the session into context.
    pub fn with_history(mut self, num_history_runs: usize) -> Self {
        self.add_history_to_context = true;
        self.num_history_runs = num_history_runs;
        self
    }

    pub fn with_memory(mut self, store: Arc<dyn UserMemoryStore>, policy: MemoryPolicy) -> Self {
        self.memory_store = Some(store);
        self.memory_policy = policy;
        self
    }

    pub fn with_memory_manager(mut self, manager: Arc<MemoryManager>) -> Self {
        self.memory_store = Some(manager.store().clone());
        self.memory_manager = Some(manager);
        self
    }

    pub fn enable_user_memories(mut self) -> Self {
        self.memory_policy = MemoryPolicy::Guaranteed;
        self
    }

    pub fn enable_agentic_memory(mut self) -> Self {
        self.memory_policy = MemoryPolicy::Agentic;
        self
    }

    pub fn add_memories_to_context(mut self, enabled: bool) -> Self {
        self.add_memories_to_context = enabled;
        self
    }

    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls;
        self
    }

    pub fn with_markdown(mut self, markdown: bool) -> Self {
        self.markdown = markdown;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Apply configured defaults for history, tool-call budget and markdown.
    pub fn with_defaults(mut self, defaults: &AgentDefaults) -> Self {
        self.num_history_runs = defaults.num_history_runs;
        self.max_tool_calls = defaults.max_tool_calls;
        self.markdown = defaults.markdown;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub fn knowledge(&self) -> Option<&Arc<KnowledgeBase>> {
        self.knowledge.as_ref()
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        self.memory_policy
    }

    /// Every stored run of a session, oldest first.
    pub async fn session_history(&self, session_id: &str) -> Result<Vec<SessionRun>> {
        self.session_store.runs(session_id).await
    }

    pub async fn get_user_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        match &self.memory_store {
            Some(store) => store.list(user_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// The turn lock of a session. Only turns in flight keep a lock alive;
    /// entries of finished sessions are pruned here.
    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(session_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(session_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    fn system_prompt(&self) -> String {
        let mut prompt = self.description.clone();
        for instruction in &self.instructions {
            if !prompt.is_empty() {
                prompt.push('\n');
            }
            prompt.push_str(instruction);
        }
        if self.markdown {
            if !prompt.is_empty() {
                prompt.push('\n');
            }
            prompt.push_str(MARKDOWN_INSTRUCTION);
        }
        prompt
    }

    async fn knowledge_context(&self, query: &str) -> Option<Message> {
        let knowledge = self.knowledge.as_ref().filter(|_| self.search_knowledge)?;
        match knowledge.search(query).await {
            Ok(hits) if hits.is_empty() => Some(Message::system(NO_REFERENCES_NOTE)),
            Ok(hits) => Some(Message::system(format_references(&hits))),
            Err(err) => {
                tracing::warn!(agent = %self.name, knowledge = %knowledge.name(), error = %err, "knowledge search failed, continuing without references");
                None
            }
        }
    }

    async fn memory_context(&self, user_id: &str) -> Option<Message> {
        if self.memory_policy == MemoryPolicy::Disabled || !self.add_memories_to_context {
            return None;
        }
        let store = self.memory_store.as_ref()?;
        match store.list(user_id).await {
            Ok(memories) if memories.is_empty() => None,
            Ok(memories) => {
                let mut block = String::from(
                    "You have access to memories from previous interactions with the user:\n<memories_from_previous_interactions>\n",
                );
                for record in &memories {
                    block.push_str("- ");
                    block.push_str(&record.memory);
                    block.push('\n');
                }
                block.push_str("</memories_from_previous_interactions>");
                Some(Message::system(block))
            }
            Err(err) => {
                tracing::warn!(agent = %self.name, user_id, error = %err, "memory lookup failed, continuing without memories");
                None
            }
        }
    }

    async fn history_context(&self, session_id: &str) -> Result<Vec<Message>> {
        if !self.add_history_to_context || self.num_history_runs == 0 {
            return Ok(Vec::new());
        }
        let runs = self
            .session_store
            .recent_runs(session_id, self.num_history_runs)
            .await?;
        Ok(runs
            .into_iter()
            .flat_map(|run| run.messages)
            .filter(|m| {
                m.role == Role::User || (m.role == Role::Assistant && m.tool_call.is_none())
            })
            .collect())
    }

    fn run_tools(&self, user_id: &str, provenance: &MemoryProvenance) -> ToolRegistry {
        let mut tools = self.tools.clone();
        if self.memory_policy == MemoryPolicy::Agentic {
            if let Some(store) = &self.memory_store {
                tools.register(UpdateUserMemoryTool::new(
                    store.clone(),
                    user_id,
                    provenance.clone(),
                ));
            }
        }
        tools
    }

    /// Run one turn: assemble context, loop model and tools, persist the run
    /// and capture memories.
    pub async fn run(&self, input: impl Into<RunInput>) -> Result<RunOutput> {
        let input = input.into();
        let session_id = input
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let user_id = input
            .user_id
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
        let run_id = uuid::Uuid::new_v4().to_string();

        let lock = self.session_lock(&session_id).await;
        let _turn = lock.lock().await;

        tracing::info!(agent = %self.name, %session_id, %run_id, "run started");
        let mut guard = RunGuard::start();
        let provenance = MemoryProvenance {
            session_id: Some(session_id.clone()),
            run_id: Some(run_id.clone()),
        };

        let mut context = Vec::new();
        let system_prompt = self.system_prompt();
        if !system_prompt.is_empty() {
            context.push(Message::system(system_prompt));
        }
        if let Some(references) = self.knowledge_context(&input.message).await {
            context.push(references);
        }
        if let Some(memories) = self.memory_context(&user_id).await {
            context.push(memories);
        }
        context.extend(self.history_context(&session_id).await?);

        let user_message = Message::user(&input.message);
        context.push(user_message.clone());
        let mut run_messages = vec![user_message.clone()];
        let mut tool_calls = Vec::new();

        let tools = self.run_tools(&user_id, &provenance);
        let descriptions = tools.describe();
        let no_tools: [ToolDescription; 0] = [];

        let content = loop {
            let allow_tools = guard.tool_calls() < self.max_tool_calls;
            let offered: &[ToolDescription] = if allow_tools {
                &descriptions
            } else {
                &no_tools
            };

            for hook in &self.hooks {
                hook.before_model(&context).await?;
            }
            let completion = self
                .model
                .complete_chat(&context, offered, self.stream)
                .await?;
            guard.record_model_call();
            for hook in &self.hooks {
                hook.after_model(&completion).await?;
            }

            if completion.tool_calls.is_empty() {
                let content = completion.content.ok_or_else(|| {
                    SayrError::Protocol("model returned neither content nor tool calls".into())
                })?;
                let reply = Message::assistant(&content);
                context.push(reply.clone());
                run_messages.push(reply);
                break content;
            }
            if !allow_tools {
                tracing::warn!(agent = %self.name, %run_id, limit = self.max_tool_calls, "model kept calling tools past the limit");
                return Err(SayrError::ToolCallLimit {
                    agent: self.name.clone(),
                    limit: self.max_tool_calls,
                });
            }

            for call in completion.tool_calls {
                if guard.tool_calls() >= self.max_tool_calls {
                    tracing::debug!(tool = %call.name, "tool call budget spent, dropping call");
                    continue;
                }
                guard.record_tool_call();
                for hook in &self.hooks {
                    hook.before_tool_call(&call).await?;
                }
                let call_message = Message::tool_call(call.clone());
                context.push(call_message.clone());
                run_messages.push(call_message);

                tracing::debug!(agent = %self.name, tool = %call.name, "calling tool");
                let (output, is_error) = match tools.call(&call.name, call.arguments.clone()).await
                {
                    Ok(value) => (value, false),
                    Err(err) => {
                        tracing::warn!(agent = %self.name, tool = %call.name, error = %err, "tool call failed");
                        guard.record_failure();
                        (json!({ "error": err.to_string() }), true)
                    }
                };
                let result_message = Message::tool(&call, output, is_error);
                if let Some(result) = &result_message.tool_result {
                    for hook in &self.hooks {
                        hook.after_tool_result(result).await?;
                    }
                }
                context.push(result_message.clone());
                run_messages.push(result_message);
                tool_calls.push(call);
            }
        };

        let run = SessionRun {
            run_id: run_id.clone(),
            session_id: session_id.clone(),
            agent_name: self.name.clone(),
            user_id: input.user_id.clone(),
            messages: run_messages.clone(),
            created_at: chrono::Utc::now(),
        };
        self.session_store.append_run(&run).await?;

        if self.memory_policy == MemoryPolicy::Guaranteed {
            self.capture_memories(&user_id, &run_messages, &provenance)
                .await;
        }

        let metrics = guard.finish();
        tracing::info!(
            agent = %self.name,
            %session_id,
            %run_id,
            model_calls = metrics.model_calls,
            tool_calls = metrics.tool_calls,
            "run finished"
        );
        Ok(RunOutput {
            run_id,
            session_id,
            agent_name: self.name.clone(),
            content,
            messages: run_messages,
            tool_calls,
            metrics,
        })
    }

    async fn capture_memories(
        &self,
        user_id: &str,
        messages: &[Message],
        provenance: &MemoryProvenance,
    ) {
        let manager = match (&self.memory_manager, &self.memory_store) {
            (Some(manager), _) => manager.clone(),
            (None, Some(store)) => Arc::new(MemoryManager::new(self.model.clone(), store.clone())),
            (None, None) => return,
        };
        if let Err(err) = manager
            .create_user_memories(user_id, messages, provenance)
            .await
        {
            tracing::warn!(agent = %self.name, user_id, error = %err, "memory extraction failed");
        }
    }
}

fn format_references(hits: &[ScoredChunk]) -> String {
    let mut block = String::from(
        "Use the following references from the knowledge base if they help answer the question.\n<references>\n",
    );
    for (idx, hit) in hits.iter().enumerate() {
        block.push_str(&format!(
            "[{}] {} (chunk {}):\n{}\n",
            idx + 1,
            hit.chunk.content_name,
            hit.chunk.chunk_index,
            hit.chunk.text
        ));
    }
    block.push_str("</references>");
    block
}

//! Per-user memories: durable facts and preferences extracted from
//! conversations, kept across sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{Result, SayrError};
use crate::llm::LanguageModel;
use crate::message::{Message, Role};
use crate::tool::{required_str, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub user_id: String,
    pub memory: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The run a memory was captured from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryProvenance {
    pub session_id: Option<String>,
    pub run_id: Option<String>,
}

impl MemoryRecord {
    pub fn new(
        user_id: impl Into<String>,
        memory: impl Into<String>,
        topics: Vec<String>,
        provenance: &MemoryProvenance,
    ) -> Self {
        let now = Utc::now();
        Self {
            memory_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            memory: memory.into(),
            topics,
            session_id: provenance.session_id.clone(),
            run_id: provenance.run_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// How an agent captures user memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPolicy {
    #[default]
    Disabled,
    /// Extract memories after every turn.
    Guaranteed,
    /// Offer the model an `update_user_memory` tool.
    Agentic,
}

#[async_trait]
pub trait UserMemoryStore: Send + Sync {
    async fn add(&self, record: MemoryRecord) -> Result<()>;

    /// Memories of one user, oldest first.
    async fn list(&self, user_id: &str) -> Result<Vec<MemoryRecord>>;

    async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool>;

    async fn clear(&self, user_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserMemoryStore for InMemoryMemoryStore {
    async fn add(&self, record: MemoryRecord) -> Result<()> {
        self.records
            .write()
            .await
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(memories) = records.get_mut(user_id) else {
            return Ok(false);
        };
        let before = memories.len();
        memories.retain(|record| record.memory_id != memory_id);
        Ok(memories.len() != before)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        self.records.write().await.remove(user_id);
        Ok(())
    }
}

#[cfg(feature = "persistence")]
pub use sql::SqliteMemoryStore;

#[cfg(feature = "persistence")]
mod sql {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Row, SqlitePool};

    use super::{MemoryRecord, UserMemoryStore};
    use crate::error::{Result, SayrError};

    #[derive(Clone)]
    pub struct SqliteMemoryStore {
        pool: SqlitePool,
    }

    fn storage_err(err: sqlx::Error) -> SayrError {
        SayrError::Storage(format!("user memory query failed: {err}"))
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| SayrError::Storage(format!("invalid timestamp `{raw}`: {err}")))
    }

    fn decode(row: SqliteRow) -> Result<MemoryRecord> {
        let topics: String = row.try_get("topics").map_err(storage_err)?;
        let created_at: String = row.try_get("created_at").map_err(storage_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(storage_err)?;
        Ok(MemoryRecord {
            memory_id: row.try_get("memory_id").map_err(storage_err)?,
            user_id: row.try_get("user_id").map_err(storage_err)?,
            memory: row.try_get("memory").map_err(storage_err)?,
            topics: serde_json::from_str(&topics)?,
            session_id: row.try_get("session_id").map_err(storage_err)?,
            run_id: row.try_get("run_id").map_err(storage_err)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }

    impl SqliteMemoryStore {
        pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS user_memories (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    memory_id TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL,
                    memory TEXT NOT NULL,
                    topics TEXT NOT NULL,
                    session_id TEXT,
                    run_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            )
            .execute(&pool)
            .await
            .map_err(storage_err)?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_user_memories_user ON user_memories (user_id)",
            )
            .execute(&pool)
            .await
            .map_err(storage_err)?;
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl UserMemoryStore for SqliteMemoryStore {
        async fn add(&self, record: MemoryRecord) -> Result<()> {
            sqlx::query(
                "INSERT INTO user_memories (memory_id, user_id, memory, topics, session_id, run_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.memory_id)
            .bind(&record.user_id)
            .bind(&record.memory)
            .bind(serde_json::to_string(&record.topics)?)
            .bind(&record.session_id)
            .bind(&record.run_id)
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
            Ok(())
        }

        async fn list(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
            sqlx::query(
                "SELECT memory_id, user_id, memory, topics, session_id, run_id, created_at, updated_at
                 FROM user_memories WHERE user_id = ? ORDER BY seq",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?
            .into_iter()
            .map(decode)
            .collect()
        }

        async fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool> {
            let result =
                sqlx::query("DELETE FROM user_memories WHERE user_id = ? AND memory_id = ?")
                    .bind(user_id)
                    .bind(memory_id)
                    .execute(&self.pool)
                    .await
                    .map_err(storage_err)?;
            Ok(result.rows_affected() > 0)
        }

        async fn clear(&self, user_id: &str) -> Result<()> {
            sqlx::query("DELETE FROM user_memories WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
            Ok(())
        }
    }
}

const EXTRACTION_PROMPT: &str = "You are a memory manager. Read the conversation and identify \
information about the user worth remembering across conversations: personal facts, \
preferences, behaviours, goals and ongoing work. Ignore small talk and anything already \
listed under existing memories. Reply with only a JSON array of objects shaped like \
{\"memory\": \"<one sentence in third person>\", \"topics\": [\"<topic>\"]}. \
Reply with [] when there is nothing new.";

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    memory: String,
    #[serde(default)]
    topics: Vec<String>,
}

fn normalize(memory: &str) -> String {
    memory.trim().to_lowercase()
}

/// Pull the JSON array out of a model reply that may wrap it in prose or a code fence.
fn parse_extraction(raw: &str) -> Result<Vec<ExtractedMemory>> {
    let start = raw.find('[');
    let end = raw.rfind(']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(serde_json::from_str(&raw[start..=end])?),
        _ if raw.trim().is_empty() => Ok(Vec::new()),
        _ => Err(SayrError::Protocol(format!(
            "memory extraction reply is not a JSON array: {raw}"
        ))),
    }
}

/// Uses a model to turn conversation turns into stored [`MemoryRecord`]s.
pub struct MemoryManager {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn UserMemoryStore>,
    additional_instructions: Option<String>,
}

impl MemoryManager {
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn UserMemoryStore>) -> Self {
        Self {
            model,
            store,
            additional_instructions: None,
        }
    }

    pub fn with_additional_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.additional_instructions = Some(instructions.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn UserMemoryStore> {
        &self.store
    }

    /// Extract memories from `messages` and store the new ones. Returns what was stored.
    pub async fn create_user_memories(
        &self,
        user_id: &str,
        messages: &[Message],
        provenance: &MemoryProvenance,
    ) -> Result<Vec<MemoryRecord>> {
        let existing = self.store.list(user_id).await?;

        let mut system = EXTRACTION_PROMPT.to_string();
        if let Some(extra) = &self.additional_instructions {
            system.push_str("\n\n");
            system.push_str(extra);
        }
        if !existing.is_empty() {
            system.push_str("\n\nExisting memories:\n");
            for record in &existing {
                system.push_str("- ");
                system.push_str(&record.memory);
                system.push('\n');
            }
        }

        let transcript = messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && m.tool_call.is_none())
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        if transcript.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = vec![Message::system(system), Message::user(transcript)];
        let completion = self.model.complete_chat(&prompt, &[], false).await?;
        let extracted = parse_extraction(completion.content.as_deref().unwrap_or_default())?;

        let mut seen: HashSet<String> = existing.iter().map(|r| normalize(&r.memory)).collect();
        let mut stored = Vec::new();
        for item in extracted {
            let key = normalize(&item.memory);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            let record = MemoryRecord::new(user_id, item.memory.trim(), item.topics, provenance);
            self.store.add(record.clone()).await?;
            stored.push(record);
        }
        tracing::debug!(user_id, stored = stored.len(), "user memories extracted");
        Ok(stored)
    }
}

/// Lets the model store a memory about the current user.
pub struct UpdateUserMemoryTool {
    store: Arc<dyn UserMemoryStore>,
    user_id: String,
    provenance: MemoryProvenance,
}

impl UpdateUserMemoryTool {
    pub fn new(
        store: Arc<dyn UserMemoryStore>,
        user_id: impl Into<String>,
        provenance: MemoryProvenance,
    ) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            provenance,
        }
    }
}

#[async_trait]
impl Tool for UpdateUserMemoryTool {
    fn name(&self) -> &str {
        "update_user_memory"
    }

    fn description(&self) -> &str {
        "Remember a fact, preference or goal about the current user for future conversations."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "memory": {"type": "string", "description": "The memory, one sentence in third person."},
                "topics": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["memory"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let memory = required_str(&input, "memory", self.name())?.trim();
        if memory.is_empty() {
            return Err(SayrError::Protocol("memory must not be empty".into()));
        }
        let topics: Vec<String> = input
            .get("topics")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let key = normalize(memory);
        if let Some(existing) = self
            .store
            .list(&self.user_id)
            .await?
            .into_iter()
            .find(|record| normalize(&record.memory) == key)
        {
            return Ok(json!({"status": "exists", "memory_id": existing.memory_id}));
        }

        let record = MemoryRecord::new(&self.user_id, memory, topics, &self.provenance);
        let memory_id = record.memory_id.clone();
        self.store.add(record).await?;
        Ok(json!({"status": "stored", "memory_id": memory_id}))
    }
}

//! Session storage: the append-only history of agent runs, keyed by session id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::{fs, io::AsyncWriteExt};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{Result, SayrError};
use crate::message::Message;

/// One completed turn: the user message and everything produced answering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRun {
    pub run_id: String,
    pub session_id: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl SessionRun {
    /// The final assistant reply of the run, if it produced one.
    pub fn reply(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::Assistant && m.tool_call.is_none())
    }
}

/// Persistence contract for conversation history.
///
/// Runs are append-only: a run id is written at most once and stored runs
/// are never rewritten.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append_run(&self, run: &SessionRun) -> Result<()>;

    /// The most recent `limit` runs of the session, oldest first.
    async fn recent_runs(&self, session_id: &str, limit: usize) -> Result<Vec<SessionRun>>;

    async fn runs(&self, session_id: &str) -> Result<Vec<SessionRun>>;

    async fn session_ids(&self) -> Result<Vec<String>>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

fn tail(mut runs: Vec<SessionRun>, limit: usize) -> Vec<SessionRun> {
    let skip = runs.len().saturating_sub(limit);
    runs.drain(..skip);
    runs
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionRun>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append_run(&self, run: &SessionRun) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let runs = sessions.entry(run.session_id.clone()).or_default();
        if runs.iter().any(|existing| existing.run_id == run.run_id) {
            return Err(SayrError::Storage(format!(
                "run `{}` already stored for session `{}`",
                run.run_id, run.session_id
            )));
        }
        runs.push(run.clone());
        Ok(())
    }

    async fn recent_runs(&self, session_id: &str, limit: usize) -> Result<Vec<SessionRun>> {
        Ok(tail(self.runs(session_id).await?, limit))
    }

    async fn runs(&self, session_id: &str) -> Result<Vec<SessionRun>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// JSONL store: one serialized [`SessionRun`] per line, appended in order.
pub struct FileSessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load_all(&self) -> Result<Vec<SessionRun>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SayrError::Storage(format!(
                    "failed to read sessions `{}`: {err}",
                    self.path.display()
                )))
            }
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SayrError::from))
            .collect()
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn append_run(&self, run: &SessionRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self
            .load_all()
            .await?
            .iter()
            .any(|existing| existing.run_id == run.run_id)
        {
            return Err(SayrError::Storage(format!(
                "run `{}` already stored",
                run.run_id
            )));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut serialized = serde_json::to_string(run)?;
        serialized.push('\n');
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| {
                SayrError::Storage(format!("failed to open `{}`: {err}", self.path.display()))
            })?
            .write_all(serialized.as_bytes())
            .await
            .map_err(|err| SayrError::Storage(format!("failed to persist run: {err}")))
    }

    async fn recent_runs(&self, session_id: &str, limit: usize) -> Result<Vec<SessionRun>> {
        Ok(tail(self.runs(session_id).await?, limit))
    }

    async fn runs(&self, session_id: &str) -> Result<Vec<SessionRun>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|run| run.session_id == session_id)
            .collect())
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .map(|run| run.session_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let kept: Vec<SessionRun> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|run| run.session_id != session_id)
            .collect();
        let mut body = String::new();
        for run in &kept {
            body.push_str(&serde_json::to_string(run)?);
            body.push('\n');
        }
        fs::write(&self.path, body).await.map_err(|err| {
            SayrError::Storage(format!(
                "failed rewriting `{}`: {err}",
                self.path.display()
            ))
        })
    }
}

#[cfg(feature = "persistence")]
pub use sql::SqliteSessionStore;

#[cfg(feature = "persistence")]
mod sql {
    use async_trait::async_trait;
    use sqlx::{Row, SqlitePool};

    use super::{SessionRun, SessionStore};
    use crate::error::{Result, SayrError};

    /// SQLite-backed session store. Each run is one row; the row id keeps order.
    #[derive(Clone)]
    pub struct SqliteSessionStore {
        pool: SqlitePool,
    }

    impl SqliteSessionStore {
        const INIT_STATEMENT: &'static str = r#"
            CREATE TABLE IF NOT EXISTS agent_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                user_id TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#;

        pub async fn connect(connection_url: impl AsRef<str>) -> Result<Self> {
            let pool = crate::storage::connect_sqlite_url(connection_url.as_ref()).await?;
            Self::from_pool(pool).await
        }

        pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
            sqlx::query(Self::INIT_STATEMENT)
                .execute(&pool)
                .await
                .map_err(|err| SayrError::Storage(format!("failed initializing schema: {err}")))?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_agent_runs_session ON agent_runs (session_id, id)",
            )
            .execute(&pool)
            .await
            .map_err(|err| SayrError::Storage(format!("failed creating index: {err}")))?;
            Ok(Self { pool })
        }

        fn decode(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<SessionRun>> {
            rows.into_iter()
                .map(|row| {
                    let payload: String = row.try_get("payload").map_err(|err| {
                        SayrError::Storage(format!("failed decoding run payload: {err}"))
                    })?;
                    serde_json::from_str(&payload)
                        .map_err(|err| SayrError::Storage(format!("invalid run payload: {err}")))
                })
                .collect()
        }
    }

    #[async_trait]
    impl SessionStore for SqliteSessionStore {
        async fn append_run(&self, run: &SessionRun) -> Result<()> {
            let payload = serde_json::to_string(run)?;
            sqlx::query(
                "INSERT INTO agent_runs (run_id, session_id, agent_name, user_id, payload, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&run.run_id)
            .bind(&run.session_id)
            .bind(&run.agent_name)
            .bind(&run.user_id)
            .bind(payload)
            .bind(run.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| {
                SayrError::Storage(format!("failed writing run `{}`: {err}", run.run_id))
            })
        }

        async fn recent_runs(&self, session_id: &str, limit: usize) -> Result<Vec<SessionRun>> {
            let rows = sqlx::query(
                "SELECT payload FROM agent_runs WHERE session_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(session_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| SayrError::Storage(format!("failed loading runs: {err}")))?;
            let mut runs = Self::decode(rows)?;
            runs.reverse();
            Ok(runs)
        }

        async fn runs(&self, session_id: &str) -> Result<Vec<SessionRun>> {
            let rows =
                sqlx::query("SELECT payload FROM agent_runs WHERE session_id = ? ORDER BY id ASC")
                    .bind(session_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|err| SayrError::Storage(format!("failed loading runs: {err}")))?;
            Self::decode(rows)
        }

        async fn session_ids(&self) -> Result<Vec<String>> {
            let rows = sqlx::query("SELECT DISTINCT session_id FROM agent_runs ORDER BY session_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|err| SayrError::Storage(format!("failed listing sessions: {err}")))?;
            rows.into_iter()
                .map(|row| {
                    row.try_get("session_id")
                        .map_err(|err| SayrError::Storage(format!("bad session id row: {err}")))
                })
                .collect()
        }

        async fn delete_session(&self, session_id: &str) -> Result<()> {
            sqlx::query("DELETE FROM agent_runs WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|err| SayrError::Storage(format!("failed deleting session: {err}")))
        }
    }
}

/// Build the session store selected by configuration.
pub async fn session_store_from_config(cfg: &StorageConfig) -> Result<Arc<dyn SessionStore>> {
    match cfg.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemorySessionStore::new())),
        StorageBackend::File => Ok(Arc::new(FileSessionStore::new(&cfg.file_path))),
        #[cfg(feature = "persistence")]
        StorageBackend::Sqlite => match &cfg.database_url {
            Some(url) => Ok(Arc::new(SqliteSessionStore::connect(url).await?)),
            None => Ok(crate::storage::SqliteDb::open("tmp/agent_storage.db")
                .await?
                .session_store()
                .await?),
        },
        #[cfg(not(feature = "persistence"))]
        StorageBackend::Sqlite => Err(SayrError::Config(
            "sqlite storage requires the `persistence` feature".into(),
        )),
    }
}

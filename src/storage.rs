//! Shared SQLite database: one file holding sessions, user memories and
//! knowledge chunks, the way a single agent database is handed to every
//! component that needs persistence.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Result, SayrError};
use crate::knowledge::SqliteVectorStore;
use crate::memory::SqliteMemoryStore;
use crate::session::SqliteSessionStore;

fn pool_options(in_memory: bool) -> SqlitePoolOptions {
    // Every connection to `:memory:` is its own database.
    SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 })
}

pub(crate) async fn connect_sqlite_url(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|err| SayrError::Storage(format!("invalid database url `{url}`: {err}")))?
        .create_if_missing(true);
    pool_options(url.contains(":memory:"))
        .connect_with(options)
        .await
        .map_err(|err| {
            SayrError::Storage(format!("failed connecting to SQL backend `{url}`: {err}"))
        })
}

/// Handle to the agent database.
#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    /// Open (creating if needed) a database file such as `tmp/agent_storage.db`.
    pub async fn open(db_file: impl AsRef<Path>) -> Result<Self> {
        let db_file = db_file.as_ref();
        if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true);
        let pool = pool_options(false)
            .connect_with(options)
            .await
            .map_err(|err| {
                SayrError::Storage(format!(
                    "failed opening database `{}`: {err}",
                    db_file.display()
                ))
            })?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: connect_sqlite_url("sqlite::memory:").await?,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn session_store(&self) -> Result<Arc<SqliteSessionStore>> {
        Ok(Arc::new(SqliteSessionStore::from_pool(self.pool.clone()).await?))
    }

    pub async fn memory_store(&self) -> Result<Arc<SqliteMemoryStore>> {
        Ok(Arc::new(SqliteMemoryStore::from_pool(self.pool.clone()).await?))
    }

    pub async fn vector_store(&self, table_name: &str) -> Result<Arc<SqliteVectorStore>> {
        Ok(Arc::new(
            SqliteVectorStore::from_pool(self.pool.clone(), table_name).await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_file_database_in_missing_directory() {
        let dir = tempdir().unwrap();
        let db = SqliteDb::open(dir.path().join("tmp/agent_storage.db"))
            .await
            .unwrap();
        let sessions = db.session_store().await.unwrap();
        assert!(sessions.session_ids().await.unwrap().is_empty());
        assert!(dir.path().join("tmp/agent_storage.db").exists());
    }
}

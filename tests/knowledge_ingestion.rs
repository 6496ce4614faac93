#![cfg(feature = "persistence")]

use std::sync::Arc;

use sayr_agents::{
    recipes, ContentSource, KnowledgeBase, SearchType, SqliteDb, VectorStore, WhitespaceEmbedder,
};
use tempfile::tempdir;

const STORY: &str = "\
Chapter 1: The Lion and the Mouse
A lion caught a mouse and let it go.

Chapter 2: The Tortoise and the Hare
The hare mocked the slow tortoise and lost the race.";

#[tokio::test]
async fn ingestion_is_idempotent_across_restarts() {
    let dir = tempdir().unwrap();
    let db_file = dir.path().join("tmp/agent_storage.db");

    let first_count = {
        let db = SqliteDb::open(&db_file).await.unwrap();
        let kb = recipes::story_knowledge(
            Arc::new(WhitespaceEmbedder::default()),
            db.vector_store("knowledge_embeddings").await.unwrap(),
        )
        .with_chunking(60, 0);
        let report = kb
            .add_content(ContentSource::text("story_embeddings", STORY), true)
            .await
            .unwrap();
        assert!(!report.skipped);
        assert!(report.chunks >= 2);
        kb.chunk_count().await.unwrap()
    };

    let db = SqliteDb::open(&db_file).await.unwrap();
    let store = db.vector_store("knowledge_embeddings").await.unwrap();
    assert!(store.content_exists("story_embeddings").await.unwrap());
    let kb = recipes::story_knowledge(Arc::new(WhitespaceEmbedder::default()), store)
        .with_chunking(60, 0);
    let report = kb
        .add_content(ContentSource::text("story_embeddings", STORY), true)
        .await
        .unwrap();
    assert!(report.skipped);
    assert_eq!(kb.chunk_count().await.unwrap(), first_count);

    let hits = kb.search("tortoise race").await.unwrap();
    assert!(hits[0].chunk.text.to_lowercase().contains("tortoise"));
}

#[tokio::test]
async fn reingesting_without_skip_replaces_chunks() {
    let db = SqliteDb::in_memory().await.unwrap();
    let kb = KnowledgeBase::new(
        "learnings",
        Arc::new(WhitespaceEmbedder::default()),
        db.vector_store("self_learning_table").await.unwrap(),
    )
    .with_search_type(SearchType::Keyword);

    kb.add_content(ContentSource::text("note", "old insight about tariffs"), false)
        .await
        .unwrap();
    kb.add_content(ContentSource::text("note", "new insight about rates"), false)
        .await
        .unwrap();

    assert_eq!(kb.chunk_count().await.unwrap(), 1);
    assert!(kb.search("tariffs").await.unwrap().is_empty());
    assert_eq!(kb.search("rates").await.unwrap().len(), 1);
    assert_eq!(kb.remove_content("note").await.unwrap(), 1);
    assert_eq!(kb.chunk_count().await.unwrap(), 0);
}

#[tokio::test]
async fn knowledge_tables_are_isolated() {
    let db = SqliteDb::in_memory().await.unwrap();
    let stories = KnowledgeBase::new(
        "stories",
        Arc::new(WhitespaceEmbedder::default()),
        db.vector_store("knowledge_embeddings").await.unwrap(),
    );
    let learnings = KnowledgeBase::new(
        "learnings",
        Arc::new(WhitespaceEmbedder::default()),
        db.vector_store("self_learning_table").await.unwrap(),
    );
    stories
        .add_content(ContentSource::text("story", "once upon a time"), true)
        .await
        .unwrap();
    assert_eq!(stories.chunk_count().await.unwrap(), 1);
    assert_eq!(learnings.chunk_count().await.unwrap(), 0);
    assert!(db.vector_store("bad table; drop").await.is_err());
}

#[tokio::test]
async fn sessions_and_memories_survive_reopen() {
    use sayr_agents::{
        Agent, MemoryPolicy, RunInput, SessionStore, StubModel, UserMemoryStore,
    };

    let dir = tempdir().unwrap();
    let db_file = dir.path().join("agent_storage.db");
    {
        let db = SqliteDb::open(&db_file).await.unwrap();
        let memories: Arc<dyn UserMemoryStore> = db.memory_store().await.unwrap();
        let model = StubModel::new(vec![
            "Noted.".into(),
            r#"[{"memory": "Likes bar charts", "topics": ["charts"]}]"#.into(),
        ]);
        let agent = Agent::new("keeper", model)
            .with_session_store(db.session_store().await.unwrap())
            .with_memory(memories, MemoryPolicy::Guaranteed);
        agent
            .run(
                RunInput::new("I like bar charts")
                    .with_session("persisted")
                    .with_user("abc@example.com"),
            )
            .await
            .unwrap();
    }

    let db = SqliteDb::open(&db_file).await.unwrap();
    let sessions = db.session_store().await.unwrap();
    let runs = sessions.runs("persisted").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].reply().unwrap().content, "Noted.");
    let memories = db.memory_store().await.unwrap();
    let stored = memories.list("abc@example.com").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].topics, vec!["charts"]);
}

use std::sync::Arc;

use async_trait::async_trait;
use sayr_agents::{
    Agent, ContentSource, InMemoryMemoryStore, InMemorySessionStore, InMemoryVectorStore,
    KnowledgeBase, LanguageModel, Message, MemoryPolicy, ModelCompletion, Result, Role, RunInput,
    SayrError, ScoredChunk, SearchType, SessionStore, StubModel, ToolDescription, UserMemoryStore,
    VectorStore, WhitespaceEmbedder,
};
use serde_json::json;

fn texts(messages: &[Message], role: Role) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == role)
        .map(|m| m.content.clone())
        .collect()
}

#[tokio::test]
async fn history_grows_with_every_turn() {
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let model = StubModel::new(vec!["one".into(), "two".into(), "three".into()]);
    let agent = Agent::new("historian", model).with_session_store(sessions.clone());

    for (turn, question) in ["a", "b", "c"].into_iter().enumerate() {
        let output = agent
            .run(RunInput::new(question).with_session("s1"))
            .await
            .unwrap();
        let runs = sessions.runs("s1").await.unwrap();
        assert_eq!(runs.len(), turn + 1);
        assert_eq!(runs.last().unwrap().run_id, output.run_id);
    }
    let replies: Vec<String> = sessions
        .runs("s1")
        .await
        .unwrap()
        .iter()
        .filter_map(|run| run.reply().map(|m| m.content.clone()))
        .collect();
    assert_eq!(replies, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn history_window_is_never_exceeded() {
    let model = StubModel::new((0..5).map(|i| format!("reply {i}")).collect());
    let agent = Agent::new("windowed", model.clone()).with_history(2);

    for i in 0..5 {
        agent
            .run(RunInput::new(format!("question {i}")).with_session("s"))
            .await
            .unwrap();
    }

    let requests = model.requests();
    for (i, request) in requests.iter().enumerate() {
        let users = texts(&request.messages, Role::User);
        let prior = users.len() - 1;
        assert_eq!(prior, i.min(2), "request {i} carried {prior} prior runs");
        assert_eq!(users.last().unwrap(), &format!("question {i}"));
    }
    let last_users = texts(&requests[4].messages, Role::User);
    assert_eq!(last_users, vec!["question 2", "question 3", "question 4"]);
}

#[tokio::test]
async fn zero_history_runs_loads_nothing() {
    let model = StubModel::new(vec!["x".into(), "y".into()]);
    let agent = Agent::new("forgetful", model.clone()).with_history(0);
    agent.run(RunInput::new("first").with_session("s")).await.unwrap();
    agent.run(RunInput::new("second").with_session("s")).await.unwrap();
    assert_eq!(texts(&model.requests()[1].messages, Role::User), vec!["second"]);
}

#[tokio::test]
async fn follow_up_sees_previous_reply_verbatim() {
    let first_reply = "Private schools have the maximum study hours (8.1 per week).";
    let model = StubModel::new(vec![first_reply.into(), "Public schools average 5.2.".into()]);
    let agent = Agent::new("analyst", model.clone()).with_history(5);

    agent
        .run(RunInput::new("Which school type has maximum study hours?").with_session("ds"))
        .await
        .unwrap();
    agent
        .run(RunInput::new("Compare that to school with minimum study hours.").with_session("ds"))
        .await
        .unwrap();

    let second = &model.requests()[1].messages;
    assert!(texts(second, Role::Assistant).contains(&first_reply.to_string()));
    assert_eq!(
        second.last().unwrap().content,
        "Compare that to school with minimum study hours."
    );
}

#[tokio::test]
async fn sessions_do_not_leak_into_each_other() {
    let model = StubModel::new(vec!["a".into(), "b".into()]);
    let agent = Agent::new("isolated", model.clone()).with_history(3);
    agent.run(RunInput::new("secret").with_session("one")).await.unwrap();
    agent.run(RunInput::new("hello").with_session("two")).await.unwrap();
    assert_eq!(texts(&model.requests()[1].messages, Role::User), vec!["hello"]);
}

async fn missing_chapter_gets_no_references_note(search_type: SearchType) {
    let knowledge = Arc::new(
        KnowledgeBase::new(
            "story_knowledge_base",
            Arc::new(WhitespaceEmbedder::new(4096)),
            Arc::new(InMemoryVectorStore::new()),
        )
        .with_search_type(search_type),
    );
    knowledge
        .add_content(
            ContentSource::text(
                "story_book",
                "The second part: the fox crossed the river and found the old mill.",
            ),
            true,
        )
        .await
        .unwrap();
    let model = StubModel::new(vec![
        "I could not find chapter 1 in the story book.".into(),
        "The fox crossed the river.".into(),
    ]);
    let agent = Agent::new("Storyteller Agent", model.clone()).with_knowledge(knowledge, true);

    let output = agent.run("Summarize chapter 1").await.unwrap();
    assert_eq!(output.content, "I could not find chapter 1 in the story book.");
    let first = &model.requests()[0].messages;
    assert!(
        first.iter().all(|m| !m.content.contains("<references>")),
        "{search_type:?} injected references"
    );
    let note = first
        .iter()
        .find(|m| m.role == Role::System && m.content.contains("No matching references"))
        .expect("no-references note injected");
    let note_pos = first.iter().position(|m| m.id == note.id).unwrap();
    let user_pos = first.iter().position(|m| m.role == Role::User).unwrap();
    assert!(note_pos < user_pos);

    agent.run("What did the fox cross?").await.unwrap();
    let second = &model.requests()[1].messages;
    assert!(second.iter().any(|m| m.role == Role::System
        && m.content.contains("<references>")
        && m.content.contains("old mill")));
}

#[tokio::test]
async fn missing_chapter_with_keyword_search() {
    missing_chapter_gets_no_references_note(SearchType::Keyword).await;
}

#[tokio::test]
async fn missing_chapter_with_vector_search() {
    missing_chapter_gets_no_references_note(SearchType::Vector).await;
}

#[tokio::test]
async fn missing_chapter_with_hybrid_search() {
    missing_chapter_gets_no_references_note(SearchType::Hybrid).await;
}

struct Unreachable;

#[async_trait]
impl VectorStore for Unreachable {
    async fn insert(
        &self,
        _content: sayr_agents::knowledge::ContentRecord,
        _chunks: Vec<sayr_agents::knowledge::EmbeddedChunk>,
    ) -> Result<()> {
        Err(SayrError::Storage("connection refused".into()))
    }

    async fn search(
        &self,
        _request: &sayr_agents::knowledge::SearchRequest<'_>,
    ) -> Result<Vec<ScoredChunk>> {
        Err(SayrError::Storage("connection refused".into()))
    }

    async fn content_exists(&self, _name: &str) -> Result<bool> {
        Err(SayrError::Storage("connection refused".into()))
    }

    async fn delete_content(&self, _name: &str) -> Result<usize> {
        Err(SayrError::Storage("connection refused".into()))
    }

    async fn chunk_count(&self) -> Result<usize> {
        Err(SayrError::Storage("connection refused".into()))
    }
}

#[tokio::test]
async fn unreachable_knowledge_store_is_skipped() {
    let knowledge = Arc::new(KnowledgeBase::new(
        "down",
        Arc::new(WhitespaceEmbedder::default()),
        Arc::new(Unreachable),
    ));
    let model = StubModel::new(vec!["answered anyway".into()]);
    let agent = Agent::new("resilient", model.clone()).with_knowledge(knowledge, true);

    let output = agent.run("anything").await.unwrap();
    assert_eq!(output.content, "answered anyway");
    assert!(model.requests()[0]
        .messages
        .iter()
        .all(|m| !m.content.contains("references")));
}

struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        Err(SayrError::LanguageModel("backend unavailable".into()))
    }
}

#[tokio::test]
async fn model_failure_fails_the_turn_without_storing_it() {
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let agent = Agent::new("broken", Arc::new(FailingModel)).with_session_store(sessions.clone());
    let err = agent
        .run(RunInput::new("hi").with_session("s"))
        .await
        .unwrap_err();
    assert!(matches!(err, SayrError::LanguageModel(_)));
    assert!(sessions.runs("s").await.unwrap().is_empty());
}

#[tokio::test]
async fn tool_loop_terminates_within_budget() {
    let calls: Vec<String> = (0..20)
        .map(|_| json!({"action": "call_tool", "name": "nowhere", "arguments": {}}).to_string())
        .collect();
    let model = StubModel::new(calls);
    let agent = Agent::new("looper", model.clone()).with_max_tool_calls(4);

    let err = agent.run("spin").await.unwrap_err();
    assert!(matches!(err, SayrError::ToolCallLimit { limit: 4, .. }));
    assert_eq!(model.requests().len(), 5);
}

#[tokio::test]
async fn guaranteed_memories_persist_across_sessions() {
    let store: Arc<dyn UserMemoryStore> = Arc::new(InMemoryMemoryStore::new());
    let model = StubModel::new(vec![
        "Here are the statistics as a chart.".into(),
        r#"[{"memory": "Prefers visualizations over tables", "topics": ["preferences"]}]"#.into(),
        "Here is the summary chart.".into(),
        "[]".into(),
    ]);
    let agent =
        Agent::new("memory", model.clone()).with_memory(store.clone(), MemoryPolicy::Guaranteed);

    agent
        .run(
            RunInput::new("I prefer visualizations over tables.")
                .with_user("abc@example.com")
                .with_session("first"),
        )
        .await
        .unwrap();
    let memories = agent.get_user_memories("abc@example.com").await.unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].session_id.as_deref(), Some("first"));

    agent
        .run(
            RunInput::new("Show me a summary of the dataset.")
                .with_user("abc@example.com")
                .with_session("second"),
        )
        .await
        .unwrap();
    let third_request = &model.requests()[2].messages;
    assert!(third_request.iter().any(|m| m.role == Role::System
        && m.content.contains("Prefers visualizations over tables")));
    assert_eq!(store.list("abc@example.com").await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_memory_extraction_keeps_the_reply() {
    let store: Arc<dyn UserMemoryStore> = Arc::new(InMemoryMemoryStore::new());
    let model = StubModel::new(vec!["hello!".into(), "not json at all".into()]);
    let agent = Agent::new("memory", model).with_memory(store.clone(), MemoryPolicy::Guaranteed);

    let output = agent.run(RunInput::new("hi").with_user("u")).await.unwrap();
    assert_eq!(output.content, "hello!");
    assert!(store.list("u").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialized() {
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let model = StubModel::new((0..8).map(|i| format!("r{i}")).collect());
    let agent = Arc::new(
        Agent::new("busy", model.clone())
            .with_session_store(sessions.clone())
            .with_history(10),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let agent = agent.clone();
            tokio::spawn(async move {
                agent
                    .run(RunInput::new(format!("q{i}")).with_session("shared"))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(sessions.runs("shared").await.unwrap().len(), 8);
    // The k-th model call saw all k runs stored before it.
    for (k, request) in model.requests().iter().enumerate() {
        let users = texts(&request.messages, Role::User).len();
        assert_eq!(users, k + 1, "request {k}");
        let replies = texts(&request.messages, Role::Assistant).len();
        assert_eq!(replies, k, "request {k}");
    }
}

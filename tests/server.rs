#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::Arc;

use sayr_agents::{
    Agent, AgentOs, InMemoryMemoryStore, MemoryPolicy, StubModel, UserMemoryStore,
};
use serde_json::{json, Value};

async fn spawn(os: AgentOs) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = os.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn storyteller(responses: Vec<String>) -> Arc<Agent> {
    Arc::new(
        Agent::new("Storyteller Agent", StubModel::new(responses))
            .with_description("Tells stories")
            .with_history(3),
    )
}

#[tokio::test]
async fn health_config_and_agent_listing() {
    let addr = spawn(
        AgentOs::new("storyteller_os", "Stories on demand").with_agent(storyteller(vec![])),
    )
    .await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let config: Value = client
        .get(format!("http://{addr}/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["os_id"], "storyteller_os");
    assert_eq!(config["agents"][0]["id"], "storyteller-agent");

    let agents: Value = client
        .get(format!("http://{addr}/agents"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents[0]["name"], "Storyteller Agent");
    assert_eq!(agents[0]["description"], "Tells stories");
    assert_eq!(agents[0]["memory_policy"], "disabled");
}

#[tokio::test]
async fn runs_are_served_and_stored_per_session() {
    let addr = spawn(AgentOs::new("storyteller_os", "").with_agent(storyteller(vec![
        "Once upon a time...".into(),
        "The lion let the mouse go.".into(),
    ])))
    .await;
    let client = reqwest::Client::new();
    let runs_url = format!("http://{addr}/agents/storyteller-agent/runs");

    let first = client
        .post(&runs_url)
        .json(&json!({"message": "Tell me a story", "session_id": "web"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["content"], "Once upon a time...");
    assert_eq!(first["session_id"], "web");

    client
        .post(&runs_url)
        .json(&json!({"message": "What happened next?", "session_id": "web"}))
        .send()
        .await
        .unwrap();

    let history: Value = client
        .get(format!("http://{addr}/agents/storyteller-agent/sessions/web"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let runs = history.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_id"], first["run_id"]);
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let addr = spawn(AgentOs::new("os", "").with_agent(storyteller(vec![]))).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/agents/nobody/runs"))
        .json(&json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn failed_run_is_a_server_error() {
    // No scripted responses: the model call fails.
    let addr = spawn(AgentOs::new("os", "").with_agent(storyteller(vec![]))).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/agents/storyteller-agent/runs"))
        .json(&json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn memories_are_listed_per_user() {
    let store: Arc<dyn UserMemoryStore> = Arc::new(InMemoryMemoryStore::new());
    let agent = Arc::new(
        Agent::new(
            "Memory Agent",
            StubModel::new(vec![
                "Sure.".into(),
                r#"[{"memory": "Prefers pie charts", "topics": []}]"#.into(),
            ]),
        )
        .with_memory(store, MemoryPolicy::Guaranteed),
    );
    let os = AgentOs::new("os", "").with_agent(agent);
    let mut events = os.subscribe();
    let addr = spawn(os).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/agents/memory-agent/runs"))
        .json(&json!({"message": "I prefer pie charts", "user_id": "abc@example.com"}))
        .send()
        .await
        .unwrap();

    let memories: Value = client
        .get(format!("http://{addr}/agents/memory-agent/memories/abc@example.com"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(memories[0]["memory"], "Prefers pie charts");

    let started: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(started["event"], "run_started");
    let completed: Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
    assert_eq!(completed["event"], "run_completed");
}

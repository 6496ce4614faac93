//! HTTP shell exposing a set of agents, their sessions and their users'
//! memories.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::agent::{Agent, RunInput};
use crate::error::Result;
use crate::memory::MemoryPolicy;

/// Stable URL id for an agent name: `Junior Data Scientist Agent` becomes
/// `junior-data-scientist-agent`.
pub fn agent_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.ends_with('-') {
            id.push('-');
        }
    }
    id.trim_matches('-').to_string()
}

pub struct AgentOs {
    id: String,
    description: String,
    agents: Vec<(String, Arc<Agent>)>,
    events: broadcast::Sender<String>,
}

#[derive(Serialize)]
struct AgentSummary {
    id: String,
    name: String,
    description: String,
    model: String,
    tools: Vec<String>,
    knowledge: Option<String>,
    memory_policy: MemoryPolicy,
}

impl AgentOs {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            id: id.into(),
            description: description.into(),
            agents: Vec::new(),
            events,
        }
    }

    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        let id = agent_id(agent.name());
        self.agents.retain(|(existing, _)| *existing != id);
        self.agents.push((id, agent));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    fn agent(&self, id: &str) -> Option<&Arc<Agent>> {
        self.agents
            .iter()
            .find(|(agent_id, _)| agent_id == id)
            .map(|(_, agent)| agent)
    }

    fn publish(&self, event: serde_json::Value) {
        // No subscribers is not an error.
        let _ = self.events.send(event.to_string());
    }

    pub fn router(self) -> Router {
        let app_state = Arc::new(self);
        Router::new()
            .route("/health", get(Self::health))
            .route("/config", get(Self::config))
            .route("/agents", get(Self::list_agents))
            .route("/agents/:agent_id/runs", post(Self::create_run))
            .route(
                "/agents/:agent_id/sessions/:session_id",
                get(Self::session_runs),
            )
            .route("/agents/:agent_id/memories/:user_id", get(Self::user_memories))
            .route("/events", get(Self::events))
            .with_state(app_state)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!(os = %self.id, %addr, agents = self.agents.len(), "serving agents");
        let app = self.router();
        axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
        Ok(())
    }

    async fn health() -> impl IntoResponse {
        Json(json!({"status": "ok"}))
    }

    async fn config(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let agents: Vec<_> = state
            .agents
            .iter()
            .map(|(id, agent)| json!({"id": id, "name": agent.name()}))
            .collect();
        Json(json!({
            "os_id": state.id,
            "description": state.description,
            "agents": agents,
        }))
    }

    async fn list_agents(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let agents: Vec<AgentSummary> = state
            .agents
            .iter()
            .map(|(id, agent)| AgentSummary {
                id: id.clone(),
                name: agent.name().to_string(),
                description: agent.description().to_string(),
                model: agent.model_id().to_string(),
                tools: agent.tool_names(),
                knowledge: agent.knowledge().map(|kb| kb.name().to_string()),
                memory_policy: agent.memory_policy(),
            })
            .collect();
        Json(agents)
    }

    async fn create_run(
        State(state): State<Arc<Self>>,
        Path(agent_id): Path<String>,
        Json(input): Json<RunInput>,
    ) -> Response {
        let Some(agent) = state.agent(&agent_id).cloned() else {
            return not_found(format!("agent `{agent_id}` not found"));
        };
        state.publish(json!({
            "event": "run_started",
            "agent_id": agent_id,
            "session_id": input.session_id,
        }));
        match agent.run(input).await {
            Ok(output) => {
                state.publish(json!({
                    "event": "run_completed",
                    "agent_id": agent_id,
                    "session_id": output.session_id,
                    "run_id": output.run_id,
                }));
                Json(output).into_response()
            }
            Err(err) => {
                tracing::error!(agent = %agent_id, error = %err, "run failed");
                state.publish(json!({
                    "event": "run_failed",
                    "agent_id": agent_id,
                    "error": err.to_string(),
                }));
                internal_error(err.to_string())
            }
        }
    }

    async fn session_runs(
        State(state): State<Arc<Self>>,
        Path((agent_id, session_id)): Path<(String, String)>,
    ) -> Response {
        let Some(agent) = state.agent(&agent_id) else {
            return not_found(format!("agent `{agent_id}` not found"));
        };
        match agent.session_history(&session_id).await {
            Ok(runs) => Json(runs).into_response(),
            Err(err) => internal_error(err.to_string()),
        }
    }

    async fn user_memories(
        State(state): State<Arc<Self>>,
        Path((agent_id, user_id)): Path<(String, String)>,
    ) -> Response {
        let Some(agent) = state.agent(&agent_id) else {
            return not_found(format!("agent `{agent_id}` not found"));
        };
        match agent.get_user_memories(&user_id).await {
            Ok(memories) => Json(memories).into_response(),
            Err(err) => internal_error(err.to_string()),
        }
    }

    async fn events(
        State(state): State<Arc<Self>>,
    ) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
        let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|msg| async move {
            match msg {
                Ok(line) => Some(Ok::<Event, Infallible>(Event::default().data(line))),
                Err(_) => None,
            }
        });
        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn internal_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_ids_are_slugs() {
        assert_eq!(agent_id("Junior Data Scientist Agent 2.0"), "junior-data-scientist-agent-2-0");
        assert_eq!(agent_id("  News Reporter Agent "), "news-reporter-agent");
    }
}

//! Hacker News toolkit backed by the public Firebase API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use crate::error::{Result, SayrError};
use crate::tool::{optional_usize, required_str, Tool, ToolRegistry};

const HACKERNEWS_API: &str = "https://hacker-news.firebaseio.com/v0";

#[derive(Clone, Debug)]
pub struct HackerNewsConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_stories: usize,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            base_url: HACKERNEWS_API.to_string(),
            timeout_secs: 15,
            max_stories: 30,
        }
    }
}

impl HackerNewsConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

pub fn hackernews_toolkit(config: HackerNewsConfig) -> Result<ToolRegistry> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent("sayr-agents/0.1")
        .build()
        .map_err(|err| SayrError::Config(format!("failed to build http client: {err}")))?;
    let api = Arc::new(HackerNewsApi { client, config });
    let mut registry = ToolRegistry::new();
    registry.register(TopStoriesTool(api.clone()));
    registry.register(UserDetailsTool(api));
    Ok(registry)
}

struct HackerNewsApi {
    client: reqwest::Client,
    config: HackerNewsConfig,
}

impl HackerNewsApi {
    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{path}", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SayrError::Protocol(format!("hacker news request failed: {err}")))?;
        if !resp.status().is_success() {
            return Err(SayrError::Protocol(format!(
                "hacker news returned {} for {path}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|err| SayrError::Protocol(format!("invalid hacker news response: {err}")))
    }
}

struct TopStoriesTool(Arc<HackerNewsApi>);

#[async_trait]
impl Tool for TopStoriesTool {
    fn name(&self) -> &str {
        "get_top_hackernews_stories"
    }

    fn description(&self) -> &str {
        "Get the current top stories on Hacker News. Expects {\"num_stories\": number?}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "num_stories": {"type": "integer", "description": "Number of stories to return (default 10)"}
            }
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let num_stories = optional_usize(&input, "num_stories")
            .unwrap_or(10)
            .clamp(1, self.0.config.max_stories);
        let ids = self.0.get("topstories.json").await?;
        let ids: Vec<u64> = ids
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_u64).take(num_stories).collect())
            .unwrap_or_default();

        let items = join_all(ids.iter().map(|id| self.0.get_item(*id))).await;
        let stories: Vec<Value> = items
            .into_iter()
            .filter_map(|item| match item {
                Ok(story) => Some(story),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping hacker news item");
                    None
                }
            })
            .collect();
        Ok(json!({ "count": stories.len(), "stories": stories }))
    }
}

impl HackerNewsApi {
    async fn get_item(&self, id: u64) -> Result<Value> {
        let item = self.get(&format!("item/{id}.json")).await?;
        let by = item.get("by").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({
            "id": id,
            "title": item.get("title").cloned().unwrap_or(Value::Null),
            "url": item.get("url").cloned().unwrap_or(Value::Null),
            "score": item.get("score").cloned().unwrap_or(Value::Null),
            "by": by,
            "comments": item.get("descendants").cloned().unwrap_or(Value::Null),
            "time": item.get("time").cloned().unwrap_or(Value::Null),
            "hn_url": format!("https://news.ycombinator.com/item?id={id}"),
        }))
    }
}

struct UserDetailsTool(Arc<HackerNewsApi>);

#[async_trait]
impl Tool for UserDetailsTool {
    fn name(&self) -> &str {
        "get_user_details"
    }

    fn description(&self) -> &str {
        "Get the profile of a Hacker News user. Expects {\"username\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "username": {"type": "string"}
            },
            "required": ["username"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let username = required_str(&input, "username", self.name())?;
        let user = self
            .0
            .get(&format!("user/{}.json", urlencoding::encode(username)))
            .await?;
        if user.is_null() {
            return Err(SayrError::Protocol(format!(
                "hacker news user `{username}` not found"
            )));
        }
        let submitted = user
            .get("submitted")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        Ok(json!({
            "username": username,
            "karma": user.get("karma").cloned().unwrap_or(Value::Null),
            "about": user.get("about").cloned().unwrap_or(Value::Null),
            "created": user.get("created").cloned().unwrap_or(Value::Null),
            "total_items_submitted": submitted,
        }))
    }
}

#[cfg(all(test, feature = "server"))]
mod tests {
    use super::*;
    use axum::{extract::Path, routing::get, Json, Router};

    async fn spawn_fake_api() -> String {
        let app = Router::new()
            .route("/topstories.json", get(|| async { Json(json!([11, 12, 13])) }))
            .route(
                "/item/:file",
                get(|Path(file): Path<String>| async move {
                    let id: u64 = file.trim_end_matches(".json").parse().unwrap_or(0);
                    Json(json!({"id": id, "title": format!("story {id}"), "score": id * 2, "by": "pg"}))
                }),
            )
            .route(
                "/user/:file",
                get(|Path(file): Path<String>| async move {
                    if file == "pg.json" {
                        Json(json!({"id": "pg", "karma": 155000, "submitted": [1, 2, 3]}))
                    } else {
                        Json(Value::Null)
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fetches_stories_and_users() {
        let base = spawn_fake_api().await;
        let tools = hackernews_toolkit(HackerNewsConfig::default().with_base_url(base)).unwrap();

        let top = tools
            .call("get_top_hackernews_stories", json!({"num_stories": 2}))
            .await
            .unwrap();
        assert_eq!(top["count"], 2);
        assert_eq!(top["stories"][0]["title"], "story 11");
        assert_eq!(top["stories"][1]["score"], 24);

        let user = tools
            .call("get_user_details", json!({"username": "pg"}))
            .await
            .unwrap();
        assert_eq!(user["total_items_submitted"], 3);
        assert!(tools
            .call("get_user_details", json!({"username": "nobody"}))
            .await
            .is_err());
    }
}

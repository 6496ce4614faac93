//! Knowledge base tools: search, and save reusable learnings for later runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Result, SayrError};
use crate::knowledge::{ContentSource, KnowledgeBase};
use crate::tool::{required_str, Tool, ToolRegistry};

pub fn knowledge_toolkit(knowledge: Arc<KnowledgeBase>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SearchKnowledgeTool(knowledge.clone()));
    registry.register(SaveLearningTool(knowledge));
    registry
}

pub struct SearchKnowledgeTool(pub Arc<KnowledgeBase>);

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for saved information. Expects {\"query\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = required_str(&input, "query", self.name())?;
        let hits = self.0.search(query).await?;
        let results: Vec<Value> = hits
            .into_iter()
            .map(|hit| {
                json!({
                    "name": hit.chunk.content_name,
                    "content": hit.chunk.text,
                    "score": hit.score,
                })
            })
            .collect();
        Ok(json!({ "query": query, "results": results }))
    }
}

/// Stores `Title: ..\nLearning: ..` under the title, once.
pub struct SaveLearningTool(pub Arc<KnowledgeBase>);

#[async_trait]
impl Tool for SaveLearningTool {
    fn name(&self) -> &str {
        "save_learning"
    }

    fn description(&self) -> &str {
        "Save a reusable learning to the knowledge base. Only call after the user approves. Expects {\"title\": string, \"learning\": string}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Concise title"},
                "learning": {"type": "string", "description": "The insight, specific and actionable"}
            },
            "required": ["title", "learning"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let title = required_str(&input, "title", self.name())?.trim();
        let learning = required_str(&input, "learning", self.name())?.trim();
        if title.is_empty() || learning.is_empty() {
            return Err(SayrError::Protocol(
                "title and learning must not be empty".into(),
            ));
        }
        let content = format!("Title: {title}\nLearning: {learning}");
        let report = self
            .0
            .add_content(ContentSource::text(title, content), true)
            .await?;
        let message = if report.skipped {
            format!("Learning titled '{title}' already exists in the knowledge base.")
        } else {
            format!("Learning titled '{title}' has been saved to the knowledge base.")
        };
        Ok(json!({ "saved": !report.skipped, "message": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SearchType;

    #[tokio::test]
    async fn saved_learnings_are_searchable_once() {
        let kb = Arc::new(
            KnowledgeBase::in_memory("self_learning_kb").with_search_type(SearchType::Hybrid),
        );
        let tools = knowledge_toolkit(kb.clone());

        let args = json!({"title": "Tech P/E ranges", "learning": "Tech P/E ratios typically range 20-35x"});
        let first = tools.call("save_learning", args.clone()).await.unwrap();
        assert_eq!(first["saved"], true);
        let second = tools.call("save_learning", args).await.unwrap();
        assert_eq!(second["saved"], false);
        assert_eq!(kb.chunk_count().await.unwrap(), 1);

        let found = tools
            .call("search_knowledge_base", json!({"query": "P/E ratios"}))
            .await
            .unwrap();
        assert_eq!(found["results"][0]["name"], "Tech P/E ranges");
        assert!(found["results"][0]["content"]
            .as_str()
            .unwrap()
            .starts_with("Title: Tech P/E ranges\nLearning:"));
    }
}

//! A small state graph over a shared message list.
//!
//! Nodes read the current [`MessagesState`] and return new messages, which
//! are merged with [`add_messages`]. Edges are either fixed or chosen by a
//! router at run time. Execution starts at [`START`] and stops at [`END`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SayrError};
use crate::llm::LanguageModel;
use crate::message::Message;

pub const START: &str = "__start__";
pub const END: &str = "__end__";
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesState {
    pub messages: Vec<Message>,
}

impl MessagesState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Merge `update` into `messages`: a message whose id is already present
/// replaces it in place, anything else is appended.
pub fn add_messages(messages: &mut Vec<Message>, update: Vec<Message>) {
    for message in update {
        match messages.iter_mut().find(|existing| existing.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
    }
}

#[async_trait]
pub trait GraphNode: Send + Sync {
    async fn run(&self, state: &MessagesState) -> Result<Vec<Message>>;
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + 'a>>;

/// Wrap a plain async function as a graph node.
pub struct FunctionNode<F>
where
    F: for<'a> Fn(&'a MessagesState) -> NodeFuture<'a> + Send + Sync,
{
    func: F,
}

impl<F> FunctionNode<F>
where
    F: for<'a> Fn(&'a MessagesState) -> NodeFuture<'a> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> GraphNode for FunctionNode<F>
where
    F: for<'a> Fn(&'a MessagesState) -> NodeFuture<'a> + Send + Sync,
{
    async fn run(&self, state: &MessagesState) -> Result<Vec<Message>> {
        (self.func)(state).await
    }
}

/// Sends the whole conversation to a model and returns its reply.
pub struct ChatbotNode {
    model: Arc<dyn LanguageModel>,
}

impl ChatbotNode {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl GraphNode for ChatbotNode {
    async fn run(&self, state: &MessagesState) -> Result<Vec<Message>> {
        let completion = self.model.complete_chat(&state.messages, &[], false).await?;
        let content = completion
            .content
            .ok_or_else(|| SayrError::Protocol("chatbot model returned no content".into()))?;
        Ok(vec![Message::assistant(content)])
    }
}

pub type Router = Arc<dyn Fn(&MessagesState) -> String + Send + Sync>;

#[derive(Clone)]
enum Edge {
    Direct(String),
    Conditional { router: Router, targets: Vec<String> },
}

impl Edge {
    fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(to) => vec![to.as_str()],
            Edge::Conditional { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }
}

/// Graph under construction.
#[derive(Default)]
pub struct StateGraph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    order: Vec<String>,
    edges: Vec<(String, Edge)>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        node: Arc<dyn GraphNode>,
    ) -> Result<&mut Self> {
        let name = name.into();
        if name == START || name == END {
            return Err(SayrError::Graph(format!("`{name}` is a reserved node name")));
        }
        if self.nodes.contains_key(&name) {
            return Err(SayrError::Graph(format!("node `{name}` already exists")));
        }
        self.order.push(name.clone());
        self.nodes.insert(name, node);
        Ok(self)
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), Edge::Direct(to.into())));
        self
    }

    /// Route from `from` to whichever of `targets` the router names.
    pub fn add_conditional_edges<I, S>(
        &mut self,
        from: impl Into<String>,
        router: Router,
        targets: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges.push((
            from.into(),
            Edge::Conditional {
                router,
                targets: targets.into_iter().map(Into::into).collect(),
            },
        ));
        self
    }

    pub fn compile(&self) -> Result<CompiledGraph> {
        let mut outgoing: HashMap<String, Edge> = HashMap::new();
        for (from, edge) in &self.edges {
            if from == END {
                return Err(SayrError::Graph("END cannot have outgoing edges".into()));
            }
            if from != START && !self.nodes.contains_key(from) {
                return Err(SayrError::Graph(format!("edge starts at unknown node `{from}`")));
            }
            for to in edge.targets() {
                if to == START {
                    return Err(SayrError::Graph("START cannot be an edge target".into()));
                }
                if to != END && !self.nodes.contains_key(to) {
                    return Err(SayrError::Graph(format!("edge points at unknown node `{to}`")));
                }
            }
            if outgoing.insert(from.clone(), edge.clone()).is_some() {
                return Err(SayrError::Graph(format!(
                    "node `{from}` has more than one outgoing edge"
                )));
            }
        }
        if !outgoing.contains_key(START) {
            return Err(SayrError::Graph(
                "graph needs an entry point: add an edge from START".into(),
            ));
        }
        if let Some(dead_end) = self.order.iter().find(|name| !outgoing.contains_key(*name)) {
            return Err(SayrError::Graph(format!(
                "node `{dead_end}` has no outgoing edge"
            )));
        }

        Ok(CompiledGraph {
            nodes: self.nodes.clone(),
            order: self.order.clone(),
            edges: outgoing,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        })
    }
}

/// A validated graph, ready to run.
#[derive(Clone)]
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    order: Vec<String>,
    edges: HashMap<String, Edge>,
    recursion_limit: usize,
}

impl CompiledGraph {
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    fn next(&self, from: &str, state: &MessagesState) -> Result<String> {
        match self.edges.get(from) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, targets }) => {
                let to = router(state);
                if targets.iter().any(|target| *target == to) {
                    Ok(to)
                } else {
                    Err(SayrError::Graph(format!(
                        "router of `{from}` chose `{to}`, expected one of {targets:?}"
                    )))
                }
            }
            None => Err(SayrError::Graph(format!("node `{from}` has no outgoing edge"))),
        }
    }

    pub async fn invoke(&self, mut state: MessagesState) -> Result<MessagesState> {
        let mut current = self.next(START, &state)?;
        let mut steps = 0;
        while current != END {
            steps += 1;
            if steps > self.recursion_limit {
                return Err(SayrError::Graph(format!(
                    "recursion limit of {} reached without hitting END",
                    self.recursion_limit
                )));
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| SayrError::Graph(format!("unknown node `{current}`")))?;
            tracing::debug!(node = %current, step = steps, "running graph node");
            let update = node.run(&state).await?;
            add_messages(&mut state.messages, update);
            current = self.next(&current, &state)?;
        }
        Ok(state)
    }

    /// Boxes for every node top to bottom, `*` for fixed edges and `.` for routed ones.
    pub fn draw_ascii(&self) -> String {
        let mut layers: Vec<&str> = vec![START];
        layers.extend(self.order.iter().map(String::as_str));
        layers.push(END);

        let width = layers.iter().map(|name| name.len()).max().unwrap_or(0) + 4;
        let center = |text: &str| {
            let pad = width.saturating_sub(text.chars().count());
            let left = pad / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
                .trim_end()
                .to_string()
        };

        let mut lines = Vec::new();
        for (idx, name) in layers.iter().enumerate() {
            let border = format!("+{}+", "-".repeat(name.len() + 2));
            lines.push(center(&border));
            lines.push(center(&format!("| {name} |")));
            lines.push(center(&border));
            if let Some(below) = layers.get(idx + 1) {
                let connector = match self.edges.get(*name) {
                    Some(Edge::Direct(to)) if to.as_str() == *below => "*",
                    Some(Edge::Direct(_)) => "",
                    Some(Edge::Conditional { .. }) => ".",
                    None => "",
                };
                if !connector.is_empty() {
                    lines.push(center(connector));
                    lines.push(center(connector));
                }
            }
        }

        let mut extra: Vec<String> = Vec::new();
        for from in &layers {
            let Some(edge) = self.edges.get(*from) else {
                continue;
            };
            let next_layer = layers
                .iter()
                .position(|name| name == from)
                .and_then(|idx| layers.get(idx + 1));
            match edge {
                Edge::Direct(to) if Some(&to.as_str()) != next_layer => {
                    extra.push(format!("{from} -> {to}"));
                }
                Edge::Conditional { targets, .. } => {
                    for to in targets {
                        extra.push(format!("{from} -.-> {to}"));
                    }
                }
                _ => {}
            }
        }
        if !extra.is_empty() {
            lines.push(String::new());
            lines.extend(extra);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::message::Role;

    #[tokio::test]
    async fn chatbot_graph_appends_reply() {
        let model = StubModel::new(vec!["Hello there!".into()]);
        let mut builder = StateGraph::new();
        builder
            .add_node("chatbot", Arc::new(ChatbotNode::new(model.clone())))
            .unwrap();
        builder.add_edge(START, "chatbot").add_edge("chatbot", END);
        let graph = builder.compile().unwrap();

        let state = graph
            .invoke(MessagesState::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.last().unwrap().role, Role::Assistant);
        assert_eq!(state.last().unwrap().content, "Hello there!");
        assert_eq!(model.requests()[0].messages.len(), 1);

        let drawing = graph.draw_ascii();
        assert!(drawing.contains("| __start__ |"));
        assert!(drawing.contains("| chatbot |"));
        assert!(drawing.contains('*'));
    }

    #[test]
    fn add_messages_replaces_by_id() {
        let mut messages = vec![Message::user("a").with_id("1"), Message::user("b").with_id("2")];
        add_messages(
            &mut messages,
            vec![Message::user("b2").with_id("2"), Message::user("c").with_id("3")],
        );
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b2", "c"]);
    }

    #[test]
    fn compile_rejects_invalid_graphs() {
        let node = || -> Arc<dyn GraphNode> {
            Arc::new(FunctionNode::new(|_state: &MessagesState| {
                Box::pin(async move { Ok(Vec::new()) })
            }))
        };

        let mut no_entry = StateGraph::new();
        no_entry.add_node("a", node()).unwrap();
        no_entry.add_edge("a", END);
        assert!(no_entry.compile().is_err());

        let mut dangling = StateGraph::new();
        dangling.add_node("a", node()).unwrap();
        dangling.add_edge(START, "a").add_edge("a", "b");
        assert!(dangling.compile().is_err());

        let mut dead_end = StateGraph::new();
        dead_end.add_node("a", node()).unwrap();
        dead_end.add_edge(START, "a");
        assert!(dead_end.compile().is_err());

        let mut reserved = StateGraph::new();
        assert!(reserved.add_node(END, node()).is_err());
    }

    #[tokio::test]
    async fn routed_loop_stops_at_recursion_limit() {
        let counter = Arc::new(FunctionNode::new(|state: &MessagesState| {
            let n = state.messages.len();
            Box::pin(async move { Ok(vec![Message::assistant(format!("step {n}"))]) })
        }));
        let router: Router = Arc::new(|state: &MessagesState| {
            if state.messages.len() >= 4 {
                END.to_string()
            } else {
                "count".to_string()
            }
        });

        let mut builder = StateGraph::new();
        builder.add_node("count", counter.clone()).unwrap();
        builder
            .add_edge(START, "count")
            .add_conditional_edges("count", router, ["count", END]);
        let graph = builder.compile().unwrap();
        let state = graph.invoke(MessagesState::default()).await.unwrap();
        assert_eq!(state.messages.len(), 4);
        assert!(graph.draw_ascii().contains("count -.-> count"));

        let forever: Router = Arc::new(|_: &MessagesState| "count".to_string());
        let mut looping = StateGraph::new();
        looping.add_node("count", counter).unwrap();
        looping
            .add_edge(START, "count")
            .add_conditional_edges("count", forever, ["count"]);
        let err = looping
            .compile()
            .unwrap()
            .with_recursion_limit(3)
            .invoke(MessagesState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SayrError::Graph(_)));
    }
}

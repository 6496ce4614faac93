//! Language model backends.
//!
//! Every backend implements [`LanguageModel`]: given the assembled message
//! list and the tools on offer, return either final content or tool calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ModelConfig, ModelProvider};
use crate::error::{Result, SayrError};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion>;

    /// Identifier passed opaquely to the backend.
    fn model_id(&self) -> &str {
        "unknown"
    }
}

/// Build the backend named by the configuration.
pub fn build_model(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match cfg.provider {
        ModelProvider::OpenAi | ModelProvider::OpenRouter => {
            Ok(Arc::new(OpenAiClient::from_config(cfg)?))
        }
        ModelProvider::Gemini => Ok(Arc::new(GeminiClient::from_config(cfg)?)),
    }
}

async fn check_status(resp: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SayrError::LanguageModel(format!("{provider} rate limit exceeded: {body}"))
    } else {
        SayrError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
    })
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| SayrError::LanguageModel(format!("http client error: {err}")))
}

/// Arguments arrive as a JSON string; keep the raw text when it does not parse.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parameters_schema(tool: &ToolDescription) -> Value {
    tool.parameters
        .clone()
        .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
///
/// OpenRouter speaks the same wire format behind another base URL, so both
/// providers share this client.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    provider: &'static str,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(60))?,
            model: model.into(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            provider: "openai",
        })
    }

    /// OpenRouter client, e.g. `OpenAiClient::openrouter(key, "z-ai/glm-4.6v")`.
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let mut client = Self::new(api_key, model)?;
        client.base_url = OPENROUTER_BASE_URL.to_string();
        client.provider = "openrouter";
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let (provider, default_url) = match cfg.provider {
            ModelProvider::OpenRouter => ("openrouter", OPENROUTER_BASE_URL),
            _ => ("openai", OPENAI_BASE_URL),
        };
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            SayrError::Config(format!("missing {provider} API key in model config"))
        })?;
        Ok(Self {
            http: http_client(Duration::from_secs(cfg.timeout_secs))?,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg
                .base_url
                .as_deref()
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            provider,
        })
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolDescription], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(openai_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": parameters_schema(tool),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

fn openai_message(message: &Message) -> Value {
    if let Some(call) = &message.tool_call {
        return json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments.to_string()},
            }],
        });
    }
    match &message.tool_result {
        Some(result) => json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.output.to_string(),
        }),
        None => json!({"role": message.role.as_str(), "content": message.content}),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds `data:` lines of a streamed completion into one [`ModelCompletion`].
/// Tool-call fragments are keyed by their index and concatenated.
#[derive(Default)]
struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    calls: BTreeMap<usize, PartialCall>,
}

impl StreamAccumulator {
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        // Decode whole lines only; a chunk may end mid-character.
        self.pending.extend_from_slice(bytes);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.line(String::from_utf8_lossy(&line).trim())?;
        }
        Ok(())
    }

    fn line(&mut self, line: &str) -> Result<()> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Ok(());
        };
        if data.is_empty() || data == "[DONE]" {
            return Ok(());
        }
        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|err| SayrError::LanguageModel(format!("bad stream chunk `{data}`: {err}")))?;
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                self.content.push_str(&text);
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if delta.id.is_some() {
                    call.id = delta.id;
                }
                if let Some(function) = delta.function {
                    if function.name.is_some() {
                        call.name = function.name;
                    }
                    call.arguments.push_str(function.arguments.as_deref().unwrap_or_default());
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<ModelCompletion> {
        let rest = std::mem::take(&mut self.pending);
        self.line(String::from_utf8_lossy(&rest).trim())?;
        let tool_calls = self
            .calls
            .into_values()
            .filter_map(|call| {
                Some(ToolCall {
                    id: call.id,
                    name: call.name?,
                    arguments: parse_arguments(&call.arguments),
                })
            })
            .collect();
        Ok(ModelCompletion {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, tools, stream))
            .send()
            .await
            .map_err(|err| {
                SayrError::LanguageModel(format!("{} request error: {err}", self.provider))
            })?;
        let resp = check_status(resp, self.provider).await?;

        if stream {
            let mut acc = StreamAccumulator::default();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|err| {
                    SayrError::LanguageModel(format!("{} stream error: {err}", self.provider))
                })?;
                acc.feed(&chunk)?;
            }
            return acc.finish();
        }

        let body: ChatResponse = resp.json().await.map_err(|err| {
            SayrError::LanguageModel(format!("{} response parse error: {err}", self.provider))
        })?;
        let message = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                SayrError::LanguageModel(format!("{} returned no choices", self.provider))
            })?
            .message;
        Ok(ModelCompletion {
            content: message.content.filter(|text| !text.is_empty()),
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect(),
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Google Gemini `generateContent` client with function calling.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(60))?,
            model: model.into(),
            api_key: api_key.into(),
            endpoint: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| SayrError::Config("missing Gemini API key in model config".into()))?;
        let mut client = Self::new(api_key, cfg.model.clone())?;
        client.http = http_client(Duration::from_secs(cfg.timeout_secs))?;
        if let Some(url) = &cfg.base_url {
            client.endpoint = url.trim_end_matches('/').to_string();
        }
        Ok(client)
    }

    /// System messages become one `systemInstruction`; the rest map to
    /// `user`/`model` turns, tool traffic to function call/response parts.
    fn request_body(&self, messages: &[Message], tools: &[ToolDescription]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(gemini_content)
            .collect();

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": parameters_schema(tool),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

fn gemini_content(message: &Message) -> Value {
    if let Some(call) = &message.tool_call {
        return json!({
            "role": "model",
            "parts": [{"functionCall": {"name": call.name, "args": call.arguments}}],
        });
    }
    if let Some(result) = &message.tool_result {
        return json!({
            "role": "user",
            "parts": [{"functionResponse": {"name": result.name, "response": {"content": result.output}}}],
        });
    }
    let role = if message.role == Role::Assistant { "model" } else { "user" };
    json!({"role": role, "parts": [{"text": message.content}]})
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

impl GeminiResponse {
    fn into_completion(self) -> ModelCompletion {
        let parts = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(fragment) = part.text {
                text.push_str(&fragment);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: None,
                    name: call.name,
                    arguments: call.args,
                });
            }
        }
        ModelCompletion {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(messages, tools))
            .send()
            .await
            .map_err(|err| SayrError::LanguageModel(format!("gemini request error: {err}")))?;
        let resp = check_status(resp, "gemini").await?;

        let parsed: GeminiResponse = resp.json().await.map_err(|err| {
            SayrError::LanguageModel(format!("gemini response parse error: {err}"))
        })?;
        Ok(parsed.into_completion())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// A deterministic model used for tests and demos.
///
/// Each scripted response is either a JSON directive
/// (`{"action":"respond","content":..}` / `{"action":"call_tool","name":..,"arguments":..}`)
/// or plain text, which is returned as content. Every request is recorded.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<StubRequest>>,
}

/// What the stub was asked on one call.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .map(|responses| responses.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(StubRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|tool| tool.name.clone()).collect(),
            });
        }
        let raw = self
            .responses
            .lock()
            .map_err(|_| SayrError::LanguageModel("stub model poisoned".into()))?
            .pop_front()
            .ok_or_else(|| {
                SayrError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion::text(content)),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: Some(format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion::text(raw)),
        }
    }

    fn model_id(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_model_follows_script_and_records_requests() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"hi"}}"#.into(),
            "plain answer".into(),
        ]);

        let first = model
            .complete_chat(&[Message::user("hello")], &[], false)
            .await
            .unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "echo");

        let second = model.complete_chat(&[], &[], false).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("plain answer"));

        assert_eq!(model.requests().len(), 2);
        assert_eq!(model.requests()[0].messages[0].content, "hello");
        assert!(model.complete_chat(&[], &[], false).await.is_err());
    }

    fn lookup_call() -> ToolCall {
        ToolCall {
            id: Some("call_1".into()),
            name: "lookup".into(),
            arguments: json!({"q": "x"}),
        }
    }

    #[test]
    fn openai_body_carries_tool_traffic() {
        let client = OpenAiClient::new("key", "gpt-test").unwrap();
        let call = lookup_call();
        let messages = [
            Message::user("find x"),
            Message::tool_call(call.clone()),
            Message::tool(&call, json!({"ok": true}), false),
        ];
        let tools = [ToolDescription {
            name: "lookup".into(),
            description: "Look things up".into(),
            parameters: None,
        }];

        let body = client.request_body(&messages, &tools, false);
        let wire = body["messages"].as_array().unwrap();
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "lookup");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], r#"{"q":"x"}"#);
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_1");
        assert_eq!(wire[2]["content"], r#"{"ok":true}"#);
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");

        let bare = client.request_body(&messages[..1], &[], true);
        assert!(bare.get("tools").is_none());
        assert_eq!(bare["stream"], true);
    }

    #[test]
    fn stream_accumulator_joins_split_fragments() {
        let mut acc = StreamAccumulator::default();
        let lines = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"x\\\"}\"}}]}}]}\n",
            "data: [DONE]\n",
        );
        let (head, tail) = lines.split_at(37);
        acc.feed(head.as_bytes()).unwrap();
        acc.feed(tail.as_bytes()).unwrap();

        let completion = acc.finish().unwrap();
        assert_eq!(completion.content.as_deref(), Some("Hello"));
        assert_eq!(completion.tool_calls, vec![lookup_call_with_id("c1")]);
    }

    #[test]
    fn stream_accumulator_keeps_characters_split_across_chunks() {
        let mut acc = StreamAccumulator::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        acc.feed(&line[..split]).unwrap();
        acc.feed(&line[split..]).unwrap();

        let completion = acc.finish().unwrap();
        assert_eq!(completion.content.as_deref(), Some("café"));
    }

    fn lookup_call_with_id(id: &str) -> ToolCall {
        ToolCall {
            id: Some(id.into()),
            ..lookup_call()
        }
    }

    #[test]
    fn gemini_body_splits_system_and_maps_roles() {
        let client = GeminiClient::new("key", "gemini-2.5-flash").unwrap();
        let call = lookup_call();
        let body = client.request_body(
            &[
                Message::system("be brief"),
                Message::user("hi"),
                Message::tool_call(call.clone()),
                Message::tool(&call, json!("found"), false),
                Message::assistant("hello"),
            ],
            &[],
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "lookup");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["response"]["content"], "found");
        assert_eq!(contents[3]["role"], "model");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn gemini_response_yields_function_calls() {
        let parsed: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "lookup", "args": {"q": "x"}}}
            ]}}]
        }))
        .unwrap();
        let completion = parsed.into_completion();
        assert!(completion.content.is_none());
        assert_eq!(completion.tool_calls[0].arguments, json!({"q": "x"}));
    }
}

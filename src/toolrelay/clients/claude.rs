//! Anthropic Messages API client wrapper.
//!
//! One wire translation serves two authentication schemes:
//!
//! - [`ClaudeAuth::ApiKey`] sends an `x-api-key` header,
//! - [`ClaudeAuth::OAuth`] sends a bearer token obtained from a
//!   [`TokenManager`](crate::clients::claude_oauth::TokenManager) plus the OAuth beta header.
//!
//! The Messages API differs from chat-completions in three ways that matter here: the system
//! prompt is a top-level field, tool calls are `tool_use` content blocks with a parsed `input`
//! object, and tool results must be `tool_result` blocks inside a `user` turn. Consecutive tool
//! results are therefore coalesced into a single turn.
//!
//! # Example
//!
//! ```rust
//! use toolrelay::client_wrapper::{ChatRequest, Message, ToolCall};
//! use toolrelay::clients::claude::build_anthropic_body;
//!
//! let request = ChatRequest::new(
//!     "anthropic/claude-haiku-4-5",
//!     vec![
//!         Message::system("be brief"),
//!         Message::user("weather?"),
//!         Message::assistant_with_tool_calls(None, vec![ToolCall::new("t1", "get_weather", "{}")]),
//!         Message::tool_result("t1", "sunny"),
//!     ],
//! );
//! let body = build_anthropic_body(&request);
//! assert_eq!(body["model"], "claude-haiku-4-5");
//! assert_eq!(body["system"], "be brief");
//! assert_eq!(body["messages"][2]["content"][0]["type"], "tool_result");
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client_wrapper::{
    ChatRequest, ChatResponse, ClientWrapper, Message, RawResponse, Role, TokenUsage, ToolCall,
};
use crate::clients::claude_oauth::TokenManager;
use crate::clients::common::{
    describe_http_failure, generated_tool_call_id, post_json, top_level_error, wire_temperature,
};
use crate::error::ChatError;
use crate::http_client_pool::get_or_create_client;
use crate::json_value::JsonExt;

pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const OAUTH_BETA: &str = "oauth-2025-04-20";

const ANTHROPIC_TIMEOUT: Duration = Duration::from_secs(120);
const MODEL_PREFIX: &str = "anthropic/";

/// Anthropic models commonly used with tool calling.
pub enum Model {
    /// `claude-sonnet-4-5`
    ClaudeSonnet45,
    /// `claude-haiku-4-5` – fastest, cheapest tier.
    ClaudeHaiku45,
    /// `claude-opus-4-5`
    ClaudeOpus45,
}

pub fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeSonnet45 => "claude-sonnet-4-5".to_string(),
        Model::ClaudeHaiku45 => "claude-haiku-4-5".to_string(),
        Model::ClaudeOpus45 => "claude-opus-4-5".to_string(),
    }
}

/// How requests are authenticated.
pub enum ClaudeAuth {
    ApiKey(String),
    OAuth(Arc<TokenManager>),
}

/// Client wrapper for the Anthropic Messages API.
pub struct ClaudeClient {
    auth: ClaudeAuth,
    endpoint: String,
    model: String,
    timeout: Duration,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl ClaudeClient {
    fn with_auth(auth: ClaudeAuth, model: &str) -> Self {
        Self {
            auth,
            endpoint: ANTHROPIC_URL.to_string(),
            model: strip_model_prefix(model).to_string(),
            timeout: ANTHROPIC_TIMEOUT,
            token_usage: Mutex::new(None),
        }
    }

    pub fn new_with_api_key(api_key: &str, model: &str) -> Self {
        Self::with_auth(ClaudeAuth::ApiKey(api_key.trim().to_string()), model)
    }

    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new_with_api_key(api_key, &model_to_string(model))
    }

    /// Authenticate with OAuth bearer tokens managed by `tokens`.
    pub fn new_with_oauth(tokens: Arc<TokenManager>, model: &str) -> Self {
        Self::with_auth(ClaudeAuth::OAuth(tokens), model)
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn auth_headers(&self) -> Result<Vec<(&'static str, String)>, ChatError> {
        let mut headers = vec![("anthropic-version", ANTHROPIC_VERSION.to_string())];
        match &self.auth {
            ClaudeAuth::ApiKey(key) => headers.push(("x-api-key", key.clone())),
            ClaudeAuth::OAuth(tokens) => {
                let token = tokens.get_access_token().await.ok_or_else(|| {
                    ChatError::Configuration(
                        "Claude OAuth token is unavailable or expired. Log in again with the \
                         Claude CLI."
                            .into(),
                    )
                })?;
                headers.push(("Authorization", format!("Bearer {}", token)));
                headers.push(("anthropic-beta", OAUTH_BETA.to_string()));
            }
        }
        Ok(headers)
    }
}

fn strip_model_prefix(model: &str) -> &str {
    let model = model.trim();
    model.strip_prefix(MODEL_PREFIX).unwrap_or(model)
}

#[async_trait]
impl ClientWrapper for ClaudeClient {
    fn provider_name(&self) -> &str {
        match self.auth {
            ClaudeAuth::ApiKey(_) => "anthropic",
            ClaudeAuth::OAuth(_) => "claude-oauth",
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn check_configuration(&self) -> Result<(), ChatError> {
        match &self.auth {
            ClaudeAuth::ApiKey(key) if key.is_empty() => Err(ChatError::Configuration(
                "No Anthropic API key configured.".into(),
            )),
            ClaudeAuth::OAuth(tokens) if !tokens.is_available() => {
                Err(ChatError::Configuration(
                    "Claude CLI is not logged in: no OAuth credentials found.".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn build_wire_request(&self, request: &ChatRequest) -> Result<String, ChatError> {
        Ok(serde_json::to_string(&build_anthropic_body(request))?)
    }

    async fn send(&self, body: String) -> Result<RawResponse, ChatError> {
        let headers = self.auth_headers().await?;
        let client = get_or_create_client(&self.endpoint, self.timeout)?;
        post_json(&client, &self.endpoint, &headers, body).await
    }

    fn parse_wire_response(&self, raw: &RawResponse) -> ChatResponse {
        parse_anthropic_response(raw)
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

/// Render `request` as an Anthropic Messages body.
pub fn build_anthropic_body(request: &ChatRequest) -> Value {
    let mut system: Option<&str> = None;
    let mut messages: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    // System text lives outside `messages`, so it must not break up a run of tool results.
    for message in request.messages.iter().filter(|m| m.role == Role::System) {
        if system.is_some() {
            log::debug!("multiple system messages in request, keeping the last one");
        }
        system = Some(message.text());
    }

    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        if message.role == Role::Tool {
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.as_deref().unwrap_or(""),
                "content": message.text(),
            }));
            continue;
        }
        flush_tool_results(&mut pending_results, &mut messages);

        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
                if !message.text().is_empty() {
                    blocks.push(json!({"type": "text", "text": message.text()}));
                }
                blocks.extend(message.tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function_name,
                        "input": tool_input(&call.arguments),
                    })
                }));
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            _ => {
                messages.push(json!({"role": message.role.as_str(), "content": message.text()}));
            }
        }
    }
    flush_tool_results(&mut pending_results, &mut messages);

    let mut body = json!({
        "model": strip_model_prefix(&request.model_id),
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": wire_temperature(request.temperature),
        "stream": false,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(specs) = request.tools() {
        body["tools"] = Value::Array(specs.iter().map(tool_spec_to_anthropic).collect());
        body["tool_choice"] = json!({"type": "auto"});
    }
    body
}

fn flush_tool_results(pending: &mut Vec<Value>, messages: &mut Vec<Value>) {
    if !pending.is_empty() {
        let blocks = std::mem::take(pending);
        messages.push(json!({"role": "user", "content": blocks}));
    }
}

/// Parse a tool call's argument string into an input object. Anything else becomes `{}`.
fn tool_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => json!({}),
        Err(err) => {
            if !arguments.trim().is_empty() {
                log::warn!("Malformed tool call arguments, sending empty input: {}", err);
            }
            json!({})
        }
    }
}

/// `{type:"function", function:{name, description, parameters}}` → `{name, description,
/// input_schema}`. A flat spec without the `function` wrapper is accepted too.
fn tool_spec_to_anthropic(spec: &Value) -> Value {
    let function = if spec["function"].is_object() {
        &spec["function"]
    } else {
        spec
    };
    let schema = if function["parameters"].is_object() {
        function["parameters"].clone()
    } else {
        json!({})
    };
    json!({
        "name": function["name"].as_string_lossy(),
        "description": function["description"].as_string_lossy(),
        "input_schema": schema,
    })
}

/// Translate a Messages API reply into a [`ChatResponse`].
pub fn parse_anthropic_response(raw: &RawResponse) -> ChatResponse {
    let root: Value = match serde_json::from_str(&raw.body) {
        Ok(root) => root,
        Err(_) if !raw.is_success() => return ChatResponse::failure(describe_http_failure(raw)),
        Err(err) => {
            return ChatResponse::failure(format!("Failed to parse Anthropic response: {}", err));
        }
    };

    if let Some(error) = top_level_error(&root) {
        return ChatResponse::failure(
            ChatError::Provider {
                status: Some(raw.status),
                message: error,
            }
            .to_string(),
        );
    }
    if !raw.is_success() {
        return ChatResponse::failure(describe_http_failure(raw));
    }

    let (text, tool_calls) = content_from_blocks(&root["content"]);
    let message = Message::assistant_with_tool_calls(text, tool_calls);

    let prompt_tokens = root["usage"]["input_tokens"].as_int_lossy().max(0) as usize;
    let completion_tokens = root["usage"]["output_tokens"].as_int_lossy().max(0) as usize;

    ChatResponse {
        id: root["id"].non_empty_str().map(str::to_string),
        model: root["model"].non_empty_str().map(str::to_string),
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        ..ChatResponse::with_message(message)
    }
}

/// Joined non-empty `text` blocks (or `None`) and the `tool_use` blocks as tool calls.
fn content_from_blocks(content: &Value) -> (Option<String>, Vec<ToolCall>) {
    if let Some(text) = content.as_str() {
        return ((!text.is_empty()).then(|| text.to_string()), Vec::new());
    }

    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls = Vec::new();
    for block in content.as_array().map(Vec::as_slice).unwrap_or_default() {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].non_empty_str() {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                let id = block["id"]
                    .non_empty_str()
                    .map(str::to_string)
                    .unwrap_or_else(generated_tool_call_id);
                let input = if block["input"].is_object() {
                    block["input"].to_string()
                } else {
                    "{}".to_string()
                };
                tool_calls.push(ToolCall::new(id, block["name"].as_string_lossy(), input));
            }
            _ => {}
        }
    }
    let text = (!texts.is_empty()).then(|| texts.join("\n"));
    (text, tool_calls)
}

/// Reconstruct the normalized message list from a Messages request body.
///
/// The top-level `system` field becomes a leading system message and each `tool_result`
/// block of a coalesced user turn becomes its own tool message.
pub fn messages_from_wire(body: &Value) -> Vec<Message> {
    let mut messages = Vec::new();
    if let Some(system) = body["system"].as_str() {
        messages.push(Message::system(system));
    }

    for wire in body["messages"].as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(role) = wire["role"].as_str().and_then(Role::from_wire) else {
            continue;
        };
        let content = &wire["content"];
        let blocks = content.as_array().map(Vec::as_slice).unwrap_or_default();
        let results: Vec<&Value> = blocks
            .iter()
            .filter(|b| b["type"] == "tool_result")
            .collect();

        if role == Role::User && !results.is_empty() {
            messages.extend(results.into_iter().map(|block| {
                Message::tool_result(
                    block["tool_use_id"].as_string_lossy(),
                    block["content"].as_string_lossy(),
                )
            }));
            continue;
        }

        let (text, tool_calls) = content_from_blocks(content);
        let content = if tool_calls.is_empty() {
            Some(text.unwrap_or_default())
        } else {
            text
        };
        messages.push(Message {
            role,
            content,
            name: None,
            tool_call_id: None,
            tool_calls,
        });
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_prefix_is_stripped() {
        assert_eq!(strip_model_prefix("anthropic/claude-haiku-4-5"), "claude-haiku-4-5");
        assert_eq!(strip_model_prefix("claude-haiku-4-5"), "claude-haiku-4-5");
        let client = ClaudeClient::new_with_api_key("k", "anthropic/claude-sonnet-4-5");
        assert_eq!(client.model_name(), "claude-sonnet-4-5");
    }

    #[test]
    fn test_tool_input_fallbacks() {
        assert_eq!(tool_input(r#"{"city":"Oslo"}"#), json!({"city": "Oslo"}));
        assert_eq!(tool_input("{not json"), json!({}));
        assert_eq!(tool_input(""), json!({}));
        assert_eq!(tool_input("[1,2]"), json!({}));
    }

    #[test]
    fn test_tool_spec_translation() {
        let spec = json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather",
                "parameters": {"type": "object", "properties": {}}
            }
        });
        assert_eq!(
            tool_spec_to_anthropic(&spec),
            json!({
                "name": "get_weather",
                "description": "Current weather",
                "input_schema": {"type": "object", "properties": {}}
            })
        );
        let bare = json!({"type": "function", "function": {"name": "ping"}});
        assert_eq!(tool_spec_to_anthropic(&bare)["input_schema"], json!({}));
    }

    #[tokio::test]
    async fn test_api_key_headers() {
        let client = ClaudeClient::new_with_api_key("sk-ant", "claude-haiku-4-5");
        let headers = client.auth_headers().await.unwrap();
        assert!(headers.contains(&("x-api-key", "sk-ant".to_string())));
        assert!(headers.contains(&("anthropic-version", ANTHROPIC_VERSION.to_string())));
        assert!(!headers.iter().any(|(name, _)| *name == "anthropic-beta"));
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let client = ClaudeClient::new_with_api_key("  ", "claude-haiku-4-5");
        assert!(matches!(
            client.check_configuration(),
            Err(ChatError::Configuration(_))
        ));
    }
}

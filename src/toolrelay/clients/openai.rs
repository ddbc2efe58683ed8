//! The `OpenAIClient` struct implements `ClientWrapper` for the OpenAI chat-completions wire
//! format, which OpenRouter and most self-hosted servers (Ollama, LM Studio, llama.cpp, vLLM)
//! speak as well.
//!
//! Two presets are provided:
//!
//! - [`OpenAIClient::openrouter`]: bearer API key, attribution headers, 60 second timeout.
//! - [`OpenAIClient::custom`]: any endpoint URL, optional key, 120 second timeout and a switch
//!   for servers that reject the `tools` field.
//!
//! # Example
//!
//! ```rust
//! use toolrelay::client_wrapper::{ChatRequest, ClientWrapper, Message};
//! use toolrelay::clients::openai::OpenAIClient;
//!
//! let client = OpenAIClient::custom("http://localhost:11434/v1", "", "llama3.1", true);
//! assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
//!
//! let request = ChatRequest::new("llama3.1", vec![Message::user("hi")]);
//! let body = client.build_wire_request(&request).unwrap();
//! assert!(body.contains("\"stream\":false"));
//! ```

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::client_wrapper::{
    ChatRequest, ChatResponse, ClientWrapper, Message, RawResponse, Role, TokenUsage, ToolCall,
};
use crate::clients::common::{
    describe_http_failure, generated_tool_call_id, post_json, top_level_error, wire_temperature,
};
use crate::error::ChatError;
use crate::http_client_pool::get_or_create_client;
use crate::json_value::JsonExt;

/// OpenRouter's chat-completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const OPENROUTER_TIMEOUT: Duration = Duration::from_secs(60);
const CUSTOM_TIMEOUT: Duration = Duration::from_secs(120);
const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenRouter,
    Custom,
}

/// Client wrapper for OpenAI-compatible chat-completions endpoints.
///
/// The wrapper keeps the endpoint, credentials and model id plus an internal [`TokenUsage`]
/// slot so callers can inspect how many tokens the latest request consumed.
pub struct OpenAIClient {
    flavor: Flavor,
    endpoint: String,
    api_key: String,
    model: String,
    supports_tools: bool,
    app_title: String,
    app_referer: String,
    timeout: Duration,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Construct a client for OpenRouter. The key is required at send time.
    pub fn openrouter(api_key: &str, model: &str) -> Self {
        Self {
            flavor: Flavor::OpenRouter,
            endpoint: OPENROUTER_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            supports_tools: true,
            app_title: "toolrelay".to_string(),
            app_referer: "https://github.com/toolrelay".to_string(),
            timeout: OPENROUTER_TIMEOUT,
            token_usage: Mutex::new(None),
        }
    }

    /// Construct a client for a self-hosted or third-party OpenAI-compatible server.
    ///
    /// `endpoint_url` may be a base URL (`http://host/v1`) or the full
    /// `.../chat/completions` URL. An empty `api_key` sends no `Authorization` header.
    pub fn custom(endpoint_url: &str, api_key: &str, model: &str, supports_tools: bool) -> Self {
        Self {
            flavor: Flavor::Custom,
            endpoint: normalize_endpoint(endpoint_url),
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
            supports_tools,
            app_title: String::new(),
            app_referer: String::new(),
            timeout: CUSTOM_TIMEOUT,
            token_usage: Mutex::new(None),
        }
    }

    /// Point the client at a different URL, keeping everything else.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Override the `X-Title` / `HTTP-Referer` attribution sent to OpenRouter.
    pub fn with_app_identity(mut self, title: &str, referer: &str) -> Self {
        self.app_title = title.to_string();
        self.app_referer = referer.to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether requests carry the `tools` field.
    pub fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if !self.api_key.is_empty() {
            headers.push(("Authorization", format!("Bearer {}", self.api_key)));
        }
        if self.flavor == Flavor::OpenRouter {
            if !self.app_referer.is_empty() {
                headers.push(("HTTP-Referer", self.app_referer.clone()));
            }
            if !self.app_title.is_empty() {
                headers.push(("X-Title", self.app_title.clone()));
            }
        }
        headers
    }
}

/// Append `/chat/completions` unless the URL already ends with it.
fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with(CHAT_COMPLETIONS_PATH) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, CHAT_COMPLETIONS_PATH)
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn provider_name(&self) -> &str {
        match self.flavor {
            Flavor::OpenRouter => "openrouter",
            Flavor::Custom => "custom",
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn check_configuration(&self) -> Result<(), ChatError> {
        match self.flavor {
            Flavor::OpenRouter if self.api_key.trim().is_empty() => Err(
                ChatError::Configuration("No OpenRouter API key configured.".into()),
            ),
            Flavor::Custom if self.endpoint.is_empty() => Err(ChatError::Configuration(
                "No custom endpoint URL configured.".into(),
            )),
            Flavor::Custom if self.model.is_empty() => Err(ChatError::Configuration(
                "No model id configured for the custom endpoint.".into(),
            )),
            _ => Ok(()),
        }
    }

    fn build_wire_request(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let body = build_openai_body(request, self.supports_tools);
        Ok(serde_json::to_string(&body)?)
    }

    async fn send(&self, body: String) -> Result<RawResponse, ChatError> {
        let client = get_or_create_client(&self.endpoint, self.timeout)?;
        post_json(&client, &self.endpoint, &self.headers(), body).await
    }

    fn parse_wire_response(&self, raw: &RawResponse) -> ChatResponse {
        let mut response = parse_openai_response(raw);
        if self.flavor == Flavor::Custom && raw.status == 400 && self.supports_tools {
            if let Some(error) = response.error.as_mut() {
                error.push_str(
                    " (this endpoint may not support tool calling; try disabling tool support \
                     for the custom provider)",
                );
            }
        }
        response
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

/// Render `request` as an OpenAI chat-completions body.
///
/// Only the last `system` message is kept and it always goes first. `tools` and
/// `tool_choice: "auto"` are added when `include_tools` is set and the request carries specs.
pub fn build_openai_body(request: &ChatRequest, include_tools: bool) -> Value {
    let systems: Vec<&Message> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .collect();
    if systems.len() > 1 {
        log::debug!(
            "{} system messages in request, keeping the last one",
            systems.len()
        );
    }

    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len());
    if let Some(system) = systems.last() {
        messages.push(json!({"role": "system", "content": system.text()}));
    }
    messages.extend(
        request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_to_wire),
    );

    let mut body = json!({
        "model": request.model_id,
        "messages": messages,
        "temperature": wire_temperature(request.temperature),
        "max_tokens": request.max_tokens,
        "stream": false,
    });
    if include_tools {
        if let Some(tools) = request.tools() {
            body["tools"] = Value::Array(tools.to_vec());
            body["tool_choice"] = json!("auto");
        }
    }
    body
}

fn message_to_wire(message: &Message) -> Value {
    let mut wire = Map::new();
    wire.insert("role".into(), json!(message.role.as_str()));

    let content = match (&message.content, message.has_tool_calls()) {
        (Some(text), _) => json!(text),
        (None, true) => Value::Null,
        (None, false) => json!(""),
    };
    wire.insert("content".into(), content);

    if let Some(name) = &message.name {
        wire.insert("name".into(), json!(name));
    }
    if message.role == Role::Tool {
        if let Some(id) = &message.tool_call_id {
            wire.insert("tool_call_id".into(), json!(id));
        }
    }
    if message.has_tool_calls() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.function_name, "arguments": call.arguments},
                })
            })
            .collect();
        wire.insert("tool_calls".into(), Value::Array(calls));
    }
    Value::Object(wire)
}

/// Translate a chat-completions reply into a [`ChatResponse`].
pub fn parse_openai_response(raw: &RawResponse) -> ChatResponse {
    let root: Value = match serde_json::from_str(&raw.body) {
        Ok(root) => root,
        Err(_) if !raw.is_success() => return ChatResponse::failure(describe_http_failure(raw)),
        Err(err) => {
            return ChatResponse::failure(format!("Failed to parse response: {}", err));
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

    // No usable choice is still a successful exchange; the session shows it as an empty reply.
    let wire_message = &root["choices"][0]["message"];
    let message = wire_message.is_object().then(|| {
        let tool_calls = wire_message["tool_calls"]
            .as_array()
            .map(|calls| calls.iter().map(tool_call_from_wire).collect())
            .unwrap_or_default();
        Message::assistant_with_tool_calls(content_text(&wire_message["content"]), tool_calls)
    });
    if message.is_none() {
        log::warn!("Response contained no choices");
    }

    let usage = &root["usage"];
    let prompt_tokens = usage["prompt_tokens"].as_int_lossy().max(0) as usize;
    let completion_tokens = usage["completion_tokens"].as_int_lossy().max(0) as usize;
    let total_tokens = match usage["total_tokens"].as_int_lossy() {
        t if t > 0 => t as usize,
        _ => prompt_tokens + completion_tokens,
    };

    ChatResponse {
        id: root["id"].non_empty_str().map(str::to_string),
        model: root["model"].non_empty_str().map(str::to_string),
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
        success: true,
        message,
        ..ChatResponse::default()
    }
}

/// `content` is usually a string; some servers return an array of `{type:"text"}` parts.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|part| part["text"].non_empty_str())
                .collect();
            (!joined.is_empty()).then(|| joined.join("\n"))
        }
        _ => None,
    }
}

fn tool_call_from_wire(call: &Value) -> ToolCall {
    let id = call["id"]
        .non_empty_str()
        .map(str::to_string)
        .unwrap_or_else(generated_tool_call_id);
    let function = &call["function"];
    let arguments = match &function["arguments"] {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    ToolCall::new(id, function["name"].as_string_lossy(), arguments)
}

/// Reconstruct the normalized message list from a chat-completions request body.
pub fn messages_from_wire(body: &Value) -> Vec<Message> {
    let Some(wire_messages) = body["messages"].as_array() else {
        return Vec::new();
    };

    wire_messages
        .iter()
        .filter_map(|wire| {
            let role = Role::from_wire(wire["role"].as_str()?)?;
            let tool_calls: Vec<ToolCall> = wire["tool_calls"]
                .as_array()
                .map(|calls| calls.iter().map(tool_call_from_wire).collect())
                .unwrap_or_default();
            Some(Message {
                role,
                content: content_text(&wire["content"]),
                name: wire["name"].non_empty_str().map(str::to_string),
                tool_call_id: wire["tool_call_id"].non_empty_str().map(str::to_string),
                tool_calls,
            })
        })
        .collect()
}

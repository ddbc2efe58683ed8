//! Normalized conversation types and the [`ClientWrapper`] trait every provider implements.
//!
//! A `ClientWrapper` is a wrapper around one provider wire protocol. It does not keep track of
//! the conversation; that is the job of [`ChatSession`](crate::chat_session::ChatSession),
//! which owns the history and hands a fresh [`ChatRequest`] to the wrapper on every round-trip.
//!
//! Each wrapper is split into four steps so the translation logic can be exercised without a
//! network:
//!
//! 1. [`check_configuration`](ClientWrapper::check_configuration) fails fast when a key,
//!    endpoint or model id is missing,
//! 2. [`build_wire_request`](ClientWrapper::build_wire_request) renders the provider JSON,
//! 3. [`send`](ClientWrapper::send) performs the HTTP exchange,
//! 4. [`parse_wire_response`](ClientWrapper::parse_wire_response) maps the reply back.
//!
//! [`send_message`](ClientWrapper::send_message) composes them and never fails: every error
//! ends up in a [`ChatResponse`] with `success == false`.

use crate::error::ChatError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    // set by the developer to steer the model's responses
    System,
    // a message sent by a human user (or app user)
    User,
    // generated by the model
    Assistant,
    // the output of a tool call requested by the assistant
    Tool,
}

impl Role {
    /// Lowercase name used by every supported wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Inverse of [`Role::as_str`].
    pub fn from_wire(role: &str) -> Option<Role> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured function invocation emitted by the model inside an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation token, unique within one response. Echoed back by the tool result.
    pub id: String,
    /// Name of the tool to execute.
    pub function_name: String,
    /// JSON-encoded arguments. Parsing them is the executor's business.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Represents one turn of the normalized conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// Text content. Assistant turns that only carry tool calls may have none.
    pub content: Option<String>,
    /// Optional participant name.
    pub name: Option<String>,
    /// Set on `tool` messages only: the id of the [`ToolCall`] this message answers.
    pub tool_call_id: Option<String>,
    /// Set on `assistant` messages only. Empty means "no tool calls".
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(content.into()))
    }

    /// Assistant turn requesting tool executions, optionally with leading text.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Result of a tool execution, correlated to the call by id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, Some(content.into()))
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Content as a string slice, `""` when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Provider-agnostic request built by the session for every round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Tool definitions in the flat `{type:"function", function:{name, description,
    /// parameters}}` shape. Adapters translate them into their own schema.
    pub tool_specs: Option<Vec<Value>>,
}

impl ChatRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            temperature: 0.7,
            max_tokens: 1024,
            tool_specs: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tool_specs(mut self, tool_specs: Vec<Value>) -> Self {
        self.tool_specs = Some(tool_specs);
        self
    }

    /// Tool specs when at least one is present.
    pub fn tools(&self) -> Option<&[Value]> {
        self.tool_specs.as_deref().filter(|specs| !specs.is_empty())
    }
}

/// Normalized outcome of one provider round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub success: bool,
    pub error: Option<String>,
    pub id: Option<String>,
    pub model: Option<String>,
    pub message: Option<Message>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Successful response carrying `message`.
    pub fn with_message(message: Message) -> Self {
        Self {
            success: true,
            message: Some(message),
            ..Self::default()
        }
    }

    /// Failed response. The session renders `error` as `[Error: <error>]`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.message
            .as_ref()
            .map(Message::has_tool_calls)
            .unwrap_or(false)
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait defining the interface to interact with the supported LLM wire protocols.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Short provider label used in logs (e.g. `"openrouter"`, `"anthropic"`).
    fn provider_name(&self) -> &str;

    /// Model id this wrapper was configured with.
    fn model_name(&self) -> &str;

    /// Fail fast when a credential, endpoint or model id is missing.
    fn check_configuration(&self) -> Result<(), ChatError> {
        Ok(())
    }

    /// Render the provider-specific JSON body for `request`.
    fn build_wire_request(&self, request: &ChatRequest) -> Result<String, ChatError>;

    /// Perform the HTTP exchange. Non-2xx statuses are returned, not raised, so the body can
    /// be inspected by [`parse_wire_response`](ClientWrapper::parse_wire_response).
    async fn send(&self, body: String) -> Result<RawResponse, ChatError>;

    /// Translate a raw reply into a [`ChatResponse`]. Must not panic on malformed input.
    fn parse_wire_response(&self, raw: &RawResponse) -> ChatResponse;

    /// Run one full round-trip. Every failure is folded into the returned response.
    async fn send_message(&self, request: &ChatRequest) -> ChatResponse {
        if let Err(err) = self.check_configuration() {
            log::warn!(
                "{}: refusing to send, configuration incomplete: {}",
                self.provider_name(),
                err
            );
            return ChatResponse::failure(err.to_string());
        }

        let body = match self.build_wire_request(request) {
            Ok(body) => body,
            Err(err) => {
                log::error!("{}: failed to build request: {}", self.provider_name(), err);
                return ChatResponse::failure(format!("Failed to build request: {}", err));
            }
        };
        log::debug!(
            "{}: sending {} messages, {} tools, model {}",
            self.provider_name(),
            request.messages.len(),
            request.tools().map(|t| t.len()).unwrap_or(0),
            request.model_id
        );
        log::trace!("{} request body: {}", self.provider_name(), body);

        let raw = match self.send(body).await {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("{}: request failed: {}", self.provider_name(), err);
                return ChatResponse::failure(err.to_string());
            }
        };
        log::trace!(
            "{} response (HTTP {}): {}",
            self.provider_name(),
            raw.status,
            raw.body
        );
        if !raw.is_success() {
            log::warn!(
                "{}: provider returned HTTP {}",
                self.provider_name(),
                raw.status
            );
        }

        let response = self.parse_wire_response(&raw);
        if response.success {
            if let Some(slot) = self.usage_slot() {
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(response.usage);
                }
            }
        }
        response
    }

    /// Usage reported by the most recent successful [`send_message`](ClientWrapper::send_message).
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| *u))
    }

    /// Wrappers supporting usage tracking return their slot here.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

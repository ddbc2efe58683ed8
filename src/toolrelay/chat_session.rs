//! The `chat_session` module runs the tool-calling conversation loop.
//!
//! A [`ChatSession`] owns the conversation history and lives on one controlling thread (a UI
//! thread, a game tick, an event loop). It never blocks: every provider round-trip runs on the
//! tokio worker pool through a [`Dispatcher`], and the controller picks up the results by calling
//! [`ChatSession::pump`] periodically.
//!
//! ```text
//! Idle ──send_message──▶ Sending ──response with tool calls──▶ ToolExecuting
//!  ▲                        │  ▲                                    │
//!  │                        │  └──────── results appended ──────────┘
//!  └── text / error / cap ──┘
//! ```
//!
//! One user message may cause at most `max_tool_loops` provider round-trips. Every failure
//! ends the turn with a synthesized assistant message; nothing is returned as an error.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolrelay::chat_session::ChatSession;
//! use toolrelay::config::RelayConfig;
//! use toolrelay::prompt::{DefaultPromptBuilder, StaticContext};
//! use toolrelay::tool_protocol::ToolRegistry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RelayConfig::from_file("relay.json").unwrap_or_default();
//!     let mut session = ChatSession::from_config(
//!         &config,
//!         Arc::new(ToolRegistry::new()),
//!         Arc::new(DefaultPromptBuilder::new("RelayBot")),
//!         Arc::new(StaticContext::new("")),
//!         tokio::runtime::Handle::current(),
//!     );
//!
//!     session.send_message("What is the weather in Oslo?");
//!     while session.is_processing() {
//!         session.pump();
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//!     println!("{}", session.history().last().map(|m| m.text()).unwrap_or(""));
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::client_wrapper::{ChatRequest, ChatResponse, ClientWrapper, Message, TokenUsage, ToolCall};
use crate::clients::client_from_config;
use crate::config::RelayConfig;
use crate::dispatch::{panic_message, run_completion, Dispatcher, TaskOutcome};
use crate::error::ChatError;
use crate::event::{EventHandler, SessionEvent, SessionState};
use crate::prompt::{ContextSource, SystemPromptProvider};
use crate::tool_protocol::ToolExecutor;

const STATUS_THINKING: &str = "Thinking...";
const STATUS_PROCESSING: &str = "Processing results...";
const EMPTY_RESPONSE: &str = "[Received empty response from AI.]";

/// A single conversation driven against one provider adapter.
pub struct ChatSession {
    client: Arc<dyn ClientWrapper>,
    executor: Arc<dyn ToolExecutor>,
    prompt: Arc<dyn SystemPromptProvider>,
    context: Arc<dyn ContextSource>,
    dispatcher: Dispatcher<ChatSession>,
    event_handler: Option<Arc<dyn EventHandler>>,

    model_id: String,
    temperature: f32,
    max_tokens: u32,
    tools_enabled: bool,
    max_tool_loops: usize,
    history_window: usize,

    history: Vec<Message>,
    state: SessionState,
    status: String,
    loop_count: usize,
    /// Bumped on every new user turn, clear and cancel; completions from older turns are dropped.
    turn_id: u64,
    cancel: Option<CancellationToken>,
    last_usage: Option<TokenUsage>,
}

impl ChatSession {
    /// Creates a session around an explicit adapter. `runtime` hosts the network calls.
    pub fn new(
        config: &RelayConfig,
        client: Arc<dyn ClientWrapper>,
        executor: Arc<dyn ToolExecutor>,
        prompt: Arc<dyn SystemPromptProvider>,
        context: Arc<dyn ContextSource>,
        runtime: Handle,
    ) -> Self {
        Self {
            model_id: config.active_model_id().to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            tools_enabled: config.tools_enabled(),
            max_tool_loops: config.max_tool_loops.max(1),
            history_window: config.history_window,
            dispatcher: Dispatcher::new(
                runtime,
                config.dispatch_batch_size,
                config.max_in_flight,
            ),
            client,
            executor,
            prompt,
            context,
            event_handler: None,
            history: Vec::new(),
            state: SessionState::Idle,
            status: String::new(),
            loop_count: 0,
            turn_id: 0,
            cancel: None,
            last_usage: None,
        }
    }

    /// Creates a session whose adapter is chosen by `config.provider`.
    pub fn from_config(
        config: &RelayConfig,
        executor: Arc<dyn ToolExecutor>,
        prompt: Arc<dyn SystemPromptProvider>,
        context: Arc<dyn ContextSource>,
        runtime: Handle,
    ) -> Self {
        Self::new(
            config,
            client_from_config(config),
            executor,
            prompt,
            context,
            runtime,
        )
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// Human readable progress text; empty when idle.
    pub fn status_message(&self) -> &str {
        &self.status
    }

    /// Usage of the most recent response that reported prompt tokens.
    pub fn last_usage(&self) -> Option<TokenUsage> {
        self.last_usage
    }

    /// Provider round-trips still running on the worker pool.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Start a new turn with `text`.
    ///
    /// Returns `false` without touching history when a turn is already running or `text` is
    /// blank.
    pub fn send_message(&mut self, text: &str) -> bool {
        if self.is_processing() {
            log::debug!("Ignoring message while a turn is in progress");
            return false;
        }
        if text.trim().is_empty() {
            return false;
        }

        self.turn_id += 1;
        self.loop_count = 0;
        self.append(Message::user(text));
        self.set_state(SessionState::Sending, STATUS_THINKING);
        self.dispatch_request();
        true
    }

    /// Run queued completions on this thread. Call it regularly; returns how many ran.
    pub fn pump(&mut self) -> usize {
        let batch_size = self.dispatcher.batch_size();
        let mut executed = 0;
        while executed < batch_size {
            let Some(action) = self.dispatcher.try_next() else {
                break;
            };
            executed += 1;
            if let Err(message) = run_completion(action, &mut *self) {
                if self.is_processing() {
                    self.finish_turn(format!("[Error: {}]", message));
                }
            }
        }
        executed
    }

    /// Abandon the running turn, if any. Late responses for it are discarded.
    pub fn cancel(&mut self) -> bool {
        if !self.is_processing() {
            return false;
        }
        log::info!("Cancelling turn {}", self.turn_id);
        self.abandon_turn();
        self.set_state(SessionState::Idle, "");
        true
    }

    /// Drop all history, cancelling any running turn.
    pub fn clear_history(&mut self) {
        let was_processing = self.is_processing();
        self.abandon_turn();
        self.history.clear();
        self.loop_count = 0;
        self.emit(SessionEvent::HistoryCleared);
        if was_processing {
            self.set_state(SessionState::Idle, "");
        }
    }

    /// The request the next round-trip would send: freshly rendered system prompt, the last
    /// `history_window` messages and, when enabled, the executor's tool specs.
    pub fn build_request(&self) -> ChatRequest {
        let snapshot = self.context.snapshot();
        let directives = self.context.directives();
        let system_prompt = self.prompt.build(&snapshot, directives.as_deref());

        let start = self.history.len().saturating_sub(self.history_window);
        let mut messages = Vec::with_capacity(self.history.len() - start + 1);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(&self.history[start..]);

        let request = ChatRequest::new(self.model_id.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        if !self.tools_enabled {
            return request;
        }
        let specs = self.executor.tool_specs();
        if specs.is_empty() {
            request
        } else {
            request.with_tool_specs(specs)
        }
    }

    fn dispatch_request(&mut self) {
        let request = match std::panic::catch_unwind(AssertUnwindSafe(|| self.build_request())) {
            Ok(request) => request,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Failed to build request: {}", message);
                self.finish_turn(format!("[Error building request: {}]", message));
                return;
            }
        };

        let iteration = self.loop_count + 1;
        log::debug!(
            "Tool loop {}/{}: sending {} messages to {} ({})",
            iteration,
            self.max_tool_loops,
            request.messages.len(),
            self.client.provider_name(),
            request.model_id
        );
        self.emit(SessionEvent::LLMCallStarted {
            iteration,
            message_count: request.messages.len(),
        });

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let client = Arc::clone(&self.client);
        let turn_id = self.turn_id;
        self.dispatcher.spawn(
            async move { client.send_message(&request).await },
            Some(cancel),
            move |session: &mut ChatSession, outcome| session.on_response(turn_id, iteration, outcome),
        );
    }

    fn on_response(&mut self, turn_id: u64, iteration: usize, outcome: TaskOutcome<ChatResponse>) {
        if turn_id != self.turn_id || self.state != SessionState::Sending {
            log::debug!("Discarding response from abandoned turn {}", turn_id);
            return;
        }
        self.cancel = None;

        let response = match outcome {
            TaskOutcome::Completed(response) => response,
            TaskOutcome::Cancelled => return,
            TaskOutcome::Panicked(message) => {
                ChatResponse::failure(format!("Request task panicked: {}", message))
            }
        };

        if response.usage.prompt_tokens > 0 {
            self.last_usage = Some(response.usage);
        }
        self.emit(SessionEvent::LLMCallCompleted {
            iteration,
            success: response.success,
            tokens_used: (response.usage.total_tokens > 0).then_some(response.usage),
        });

        if !response.success {
            let error = response.error.as_deref().unwrap_or("Unknown error");
            log::warn!("{} request failed: {}", self.client.provider_name(), error);
            self.finish_turn(format!("[Error: {}]", error));
            return;
        }

        match response.message {
            Some(message) if message.has_tool_calls() => self.run_tools(message),
            Some(message) if !message.text().is_empty() => {
                self.finish_turn(message.text().to_string())
            }
            _ => self.finish_turn(EMPTY_RESPONSE.to_string()),
        }
    }

    fn run_tools(&mut self, message: Message) {
        let calls: Vec<ToolCall> = message.tool_calls.clone();
        self.append(message);

        for call in &calls {
            self.set_state(
                SessionState::ToolExecuting,
                format!("Querying: {}...", display_tool_name(&call.function_name)),
            );
            let started = Instant::now();
            let result = self.execute_tool(call);
            let elapsed = started.elapsed();
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "Tool {} ({}) returned {} chars in {:?}",
                    call.function_name,
                    call.id,
                    result.len(),
                    elapsed
                );
            }
            self.emit(SessionEvent::ToolExecuted {
                tool_name: call.function_name.clone(),
                tool_call_id: call.id.clone(),
                result_length: result.len(),
                duration_ms: elapsed.as_millis(),
            });
            self.append(Message::tool_result(call.id.clone(), result));
        }

        self.loop_count += 1;
        if self.loop_count >= self.max_tool_loops {
            log::warn!(
                "Tool loop cap of {} round-trips reached, ending turn",
                self.max_tool_loops
            );
            self.emit(SessionEvent::ToolMaxIterationsReached {
                max_iterations: self.max_tool_loops,
            });
            self.finish_turn(format!(
                "[{}. Try asking a more focused question, or break it into smaller parts.]",
                ChatError::Capacity(self.max_tool_loops)
            ));
            return;
        }

        self.set_state(SessionState::Sending, STATUS_PROCESSING);
        self.dispatch_request();
    }

    /// Every call gets a result message, even when the executor panics.
    fn execute_tool(&self, call: &ToolCall) -> String {
        let executor = &self.executor;
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            executor.execute(&call.function_name, &call.arguments)
        }))
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            log::error!("Tool '{}' panicked: {}", call.function_name, message);
            format!("Error: tool '{}' panicked: {}", call.function_name, message)
        })
    }

    fn abandon_turn(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.turn_id += 1;
    }

    fn finish_turn(&mut self, text: String) {
        self.cancel = None;
        self.append(Message::assistant(text));
        self.set_state(SessionState::Idle, "");
    }

    fn append(&mut self, message: Message) {
        let role = message.role;
        self.history.push(message);
        self.emit(SessionEvent::MessageAppended {
            role,
            index: self.history.len() - 1,
        });
    }

    fn set_state(&mut self, state: SessionState, status: impl Into<String>) {
        self.state = state;
        self.status = status.into();
        self.emit(SessionEvent::StateChanged {
            state,
            status: self.status.clone(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&event);
        }
    }
}

/// `get_weather_report` → `get weather report`; an empty name reads as `data`.
fn display_tool_name(name: &str) -> String {
    if name.is_empty() {
        "data".to_string()
    } else {
        name.replace('_', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_tool_name() {
        assert_eq!(display_tool_name("get_colonist_health"), "get colonist health");
        assert_eq!(display_tool_name(""), "data");
    }
}

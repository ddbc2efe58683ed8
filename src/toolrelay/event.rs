//! Chat session event system.
//!
//! Provides a callback-based observability layer for [`ChatSession`](crate::chat_session::ChatSession).
//! Implement [`EventHandler`] to receive notifications about:
//!
//! - **State transitions**: `Idle`, `Sending`, `ToolExecuting`, with the status text to show
//! - **History changes**: every appended message, and bulk clears
//! - **LLM round-trips**: each dispatched request and each completion
//! - **Tool operations**: every executed tool call and the iteration cap
//!
//! Handlers are invoked synchronously on the thread that owns the session (the one calling
//! [`pump`](crate::chat_session::ChatSession::pump) or
//! [`send_message`](crate::chat_session::ChatSession::send_message)), so a presentation layer can
//! read the session from inside the callback's aftermath without further synchronization.
//!
//! # Example
//!
//! ```rust
//! use toolrelay::event::{EventHandler, SessionEvent};
//!
//! struct PrintHandler;
//!
//! impl EventHandler for PrintHandler {
//!     fn on_session_event(&self, event: &SessionEvent) {
//!         if let SessionEvent::StateChanged { status, .. } = event {
//!             println!("status: {}", status);
//!         }
//!     }
//! }
//! ```

use crate::client_wrapper::{Role, TokenUsage};

/// Where the orchestration loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for user input. The only state that accepts a new message.
    Idle,
    /// A request is in flight on the worker pool.
    Sending,
    /// Tool calls from the last response are being executed.
    ToolExecuting,
}

/// Events emitted by a [`ChatSession`](crate::chat_session::ChatSession).
///
/// # Event Flow (one user message with one tool round)
///
/// ```text
/// MessageAppended { role: User }
/// StateChanged { Sending, "Thinking..." }
///   └─ LLMCallStarted { iteration: 1 }
///   └─ LLMCallCompleted { iteration: 1 }
/// MessageAppended { role: Assistant }            (carries tool calls)
/// StateChanged { ToolExecuting, "Querying: get weather..." }
///   └─ ToolExecuted { tool_name: "get_weather" }
///   └─ MessageAppended { role: Tool }
/// StateChanged { Sending, "Processing results..." }
///   └─ LLMCallStarted { iteration: 2 }
///   └─ LLMCallCompleted { iteration: 2 }
/// MessageAppended { role: Assistant }
/// StateChanged { Idle, "" }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The loop moved to `state`. `status` is empty only when `state` is `Idle`.
    StateChanged { state: SessionState, status: String },

    /// A message was appended to history.
    MessageAppended {
        role: Role,
        /// Index of the new message in the history.
        index: usize,
    },

    /// A request was handed to the dispatcher.
    LLMCallStarted {
        /// 1-based round-trip counter within the current user turn.
        iteration: usize,
        /// Messages in the request, system prompt included.
        message_count: usize,
    },

    /// A response arrived for the current turn.
    LLMCallCompleted {
        iteration: usize,
        success: bool,
        tokens_used: Option<TokenUsage>,
    },

    /// The executor returned a result for one tool call.
    ToolExecuted {
        tool_name: String,
        tool_call_id: String,
        /// Character length of the result string.
        result_length: usize,
        duration_ms: u128,
    },

    /// The tool loop hit its iteration cap and the turn was ended.
    ToolMaxIterationsReached { max_iterations: usize },

    /// History was cleared. Any in-flight request was abandoned.
    HistoryCleared,
}

/// Receiver for [`SessionEvent`]s. The default implementation ignores everything.
pub trait EventHandler: Send + Sync {
    fn on_session_event(&self, _event: &SessionEvent) {}
}

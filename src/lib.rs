//! # toolrelay
//!
//! toolrelay drives a tool-calling conversation against LLM HTTP APIs that do not agree on a
//! wire format, and hands the results back to a single thread that owns the conversation.
//!
//! The crate provides layered abstractions for:
//!
//! * **A normalized message model**: [`Message`], [`ToolCall`](client_wrapper::ToolCall),
//!   [`ChatRequest`](client_wrapper::ChatRequest) and
//!   [`ChatResponse`](client_wrapper::ChatResponse) describe a conversation independently of
//!   any provider.
//! * **Provider adapters**: the [`ClientWrapper`] trait is implemented for OpenAI-compatible
//!   chat-completions endpoints (OpenRouter and self-hosted servers) and for the Anthropic
//!   Messages API with either an API key or OAuth bearer tokens that refresh themselves.
//! * **Tools**: [`tool_protocol::ToolRegistry`] turns Rust closures into tool specs the model can
//!   call, and executes the calls it makes.
//! * **The conversation loop**: [`ChatSession`] sends the conversation, runs requested tools,
//!   feeds the results back and stops after a bounded number of round-trips.
//! * **Thread marshaling**: [`dispatch::Dispatcher`] runs network calls on tokio and queues
//!   their completions so the owning thread applies them when it pumps.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use toolrelay::config::{ProviderKind, RelayConfig};
//! use toolrelay::prompt::{DefaultPromptBuilder, StaticContext};
//! use toolrelay::tool_protocol::{
//!     ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
//! };
//! use toolrelay::ChatSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     toolrelay::init_logger();
//!
//!     let config = RelayConfig {
//!         provider: ProviderKind::Anthropic,
//!         anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")?,
//!         ..RelayConfig::default()
//!     };
//!
//!     let mut tools = ToolRegistry::new();
//!     tools.register_fn(
//!         ToolMetadata::new("get_weather", "Current weather for a city").with_parameter(
//!             ToolParameter::new("city", ToolParameterType::String).required(),
//!         ),
//!         |args| Ok(ToolResult::success(json!({"city": args["city"], "sky": "clear"}))),
//!     );
//!
//!     let mut session = ChatSession::from_config(
//!         &config,
//!         Arc::new(tools),
//!         Arc::new(DefaultPromptBuilder::new("a weather assistant")),
//!         Arc::new(StaticContext::new("")),
//!         tokio::runtime::Handle::current(),
//!     );
//!
//!     session.send_message("Should I bring an umbrella in Oslo?");
//!     while session.is_processing() {
//!         session.pump();
//!         tokio::time::sleep(Duration::from_millis(16)).await;
//!     }
//!     for message in session.history() {
//!         println!("{}: {}", message.role, message.text());
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Embedding applications can opt in to `RUST_LOG` driven diagnostics without choosing a
/// logging backend upfront. Raw request and response bodies are logged at `trace`.
///
/// ```rust
/// toolrelay::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `toolrelay` module.
pub mod toolrelay;

// Re-exporting key items for easier external access.
pub use toolrelay::chat_session;
pub use toolrelay::chat_session::ChatSession;
pub use toolrelay::client_wrapper;
pub use toolrelay::client_wrapper::{ClientWrapper, Message, Role};
pub use toolrelay::clients;
pub use toolrelay::config;
pub use toolrelay::config::RelayConfig;
pub use toolrelay::dispatch;
pub use toolrelay::error;
pub use toolrelay::error::ChatError;
pub use toolrelay::event;
pub use toolrelay::event::{EventHandler, SessionEvent, SessionState};
pub use toolrelay::http_client_pool;
pub use toolrelay::json_value;
pub use toolrelay::prompt;
pub use toolrelay::tool_protocol;

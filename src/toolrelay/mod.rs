// src/toolrelay/mod.rs

pub mod chat_session;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod http_client_pool;
pub mod json_value;
pub mod prompt;
pub mod tool_protocol;

// Let's explicitly export ChatSession so it can be reached as toolrelay::ChatSession
pub use chat_session::ChatSession;

//! Configuration for toolrelay.
//!
//! Provides the [`RelayConfig`] struct, built once by the host application and passed to
//! [`client_from_config`](crate::clients::client_from_config) and
//! [`ChatSession`](crate::chat_session::ChatSession) at construction time. Nothing reads
//! settings from global state.
//!
//! # Example
//!
//! ```rust
//! use toolrelay::config::{ProviderKind, RelayConfig};
//!
//! let config = RelayConfig {
//!     provider: ProviderKind::Custom,
//!     custom_endpoint_url: "http://localhost:11434/v1".into(),
//!     custom_model: "llama3.1".into(),
//!     ..RelayConfig::default()
//! };
//! assert_eq!(config.active_model_id(), "llama3.1");
//! assert_eq!(config.max_tool_loops, 5);
//! ```

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which wire protocol and auth scheme the session talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenRouter's OpenAI-compatible endpoint with a bearer API key.
    OpenRouter,
    /// Anthropic Messages API with an `x-api-key` header.
    Anthropic,
    /// Anthropic Messages API with an OAuth bearer token from a local credential file.
    #[serde(rename = "claudeoauth")]
    ClaudeOAuth,
    /// Any OpenAI-compatible endpoint (Ollama, LM Studio, llama.cpp, Groq, ...).
    Custom,
}

/// Where OAuth credentials live and how they are refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// JSON credential file. Defaults to `~/.claude/.credentials.json`.
    pub credentials_path: PathBuf,
    /// Top-level key holding `{accessToken, refreshToken, expiresAt}`.
    pub provider_key: String,
    pub token_url: String,
    pub client_id: String,
    pub scopes: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            credentials_path: home.join(".claude").join(".credentials.json"),
            provider_key: "claudeAiOauth".into(),
            token_url: "https://platform.claude.com/v1/oauth/token".into(),
            client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e".into(),
            scopes: "user:profile user:inference user:sessions:claude_code user:mcp_servers"
                .into(),
        }
    }
}

/// Everything the adapters and the chat session need to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub provider: ProviderKind,

    pub openrouter_api_key: String,
    pub openrouter_model: String,

    pub anthropic_api_key: String,
    pub anthropic_model: String,

    pub oauth_model: String,
    pub oauth: OAuthSettings,

    /// Base URL or full `/chat/completions` URL of an OpenAI-compatible server.
    pub custom_endpoint_url: String,
    /// Optional; many local servers need no key.
    pub custom_api_key: String,
    pub custom_model: String,
    /// Some local servers reject `tools`; turning this off omits them from requests.
    pub custom_supports_tools: bool,

    pub temperature: f32,
    pub max_tokens: u32,

    /// Provider round-trips allowed per user message before the loop gives up.
    pub max_tool_loops: usize,
    /// Most recent history messages included in each request.
    pub history_window: usize,
    /// Completions executed per [`ChatSession::pump`](crate::chat_session::ChatSession::pump).
    pub dispatch_batch_size: usize,
    /// Concurrent HTTP calls allowed on the worker pool.
    pub max_in_flight: usize,

    /// Sent as `X-Title` to OpenRouter.
    pub app_title: String,
    /// Sent as `HTTP-Referer` to OpenRouter.
    pub app_referer: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenRouter,
            openrouter_api_key: String::new(),
            openrouter_model: "anthropic/claude-sonnet-4-5".into(),
            anthropic_api_key: String::new(),
            anthropic_model: "claude-haiku-4-5".into(),
            oauth_model: "claude-haiku-4-5".into(),
            oauth: OAuthSettings::default(),
            custom_endpoint_url: String::new(),
            custom_api_key: String::new(),
            custom_model: String::new(),
            custom_supports_tools: true,
            temperature: 0.7,
            max_tokens: 4096,
            max_tool_loops: 5,
            history_window: 40,
            dispatch_batch_size: 10,
            max_in_flight: 4,
            app_title: "toolrelay".into(),
            app_referer: "https://github.com/toolrelay".into(),
        }
    }
}

impl RelayConfig {
    /// Model id for the selected provider.
    pub fn active_model_id(&self) -> &str {
        match self.provider {
            ProviderKind::OpenRouter => &self.openrouter_model,
            ProviderKind::Anthropic => &self.anthropic_model,
            ProviderKind::ClaudeOAuth => &self.oauth_model,
            ProviderKind::Custom => &self.custom_model,
        }
    }

    /// Whether requests should carry tool specs for the selected provider.
    pub fn tools_enabled(&self) -> bool {
        self.provider != ProviderKind::Custom || self.custom_supports_tools
    }

    /// Parse a JSON settings document. Missing fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::Parse(format!("invalid config: {}", e)))
    }

    /// Read and parse a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }
}

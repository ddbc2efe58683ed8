//! Provider specific [`ClientWrapper`] implementations.
//!
//! Each submodule offers a concrete client that speaks a particular wire protocol while
//! conforming to the uniform toolrelay contract.

use std::sync::Arc;

use crate::client_wrapper::ClientWrapper;
use crate::config::{ProviderKind, RelayConfig};

pub mod common;

pub mod claude;
pub mod claude_oauth;
pub mod openai;

/// Build the adapter selected by `config.provider`.
///
/// Missing credentials are not rejected here; the adapter reports them through
/// [`ClientWrapper::check_configuration`] on the first send so the session can show the
/// error in the conversation.
pub fn client_from_config(config: &RelayConfig) -> Arc<dyn ClientWrapper> {
    match config.provider {
        ProviderKind::OpenRouter => Arc::new(
            openai::OpenAIClient::openrouter(&config.openrouter_api_key, &config.openrouter_model)
                .with_app_identity(&config.app_title, &config.app_referer),
        ),
        ProviderKind::Anthropic => Arc::new(claude::ClaudeClient::new_with_api_key(
            &config.anthropic_api_key,
            &config.anthropic_model,
        )),
        ProviderKind::ClaudeOAuth => {
            let tokens = Arc::new(claude_oauth::TokenManager::from_settings(&config.oauth));
            Arc::new(claude::ClaudeClient::new_with_oauth(
                tokens,
                &config.oauth_model,
            ))
        }
        ProviderKind::Custom => Arc::new(openai::OpenAIClient::custom(
            &config.custom_endpoint_url,
            &config.custom_api_key,
            &config.custom_model,
            config.custom_supports_tools,
        )),
    }
}

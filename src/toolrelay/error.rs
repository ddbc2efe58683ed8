//! Error taxonomy shared by the adapters, the token manager and the chat session.
//!
//! None of these errors cross the adapter boundary: every adapter converts them into a
//! [`ChatResponse::failure`](crate::client_wrapper::ChatResponse::failure) and the
//! [`ChatSession`](crate::chat_session::ChatSession) turns failed responses into a synthesized
//! assistant message.
//!
//! ```rust
//! use toolrelay::error::ChatError;
//!
//! let err = ChatError::Configuration("No API key configured.".into());
//! assert_eq!(err.to_string(), "No API key configured.");
//! ```

use std::error::Error;
use std::fmt;

/// Failures that can occur while talking to an LLM provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    /// A credential, endpoint or model id is missing. Raised before any network call.
    Configuration(String),
    /// Connection, TLS or timeout failure while exchanging bytes with the provider.
    Transport(String),
    /// The provider answered with an error payload (usually a non-2xx status).
    Provider {
        /// HTTP status when one was received.
        status: Option<u16>,
        /// Human readable message extracted from the error body.
        message: String,
    },
    /// Malformed JSON from a provider or in a tool-call argument string.
    Parse(String),
    /// The tool loop reached its iteration cap.
    Capacity(usize),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Configuration(msg) => write!(f, "{}", msg),
            ChatError::Transport(msg) => write!(f, "Network error: {}", msg),
            ChatError::Provider {
                status: Some(status),
                message,
            } if message.is_empty() => write!(f, "HTTP {}", status),
            ChatError::Provider { message, .. } => write!(f, "{}", message),
            ChatError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ChatError::Capacity(rounds) => write!(
                f,
                "Reached the maximum tool call limit ({} rounds)",
                rounds
            ),
        }
    }
}

impl Error for ChatError {}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Transport(format!("request timed out ({})", err))
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        assert_eq!(
            ChatError::Transport("connection refused".into()).to_string(),
            "Network error: connection refused"
        );
        assert_eq!(
            ChatError::Provider {
                status: Some(503),
                message: String::new()
            }
            .to_string(),
            "HTTP 503"
        );
        assert_eq!(
            ChatError::Provider {
                status: Some(429),
                message: "rate limited (rate_limit)".into()
            }
            .to_string(),
            "rate limited (rate_limit)"
        );
        assert_eq!(
            ChatError::Capacity(5).to_string(),
            "Reached the maximum tool call limit (5 rounds)"
        );
    }

    #[test]
    fn test_from_serde_error_is_parse() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, ChatError::Parse(_)));
    }
}

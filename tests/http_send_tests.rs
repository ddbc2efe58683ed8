use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use toolrelay::client_wrapper::{ChatRequest, ClientWrapper, Message};
use toolrelay::clients::claude::ClaudeClient;
use toolrelay::clients::claude_oauth::{
    now_ms, CredentialStore, OAuthCredentials, TokenGrant, TokenManager, TokenRefresher,
};
use toolrelay::clients::openai::OpenAIClient;
use toolrelay::error::ChatError;

/// Accept one connection, answer with `status` and `body`, and hand back the raw request.
async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
            if request_complete(&received) {
                break;
            }
        }

        let reply = format!(
            "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\
             connection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(reply.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&received).to_string()
    });

    (format!("http://{}", address), server)
}

fn request_complete(received: &[u8]) -> bool {
    let text = String::from_utf8_lossy(received);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..head_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    received.len() >= head_end + 4 + content_length
}

fn hello_request(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![Message::system("S"), Message::user("hi")])
}

const ANTHROPIC_REPLY: &str = r#"{"id":"msg_1","model":"claude-haiku-4-5","content":[{"type":"text","text":"Hello!"}],"usage":{"input_tokens":12,"output_tokens":3}}"#;

const OPENAI_REPLY: &str = r#"{"id":"gen-1","choices":[{"message":{"role":"assistant","content":"Hello!"}}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;

#[tokio::test]
async fn test_claude_api_key_request_over_http() {
    let (base, server) = serve_once(200, ANTHROPIC_REPLY).await;
    let client = ClaudeClient::new_with_api_key("sk-test", "anthropic/claude-haiku-4-5")
        .with_endpoint(&format!("{}/v1/messages", base));

    let response = client.send_message(&hello_request("anthropic/claude-haiku-4-5")).await;
    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.message.unwrap().text(), "Hello!");
    assert_eq!(client.get_last_usage().map(|u| u.total_tokens), Some(15));

    let captured = server.await.unwrap();
    let lowered = captured.to_lowercase();
    assert!(captured.starts_with("POST /v1/messages HTTP/1.1"));
    assert!(lowered.contains("x-api-key: sk-test"));
    assert!(lowered.contains("anthropic-version: 2023-06-01"));
    assert!(lowered.contains("content-type: application/json"));
    assert!(captured.contains(r#""model":"claude-haiku-4-5""#));
    assert!(captured.contains(r#""system":"S""#));
}

#[tokio::test]
async fn test_openrouter_request_over_http() {
    let (base, server) = serve_once(200, OPENAI_REPLY).await;
    let client = OpenAIClient::openrouter("sk-or", "openai/gpt-4.1-mini")
        .with_endpoint(&format!("{}/api/v1/chat/completions", base))
        .with_app_identity("RelayTest", "https://example.test");

    let response = client.send_message(&hello_request("openai/gpt-4.1-mini")).await;
    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.usage.total_tokens, 15);

    let captured = server.await.unwrap().to_lowercase();
    assert!(captured.starts_with("post /api/v1/chat/completions http/1.1"));
    assert!(captured.contains("authorization: bearer sk-or"));
    assert!(captured.contains("x-title: relaytest"));
    assert!(captured.contains("http-referer: https://example.test"));
}

#[tokio::test]
async fn test_custom_endpoint_rejecting_tools_gets_hint() {
    let (base, server) = serve_once(400, r#"{"error":{"message":"tools are not supported"}}"#).await;
    let client = OpenAIClient::custom(&format!("{}/v1", base), "", "llama3.1", true);

    let request = hello_request("llama3.1").with_tool_specs(vec![serde_json::json!({
        "type": "function",
        "function": {"name": "ping", "description": "", "parameters": {}}
    })]);
    let response = client.send_message(&request).await;
    assert!(!response.success);
    let error = response.error.unwrap();
    assert!(error.starts_with("tools are not supported"));
    assert!(error.contains("tool calling"));
    assert_eq!(client.get_last_usage(), None);

    let captured = server.await.unwrap();
    assert!(captured.starts_with("POST /v1/chat/completions HTTP/1.1"));
    assert!(!captured.to_lowercase().contains("authorization:"));
    assert!(captured.contains(r#""tool_choice":"auto""#));
}

struct FixedStore(OAuthCredentials);

impl CredentialStore for FixedStore {
    fn load(&self) -> Result<Option<OAuthCredentials>, ChatError> {
        Ok(Some(self.0.clone()))
    }

    fn save(&self, _credentials: &OAuthCredentials) -> Result<(), ChatError> {
        Ok(())
    }
}

struct UnusedRefresher(Mutex<usize>);

#[async_trait]
impl TokenRefresher for UnusedRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, ChatError> {
        *self.0.lock().unwrap() += 1;
        Err(ChatError::Configuration("refresh not expected".into()))
    }
}

#[tokio::test]
async fn test_claude_oauth_request_uses_bearer_and_beta_header() {
    let (base, server) = serve_once(200, ANTHROPIC_REPLY).await;
    let store = Arc::new(FixedStore(OAuthCredentials {
        access_token: "oauth-token".into(),
        refresh_token: "refresh".into(),
        expires_at_ms: now_ms() + 3_600_000,
    }));
    let refresher = Arc::new(UnusedRefresher(Mutex::new(0)));
    let tokens = Arc::new(TokenManager::new(store, refresher.clone()));
    let client = ClaudeClient::new_with_oauth(tokens, "claude-haiku-4-5")
        .with_endpoint(&format!("{}/v1/messages", base));

    let response = client.send_message(&hello_request("claude-haiku-4-5")).await;
    assert!(response.success, "{:?}", response.error);
    assert_eq!(*refresher.0.lock().unwrap(), 0);

    let captured = server.await.unwrap().to_lowercase();
    assert!(captured.contains("authorization: bearer oauth-token"));
    assert!(captured.contains("anthropic-beta: oauth-2025-04-20"));
    assert!(!captured.contains("x-api-key"));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_failed_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let client = ClaudeClient::new_with_api_key("sk-test", "claude-haiku-4-5")
        .with_endpoint(&format!("http://{}/v1/messages", address));
    let response = client.send_message(&hello_request("claude-haiku-4-5")).await;
    assert!(!response.success);
    assert!(!response.error.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_missing_key_never_reaches_the_network() {
    let client = ClaudeClient::new_with_api_key("", "claude-haiku-4-5")
        .with_endpoint("http://127.0.0.1:9/v1/messages");
    let response = client.send_message(&hello_request("claude-haiku-4-5")).await;
    assert_eq!(
        response.error.as_deref(),
        Some("No Anthropic API key configured.")
    );
}

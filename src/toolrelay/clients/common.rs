//! Plumbing shared by every adapter: the JSON POST exchange and error-payload detection.

use crate::client_wrapper::RawResponse;
use crate::error::ChatError;
use crate::json_value::JsonExt;
use serde_json::Value;

/// Longest slice of an unstructured error body echoed back to the user.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// POST `body` as JSON and return status + body text. Only transport failures are errors;
/// non-2xx statuses come back as a [`RawResponse`].
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: String,
) -> Result<RawResponse, ChatError> {
    let mut request = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(RawResponse { status, body })
}

/// Render a top-level `error` node into one line.
///
/// Accepts a bare string or an object with `message` plus any of `code`, `type`, `provider` /
/// `metadata.provider_name`:
///
/// * `{"message":"rate limited","type":"rate_limit"}` → `rate limited (rate_limit)`
/// * `{"message":"busy","code":429,"metadata":{"provider_name":"Groq"}}` →
///   `busy (code: 429) [Groq]`
pub fn describe_error(error: &Value) -> String {
    if let Some(text) = error.as_str() {
        return text.to_string();
    }

    let mut description = error["message"]
        .non_empty_str()
        .unwrap_or("Unknown error")
        .to_string();

    let code = error["code"].as_string_lossy();
    let kind = error["type"].as_string_lossy();
    if !code.is_empty() {
        description.push_str(&format!(" (code: {})", code));
    } else if !kind.is_empty() {
        description.push_str(&format!(" ({})", kind));
    }

    let provider = error["metadata"]["provider_name"]
        .non_empty_str()
        .or_else(|| error["provider"].non_empty_str());
    if let Some(provider) = provider {
        description.push_str(&format!(" [{}]", provider));
    }
    description
}

/// The top-level `error` of a parsed body, if present and not null.
pub fn top_level_error(root: &Value) -> Option<String> {
    let error = &root["error"];
    error.is_present().then(|| describe_error(error))
}

/// Message for a non-2xx reply: the structured error when the body carries one, otherwise the
/// status plus a bounded slice of the body.
pub fn describe_http_failure(raw: &RawResponse) -> String {
    if let Ok(root) = serde_json::from_str::<Value>(&raw.body) {
        if let Some(error) = top_level_error(&root) {
            return error;
        }
    }
    let body = raw.body.trim();
    if body.is_empty() {
        return format!("HTTP {}", raw.status);
    }
    let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("HTTP {}: {}", raw.status, snippet)
}

/// `f32` temperatures widen to noisy `f64`s (0.7 → 0.699999988...); round to three places.
pub fn wire_temperature(temperature: f32) -> f64 {
    (f64::from(temperature) * 1000.0).round() / 1000.0
}

/// Produce a correlation id for tool calls that arrive without one.
pub fn generated_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

//! Benchmark to measure the cost of rendering the normalized history into each wire format.
//!
//! Every tool-loop round-trip re-renders the whole window, so this checks that doing so is
//! negligible next to network and model latency.
//!
//! Run with: cargo bench --bench payload_conversion_bench

use std::time::{Duration, Instant};

use serde_json::json;
use toolrelay::client_wrapper::{ChatRequest, Message, RawResponse, ToolCall};
use toolrelay::clients::claude::{build_anthropic_body, parse_anthropic_response};
use toolrelay::clients::openai::{build_openai_body, parse_openai_response};

const ITERATIONS: u32 = 20_000;

/// System prompt plus 40 history messages, a quarter of them tool round-trips.
fn conversation() -> ChatRequest {
    let mut messages = vec![Message::system(
        "You are RelayBot.\n\nCurrent snapshot:\n3 colonists, 2 injured, food for 12 days",
    )];
    for i in 0..10 {
        messages.push(Message::user(format!(
            "User message {} - a question that might be short or long depending on what they ask",
            i
        )));
        if i % 2 == 0 {
            let id = format!("call_{}", i);
            messages.push(Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::new(&id, "get_colonist_health", r#"{"name":"Ada"}"#)],
            ));
            messages.push(Message::tool_result(&id, "Ada: healthy, mood 72%"));
        }
        messages.push(Message::assistant(format!(
            "Assistant response {} - usually longer, explaining the answer with context",
            i
        )));
    }

    ChatRequest::new("claude-haiku-4-5", messages).with_tool_specs(vec![json!({
        "type": "function",
        "function": {
            "name": "get_colonist_health",
            "description": "Health summary for one colonist",
            "parameters": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }
    })])
}

fn time(label: &str, mut work: impl FnMut()) -> Duration {
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        work();
    }
    let elapsed = start.elapsed();
    println!(
        "{:<28} total {:>10.2?}  per call {:>8.2}µs",
        label,
        elapsed,
        elapsed.as_micros() as f64 / ITERATIONS as f64
    );
    elapsed
}

fn main() {
    let request = conversation();
    let anthropic_reply = RawResponse::ok(
        json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "t1", "name": "get_colonist_health", "input": {"name": "Ada"}}
            ],
            "usage": {"input_tokens": 900, "output_tokens": 40}
        })
        .to_string(),
    );
    let openai_reply = RawResponse::ok(
        json!({
            "id": "gen-1",
            "choices": [{"message": {"role": "assistant", "content": "Ada is healthy."}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 12}
        })
        .to_string(),
    );

    println!("Payload Conversion Benchmark");
    println!("============================\n");
    println!("Window size: {} messages", request.messages.len());
    println!(
        "Total content size: {} bytes\n",
        request.messages.iter().map(|m| m.text().len()).sum::<usize>()
    );

    let slowest = [
        time("build anthropic body", || {
            let body = build_anthropic_body(&request);
            std::hint::black_box(serde_json::to_string(&body).ok());
        }),
        time("build openai body", || {
            let body = build_openai_body(&request, true);
            std::hint::black_box(serde_json::to_string(&body).ok());
        }),
        time("parse anthropic response", || {
            std::hint::black_box(parse_anthropic_response(&anthropic_reply));
        }),
        time("parse openai response", || {
            std::hint::black_box(parse_openai_response(&openai_reply));
        }),
    ]
    .into_iter()
    .max()
    .unwrap_or_default();

    let per_call_us = slowest.as_micros() as f64 / ITERATIONS as f64;
    println!("\nNetwork latency: ~100,000µs (100ms)");
    println!("LLM processing: ~1,000,000µs+ (1+ seconds)");
    println!(
        "Slowest conversion as % of network latency: {:.4}%",
        per_call_us / 100_000.0 * 100.0
    );
}

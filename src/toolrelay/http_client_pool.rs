//! HTTP client pool for maintaining persistent connections.
//!
//! Adapters share one `reqwest::Client` per (base URL, timeout) pair so repeated round-trips
//! in a tool loop reuse DNS lookups, TLS sessions and keep-alive connections. Timeouts are
//! fixed per adapter and baked into the pooled client, which is why they are part of the key.

use crate::error::ChatError;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    /// Global cache of HTTP clients indexed by base URL and timeout in seconds.
    static ref CLIENT_POOL: Mutex<HashMap<(String, u64), reqwest::Client>> =
        Mutex::new(HashMap::new());
}

/// Creates or retrieves a shared HTTP client for `base_url` whose connect and overall request
/// timeouts are both `timeout`.
pub fn get_or_create_client(base_url: &str, timeout: Duration) -> Result<reqwest::Client, ChatError> {
    let key = (base_url.to_string(), timeout.as_secs());
    let mut pool = CLIENT_POOL
        .lock()
        .map_err(|_| ChatError::Transport("HTTP client pool poisoned".into()))?;

    if let Some(client) = pool.get(&key) {
        return Ok(client.clone());
    }

    let client = create_pooled_client(timeout)?;
    pool.insert(key, client.clone());
    Ok(client)
}

/// Configuration details:
/// - `pool_max_idle_per_host(10)`: a tool loop rarely needs more
/// - `pool_idle_timeout(90s)`: keeps connections warm between user messages
/// - `tcp_keepalive(60s)`
/// - connect and total timeouts both set to `timeout`
fn create_pooled_client(timeout: Duration) -> Result<reqwest::Client, ChatError> {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| ChatError::Configuration(format!("failed to build HTTP client: {}", e)))
}

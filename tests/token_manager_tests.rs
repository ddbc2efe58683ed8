use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use toolrelay::clients::claude_oauth::{
    now_ms, CredentialStore, FileCredentialStore, OAuthCredentials, TokenGrant, TokenManager,
    TokenRefresher,
};
use toolrelay::error::ChatError;

const HOUR_MS: i64 = 3_600_000;

/// In-memory store that records every save.
struct MemoryStore {
    credentials: Mutex<Option<OAuthCredentials>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    fn with(credentials: Option<OAuthCredentials>) -> Arc<Self> {
        Arc::new(Self {
            credentials: Mutex::new(credentials),
            saves: AtomicUsize::new(0),
        })
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<OAuthCredentials>, ChatError> {
        Ok(self.credentials.lock().unwrap().clone())
    }

    fn save(&self, credentials: &OAuthCredentials) -> Result<(), ChatError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.credentials.lock().unwrap() = Some(credentials.clone());
        Ok(())
    }
}

/// Refresher that counts calls and takes a while to answer.
struct CountingRefresher {
    calls: AtomicUsize,
    fail: bool,
    rotate: bool,
}

impl CountingRefresher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            rotate: true,
        })
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ChatError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(ChatError::Provider {
                status: Some(400),
                message: "invalid_grant".into(),
            });
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", n),
            refresh_token: self.rotate.then(|| format!("{}-rotated", refresh_token)),
            expires_in_secs: 3600,
        })
    }
}

fn credentials(expires_in_ms: i64) -> OAuthCredentials {
    OAuthCredentials {
        access_token: "stale".into(),
        refresh_token: "refresh".into(),
        expires_at_ms: now_ms() + expires_in_ms,
    }
}

#[tokio::test]
async fn test_fresh_token_is_returned_without_refresh() {
    let store = MemoryStore::with(Some(credentials(HOUR_MS)));
    let refresher = CountingRefresher::new();
    let manager = TokenManager::new(store.clone(), refresher.clone());

    assert_eq!(manager.get_access_token().await.as_deref(), Some("stale"));
    assert_eq!(manager.get_access_token().await.as_deref(), Some("stale"));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    assert!(manager.is_available());
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed_and_persisted() {
    // Four minutes left is inside the five-minute margin.
    let store = MemoryStore::with(Some(credentials(4 * 60 * 1000)));
    let refresher = CountingRefresher::new();
    let manager = TokenManager::new(store.clone(), refresher.clone());

    assert_eq!(manager.get_access_token().await.as_deref(), Some("access-1"));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 1);

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "access-1");
    assert_eq!(saved.refresh_token, "refresh-rotated");
    assert!(saved.expires_at_ms > now_ms() + 59 * 60 * 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_trigger_one_refresh() {
    let store = MemoryStore::with(Some(credentials(60 * 1000)));
    let refresher = CountingRefresher::new();
    let manager = Arc::new(TokenManager::new(store.clone(), refresher.clone()));

    let callers = (0..2).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get_access_token().await })
    });
    let tokens: Vec<Option<String>> = futures_util::future::join_all(callers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tokens, vec![Some("access-1".to_string()); 2]);
}

#[tokio::test]
async fn test_refresh_keeps_old_refresh_token_when_not_rotated() {
    let store = MemoryStore::with(Some(credentials(0)));
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: false,
        rotate: false,
    });
    let manager = TokenManager::new(store.clone(), refresher);

    assert!(manager.get_access_token().await.is_some());
    assert_eq!(store.load().unwrap().unwrap().refresh_token, "refresh");
}

#[tokio::test]
async fn test_refresh_failure_reports_unavailable() {
    let store = MemoryStore::with(Some(credentials(-HOUR_MS)));
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        fail: true,
        rotate: true,
    });
    let manager = TokenManager::new(store.clone(), refresher.clone());

    assert_eq!(manager.get_access_token().await, None);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_credentials_report_unavailable() {
    let manager = TokenManager::new(MemoryStore::with(None), CountingRefresher::new());
    assert!(!manager.is_available());
    assert_eq!(manager.get_access_token().await, None);
}

#[tokio::test]
async fn test_custom_margin() {
    let store = MemoryStore::with(Some(credentials(4 * 60 * 1000)));
    let refresher = CountingRefresher::new();
    let manager =
        TokenManager::new(store, refresher.clone()).with_refresh_margin(Duration::from_secs(60));

    assert_eq!(manager.get_access_token().await.as_deref(), Some("stale"));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_file_store_reads_string_or_number_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".credentials.json");
    std::fs::write(
        &path,
        json!({
            "claudeAiOauth": {
                "accessToken": "tok",
                "refreshToken": "ref",
                "expiresAt": "1750000000000"
            }
        })
        .to_string(),
    )
    .unwrap();

    let store = FileCredentialStore::new(&path, "claudeAiOauth");
    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.access_token, "tok");
    assert_eq!(loaded.refresh_token, "ref");
    assert_eq!(loaded.expires_at_ms, 1_750_000_000_000);
}

#[test]
fn test_file_store_save_preserves_other_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".credentials.json");
    std::fs::write(
        &path,
        json!({
            "claudeAiOauth": {
                "accessToken": "old",
                "refreshToken": "old-ref",
                "expiresAt": 1,
                "scopes": ["user:inference"],
                "subscriptionType": "pro"
            },
            "otherProvider": {"token": "keep me"}
        })
        .to_string(),
    )
    .unwrap();

    let store = FileCredentialStore::new(&path, "claudeAiOauth");
    store
        .save(&OAuthCredentials {
            access_token: "new".into(),
            refresh_token: "new-ref".into(),
            expires_at_ms: 42,
        })
        .unwrap();

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["claudeAiOauth"]["accessToken"], "new");
    assert_eq!(saved["claudeAiOauth"]["refreshToken"], "new-ref");
    assert_eq!(saved["claudeAiOauth"]["expiresAt"], 42);
    assert_eq!(saved["claudeAiOauth"]["subscriptionType"], "pro");
    assert_eq!(saved["claudeAiOauth"]["scopes"][0], "user:inference");
    assert_eq!(saved["otherProvider"]["token"], "keep me");
}

#[test]
fn test_file_store_missing_file_or_token() {
    let dir = tempfile::tempdir().unwrap();
    let missing = FileCredentialStore::new(dir.path().join("nope.json"), "claudeAiOauth");
    assert_eq!(missing.load().unwrap(), None);

    let path = dir.path().join("empty.json");
    std::fs::write(&path, r#"{"claudeAiOauth":{"accessToken":""}}"#).unwrap();
    let empty = FileCredentialStore::new(&path, "claudeAiOauth");
    assert_eq!(empty.load().unwrap(), None);

    // Saving into a missing file creates it.
    let fresh = FileCredentialStore::new(dir.path().join("sub").join("creds.json"), "k");
    fresh
        .save(&OAuthCredentials {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at_ms: 7,
        })
        .unwrap();
    assert_eq!(fresh.load().unwrap().unwrap().access_token, "a");
}

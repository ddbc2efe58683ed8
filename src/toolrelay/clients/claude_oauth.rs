//! OAuth credential handling for the Anthropic bearer-token variant.
//!
//! [`TokenManager`] hands out access tokens with at least five minutes of validity left. Tokens
//! come from a [`CredentialStore`] (by default the JSON credential file written by the Claude
//! command line login) and are renewed through a [`TokenRefresher`] when they are about to
//! expire. A refresh endpoint invalidates the previous refresh token, so every read and refresh
//! goes through one async mutex: two concurrent callers never refresh twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::client_wrapper::RawResponse;
use crate::clients::common::{describe_http_failure, post_json};
use crate::config::OAuthSettings;
use crate::error::ChatError;
use crate::http_client_pool::get_or_create_client;
use crate::json_value::{to_text, JsonExt};

/// Tokens closer than this to expiry are treated as expired.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 28_800;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix milliseconds.
    pub expires_at_ms: i64,
}

impl OAuthCredentials {
    /// True when the token stays valid for longer than `margin` after `now_ms`.
    pub fn is_fresh(&self, now_ms: i64, margin: Duration) -> bool {
        !self.access_token.is_empty() && self.expires_at_ms - now_ms > margin.as_millis() as i64
    }
}

/// Persistent home of the OAuth credentials.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when no usable credentials exist.
    fn load(&self) -> Result<Option<OAuthCredentials>, ChatError>;

    fn save(&self, credentials: &OAuthCredentials) -> Result<(), ChatError>;
}

/// JSON credential file holding `{accessToken, refreshToken, expiresAt}` under a provider key.
///
/// Saving rewrites those three fields only; every other key in the document survives.
pub struct FileCredentialStore {
    path: PathBuf,
    provider_key: String,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, provider_key: &str) -> Self {
        Self {
            path: path.into(),
            provider_key: provider_key.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<Value>, ChatError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            ChatError::Configuration(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<OAuthCredentials>, ChatError> {
        let Some(document) = self.read_document()? else {
            return Ok(None);
        };
        let entry = &document[self.provider_key.as_str()];
        let Some(access_token) = entry["accessToken"].non_empty_str() else {
            return Ok(None);
        };
        Ok(Some(OAuthCredentials {
            access_token: access_token.to_string(),
            refresh_token: entry["refreshToken"].as_string_lossy(),
            expires_at_ms: entry["expiresAt"].as_int_lossy(),
        }))
    }

    fn save(&self, credentials: &OAuthCredentials) -> Result<(), ChatError> {
        let mut document = self.read_document()?.unwrap_or_else(|| json!({}));
        if !document.is_object() {
            document = json!({});
        }
        let entry = &mut document[self.provider_key.as_str()];
        if !entry.is_object() {
            *entry = json!({});
        }
        entry["accessToken"] = json!(credentials.access_token);
        entry["refreshToken"] = json!(credentials.refresh_token);
        entry["expiresAt"] = json!(credentials.expires_at_ms);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatError::Configuration(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(&self.path, to_text(&document, Some(2))).map_err(|e| {
            ChatError::Configuration(format!("cannot write {}: {}", self.path.display(), e))
        })
    }
}

/// Result of a successful refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the endpoint did not rotate the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ChatError>;
}

/// Refresh grant over HTTP: `POST {grant_type, refresh_token, client_id, scope}` as JSON.
pub struct HttpTokenRefresher {
    token_url: String,
    client_id: String,
    scopes: String,
}

impl HttpTokenRefresher {
    pub fn new(token_url: &str, client_id: &str, scopes: &str) -> Self {
        Self {
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            scopes: scopes.to_string(),
        }
    }

    pub fn from_settings(settings: &OAuthSettings) -> Self {
        Self::new(&settings.token_url, &settings.client_id, &settings.scopes)
    }
}

/// Parse a token endpoint reply.
pub fn parse_token_grant(raw: &RawResponse) -> Result<TokenGrant, ChatError> {
    if !raw.is_success() {
        return Err(ChatError::Provider {
            status: Some(raw.status),
            message: describe_http_failure(raw),
        });
    }
    let root: Value = serde_json::from_str(&raw.body)?;
    let access_token = root["access_token"]
        .non_empty_str()
        .ok_or_else(|| ChatError::Parse("token response has no access_token".into()))?;
    let expires_in_secs = match root["expires_in"].as_int_lossy() {
        secs if secs > 0 => secs,
        _ => DEFAULT_EXPIRES_IN_SECS,
    };
    Ok(TokenGrant {
        access_token: access_token.to_string(),
        refresh_token: root["refresh_token"].non_empty_str().map(str::to_string),
        expires_in_secs,
    })
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ChatError> {
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": self.client_id,
            "scope": self.scopes,
        });
        let client = get_or_create_client(&self.token_url, REFRESH_TIMEOUT)?;
        let raw = post_json(&client, &self.token_url, &[], body.to_string()).await?;
        parse_token_grant(&raw)
    }
}

/// Serializes token reads and refreshes behind one async mutex.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
    cached: Mutex<Option<OAuthCredentials>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            margin: DEFAULT_REFRESH_MARGIN,
            cached: Mutex::new(None),
        }
    }

    /// File store plus HTTP refresher as described by `settings`.
    pub fn from_settings(settings: &OAuthSettings) -> Self {
        Self::new(
            Arc::new(FileCredentialStore::new(
                settings.credentials_path.clone(),
                &settings.provider_key,
            )),
            Arc::new(HttpTokenRefresher::from_settings(settings)),
        )
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Whether the store currently holds an access token, expired or not.
    pub fn is_available(&self) -> bool {
        matches!(self.store.load(), Ok(Some(_)))
    }

    /// A token valid for longer than the refresh margin, or `None` when none can be obtained.
    pub async fn get_access_token(&self) -> Option<String> {
        let mut cached = self.cached.lock().await;

        if let Some(credentials) = cached.as_ref() {
            if credentials.is_fresh(now_ms(), self.margin) {
                return Some(credentials.access_token.clone());
            }
        }

        // Another process (or the CLI) may have refreshed the file already.
        let current = match self.store.load() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => {
                log::warn!("No OAuth credentials found");
                *cached = None;
                return None;
            }
            Err(err) => {
                log::warn!("Failed to load OAuth credentials: {}", err);
                return None;
            }
        };
        if current.is_fresh(now_ms(), self.margin) {
            let token = current.access_token.clone();
            *cached = Some(current);
            return Some(token);
        }

        if current.refresh_token.is_empty() {
            log::warn!("OAuth access token expired and no refresh token is stored");
            *cached = Some(current);
            return None;
        }

        log::info!("OAuth access token expires soon, refreshing");
        match self.refresher.refresh(&current.refresh_token).await {
            Ok(grant) => {
                let refreshed = OAuthCredentials {
                    access_token: grant.access_token,
                    refresh_token: grant.refresh_token.unwrap_or(current.refresh_token),
                    expires_at_ms: now_ms() + grant.expires_in_secs * 1000,
                };
                if let Err(err) = self.store.save(&refreshed) {
                    log::warn!("Refreshed OAuth token could not be persisted: {}", err);
                }
                log::info!("OAuth access token refreshed");
                let token = refreshed.access_token.clone();
                *cached = Some(refreshed);
                Some(token)
            }
            Err(err) => {
                log::warn!("OAuth token refresh failed: {}", err);
                *cached = Some(current);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_respects_margin() {
        let now = 1_000_000_000;
        let margin = Duration::from_secs(300);
        let mut creds = OAuthCredentials {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at_ms: now + 301_000,
        };
        assert!(creds.is_fresh(now, margin));
        creds.expires_at_ms = now + 299_000;
        assert!(!creds.is_fresh(now, margin));
        creds.expires_at_ms = now + 3_600_000;
        creds.access_token.clear();
        assert!(!creds.is_fresh(now, margin));
    }

    #[test]
    fn test_token_grant_defaults() {
        let grant = parse_token_grant(&RawResponse::ok(r#"{"access_token":"new"}"#)).unwrap();
        assert_eq!(grant.access_token, "new");
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_in_secs, 28_800);

        let grant = parse_token_grant(&RawResponse::ok(
            r#"{"access_token":"new","refresh_token":"r2","expires_in":"3600"}"#,
        ))
        .unwrap();
        assert_eq!(grant.refresh_token.as_deref(), Some("r2"));
        assert_eq!(grant.expires_in_secs, 3600);
    }

    #[test]
    fn test_token_grant_failures() {
        assert!(matches!(
            parse_token_grant(&RawResponse::ok(r#"{"token_type":"bearer"}"#)),
            Err(ChatError::Parse(_))
        ));
        let denied = RawResponse {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        assert_eq!(
            parse_token_grant(&denied),
            Err(ChatError::Provider {
                status: Some(400),
                message: "invalid_grant".into()
            })
        );
    }
}

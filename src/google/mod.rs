//! Google Sheets client over plain HTTP.
//!
//! Token format follows the JSON written by Google's own OAuth client
//! libraries, so an existing `token.json` keeps working.
//!
//! Modules:
//! - auth: OAuth2 browser consent flow
//! - sheets: Sheets API v4 `values.get`
//! - token_store: token file persistence

pub mod auth;
pub mod sheets;
pub mod token_store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use token_store::TokenStore;

/// Read-only access to spreadsheets is all the dashboard needs.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets.readonly"];

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted in the token file.
///
/// Both `token` and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    /// Long-lived token used to mint new access tokens
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 3339 expiry
    #[serde(default)]
    pub expiry: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// OAuth2 client credentials from credentials.json (Desktop App type).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    pub installed: InstalledAppCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledAppCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Credentials not found at {0}")]
    CredentialsNotFound(PathBuf),
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OAuth flow cancelled")]
    FlowCancelled,
    #[error("Invalid credentials format: {0}")]
    InvalidCredentials(String),
    #[error("OAuth state mismatch")]
    OAuthStateMismatch,
}

impl GoogleApiError {
    /// Whether the stored token can no longer be used and consent must be rerun.
    pub fn needs_consent(&self) -> bool {
        matches!(self, GoogleApiError::AuthExpired | GoogleApiError::TokenNotFound(_))
    }
}

// ============================================================================
// Retries
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let backoff = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(backoff)
}

/// Send a request, retrying throttling, server errors and transport failures.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GoogleApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GoogleApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    log::warn!(
                        "sheets retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    log::warn!(
                        "sheets retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GoogleApiError::Http(err));
            }
        }
    }

    Err(GoogleApiError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}

// ============================================================================
// Credentials
// ============================================================================

/// Load the installed-app client credentials file.
pub fn load_credentials(path: &Path) -> Result<ClientCredentials, GoogleApiError> {
    if !path.exists() {
        return Err(GoogleApiError::CredentialsNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| GoogleApiError::InvalidCredentials(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// Token refresh
// ============================================================================

static TOKEN_REFRESH_MUTEX: std::sync::OnceLock<Mutex<()>> = std::sync::OnceLock::new();

fn refresh_mutex() -> &'static Mutex<()> {
    TOKEN_REFRESH_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Check if a token is expired, treating the last 60 seconds as expired.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match chrono::DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
            Err(_) => true,
        },
    }
}

/// Refresh an access token and persist the result.
///
/// Concurrent refreshes are serialized so a burst of per-request fetches
/// only hits the token endpoint once at a time.
pub async fn refresh_access_token(
    token: &GoogleToken,
    store: &TokenStore,
) -> Result<GoogleToken, GoogleApiError> {
    let _guard = refresh_mutex().lock().await;

    let refresh_token = token
        .refresh_token
        .as_ref()
        .ok_or(GoogleApiError::AuthExpired)?;

    let mut form = vec![
        ("client_id", token.client_id.as_str()),
        ("refresh_token", refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = token.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = reqwest::Client::new()
        .post(&token.token_uri)
        .form(&form)
        .send()
        .await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let mut new_token = token.clone();
    new_token.token = access_token.to_string();
    new_token.expiry = Some(expiry.to_rfc3339());
    store.save(&new_token)?;

    log::info!("Refreshed Google access token");
    Ok(new_token)
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

/// Get a valid access token from the store, refreshing it if expired.
pub async fn get_valid_access_token(store: &TokenStore) -> Result<String, GoogleApiError> {
    let token = store.load()?;

    if is_token_expired(&token) {
        let refreshed = refresh_access_token(&token, store).await?;
        Ok(refreshed.token)
    } else {
        Ok(token.token)
    }
}

/// Make sure a usable token exists, running the consent flow when it doesn't.
pub async fn ensure_authorized(
    credentials_path: &Path,
    store: &TokenStore,
) -> Result<(), GoogleApiError> {
    match get_valid_access_token(store).await {
        Ok(_) => Ok(()),
        Err(e) if e.needs_consent() => {
            log::warn!("{}; starting browser consent", e);
            auth::run_consent_flow(credentials_path, store).await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expiry: Option<String>) -> GoogleToken {
        GoogleToken {
            token: "test".to_string(),
            refresh_token: None,
            token_uri: default_token_uri(),
            client_id: "c".to_string(),
            client_secret: Some("s".to_string()),
            scopes: vec![],
            expiry,
        }
    }

    #[test]
    fn test_google_token_library_format() {
        let json = r#"{
            "token": "ya29.sheet-token",
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "client.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/spreadsheets.readonly"],
            "expiry": "2026-02-08T12:00:00.000000Z",
            "universe_domain": "googleapis.com"
        }"#;

        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "ya29.sheet-token");
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(token.scopes, SCOPES);
    }

    #[test]
    fn test_google_token_access_token_alias() {
        let json = r#"{
            "access_token": "ya29.alias-token",
            "refresh_token": "1//refresh",
            "client_id": "client"
        }"#;

        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "ya29.alias-token");
        assert_eq!(token.token_uri, "https://oauth2.googleapis.com/token");
        assert!(token.client_secret.is_none());
    }

    #[test]
    fn test_is_token_expired() {
        assert!(is_token_expired(&token(None)));
        assert!(is_token_expired(&token(Some("not a date".to_string()))));

        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!is_token_expired(&token(Some(future.to_rfc3339()))));

        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(is_token_expired(&token(Some(past.to_rfc3339()))));

        // Inside the 60 second margin
        let soon = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert!(is_token_expired(&token(Some(soon.to_rfc3339()))));
    }

    #[test]
    fn test_map_refresh_error() {
        assert!(matches!(
            map_refresh_error(400, r#"{"error": "invalid_grant"}"#),
            GoogleApiError::AuthExpired
        ));
        assert!(matches!(
            map_refresh_error(500, "boom"),
            GoogleApiError::RefreshFailed(_)
        ));
    }

    #[test]
    fn test_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        assert!(matches!(
            load_credentials(&path),
            Err(GoogleApiError::CredentialsNotFound(_))
        ));

        std::fs::write(
            &path,
            r#"{
                "installed": {
                    "client_id": "12345.apps.googleusercontent.com",
                    "client_secret": "secret",
                    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                    "token_uri": "https://oauth2.googleapis.com/token",
                    "redirect_uris": ["http://localhost"]
                }
            }"#,
        )
        .unwrap();
        let creds = load_credentials(&path).unwrap();
        assert_eq!(creds.installed.client_id, "12345.apps.googleusercontent.com");
        assert_eq!(creds.installed.redirect_uris, vec!["http://localhost"]);

        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            load_credentials(&path),
            Err(GoogleApiError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(1, &policy), Duration::from_millis(250));
        assert_eq!(retry_delay(2, &policy), Duration::from_millis(500));
        assert_eq!(retry_delay(10, &policy), Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_missing_token_needs_consent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let err = get_valid_access_token(&store).await.unwrap_err();
        assert!(err.needs_consent());
    }
}

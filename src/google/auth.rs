//! OAuth2 browser consent flow.
//!
//! Opens the user's browser for consent, captures the redirect on a loopback
//! listener, exchanges the authorization code for tokens and stores them.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::{GoogleApiError, GoogleToken, SCOPES, TokenStore, load_credentials};

/// Run the full consent flow and save the resulting token.
///
/// 1. Load credentials.json
/// 2. Listen on a random loopback port
/// 3. Open the browser with the auth URL
/// 4. Wait for the redirect and check its state nonce
/// 5. Exchange the code for tokens
pub async fn run_consent_flow(
    credentials_path: &Path,
    store: &TokenStore,
) -> Result<(), GoogleApiError> {
    let creds = load_credentials(credentials_path)?;
    let installed = &creds.installed;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://localhost:{}", port);
    let state = uuid::Uuid::new_v4().to_string();

    let auth_url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
        installed.auth_uri,
        encode(&installed.client_id),
        encode(&redirect_uri),
        encode(&SCOPES.join(" ")),
        state,
    );

    log::info!("Opening browser for Google OAuth consent...");
    if let Err(e) = open::that(&auth_url) {
        log::warn!("Failed to open browser: {}. URL: {}", e, auth_url);
    }

    let code = wait_for_auth_code(&listener, &state).await?;

    let mut form = vec![
        ("code", code.as_str()),
        ("client_id", installed.client_id.as_str()),
        ("redirect_uri", redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
    ];
    if let Some(secret) = installed.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = reqwest::Client::new()
        .post(&installed.token_uri)
        .form(&form)
        .send()
        .await?;
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::RefreshFailed(format!(
            "Token exchange failed: {}",
            body
        )));
    }

    let body: serde_json::Value = resp.json().await?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let token = GoogleToken {
        token: access_token.to_string(),
        refresh_token: body["refresh_token"].as_str().map(str::to_string),
        token_uri: installed.token_uri.clone(),
        client_id: installed.client_id.clone(),
        client_secret: installed.client_secret.clone(),
        scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        expiry: Some(expiry.to_rfc3339()),
    };
    store.save(&token)?;

    log::info!("Google authorization saved to {}", store.path().display());
    Ok(())
}

/// Accept connections until the browser redirect arrives, then pull the code out of it.
///
/// Requests that carry neither `code` nor `error` (a favicon fetch, a
/// prefetch) are answered with 404 and the listener keeps waiting.
async fn wait_for_auth_code(listener: &TcpListener, state: &str) -> Result<String, GoogleApiError> {
    loop {
        let (mut stream, _) = listener.accept().await?;

        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);

        if !is_redirect(&request) {
            log::debug!("Ignoring unrelated loopback request: {}", request.lines().next().unwrap_or(""));
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
            continue;
        }

        let result = parse_redirect(&request, state);
        let message = match &result {
            Ok(_) => "Authorization successful! You can close this tab.",
            Err(GoogleApiError::OAuthStateMismatch) => "Authorization rejected. You can close this tab.",
            Err(_) => "Authorization denied. You can close this tab.",
        };

        let body = format!(
            "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
             <h2>{}</h2></body></html>",
            message
        );
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.flush().await;

        return result;
    }
}

fn request_query(request: &str) -> Option<&str> {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|path| path.split_once('?'))
        .map(|(_, query)| query)
}

/// Whether a loopback request is the OAuth redirect (it carries `code` or `error`).
fn is_redirect(request: &str) -> bool {
    request_query(request).is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == "code" || key == "error")
    })
}

/// Extract the authorization code from `GET /?code=...&state=... HTTP/1.1`.
fn parse_redirect(request: &str, expected_state: &str) -> Result<String, GoogleApiError> {
    let query = request_query(request).ok_or(GoogleApiError::FlowCancelled)?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                log::warn!("Consent denied: {}", value);
                return Err(GoogleApiError::FlowCancelled);
            }
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(GoogleApiError::OAuthStateMismatch);
    }
    code.filter(|c| !c.is_empty())
        .ok_or(GoogleApiError::FlowCancelled)
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tiny_http::{Response, Server};
use tracing::{debug, info};
use url::Url;

use super::pkce::{oauth_state, PkceChallenge};
use crate::error::ToolError;
use crate::storage::CachedCredential;

const REDIRECT_URI: &str = "http://localhost:8484/callback";
const LISTEN_ADDR: &str = "127.0.0.1:8484";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const SCOPE_DIRECTORY_USER: &str = "https://www.googleapis.com/auth/admin.directory.user";
pub const SCOPE_USER_SECURITY: &str =
    "https://www.googleapis.com/auth/admin.directory.user.security";
pub const ADMIN_SCOPES: &[&str] = &[SCOPE_DIRECTORY_USER, SCOPE_USER_SECURITY];

/// Client id/secret downloaded from the Google developers console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!(
                "Please configure OAuth 2.0: download the client secrets for your \
                 project from https://console.developers.google.com to {}",
                path.display()
            )
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&contents)
            .with_context(|| format!("{} is not a valid client secrets file", path.display()))?;
        file.installed
            .or(file.web)
            .with_context(|| format!("No client section found in {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Interactive loopback flow: opens a browser and waits for the redirect.
pub fn authenticate(secrets: &ClientSecrets, scopes: &[&str]) -> Result<CachedCredential> {
    let pkce = PkceChallenge::generate();
    let state = oauth_state();

    let mut auth_url = Url::parse(AUTH_URL)?;
    auth_url
        .query_pairs_mut()
        .append_pair("client_id", &secrets.client_id)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", &state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent"); // Force consent to get refresh_token

    eprintln!("Opening browser for Google authentication...");
    eprintln!("If browser doesn't open, visit:\n{}", auth_url);

    if let Err(e) = open_browser(auth_url.as_str()) {
        debug!("Could not launch browser: {}", e);
    }

    let (tx, rx) = mpsc::channel();
    let server = Server::http(LISTEN_ADDR)
        .map_err(|e| anyhow::anyhow!("Failed to start local callback server: {}", e))?;

    eprintln!("Waiting for authorization...");

    for request in server.incoming_requests() {
        let url = format!("http://localhost{}", request.url());
        let parsed = Url::parse(&url)?;
        let params: HashMap<_, _> = parsed.query_pairs().collect();

        if let (Some(code), Some(recv_state)) = (params.get("code"), params.get("state")) {
            if recv_state.as_ref() != state {
                let _ = request.respond(Response::from_string("State mismatch! Please try again."));
                anyhow::bail!("OAuth state mismatch");
            }
            let _ = request.respond(Response::from_string(
                "Authentication successful! You can close this window and return to your terminal.",
            ));
            tx.send(code.to_string())?;
            break;
        } else if let Some(error) = params.get("error") {
            let desc = params
                .get("error_description")
                .map(|s| s.to_string())
                .unwrap_or_default();
            let _ = request.respond(Response::from_string(format!(
                "Authorization failed: {} - {}",
                error, desc
            )));
            return Err(ToolError::Auth(format!("{} - {}", error, desc)).into());
        }
    }

    let code = rx.recv()?;
    let tokens = post_token_request(&[
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
        ("code_verifier", pkce.verifier.as_str()),
        ("grant_type", "authorization_code"),
    ])
    .context("Token exchange failed")?;

    info!("Authorization complete.");
    Ok(CachedCredential {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.context(
            "No refresh token received. Revoke the app at \
             https://myaccount.google.com/permissions and re-authenticate.",
        )?,
        expires_at: now_secs() + tokens.expires_in,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    })
}

/// Exchanges a refresh token; returns `(access_token, expires_at)`.
pub fn refresh_token(secrets: &ClientSecrets, refresh_token: &str) -> Result<(String, u64)> {
    let response = post_token_request(&[
        ("client_id", secrets.client_id.as_str()),
        ("client_secret", secrets.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ])
    .context("The credentials have been revoked or expired, please run `diradmin login`")?;
    Ok((response.access_token, now_secs() + response.expires_in))
}

fn post_token_request(params: &[(&str, &str)]) -> Result<TokenResponse> {
    let client = reqwest::blocking::Client::new();
    let response: TokenResponse = client.post(TOKEN_URL).form(params).send()?.json()?;
    Ok(check_token_response(response)?)
}

/// The token endpoint reports refusals in the body, e.g. `invalid_grant`.
fn check_token_response(response: TokenResponse) -> Result<TokenResponse, ToolError> {
    match response.error {
        Some(error) => Err(ToolError::Auth(format!(
            "{} - {}",
            error,
            response.error_description.unwrap_or_default()
        ))),
        None => Ok(response),
    }
}

/// True if expired or expiring in the next 5 minutes.
pub fn needs_refresh(credential: &CachedCredential) -> bool {
    now_secs() + 300 >= credential.expires_at
}

fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    std::process::Command::new("open").arg(url).spawn()?;

    #[cfg(target_os = "linux")]
    std::process::Command::new("xdg-open").arg(url).spawn()?;

    #[cfg(target_os = "windows")]
    std::process::Command::new("cmd")
        .args(["/C", "start", url])
        .spawn()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_installed_client_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secrets.json");
        fs::write(
            &path,
            r#"{"installed": {"client_id": "123.apps.googleusercontent.com",
                "client_secret": "s3cret", "redirect_uris": ["http://localhost"]}}"#,
        )
        .unwrap();
        let secrets = ClientSecrets::load(&path).unwrap();
        assert_eq!(secrets.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret, "s3cret");
    }

    #[test]
    fn missing_client_secrets_explains_setup() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientSecrets::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{err:#}").contains("configure OAuth 2.0"));
    }

    #[test]
    fn refresh_window_is_five_minutes() {
        let mut cred = CachedCredential {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: now_secs() + 3600,
            scopes: vec![],
        };
        assert!(!needs_refresh(&cred));
        cred.expires_at = now_secs() + 120;
        assert!(needs_refresh(&cred));
    }

    #[test]
    fn token_endpoint_refusal_is_an_auth_error() {
        let refused: TokenResponse = serde_json::from_str(
            r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#,
        )
        .unwrap();
        let err = check_token_response(refused).unwrap_err();
        assert!(matches!(err, ToolError::Auth(_)));
        assert_eq!(
            err.to_string(),
            "Authorization error: invalid_grant - Token has been expired or revoked."
        );

        let granted: TokenResponse =
            serde_json::from_str(r#"{"access_token": "ya29.a0", "expires_in": 3599}"#).unwrap();
        let granted = check_token_response(granted).unwrap();
        assert_eq!(granted.access_token, "ya29.a0");
        assert_eq!(granted.expires_in, 3599);
    }
}

use tracing::debug;

use super::backoff::{run_with_backoff, BackoffError, RetryPolicy};
use super::client::RemoteDirectoryClient;
use super::errors::{is_no_tokens_for_client, parse_http_error};
use super::models::TokenRecord;
use crate::error::{ToolError, ToolResult};
use crate::tokens::lookup_scope;

/// Result of asking the server to revoke one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// The user held no token for that client.
    NoToken,
}

/// Tokens endpoints wrapped with backoff and friendlier errors.
pub struct TokensApi<'c, C: ?Sized> {
    client: &'c C,
    retry: RetryPolicy,
}

impl<'c, C: RemoteDirectoryClient + ?Sized> TokensApi<'c, C> {
    pub fn new(client: &'c C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn request_error(&self, err: BackoffError, operation: String) -> ToolError {
        match err {
            BackoffError::Failed(err) => ToolError::TokenRequest(format!(
                "{}\nPlease check your domain spelling.",
                parse_http_error(&err)
            )),
            BackoffError::Exhausted { attempts, last } => ToolError::RetriesExhausted {
                operation,
                attempts,
                last: last.to_string(),
            },
        }
    }

    /// Tokens the user has issued, sorted by client id.
    pub fn list_tokens_for_user(&self, user_key: &str) -> ToolResult<Vec<TokenRecord>> {
        let operation = format!("listing tokens for {}", user_key);
        match run_with_backoff(self.retry, &operation, || self.client.list_tokens(user_key)) {
            Ok(list) => {
                let mut tokens = list.items;
                tokens.sort_by(|a, b| a.client_id.cmp(&b.client_id));
                Ok(tokens)
            }
            Err(BackoffError::Failed(err)) if err.is_not_found() => Err(ToolError::TokenRequest(
                "ERROR: Unexpected response: no document returned.".to_string(),
            )),
            Err(e) => Err(self.request_error(e, operation)),
        }
    }

    /// `None` when the user holds no token for `client_id`.
    pub fn get_token(&self, user_key: &str, client_id: &str) -> ToolResult<Option<TokenRecord>> {
        let operation = format!("getting {} token for {}", client_id, user_key);
        match run_with_backoff(self.retry, &operation, || {
            self.client.get_token(user_key, client_id)
        }) {
            Ok(token) => Ok(Some(token)),
            Err(BackoffError::Failed(err)) if err.is_not_found() || is_no_tokens_for_client(&err) => {
                Ok(None)
            }
            Err(e) => Err(self.request_error(e, operation)),
        }
    }

    /// Revokes the token `user_key` issued to `client_id`.
    pub fn delete_token(&self, user_key: &str, client_id: &str) -> ToolResult<RevokeOutcome> {
        let operation = format!("revoking {} token for {}", client_id, user_key);
        match run_with_backoff(self.retry, &operation, || {
            self.client.delete_token(user_key, client_id)
        }) {
            Ok(()) => Ok(RevokeOutcome::Revoked),
            Err(BackoffError::Failed(err)) if err.is_not_found() => {
                debug!("No {} token to revoke for {}.", client_id, user_key);
                Ok(RevokeOutcome::NoToken)
            }
            Err(e) => Err(self.request_error(e, operation)),
        }
    }
}

/// Header or token line: client id and display text in 40-wide columns.
/// Long client ids wrap onto a second, indented line.
pub fn format_token_line(client_id: &str, display_text: &str) -> String {
    const COL_WIDTH: usize = 40;
    if display_text.is_empty() {
        return client_id.to_string();
    }
    if client_id.chars().count() > COL_WIDTH {
        let split = client_id
            .char_indices()
            .nth(COL_WIDTH)
            .map(|(i, _)| i)
            .unwrap_or(client_id.len());
        format!(
            "{:<40} {}\n  {}",
            &client_id[..split],
            display_text,
            &client_id[split..]
        )
    } else {
        format!("{:<40} {}", client_id, display_text)
    }
}

pub fn token_header_line() -> String {
    format_token_line("Client ID", "Display Text")
}

/// The token line, followed by one indented line per scope when `long_list`.
pub fn format_token(token: &TokenRecord, long_list: bool) -> Vec<String> {
    let mut lines = vec![format_token_line(&token.client_id, &token.display_text)];
    if long_list {
        lines.extend(token.scopes.iter().map(|scope| format!("    {}", lookup_scope(scope))));
    }
    lines
}

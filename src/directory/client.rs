use thiserror::Error;

use super::models::{DirectoryUser, NewUser, TokenList, TokenRecord, UserPage};

/// Failure talking to the remote directory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{}", status_message(.status, .url, .body))]
    Status { status: u16, url: String, body: String },
    /// No usable answer at all (connect, timeout, bad body).
    #[error("ERROR: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

fn status_message(status: &u16, url: &str, body: &str) -> String {
    super::errors::describe_status(*status, url, body)
}

/// One `users.list` request.
#[derive(Debug, Clone, Copy)]
pub struct UserListQuery<'a> {
    pub domain: &'a str,
    pub max_results: u32,
    pub page_token: Option<&'a str>,
    pub query: Option<&'a str>,
}

/// The subset of the Admin SDK directory API these tools call.
///
/// One implementation talks HTTP; tests substitute an in-memory directory.
pub trait RemoteDirectoryClient {
    fn list_users(&self, query: &UserListQuery<'_>) -> Result<UserPage, ApiError>;

    fn get_user(&self, user_key: &str) -> Result<DirectoryUser, ApiError>;

    fn insert_user(&self, user: &NewUser) -> Result<DirectoryUser, ApiError>;

    fn delete_user(&self, user_key: &str) -> Result<(), ApiError>;

    fn list_tokens(&self, user_key: &str) -> Result<TokenList, ApiError>;

    fn get_token(&self, user_key: &str, client_id: &str) -> Result<TokenRecord, ApiError>;

    fn delete_token(&self, user_key: &str, client_id: &str) -> Result<(), ApiError>;
}

//! Admin SDK directory access: users and OAuth tokens.

pub mod backoff;
pub mod client;
pub mod errors;
#[cfg(test)]
pub mod fake;
pub mod http;
pub mod models;
pub mod tokens;
pub mod users;

pub use backoff::RetryPolicy;
pub use client::RemoteDirectoryClient;
pub use http::HttpDirectoryClient;
pub use models::{DirectoryUser, UserRecord};
pub use tokens::{RevokeOutcome, TokensApi};
pub use users::UsersApi;

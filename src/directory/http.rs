use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;
use urlencoding::encode;

use super::client::{ApiError, RemoteDirectoryClient, UserListQuery};
use super::models::{DirectoryUser, NewUser, TokenList, TokenRecord, UserPage};
use crate::error::{ToolError, ToolResult};

/// Directory API over HTTPS with a bearer token.
pub struct HttpDirectoryClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> ToolResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("diradmin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Config(format!("Unable to build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn user_url(&self, user_key: &str) -> String {
        format!("{}/users/{}", self.base_url, encode(user_key))
    }

    fn token_url(&self, user_key: &str, client_id: &str) -> String {
        format!("{}/tokens/{}", self.user_url(user_key), encode(client_id))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.http.request(method, url).bearer_auth(&self.access_token)
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<String, ApiError> {
        let response = request
            .send()
            .map_err(|e| ApiError::Transport(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ApiError::Transport(format!("unreadable response from {}: {}", url, e)))?;
        debug!("status={} content={}", status.as_u16(), body);
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(body)
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T, ApiError> {
        let body = self.send(request, url)?;
        serde_json::from_str(&body).map_err(|e| {
            ApiError::Transport(format!("response is not valid json: {}\n{}.", e, body))
        })
    }
}

impl RemoteDirectoryClient for HttpDirectoryClient {
    fn list_users(&self, query: &UserListQuery<'_>) -> Result<UserPage, ApiError> {
        let url = format!("{}/users", self.base_url);
        let mut params = vec![
            ("domain", query.domain.to_string()),
            ("maxResults", query.max_results.to_string()),
        ];
        if let Some(token) = query.page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(filter) = query.query {
            params.push(("query", filter.to_string()));
        }
        self.send_json(self.request(Method::GET, &url).query(&params), &url)
    }

    fn get_user(&self, user_key: &str) -> Result<DirectoryUser, ApiError> {
        let url = self.user_url(user_key);
        self.send_json(self.request(Method::GET, &url), &url)
    }

    fn insert_user(&self, user: &NewUser) -> Result<DirectoryUser, ApiError> {
        let url = format!("{}/users", self.base_url);
        self.send_json(self.request(Method::POST, &url).json(user), &url)
    }

    fn delete_user(&self, user_key: &str) -> Result<(), ApiError> {
        let url = self.user_url(user_key);
        self.send(self.request(Method::DELETE, &url), &url).map(|_| ())
    }

    fn list_tokens(&self, user_key: &str) -> Result<TokenList, ApiError> {
        let url = format!("{}/tokens", self.user_url(user_key));
        self.send_json(self.request(Method::GET, &url), &url)
    }

    fn get_token(&self, user_key: &str, client_id: &str) -> Result<TokenRecord, ApiError> {
        let url = self.token_url(user_key, client_id);
        self.send_json(self.request(Method::GET, &url), &url)
    }

    fn delete_token(&self, user_key: &str, client_id: &str) -> Result<(), ApiError> {
        let url = self.token_url(user_key, client_id);
        self.send(self.request(Method::DELETE, &url), &url).map(|_| ())
    }
}

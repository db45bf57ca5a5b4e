use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://admin.googleapis.com/admin/directory/v1";

/// Optional `config.toml` in the base directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    /// Relative paths resolve against the base directory.
    pub client_secrets_file: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub page_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            client_secrets_file: PathBuf::from("client_secrets.json"),
            work_dir: None,
            // Default of 5s seems too short for the directory API.
            request_timeout_secs: 10,
            max_retries: 8,
            page_size: 500,
        }
    }
}

/// Contents of `default_domain.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    pub apps_domain: String,
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// Cached OAuth credential for one domain. Stored with 0600 perms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

pub mod google_oauth;
pub mod pkce;

#[cfg(unix)]
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::storage::{CachedCredential, WorkingStore};
use google_oauth::{ClientSecrets, ADMIN_SCOPES};

// Domain specific, so it lives in the domain working directory.
const CURRENT_ACCESS_FILE_NAME: &str = "current_access.json";

/// Returns a usable access token for the store's domain, refreshing or
/// running the browser flow as needed.
pub fn access_token(store: &WorkingStore, secrets_path: &Path, force_login: bool) -> Result<String> {
    let secrets = ClientSecrets::load(secrets_path)?;

    let cached = if force_login || !store.exists(CURRENT_ACCESS_FILE_NAME) {
        None
    } else {
        Some(
            store
                .read_json::<CachedCredential>(CURRENT_ACCESS_FILE_NAME)
                .context("Unable to read cached credentials")?,
        )
    };

    let credential = match cached {
        Some(cred) if !google_oauth::needs_refresh(&cred) => return Ok(cred.access_token),
        Some(mut cred) => {
            info!("Access token for {} expired -- refreshing...", store.domain());
            let (access_token, expires_at) =
                google_oauth::refresh_token(&secrets, &cred.refresh_token)?;
            cred.access_token = access_token;
            cred.expires_at = expires_at;
            cred
        }
        None => google_oauth::authenticate(&secrets, ADMIN_SCOPES)?,
    };

    save_credential(store, &credential)?;
    Ok(credential.access_token)
}

fn save_credential(store: &WorkingStore, credential: &CachedCredential) -> Result<()> {
    let path = store.write_json(CURRENT_ACCESS_FILE_NAME, credential, true)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

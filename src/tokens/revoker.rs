use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, info};

use super::stats::{unpack_stat_key, users_for_client, TokenStatsMap};
use crate::directory::{RemoteDirectoryClient, RevokeOutcome, TokensApi, UsersApi};
use crate::error::{ToolError, ToolResult};
use crate::iterator::{IteratorOptions, UserIterator};
use crate::logging::Timer;
use crate::storage::WorkingStore;

/// Tags the progress file of a domain-wide revocation run.
pub const REVOCATION_PREFIX: &str = "revocation";

pub const CLIENT_BLACKLIST_FILE_NAME: &str = "client_blacklist.txt";
pub const SCOPE_BLACKLIST_FILE_NAME: &str = "scope_blacklist.txt";

fn normalize_scope(scope: &str) -> &str {
    scope.trim_end_matches('/')
}

/// Per-pair results of a revocation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationSummary {
    /// `(user, client_id)` in the order they were attempted.
    pub revoked: Vec<(String, String)>,
    pub no_token: Vec<(String, String)>,
    pub failed: Vec<(String, String, String)>,
}

impl RevocationSummary {
    pub fn attempted(&self) -> usize {
        self.revoked.len() + self.no_token.len() + self.failed.len()
    }
}

/// Revokes tokens that match a client id or scope blacklist.
pub struct TokenRevoker<'c, C: ?Sized> {
    tokens_api: TokensApi<'c, C>,
    client_blacklist: BTreeSet<String>,
    scope_blacklist: BTreeSet<String>,
    hide_timing: bool,
}

impl<'c, C: RemoteDirectoryClient + ?Sized> TokenRevoker<'c, C> {
    pub fn new(tokens_api: TokensApi<'c, C>, hide_timing: bool) -> Self {
        Self {
            tokens_api,
            client_blacklist: BTreeSet::new(),
            scope_blacklist: BTreeSet::new(),
            hide_timing,
        }
    }

    /// Client ids, one per line, matched exactly.
    pub fn set_client_blacklist<I: IntoIterator<Item = String>>(&mut self, clients: I) {
        self.client_blacklist = clients.into_iter().collect();
    }

    /// Scope urls, one per line; trailing slashes are not significant.
    pub fn set_scope_blacklist<I: IntoIterator<Item = String>>(&mut self, scopes: I) {
        self.scope_blacklist = scopes
            .into_iter()
            .map(|s| normalize_scope(&s).to_string())
            .collect();
    }

    pub fn load_client_blacklist(&mut self, store: &WorkingStore, file_name: &str) -> ToolResult<()> {
        self.set_client_blacklist(store.read_text_set(file_name)?);
        Ok(())
    }

    pub fn load_scope_blacklist(&mut self, store: &WorkingStore, file_name: &str) -> ToolResult<()> {
        self.set_scope_blacklist(store.read_text_set(file_name)?);
        Ok(())
    }

    pub fn ensure_blacklists_present(&self) -> ToolResult<()> {
        if self.client_blacklist.is_empty() && self.scope_blacklist.is_empty() {
            return Err(ToolError::Config(
                "All black lists empty. There is nothing to revoke.".to_string(),
            ));
        }
        Ok(())
    }

    fn is_revoked_by_client_blacklist(&self, _scope: &str, client_id: &str) -> bool {
        self.client_blacklist.contains(client_id)
    }

    fn is_revoked_by_scope_blacklist(&self, scope: &str, _client_id: &str) -> bool {
        !scope.is_empty() && self.scope_blacklist.contains(normalize_scope(scope))
    }

    /// Client id to the users whose tokens for it must go.
    pub fn identify_tokens_to_revoke(&self, stats: &TokenStatsMap) -> BTreeMap<String, BTreeSet<String>> {
        let _timer = Timer::start("Identify tokens", self.hide_timing);
        let mut to_revoke: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (stat_key, users) in stats {
            let Some((scope, client_id)) = unpack_stat_key(stat_key) else {
                continue;
            };
            if self.is_revoked_by_client_blacklist(scope, client_id)
                || self.is_revoked_by_scope_blacklist(scope, client_id)
            {
                to_revoke
                    .entry(client_id.to_string())
                    .or_default()
                    .extend(users.iter().cloned());
            }
        }
        to_revoke
    }

    /// Revokes every matching `(user, client)` pair, ordered by client then
    /// user. A failed pair is logged and skipped.
    pub fn revoke_unapproved_tokens(&self, stats: &TokenStatsMap) -> ToolResult<RevocationSummary> {
        self.ensure_blacklists_present()?;
        let to_revoke = self.identify_tokens_to_revoke(stats);
        let mut summary = RevocationSummary::default();
        if to_revoke.is_empty() {
            info!("No tokens found to revoke");
            return Ok(summary);
        }

        info!("Tokens found to revoke.  Revoking now...");
        let _timer = Timer::start("All revoke calls", self.hide_timing);
        for (client_id, users) in &to_revoke {
            for user in users {
                info!("Revoking: {}, {}.", user, client_id);
                match self.tokens_api.delete_token(user, client_id) {
                    Ok(RevokeOutcome::Revoked) => {
                        summary.revoked.push((user.clone(), client_id.clone()))
                    }
                    Ok(RevokeOutcome::NoToken) => {
                        summary.no_token.push((user.clone(), client_id.clone()))
                    }
                    Err(e) => {
                        error!(
                            "Unable to revoke token for user {} and client_id {}. {}",
                            user, client_id, e
                        );
                        summary.failed.push((user.clone(), client_id.clone(), e.to_string()));
                    }
                }
            }
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainRevocationOptions {
    pub resume: bool,
    pub first_n: usize,
    pub page_size: u32,
    /// Only users recorded in `tokens_issued.json` for the client are tried.
    pub use_local_token_stats: Option<TokenStatsMap>,
    pub show_progress: bool,
}

/// Revokes the `client_id` token of every user in the domain via the
/// resumable iterator. Stops at the first failure so `--resume` can retry.
pub fn revoke_client_for_domain<C: RemoteDirectoryClient + ?Sized>(
    store: &WorkingStore,
    users_api: &UsersApi<'_, C>,
    tokens_api: &TokensApi<'_, C>,
    client_id: &str,
    options: &DomainRevocationOptions,
) -> ToolResult<RevocationSummary> {
    let candidates: Option<BTreeSet<String>> = options
        .use_local_token_stats
        .as_ref()
        .map(|stats| users_for_client(stats, client_id).into_iter().collect());

    let iterator = UserIterator::start(
        store,
        users_api,
        &IteratorOptions {
            prefix: REVOCATION_PREFIX,
            resume: options.resume,
            first_n: options.first_n,
            page_size: options.page_size,
            show_progress: options.show_progress,
        },
    )?;
    info!(
        "Scanning domain users for {} ({} of {} already done)...",
        REVOCATION_PREFIX,
        iterator.position(),
        iterator.total()
    );

    let mut summary = RevocationSummary::default();
    for user in iterator {
        let user = user?;
        if candidates.as_ref().is_some_and(|c| !c.contains(&user.email)) {
            continue;
        }
        let outcome = tokens_api.delete_token(&user.email, client_id).map_err(|e| {
            error!(
                "Unable to revoke token for user {} and client_id {}.",
                user.email, client_id
            );
            e
        })?;
        match outcome {
            RevokeOutcome::Revoked => {
                if candidates.is_some() {
                    info!(
                        "Successfully revoked token for user {} for client_id {}.",
                        user.email, client_id
                    );
                }
                summary.revoked.push((user.email, client_id.to_string()));
            }
            RevokeOutcome::NoToken => summary.no_token.push((user.email, client_id.to_string())),
        }
    }
    Ok(summary)
}

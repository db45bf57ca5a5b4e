use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::warn;

use crate::error::{ToolError, ToolResult};
use crate::report::Counter;
use crate::storage::WorkingStore;

pub const TOKENS_ISSUED_FILE_NAME: &str = "tokens_issued.json";

/// Contents of `tokens_issued.json`: packed `"scope client_id"` key to the
/// emails of users holding a token with that scope for that client.
pub type TokenStatsMap = BTreeMap<String, Vec<String>>;

/// Scopes never contain whitespace; client ids may, so the scope goes first.
pub fn pack_stat_key(client_id: &str, scope: &str) -> String {
    format!("{} {}", scope, client_id)
}

/// Splits a key from [`pack_stat_key`] into `(scope, client_id)`.
pub fn unpack_stat_key(stat_key: &str) -> Option<(&str, &str)> {
    let (scope, client_id) = stat_key.trim_start().split_once(char::is_whitespace)?;
    Some((scope, client_id.trim_start()))
}

/// Secondaries (scopes or clients) granted by exactly the same set of users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    pub secondaries: BTreeSet<String>,
    pub users: BTreeSet<String>,
}

/// Token stats keyed on a primary value, either client id or scope.
#[derive(Debug, Clone, Default)]
pub struct TokenStats {
    buckets: BTreeMap<String, Vec<TokenBucket>>,
}

impl TokenStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges into the bucket with an identical user set, else starts one.
    pub fn add_token<I, S>(&mut self, primary: &str, secondary: &str, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: BTreeSet<String> = users.into_iter().map(Into::into).collect();
        let buckets = self.buckets.entry(primary.to_string()).or_default();
        match buckets.iter_mut().find(|b| b.users == users) {
            Some(bucket) => {
                bucket.secondaries.insert(secondary.to_string());
            }
            None => buckets.push(TokenBucket {
                secondaries: BTreeSet::from([secondary.to_string()]),
                users,
            }),
        }
    }

    /// Distinct users per primary key.
    pub fn calculate_rankings(&self) -> Counter {
        let mut counter = Counter::new();
        for (primary, buckets) in &self.buckets {
            let users: BTreeSet<&String> = buckets.iter().flat_map(|b| &b.users).collect();
            counter.increment(primary, users.len());
        }
        counter
    }

    /// Ranked `(primary, user_count)`, highest first.
    pub fn rank(&self, top_n: Option<usize>) -> Vec<(String, usize)> {
        self.calculate_rankings().most_common(top_n)
    }

    /// Buckets for `primary`, largest user set first.
    pub fn drilldown(&self, primary: &str) -> Vec<TokenBucket> {
        let mut buckets = self.buckets.get(primary).cloned().unwrap_or_default();
        buckets.sort_by(|a, b| b.users.len().cmp(&a.users.len()));
        buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Builds `(by_client, by_scope)` views of the raw stats.
pub fn summarize_token_stats(stats: &TokenStatsMap) -> (TokenStats, TokenStats) {
    let mut by_client = TokenStats::new();
    let mut by_scope = TokenStats::new();
    for (stat_key, users) in stats {
        let Some((scope, client_id)) = unpack_stat_key(stat_key) else {
            warn!("Skipping malformed token stat key: {}", stat_key);
            continue;
        };
        by_client.add_token(client_id, scope, users.iter().cloned());
        by_scope.add_token(scope, client_id, users.iter().cloned());
    }
    (by_client, by_scope)
}

/// Sorted users holding any token for `client_id`.
pub fn users_for_client(stats: &TokenStatsMap, target_client_id: &str) -> Vec<String> {
    let users: BTreeSet<&String> = stats
        .iter()
        .filter(|(key, _)| unpack_stat_key(key).is_some_and(|(_, client)| client == target_client_id))
        .flat_map(|(_, users)| users)
        .collect();
    users.into_iter().cloned().collect()
}

pub fn read_token_stats(store: &WorkingStore) -> ToolResult<TokenStatsMap> {
    if !store.exists(TOKENS_ISSUED_FILE_NAME) {
        return Err(ToolError::MissingData(
            "No token data. You must run gather-domain-token-stats first.".to_string(),
        ));
    }
    store.read_json(TOKENS_ISSUED_FILE_NAME)
}

pub fn write_token_stats(
    store: &WorkingStore,
    stats: &TokenStatsMap,
    overwrite_ok: bool,
) -> ToolResult<PathBuf> {
    if store.exists(TOKENS_ISSUED_FILE_NAME) && !overwrite_ok {
        return Err(ToolError::FileConflict {
            path: store.path(TOKENS_ISSUED_FILE_NAME),
            reason: "Use --force to overwrite or --resume to continue an interrupted run.".into(),
        });
    }
    store.write_json(TOKENS_ISSUED_FILE_NAME, stats, overwrite_ok)
}

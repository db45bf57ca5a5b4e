use std::path::PathBuf;

use tracing::info;

use super::stats::{
    pack_stat_key, read_token_stats, write_token_stats, TokenStatsMap, TOKENS_ISSUED_FILE_NAME,
};
use crate::directory::{RemoteDirectoryClient, TokensApi, UsersApi};
use crate::error::ToolResult;
use crate::iterator::{IteratorOptions, UserIterator};
use crate::storage::WorkingStore;

/// Tags the progress file of a gather run.
pub const COLLECTION_PREFIX: &str = "collection";

#[derive(Debug, Clone, Default)]
pub struct GatherOptions {
    pub resume: bool,
    pub first_n: usize,
    pub force: bool,
    pub page_size: u32,
    pub show_progress: bool,
}

#[derive(Debug, Clone)]
pub struct GatherSummary {
    pub path: PathBuf,
    pub users_scanned: usize,
    pub stat_keys: usize,
}

/// Lists every user's tokens into `tokens_issued.json`, flushing the file at
/// each iterator checkpoint so `--resume` picks up consistent data.
pub fn gather_token_stats<C: RemoteDirectoryClient + ?Sized>(
    store: &WorkingStore,
    users_api: &UsersApi<'_, C>,
    tokens_api: &TokensApi<'_, C>,
    options: &GatherOptions,
) -> ToolResult<GatherSummary> {
    let mut stats = if options.resume {
        read_token_stats(store)?
    } else {
        // Claim the output file up front so a conflict fails before any request.
        let empty = TokenStatsMap::new();
        write_token_stats(store, &empty, options.force)?;
        empty
    };

    let iterator = UserIterator::start(
        store,
        users_api,
        &IteratorOptions {
            prefix: COLLECTION_PREFIX,
            resume: options.resume,
            first_n: options.first_n,
            page_size: options.page_size,
            show_progress: options.show_progress,
        },
    )?;
    info!(
        "Scanning domain users for {} ({} of {} already done)",
        COLLECTION_PREFIX,
        iterator.position(),
        iterator.total()
    );

    let mut users_scanned = 0;
    for user in iterator {
        let user = user?;
        let tokens = tokens_api.list_tokens_for_user(&user.id)?;
        for token in &tokens {
            for scope in &token.scopes {
                stats
                    .entry(pack_stat_key(&token.client_id, scope))
                    .or_default()
                    .push(user.email.clone());
            }
        }
        users_scanned += 1;
        if user.checkpoint {
            write_token_stats(store, &stats, true)?;
        }
    }

    Ok(GatherSummary {
        path: store.path(TOKENS_ISSUED_FILE_NAME),
        users_scanned,
        stat_keys: stats.len(),
    })
}

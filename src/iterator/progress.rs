use serde::{Deserialize, Serialize};

use crate::error::{ToolError, ToolResult};
use crate::storage::WorkingStore;

/// Progress is saved every this many users (and after the last one).
pub const CHECKPOINT_BATCH: usize = 10;

/// `[prev_email, last_email, count_done]` as stored in `<prefix>_progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress(pub Option<String>, pub String, pub usize);

impl Progress {
    pub fn prev_email(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn last_email(&self) -> &str {
        &self.1
    }

    pub fn count_done(&self) -> usize {
        self.2
    }
}

pub fn progress_file_name(prefix: &str) -> String {
    format!("{}_progress", prefix)
}

pub fn read_progress(store: &WorkingStore, prefix: &str) -> ToolResult<Option<Progress>> {
    let name = progress_file_name(prefix);
    if !store.exists(&name) {
        return Ok(None);
    }
    store.read_json(&name).map(Some)
}

pub fn write_progress(store: &WorkingStore, prefix: &str, progress: &Progress) -> ToolResult<()> {
    store.write_json(&progress_file_name(prefix), progress, true)?;
    Ok(())
}

pub fn remove_progress(store: &WorkingStore, prefix: &str) -> ToolResult<()> {
    store.remove(&progress_file_name(prefix))
}

/// Checks a saved progress record before any user list is touched.
pub fn validate_progress(prefix: &str, progress: Option<Progress>) -> ToolResult<Progress> {
    let progress = progress.ok_or_else(|| {
        ToolError::resume(
            prefix,
            "No progress file found. Either progress was not saved or the last run completed successfully.",
        )
    })?;
    if progress.prev_email().unwrap_or_default().is_empty() || progress.last_email().is_empty() {
        return Err(ToolError::resume(
            prefix,
            "Did not find 2 previous users recorded. Either progress was not saved or the last run completed successfully.",
        ));
    }
    if progress.count_done() < CHECKPOINT_BATCH {
        return Err(ToolError::resume(
            prefix,
            format!("Did not make enough progress last {} run to resume.", prefix),
        ));
    }
    if progress.count_done() % CHECKPOINT_BATCH != 0 {
        return Err(ToolError::resume(
            prefix,
            format!(
                "Progress ({} users) does not fall on a checkpoint of {}.",
                progress.count_done(),
                CHECKPOINT_BATCH
            ),
        ));
    }
    Ok(progress)
}

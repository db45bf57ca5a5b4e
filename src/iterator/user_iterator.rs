use std::io::Write;

use tracing::info;

use super::progress::{
    read_progress, remove_progress, validate_progress, write_progress, Progress, CHECKPOINT_BATCH,
};
use crate::directory::{RemoteDirectoryClient, UserRecord, UsersApi};
use crate::error::{ToolError, ToolResult};
use crate::storage::{WorkingStore, USERS_FILE_NAME};
use crate::validators::email_parts;

#[derive(Debug, Clone)]
pub struct IteratorOptions<'a> {
    /// Names the progress file, e.g. `collection` or `revocation`.
    pub prefix: &'a str,
    pub resume: bool,
    /// 0 means every user.
    pub first_n: usize,
    pub page_size: u32,
    /// Writes a transient per-user status line to stderr.
    pub show_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratedUser {
    pub email: String,
    pub id: String,
    /// Set every `CHECKPOINT_BATCH` users and on the last user; callers
    /// flush their own state when they see it.
    pub checkpoint: bool,
}

/// Loads the cached `users.json`, or fetches and caches the domain's users
/// sorted by email.
pub fn load_user_list<C: RemoteDirectoryClient + ?Sized>(
    store: &WorkingStore,
    users_api: &UsersApi<'_, C>,
    page_size: u32,
) -> ToolResult<Vec<UserRecord>> {
    let mut users: Vec<UserRecord> = if store.exists(USERS_FILE_NAME) {
        info!(
            "Using existing users list last modified on {}.",
            store.file_time(USERS_FILE_NAME)?
        );
        let users: Vec<UserRecord> = store.read_json(USERS_FILE_NAME)?;
        if let Some(first) = users.first() {
            let (_, domain) = email_parts(first.email())?;
            if domain != store.domain() {
                return Err(ToolError::Config(format!(
                    "You have requested to use domain {}, but your existing users file \n({}) \
                     was generated using\n{}. Please remove the file or specify {} as your \
                     apps domain.",
                    store.domain(),
                    store.path(USERS_FILE_NAME).display(),
                    domain,
                    domain
                )));
            }
        }
        users
    } else {
        info!("Retrieving list of users...");
        let mut users = users_api.get_domain_users(store.domain(), None, page_size, None)?;
        users.sort_by(|a, b| a.email().cmp(b.email()));
        store.write_json(USERS_FILE_NAME, &users, false)?;
        users
    };
    users.sort_by(|a, b| a.email().cmp(b.email()));
    Ok(users)
}

/// Matches saved progress against the user list; returns where to restart.
pub fn check_resumable(users: &[UserRecord], prefix: &str, progress: &Progress) -> ToolResult<usize> {
    let count = progress.count_done();
    if count > users.len() {
        return Err(ToolError::resume(
            prefix,
            "Seems like you already finished or the users.json file changed.",
        ));
    }
    let active = users[count - 1].email();
    if progress.last_email() != active {
        return Err(ToolError::resume(
            prefix,
            format!("User mismatch: {} != {}.", progress.last_email(), active),
        ));
    }
    let active_prev = users[count - 2].email();
    if progress.prev_email() != Some(active_prev) {
        return Err(ToolError::resume(
            prefix,
            format!(
                "Prev user mismatch: {} != {}.",
                progress.prev_email().unwrap_or_default(),
                active_prev
            ),
        ));
    }
    Ok(count)
}

/// Walks the domain's users in email order, saving progress so an
/// interrupted run can pick up at the last checkpoint.
///
/// Progress for a checkpoint user is written when the caller asks for the
/// next user, i.e. once that user has been fully handled. Running off the
/// end removes the progress file; dropping the iterator early leaves it.
///
/// The progress file never holds a count that is not a checkpoint, so a
/// resume restarts right after the last multiple of [`CHECKPOINT_BATCH`].
pub struct UserIterator<'s> {
    store: &'s WorkingStore,
    prefix: String,
    users: Vec<UserRecord>,
    next_index: usize,
    end: usize,
    prev_email: Option<String>,
    pending: Option<Progress>,
    finished: bool,
    show_progress: bool,
}

impl<'s> UserIterator<'s> {
    pub fn start<C: RemoteDirectoryClient + ?Sized>(
        store: &'s WorkingStore,
        users_api: &UsersApi<'_, C>,
        options: &IteratorOptions<'_>,
    ) -> ToolResult<Self> {
        let prefix = options.prefix;

        // Everything that can reject a resume is checked before any request.
        let saved = if options.resume {
            if options.first_n > 0 {
                return Err(ToolError::resume(
                    prefix,
                    "Cannot supply --resume and --first-n at the same time.",
                ));
            }
            let saved = read_progress(store, prefix).map_err(|e| ToolError::resume(prefix, e.to_string()))?;
            let saved = validate_progress(prefix, saved)?;
            if !store.exists(USERS_FILE_NAME) {
                return Err(ToolError::resume(
                    prefix,
                    format!("The cached users list ({}) is missing.", USERS_FILE_NAME),
                ));
            }
            Some(saved)
        } else {
            None
        };

        let users = load_user_list(store, users_api, options.page_size)?;
        let total = users.len();
        info!("Found {} users to check.", total);

        let (next_index, end, prev_email) = match saved {
            Some(progress) => {
                let start = check_resumable(&users, prefix, &progress)?;
                match users.get(start) {
                    Some(next) => info!("Resuming at user #{}/{} ({})...", start, total, next.email()),
                    None => info!("All {} users were already handled.", total),
                }
                (start, total, Some(users[start - 1].email().to_string()))
            }
            None if options.first_n > 0 => (0, options.first_n.min(total), None),
            None => (0, total, None),
        };

        Ok(Self {
            store,
            prefix: prefix.to_string(),
            users,
            next_index,
            end,
            prev_email,
            pending: None,
            finished: false,
            show_progress: options.show_progress,
        })
    }

    /// Users this run will visit in total, counting any already done.
    pub fn total(&self) -> usize {
        self.end
    }

    /// Number of users handed out so far, counting any already done.
    pub fn position(&self) -> usize {
        self.next_index
    }

    fn flush_pending(&mut self) -> ToolResult<()> {
        if let Some(progress) = self.pending.take() {
            write_progress(self.store, &self.prefix, &progress)?;
            if self.show_progress {
                eprintln!("{:80}\rChecked {} of {} users.", "", progress.count_done(), self.end);
            }
        }
        Ok(())
    }
}

impl Iterator for UserIterator<'_> {
    type Item = ToolResult<IteratedUser>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(e) = self.flush_pending() {
            self.finished = true;
            return Some(Err(e));
        }
        if self.next_index >= self.end {
            self.finished = true;
            return remove_progress(self.store, &self.prefix).err().map(Err);
        }

        let user = &self.users[self.next_index];
        self.next_index += 1;
        let done = self.next_index;
        let checkpoint = done % CHECKPOINT_BATCH == 0 || done == self.end;
        if checkpoint {
            self.pending = Some(Progress(self.prev_email.clone(), user.email().to_string(), done));
        }
        self.prev_email = Some(user.email().to_string());

        if self.show_progress {
            eprint!("{:80}\r{}\r", "", user.email());
            let _ = std::io::stderr().flush();
        }

        Some(Ok(IteratedUser {
            email: user.email().to_string(),
            id: user.id().to_string(),
            checkpoint,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeDirectory;
    use crate::directory::RetryPolicy;
    use crate::iterator::progress::progress_file_name;

    const DOMAIN: &str = "altostrat.com";

    fn setup(n: usize) -> (tempfile::TempDir, WorkingStore, FakeDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkingStore::at(dir.path().join(DOMAIN), DOMAIN).unwrap();
        (dir, store, FakeDirectory::with_users(DOMAIN, n))
    }

    fn options(resume: bool, first_n: usize) -> IteratorOptions<'static> {
        IteratorOptions {
            prefix: "collection",
            resume,
            first_n,
            page_size: 100,
            show_progress: false,
        }
    }

    #[test]
    fn fresh_run_visits_everyone_in_email_order() {
        let (_dir, store, fake) = setup(25);
        // Server order differs from email order.
        let mut shuffled = fake.get_all();
        shuffled.reverse();
        fake.set_users(shuffled);

        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let iter = UserIterator::start(&store, &api, &options(false, 0)).unwrap();
        let users: Vec<IteratedUser> = iter.map(Result::unwrap).collect();

        assert_eq!(users.len(), 25);
        let emails: Vec<_> = users.iter().map(|u| u.email.clone()).collect();
        let mut sorted = emails.clone();
        sorted.sort();
        assert_eq!(emails, sorted);

        let checkpoints: Vec<usize> = users
            .iter()
            .enumerate()
            .filter(|(_, u)| u.checkpoint)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(checkpoints, vec![10, 20, 25]);

        assert!(store.exists(USERS_FILE_NAME));
        assert!(!store.exists(&progress_file_name("collection")));
    }

    #[test]
    fn first_n_limits_the_walk() {
        let (_dir, store, fake) = setup(25);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let users: Vec<_> = UserIterator::start(&store, &api, &options(false, 5))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(users.len(), 5);
        assert!(users[4].checkpoint);
    }

    #[test]
    fn cached_list_is_reused() {
        let (_dir, store, fake) = setup(12);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        UserIterator::start(&store, &api, &options(false, 0)).unwrap().for_each(drop);
        let calls = fake.total_calls();
        UserIterator::start(&store, &api, &options(false, 0)).unwrap().for_each(drop);
        assert_eq!(fake.total_calls(), calls);
    }

    #[test]
    fn cached_list_from_another_domain_is_refused() {
        let (_dir, store, fake) = setup(3);
        let foreign = vec![UserRecord("a@example.com".into(), "1".into(), "A".into())];
        store.write_json(USERS_FILE_NAME, &foreign, false).unwrap();
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let err = UserIterator::start(&store, &api, &options(false, 0)).err().unwrap();
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn interrupted_run_resumes_after_last_checkpoint() {
        let (_dir, store, fake) = setup(35);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));

        let mut first_run = Vec::new();
        {
            let mut iter = UserIterator::start(&store, &api, &options(false, 0)).unwrap();
            // Handle 23 users, then stop as if killed.
            for _ in 0..23 {
                first_run.push(iter.next().unwrap().unwrap().email);
                if first_run.len() == 15 {
                    let mid = read_progress(&store, "collection").unwrap().unwrap();
                    assert_eq!(mid.count_done(), 10);
                }
            }
        }
        let saved = read_progress(&store, "collection").unwrap().unwrap();
        assert_eq!(saved.count_done(), 20);
        assert_eq!(saved.last_email(), fake.email(19));
        assert_eq!(saved.prev_email(), Some(fake.email(18).as_str()));

        let calls_before = fake.total_calls();
        let resumed: Vec<String> = UserIterator::start(&store, &api, &options(true, 0))
            .unwrap()
            .map(|u| u.unwrap().email)
            .collect();
        assert_eq!(fake.total_calls(), calls_before);

        let expected: Vec<String> = (20..35).map(|i| fake.email(i)).collect();
        assert_eq!(resumed, expected);
        assert!(read_progress(&store, "collection").unwrap().is_none());
    }

    #[test]
    fn resume_rejections_happen_before_any_request() {
        let (_dir, store, fake) = setup(30);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));

        // No progress file.
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(matches!(err, ToolError::Resume { .. }));

        // Resume with first_n.
        let err = UserIterator::start(&store, &api, &options(true, 5)).err().unwrap();
        assert!(matches!(err, ToolError::Resume { .. }));

        // Not on a checkpoint boundary.
        let odd = Progress(Some(fake.email(13)), fake.email(14), 15);
        write_progress(&store, "collection", &odd).unwrap();
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(matches!(err, ToolError::Resume { .. }));

        // Valid progress but no cached users list.
        let good = Progress(Some(fake.email(8)), fake.email(9), 10);
        write_progress(&store, "collection", &good).unwrap();
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(matches!(err, ToolError::Resume { .. }));

        assert_eq!(fake.total_calls(), 0);
    }

    #[test]
    fn resume_detects_changed_user_list() {
        let (_dir, store, fake) = setup(30);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        UserIterator::start(&store, &api, &options(false, 0)).unwrap().for_each(drop);

        let wrong = Progress(Some(fake.email(8)), "someone@altostrat.com".into(), 10);
        write_progress(&store, "collection", &wrong).unwrap();
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(err.to_string().contains("User mismatch"));

        let wrong_prev = Progress(Some(fake.email(2)), fake.email(9), 10);
        write_progress(&store, "collection", &wrong_prev).unwrap();
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(err.to_string().contains("Prev user mismatch"));

        let too_far = Progress(Some(fake.email(38)), fake.email(39), 40);
        write_progress(&store, "collection", &too_far).unwrap();
        let err = UserIterator::start(&store, &api, &options(true, 0)).err().unwrap();
        assert!(err.to_string().contains("already finished"));
    }
}

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use super::backoff::{run_with_backoff, BackoffError, RetryPolicy};
use super::client::{ApiError, RemoteDirectoryClient, UserListQuery};
use super::errors::parse_http_error;
use super::models::{DirectoryUser, NewUser, NewUserName, UserPage, UserRecord};
use crate::error::{ToolError, ToolResult};

/// Largest page the users endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 500;
/// What the endpoint uses when no page size is given.
pub const API_DEFAULT_PAGE_SIZE: u32 = 100;

// Reads right after a write are not consistent without a short wait.
const VERIFY_DELAY: Duration = Duration::from_secs(2);

fn exhausted(operation: String, attempts: u32, last: &ApiError) -> ToolError {
    ToolError::RetriesExhausted {
        operation,
        attempts,
        last: last.to_string(),
    }
}

/// Users endpoints wrapped with backoff and friendlier errors.
pub struct UsersApi<'c, C: ?Sized> {
    client: &'c C,
    retry: RetryPolicy,
}

impl<'c, C: RemoteDirectoryClient + ?Sized> UsersApi<'c, C> {
    pub fn new(client: &'c C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// One page of users. Out-of-range page sizes fall back to the API default.
    pub fn fetch_user_page(
        &self,
        domain: &str,
        page_size: u32,
        page_token: Option<&str>,
        query_filter: Option<&str>,
    ) -> ToolResult<UserPage> {
        let max_results = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            API_DEFAULT_PAGE_SIZE
        };
        let query = UserListQuery {
            domain,
            max_results,
            page_token,
            query: query_filter,
        };
        run_with_backoff(self.retry, "retrieving users", || self.client.list_users(&query))
            .map_err(|e| match e {
                BackoffError::Failed(err) => ToolError::Directory(format!(
                    "{}\nPlease check your domain spelling ({}).",
                    parse_http_error(&err),
                    domain
                )),
                BackoffError::Exhausted { attempts, last } => {
                    exhausted(format!("Retrieving users from {}", domain), attempts, &last)
                }
            })
    }

    /// Pages through the domain, handing each user to `visit`. Stops after
    /// `max_results` users when given. Returns the number visited.
    pub fn for_each_domain_user(
        &self,
        domain: &str,
        max_results: Option<usize>,
        page_size: u32,
        query_filter: Option<&str>,
        mut visit: impl FnMut(DirectoryUser),
    ) -> ToolResult<usize> {
        let mut page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            API_DEFAULT_PAGE_SIZE
        };
        if let Some(max) = max_results {
            if max < page_size as usize {
                page_size = max.max(1) as u32;
            }
        }

        let mut retrieved = 0;
        let mut page_token: Option<String> = None;
        loop {
            if max_results.is_some_and(|max| retrieved >= max) {
                return Ok(retrieved);
            }
            let page = self.fetch_user_page(domain, page_size, page_token.as_deref(), query_filter)?;
            for user in page.users {
                visit(user);
                retrieved += 1;
                if max_results.is_some_and(|max| retrieved >= max) {
                    return Ok(retrieved);
                }
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(retrieved),
            }
        }
    }

    /// `(email, id, full_name)` for each user, in server order.
    pub fn get_domain_users(
        &self,
        domain: &str,
        max_results: Option<usize>,
        page_size: u32,
        query_filter: Option<&str>,
    ) -> ToolResult<Vec<UserRecord>> {
        debug!("GetDomainUsers ({:?}).", max_results);
        let mut users = Vec::new();
        self.for_each_domain_user(domain, max_results, page_size, query_filter, |user| {
            users.push(UserRecord::from(&user))
        })?;
        Ok(users)
    }

    /// Full user documents, in server order.
    pub fn get_domain_users_full(
        &self,
        domain: &str,
        max_results: Option<usize>,
        page_size: u32,
        query_filter: Option<&str>,
    ) -> ToolResult<Vec<DirectoryUser>> {
        let mut users = Vec::new();
        self.for_each_domain_user(domain, max_results, page_size, query_filter, |user| {
            users.push(user)
        })?;
        Ok(users)
    }

    /// Customer id read off the first user; `None` only for an empty domain.
    pub fn customer_id(&self, domain: &str) -> ToolResult<Option<String>> {
        let mut customer_id = None;
        self.for_each_domain_user(domain, Some(1), 1, None, |user| {
            customer_id = user.customer_id;
        })?;
        Ok(customer_id)
    }

    /// `None` when the user does not exist.
    pub fn get_user(&self, email: &str) -> ToolResult<Option<DirectoryUser>> {
        debug!("GetDomainUser ({}).", email);
        let operation = format!("retrieving user {}", email);
        match run_with_backoff(self.retry, &operation, || self.client.get_user(email)) {
            Ok(user) => Ok(Some(user)),
            Err(BackoffError::Failed(err)) if err.is_not_found() => Ok(None),
            Err(BackoffError::Failed(err)) => Err(ToolError::Directory(format!(
                "User {} not found: {}",
                email,
                parse_http_error(&err)
            ))),
            Err(BackoffError::Exhausted { attempts, last }) => {
                Err(exhausted(operation, attempts, &last))
            }
        }
    }

    pub fn is_domain_user(&self, email: &str) -> ToolResult<bool> {
        Ok(self.get_user(email)?.is_some())
    }

    /// Creates an unsuspended, non-admin user.
    pub fn add_user(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
        verify: bool,
    ) -> ToolResult<()> {
        if self.is_domain_user(email)? {
            return Err(ToolError::Directory(format!("User {} already exists.", email)));
        }
        let body = NewUser {
            primary_email: email.to_string(),
            name: NewUserName {
                given_name: first_name.to_string(),
                family_name: last_name.to_string(),
            },
            password: password.to_string(),
        };
        let operation = format!("adding user {}", email);
        run_with_backoff(self.retry, &operation, || self.client.insert_user(&body))
            .map_err(|e| self.write_error(e, operation))?;
        info!("Added user {}.", email);

        if verify {
            self.retry.pause(VERIFY_DELAY);
            if !self.is_domain_user(email)? {
                return Err(ToolError::Directory(format!("Problem creating user: {}", email)));
            }
        }
        Ok(())
    }

    pub fn delete_user(&self, email: &str, verify: bool) -> ToolResult<()> {
        if !self.is_domain_user(email)? {
            return Err(ToolError::Directory(format!(
                "ERROR: user ({}) not a domain member. You may need to check \"Enable \
                 provisioning API\" in your Domain Settings->User Settings.",
                email
            )));
        }
        let operation = format!("deleting user {}", email);
        run_with_backoff(self.retry, &operation, || self.client.delete_user(email))
            .map_err(|e| self.write_error(e, operation))?;
        info!("Deleted user {}.", email);

        if verify {
            self.retry.pause(VERIFY_DELAY);
            if self.is_domain_user(email)? {
                return Err(ToolError::Directory(format!("Problem deleting user {}.", email)));
            }
        }
        Ok(())
    }

    fn write_error(&self, err: BackoffError, operation: String) -> ToolError {
        match err {
            BackoffError::Failed(err) => ToolError::Directory(parse_http_error(&err)),
            BackoffError::Exhausted { attempts, last } => exhausted(operation, attempts, &last),
        }
    }
}

// -- Listing output ----------------------------------------------------------

/// Fixed-width line in the style of `ls -l`.
pub fn format_user_line(user_id: &str, email: &str, full_name: &str) -> String {
    format!("{:<22} {:<40} {}", user_id, email, full_name)
        .trim_end()
        .to_string()
}

pub fn user_header_line() -> String {
    format_user_line("ID", "Email", "Full Name")
}

/// The basic line, plus every other field sorted by name when `long_list`.
pub fn format_user(user: &DirectoryUser, long_list: bool) -> ToolResult<Vec<String>> {
    let mut lines = vec![format_user_line(&user.id, &user.primary_email, user.full_name())];
    if !long_list {
        return Ok(lines);
    }
    let doc = serde_json::to_value(user)
        .map_err(|e| ToolError::Directory(format!("Unable to render user {}: {}", user.primary_email, e)))?;
    if let Value::Object(fields) = doc {
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();
        for name in names {
            if name == "primaryEmail" || name == "id" {
                continue;
            }
            let rendered = match &fields[name] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("    {}: {}", name, rendered));
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::{FakeDirectory, Op};

    fn directory(n: usize) -> FakeDirectory {
        FakeDirectory::with_users("altostrat.com", n)
    }

    #[test]
    fn pagination_returns_every_user_once() {
        let fake = directory(1234);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let users = api.get_domain_users("altostrat.com", None, 500, None).unwrap();
        assert_eq!(users.len(), 1234);
        let mut emails: Vec<_> = users.iter().map(|u| u.email().to_string()).collect();
        emails.sort();
        emails.dedup();
        assert_eq!(emails.len(), 1234);
        assert_eq!(fake.calls_matching("list_users"), 3);
    }

    #[test]
    fn max_results_shrinks_the_page() {
        let fake = directory(50);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let users = api.get_domain_users("altostrat.com", Some(7), 500, None).unwrap();
        assert_eq!(users.len(), 7);
        assert_eq!(fake.calls_matching("list_users"), 1);
        assert_eq!(fake.last_page_size(), Some(7));
    }

    #[test]
    fn out_of_range_page_size_uses_api_default() {
        let fake = directory(5);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        api.fetch_user_page("altostrat.com", 0, None, None).unwrap();
        assert_eq!(fake.last_page_size(), Some(API_DEFAULT_PAGE_SIZE));
        api.fetch_user_page("altostrat.com", 501, None, None).unwrap();
        assert_eq!(fake.last_page_size(), Some(API_DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn quota_errors_are_retried() {
        let fake = directory(3);
        fake.fail_next(Op::ListUsers, 503);
        fake.fail_next(Op::ListUsers, 402);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let users = api.get_domain_users("altostrat.com", None, 100, None).unwrap();
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn persistent_quota_errors_exhaust() {
        let fake = directory(3);
        for _ in 0..3 {
            fake.fail_next(Op::ListUsers, 504);
        }
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let err = api.get_domain_users("altostrat.com", None, 100, None).unwrap_err();
        assert!(matches!(err, ToolError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("status=504"), "{err}");
    }

    #[test]
    fn hard_errors_mention_domain() {
        let fake = directory(3);
        fake.fail_next(Op::ListUsers, 400);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let err = api.get_domain_users("altostrat.com", None, 100, None).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("status=400"));
        assert!(text.contains("Please check your domain spelling (altostrat.com)"));
    }

    #[test]
    fn query_filter_is_forwarded() {
        let fake = directory(30);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let users = api
            .get_domain_users("altostrat.com", None, 100, Some("email:user001*"))
            .unwrap();
        assert_eq!(users.len(), 10);
        assert!(users.iter().all(|u| u.email().starts_with("user001")));
    }

    #[test]
    fn missing_user_is_none() {
        let fake = directory(2);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        assert!(api.get_user("nobody@altostrat.com").unwrap().is_none());
        assert!(api.is_domain_user(&fake.email(1)).unwrap());
    }

    #[test]
    fn add_then_delete_user() {
        let fake = directory(0);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        api.add_user("Ada", "Lovelace", "ada@altostrat.com", "pw-123456", true)
            .unwrap();
        assert!(api.is_domain_user("ada@altostrat.com").unwrap());

        let dup = api
            .add_user("Ada", "Lovelace", "ada@altostrat.com", "pw-123456", false)
            .unwrap_err();
        assert!(dup.to_string().contains("already exists"));

        api.delete_user("ada@altostrat.com", true).unwrap();
        let missing = api.delete_user("ada@altostrat.com", false).unwrap_err();
        assert!(missing.to_string().contains("not a domain member"));
    }

    #[test]
    fn customer_id_comes_from_first_user() {
        let fake = directory(4);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        assert_eq!(api.customer_id("altostrat.com").unwrap().as_deref(), Some("C0fake"));
        let empty = directory(0);
        let api = UsersApi::new(&empty, RetryPolicy::immediate(3));
        assert_eq!(api.customer_id("altostrat.com").unwrap(), None);
    }

    #[test]
    fn long_listing_shows_sorted_fields() {
        let fake = directory(1);
        let api = UsersApi::new(&fake, RetryPolicy::immediate(3));
        let user = api.get_user(&fake.email(0)).unwrap().unwrap();
        let lines = format_user(&user, true).unwrap();
        assert!(lines[0].contains(&fake.email(0)));
        let fields: Vec<_> = lines[1..].iter().map(|l| l.trim().split(':').next().unwrap().to_string()).collect();
        let mut sorted = fields.clone();
        sorted.sort();
        assert_eq!(fields, sorted);
        assert!(fields.contains(&"customerId".to_string()));
    }
}

//! In-memory directory used by tests in place of the HTTP client.

use std::cell::RefCell;
use std::collections::BTreeMap;

use super::client::{ApiError, RemoteDirectoryClient, UserListQuery};
use super::models::{DirectoryUser, NewUser, TokenList, TokenRecord, UserName, UserPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ListUsers,
    GetUser,
    InsertUser,
    DeleteUser,
    ListTokens,
    GetToken,
    DeleteToken,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::ListUsers => "list_users",
            Op::GetUser => "get_user",
            Op::InsertUser => "insert_user",
            Op::DeleteUser => "delete_user",
            Op::ListTokens => "list_tokens",
            Op::GetToken => "get_token",
            Op::DeleteToken => "delete_token",
        }
    }
}

struct Failure {
    op: Op,
    user_key: Option<String>,
    status: u16,
}

pub struct FakeDirectory {
    domain: String,
    users: RefCell<Vec<DirectoryUser>>,
    tokens: RefCell<BTreeMap<String, Vec<TokenRecord>>>,
    failures: RefCell<Vec<Failure>>,
    calls: RefCell<Vec<String>>,
    page_sizes: RefCell<Vec<u32>>,
}

fn status(status: u16, message: &str) -> ApiError {
    ApiError::Status {
        status,
        url: "https://fake.directory/admin/directory/v1".to_string(),
        body: serde_json::json!({"error": {"code": status, "message": message}}).to_string(),
    }
}

fn not_found() -> ApiError {
    status(404, "Resource Not Found: userKey")
}

impl FakeDirectory {
    /// `n` users named `user0000@domain`, `user0001@domain`, ...
    pub fn with_users(domain: &str, n: usize) -> Self {
        let users = (0..n)
            .map(|i| DirectoryUser {
                primary_email: format!("user{:04}@{}", i, domain),
                id: format!("{}", 100_000 + i),
                name: Some(UserName {
                    given_name: Some("User".into()),
                    family_name: Some(format!("{}", i)),
                    full_name: Some(format!("User {}", i)),
                }),
                customer_id: Some("C0fake".into()),
                org_unit_path: Some("/".into()),
                suspended: Some(false),
                ..Default::default()
            })
            .collect();
        Self {
            domain: domain.to_string(),
            users: RefCell::new(users),
            tokens: RefCell::new(BTreeMap::new()),
            failures: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            page_sizes: RefCell::new(Vec::new()),
        }
    }

    pub fn email(&self, i: usize) -> String {
        format!("user{:04}@{}", i, self.domain)
    }

    pub fn get_all(&self) -> Vec<DirectoryUser> {
        self.users.borrow().clone()
    }

    /// Replace the users wholesale, e.g. to test ordering or odd records.
    pub fn set_users(&self, users: Vec<DirectoryUser>) {
        *self.users.borrow_mut() = users;
    }

    pub fn update_user(&self, email: &str, edit: impl FnOnce(&mut DirectoryUser)) {
        if let Some(user) = self
            .users
            .borrow_mut()
            .iter_mut()
            .find(|u| u.primary_email == email)
        {
            edit(user);
        }
    }

    pub fn grant(&self, email: &str, client_id: &str, scopes: &[&str]) {
        self.tokens
            .borrow_mut()
            .entry(email.to_string())
            .or_default()
            .push(TokenRecord {
                client_id: client_id.to_string(),
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                display_text: client_id.to_string(),
                ..Default::default()
            });
    }

    pub fn has_token(&self, email: &str, client_id: &str) -> bool {
        self.tokens
            .borrow()
            .get(email)
            .is_some_and(|list| list.iter().any(|t| t.client_id == client_id))
    }

    /// The next call of `op` fails with `status`.
    pub fn fail_next(&self, op: Op, status: u16) {
        self.failures.borrow_mut().push(Failure {
            op,
            user_key: None,
            status,
        });
    }

    /// The next call of `op` for `user_key` fails with `status`.
    pub fn fail_for_user(&self, op: Op, user_key: &str, status: u16) {
        self.failures.borrow_mut().push(Failure {
            op,
            user_key: Some(user_key.to_string()),
            status,
        });
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls_matching(&self, op_name: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op_name))
            .count()
    }

    pub fn deleted_tokens(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("delete_token "))
            .map(|c| c["delete_token ".len()..].to_string())
            .collect()
    }

    pub fn last_page_size(&self) -> Option<u32> {
        self.page_sizes.borrow().last().copied()
    }

    fn record(&self, op: Op, detail: &str) -> Result<(), ApiError> {
        self.calls
            .borrow_mut()
            .push(format!("{} {}", op.name(), detail).trim_end().to_string());
        let mut failures = self.failures.borrow_mut();
        let hit = failures.iter().position(|f| {
            f.op == op && f.user_key.as_deref().map_or(true, |key| detail.starts_with(key))
        });
        match hit {
            Some(i) => {
                let failure = failures.remove(i);
                Err(status(failure.status, "Scripted failure"))
            }
            None => Ok(()),
        }
    }

    fn resolve(&self, user_key: &str) -> Option<String> {
        self.users
            .borrow()
            .iter()
            .find(|u| u.primary_email == user_key || u.id == user_key)
            .map(|u| u.primary_email.clone())
    }
}

fn matches_query(user: &DirectoryUser, query: Option<&str>) -> bool {
    let Some(query) = query else { return true };
    match query.split_once(':') {
        Some(("email", pattern)) => match pattern.strip_suffix('*') {
            Some(prefix) => user.primary_email.starts_with(prefix),
            None => user.primary_email == pattern,
        },
        Some(("orgUnitPath", path)) => user.org_unit_path.as_deref() == Some(path),
        _ => true,
    }
}

impl RemoteDirectoryClient for FakeDirectory {
    fn list_users(&self, query: &UserListQuery<'_>) -> Result<UserPage, ApiError> {
        self.record(Op::ListUsers, query.page_token.unwrap_or_default())?;
        self.page_sizes.borrow_mut().push(query.max_results);
        if query.domain != self.domain {
            return Err(status(400, "Domain not found."));
        }
        let matching: Vec<DirectoryUser> = self
            .users
            .borrow()
            .iter()
            .filter(|u| matches_query(u, query.query))
            .cloned()
            .collect();
        let start: usize = query
            .page_token
            .map(|t| t.parse().map_err(|_| status(400, "Invalid page token")))
            .transpose()?
            .unwrap_or(0);
        let end = (start + query.max_results as usize).min(matching.len());
        Ok(UserPage {
            users: matching[start.min(end)..end].to_vec(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    fn get_user(&self, user_key: &str) -> Result<DirectoryUser, ApiError> {
        self.record(Op::GetUser, user_key)?;
        self.users
            .borrow()
            .iter()
            .find(|u| u.primary_email == user_key || u.id == user_key)
            .cloned()
            .ok_or_else(not_found)
    }

    fn insert_user(&self, user: &NewUser) -> Result<DirectoryUser, ApiError> {
        self.record(Op::InsertUser, &user.primary_email)?;
        let mut users = self.users.borrow_mut();
        let created = DirectoryUser {
            primary_email: user.primary_email.clone(),
            id: format!("{}", 900_000 + users.len()),
            name: Some(UserName {
                given_name: Some(user.name.given_name.clone()),
                family_name: Some(user.name.family_name.clone()),
                full_name: Some(format!("{} {}", user.name.given_name, user.name.family_name)),
            }),
            customer_id: Some("C0fake".into()),
            ..Default::default()
        };
        users.push(created.clone());
        Ok(created)
    }

    fn delete_user(&self, user_key: &str) -> Result<(), ApiError> {
        self.record(Op::DeleteUser, user_key)?;
        let mut users = self.users.borrow_mut();
        let before = users.len();
        users.retain(|u| u.primary_email != user_key && u.id != user_key);
        if users.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    fn list_tokens(&self, user_key: &str) -> Result<TokenList, ApiError> {
        self.record(Op::ListTokens, user_key)?;
        let email = self.resolve(user_key).ok_or_else(not_found)?;
        Ok(TokenList {
            items: self.tokens.borrow().get(&email).cloned().unwrap_or_default(),
        })
    }

    fn get_token(&self, user_key: &str, client_id: &str) -> Result<TokenRecord, ApiError> {
        self.record(Op::GetToken, &format!("{} {}", user_key, client_id))?;
        let email = self.resolve(user_key).ok_or_else(not_found)?;
        self.tokens
            .borrow()
            .get(&email)
            .and_then(|list| list.iter().find(|t| t.client_id == client_id).cloned())
            .ok_or_else(|| status(500, "No tokens exist for the specified client id"))
    }

    fn delete_token(&self, user_key: &str, client_id: &str) -> Result<(), ApiError> {
        self.record(Op::DeleteToken, &format!("{} {}", user_key, client_id))?;
        let email = self.resolve(user_key).ok_or_else(not_found)?;
        let mut tokens = self.tokens.borrow_mut();
        let list = tokens.get_mut(&email).ok_or_else(not_found)?;
        let before = list.len();
        list.retain(|t| t.client_id != client_id);
        if list.len() == before {
            return Err(not_found());
        }
        Ok(())
    }
}

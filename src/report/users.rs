use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::directory::DirectoryUser;
use crate::error::{ToolError, ToolResult};
use crate::storage::WorkingStore;

pub const REPORT_USERS_FILE_NAME: &str = "report_users.csv";

/// Top-level user fields known at the time of writing; anything else found
/// is reported so changes in the API get noticed.
pub const EXPECTED_USER_FIELDS: &[&str] = &[
    "agreedToTerms",
    "aliases",
    "changePasswordAtNextLogin",
    "creationTime",
    "customerId",
    "emails",
    "id",
    "includeInGlobalAddressList",
    "ipWhitelisted",
    "isAdmin",
    "isDelegatedAdmin",
    "isMailboxSetup",
    "kind",
    "lastLoginTime",
    "name",
    "nonEditableAliases",
    "orgUnitPath",
    "primaryEmail",
    "suspended",
    "suspensionReason",
];

// Containers that are replaced by their flattened columns.
const FLATTENED_FIELDS: &[&str] = &["emails", "name", "nonEditableAliases"];

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        // Matches what earlier versions of these reports wrote.
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

/// One user as a flat `column -> value` row.
///
/// `emails` becomes `email.primary`, `email1`, `email2`...; `name` becomes
/// `name.familyName`, `name.fullName`, `name.givenName`; and
/// `nonEditableAliases` becomes `alias1`, `alias2`...
pub fn flatten_user(user: &DirectoryUser) -> ToolResult<BTreeMap<String, String>> {
    let doc = serde_json::to_value(user).map_err(|e| {
        ToolError::Directory(format!("Unable to flatten user {}: {}", user.primary_email, e))
    })?;
    let Value::Object(fields) = doc else {
        return Ok(BTreeMap::new());
    };

    let mut row = BTreeMap::new();
    for (field, value) in &fields {
        match field.as_str() {
            "emails" => {
                let mut counter = 1;
                for email in value.as_array().into_iter().flatten() {
                    let address = email.get("address").map(cell).unwrap_or_default();
                    if email.get("primary").and_then(Value::as_bool) == Some(true) {
                        row.insert("email.primary".to_string(), address);
                    } else {
                        row.insert(format!("email{}", counter), address);
                        counter += 1;
                    }
                }
            }
            "name" => {
                for part in ["familyName", "fullName", "givenName"] {
                    if let Some(v) = value.get(part) {
                        row.insert(format!("name.{}", part), cell(v));
                    }
                }
            }
            "nonEditableAliases" => {
                for (i, alias) in value.as_array().into_iter().flatten().enumerate() {
                    row.insert(format!("alias{}", i + 1), cell(alias));
                }
            }
            _ => {
                row.insert(field.clone(), cell(value));
            }
        }
    }
    Ok(row)
}

/// Sorted report columns: everything found, or only `csv_fields` when given.
pub fn finalize_headers(
    found_fields: &BTreeSet<String>,
    flattened_headers: &BTreeSet<String>,
    csv_fields: &[String],
) -> Vec<String> {
    let unexpected: Vec<&str> = found_fields
        .iter()
        .map(String::as_str)
        .filter(|f| !EXPECTED_USER_FIELDS.contains(f))
        .collect();
    if !unexpected.is_empty() {
        warn!("Unexpected user fields noticed: {}.", unexpected.join(", "));
    }

    let mut headers: BTreeSet<String> = flattened_headers
        .iter()
        .filter(|h| !FLATTENED_FIELDS.contains(&h.as_str()))
        .cloned()
        .collect();

    if !csv_fields.is_empty() {
        let unknown: BTreeSet<&String> = csv_fields.iter().filter(|f| !headers.contains(*f)).collect();
        if !unknown.is_empty() {
            let names: Vec<&str> = unknown.iter().map(|s| s.as_str()).collect();
            warn!("Ignoring unknown csv fields: {}.", names.join(", "));
        }
        headers.retain(|h| csv_fields.contains(h));
    }
    headers.into_iter().collect()
}

/// Headers plus one row per user, ready for CSV.
pub fn build_user_report(
    users: &[DirectoryUser],
    csv_fields: &[String],
) -> ToolResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut found_fields = BTreeSet::new();
    let mut all_headers = BTreeSet::new();
    let mut flat_rows = Vec::with_capacity(users.len());
    for user in users {
        if let Value::Object(fields) = serde_json::to_value(user).unwrap_or(Value::Null) {
            found_fields.extend(fields.keys().cloned());
        }
        let row = flatten_user(user)?;
        all_headers.extend(row.keys().cloned());
        flat_rows.push(row);
    }

    let headers = finalize_headers(&found_fields, &all_headers, csv_fields);
    let rows = flat_rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(h).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    Ok((headers, rows))
}

/// Writes the report; `None` when there were no users.
pub fn write_user_report(
    store: &WorkingStore,
    file_name: &str,
    users: &[DirectoryUser],
    csv_fields: &[String],
    overwrite_ok: bool,
) -> ToolResult<Option<PathBuf>> {
    if users.is_empty() {
        return Ok(None);
    }
    let (headers, rows) = build_user_report(users, csv_fields)?;
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    store.write_csv(file_name, &header_refs, rows, overwrite_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::models::{UserEmail, UserName};

    fn user() -> DirectoryUser {
        let mut user: DirectoryUser = serde_json::from_value(serde_json::json!({
            "primaryEmail": "ada@altostrat.com",
            "id": "1001",
            "orgUnitPath": "/Engineering",
            "suspended": false,
            "nonEditableAliases": ["ada@altostrat.test.com"],
            "thumbnailPhotoEtag": "abc"
        }))
        .unwrap();
        user.name = Some(UserName {
            given_name: Some("Ada".into()),
            family_name: Some("Lovelace".into()),
            full_name: Some("Ada Lovelace".into()),
        });
        user.emails = Some(vec![
            UserEmail {
                address: "ada@altostrat.com".into(),
                primary: Some(true),
            },
            UserEmail {
                address: "countess@altostrat.com".into(),
                primary: None,
            },
        ]);
        user
    }

    #[test]
    fn flattens_containers() {
        let row = flatten_user(&user()).unwrap();
        assert_eq!(row["email.primary"], "ada@altostrat.com");
        assert_eq!(row["email1"], "countess@altostrat.com");
        assert_eq!(row["name.fullName"], "Ada Lovelace");
        assert_eq!(row["alias1"], "ada@altostrat.test.com");
        assert_eq!(row["suspended"], "False");
        assert!(!row.contains_key("emails"));
        assert!(!row.contains_key("name"));
    }

    #[test]
    fn unknown_fields_are_kept_as_columns() {
        let (headers, rows) = build_user_report(&[user()], &[]).unwrap();
        assert!(headers.contains(&"thumbnailPhotoEtag".to_string()));
        let mut sorted = headers.clone();
        sorted.sort();
        assert_eq!(headers, sorted);
        assert_eq!(rows[0].len(), headers.len());
    }

    #[test]
    fn csv_fields_select_columns() {
        let fields = vec!["orgUnitPath".to_string(), "suspended".to_string(), "bogus".to_string()];
        let (headers, rows) = build_user_report(&[user()], &fields).unwrap();
        assert_eq!(headers, vec!["orgUnitPath", "suspended"]);
        assert_eq!(rows, vec![vec!["/Engineering".to_string(), "False".to_string()]]);
    }

    #[test]
    fn writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkingStore::at(dir.path().to_path_buf(), "altostrat.com").unwrap();
        let path = write_user_report(&store, REPORT_USERS_FILE_NAME, &[user()], &[], false)
            .unwrap()
            .unwrap();
        assert!(path.ends_with(REPORT_USERS_FILE_NAME));
        assert!(write_user_report(&store, REPORT_USERS_FILE_NAME, &[], &[], false).unwrap().is_none());
    }
}

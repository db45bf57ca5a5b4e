use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user resource as returned by `users.get` / `users.list`.
///
/// Known fields are typed; anything else the API adds lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    #[serde(default)]
    pub primary_email: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<UserName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<UserEmail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_editable_aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_delegated_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mailbox_setup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreed_to_terms: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_password_at_next_login: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_in_global_address_list: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_whitelisted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DirectoryUser {
    pub fn full_name(&self) -> &str {
        self.name
            .as_ref()
            .and_then(|n| n.full_name.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEmail {
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Body of a `users.insert` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub primary_email: String,
    pub name: NewUserName,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserName {
    pub given_name: String,
    pub family_name: String,
}

/// `(email, id, full_name)`; stored as a JSON 3-array in `users.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord(pub String, pub String, pub String);

impl UserRecord {
    pub fn email(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }
}

impl From<&DirectoryUser> for UserRecord {
    fn from(user: &DirectoryUser) -> Self {
        UserRecord(
            user.primary_email.clone(),
            user.id.clone(),
            user.full_name().to_string(),
        )
    }
}

/// An OAuth token a user has granted to a third-party client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub display_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_app: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenList {
    #[serde(default)]
    pub items: Vec<TokenRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_keeps_unknown_fields() {
        let user: DirectoryUser = serde_json::from_value(serde_json::json!({
            "primaryEmail": "ada@altostrat.com",
            "id": "1001",
            "name": {"givenName": "Ada", "familyName": "Lovelace", "fullName": "Ada Lovelace"},
            "suspended": false,
            "thumbnailPhotoUrl": "https://example/photo"
        }))
        .unwrap();
        assert_eq!(user.full_name(), "Ada Lovelace");
        assert_eq!(user.suspended, Some(false));
        assert!(user.extra.contains_key("thumbnailPhotoUrl"));
    }

    #[test]
    fn user_record_is_a_json_triple() {
        let record = UserRecord("ada@altostrat.com".into(), "1001".into(), "Ada".into());
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"["ada@altostrat.com","1001","Ada"]"#);
    }

    #[test]
    fn token_list_tolerates_missing_items() {
        let list: TokenList = serde_json::from_str(r#"{"kind": "admin#directory#tokenList"}"#).unwrap();
        assert!(list.items.is_empty());
    }
}

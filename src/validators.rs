use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ToolError, ToolResult};

// '.' and '-' are valid in domain names and email addresses.
static APPS_DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+\.\w+$").expect("valid domain regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w.-]+)@([\w.-]+\.\w+)$").expect("valid email regex"));
static NO_WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+$").expect("valid whitespace regex"));

// -- clap value parsers -------------------------------------------------------

pub fn apps_domain(arg: &str) -> Result<String, String> {
    let arg = arg.trim();
    if APPS_DOMAIN_RE.is_match(arg) {
        Ok(arg.to_string())
    } else {
        Err("Must be a non-empty string of form: altostrat.com.".to_string())
    }
}

pub fn email(arg: &str) -> Result<String, String> {
    let arg = arg.trim();
    if EMAIL_RE.is_match(arg) {
        Ok(arg.to_string())
    } else {
        Err("Must be a non-empty string of form: youremail@altostrat.com.".to_string())
    }
}

pub fn no_whitespace(arg: &str) -> Result<String, String> {
    let arg = arg.trim();
    if NO_WHITESPACE_RE.is_match(arg) {
        Ok(arg.to_string())
    } else {
        Err("Must be a non-whitespace string.".to_string())
    }
}

/// Comma separated flag value, kept as one clap value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList(pub Vec<String>);

/// Splits a comma separated flag value. An empty value yields an empty list.
pub fn field_list(arg: &str) -> Result<FieldList, String> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Ok(FieldList::default());
    }
    Ok(FieldList(arg.split(',').map(|s| s.trim().to_string()).collect()))
}

/// Splits `user@domain` into `(user, domain)`.
pub fn email_parts(user_email: &str) -> ToolResult<(String, String)> {
    let caps = EMAIL_RE
        .captures(user_email)
        .ok_or_else(|| ToolError::InvalidEmail(user_email.to_string()))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

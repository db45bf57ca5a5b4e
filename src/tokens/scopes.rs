/// Readable names for the scopes domain admins most often see.
const SCOPE_MAP: &[(&str, &str)] = &[
    ("http://docs.google.com/feeds", "Docs (Read/Write, does not require SSL)"),
    (
        "http://docs.googleusercontent.com",
        "Download PDF and arbitrary files from Docs (Read only, does not require SSL)",
    ),
    (
        "http://mail.google.com/mail/feed/atom",
        "Email, new messages (Read only, does not require SSL)",
    ),
    ("http://sites.google.com/feeds", "Sites (Read/Write, does not require SSL)"),
    ("http://spreadsheets.google.com/feeds", "Spreadsheets (Read/Write, does not require SSL)"),
    ("http://www.google.com/calendar/feeds", "Calendar (Read/Write, does not require SSL)"),
    ("http://www.google.com/finance/feeds", "Finance (Read Only, does not require SSL)"),
    ("http://www.google.com/m8/feeds", "Contacts (Read/Write, does not require SSL)"),
    ("https://apps-apis.google.com/a/feeds/calendar/resource", "Calendar Resources (Read/Write)"),
    ("https://apps-apis.google.com/a/feeds/calendar/resource/#readonly", "Calendar Resources (Read only)"),
    ("https://apps-apis.google.com/a/feeds/emailsettings/2.0", "Email Settings (Read/Write)"),
    ("https://apps-apis.google.com/a/feeds/group/#readonly", "Groups Provisioning (Read only)"),
    ("https://apps-apis.google.com/a/feeds/groups", "Groups Provisioning"),
    ("https://apps-apis.google.com/a/feeds/migration", "Email Migration (Write only)"),
    ("https://apps-apis.google.com/a/feeds/nickname/#readonly", "User Nicknames (Read only)"),
    ("https://apps-apis.google.com/a/feeds/user", "User Provisioning"),
    ("https://apps-apis.google.com/a/feeds/user/#readonly", "User Provisioning (Read only)"),
    ("https://docs.google.com/feeds", "Docs (Read/Write)"),
    ("https://docs.googleusercontent.com", "Download PDF and arbitrary files from Docs (Read only)"),
    ("https://mail.google.com", "Email (Read/Write/Send)"),
    ("https://mail.google.com/mail/feed/atom", "Email, new messages (Read only)"),
    ("https://sites.google.com/feeds", "Sites (Read/Write)"),
    ("https://spreadsheets.google.com/feeds", "Spreadsheets (Read/Write)"),
    ("https://www.google.com/calendar/feeds", "Calendar (Read/Write)"),
    ("https://www.google.com/finance/feeds", "Finance (Read Only)"),
    ("https://www.google.com/m8/feeds", "Contacts (Read/Write)"),
    ("https://www.googleapis.com/auth/admin.directory.user", "User Provisioning"),
    ("https://www.googleapis.com/auth/admin.directory.user.readonly", "User Provisioning (Read only)"),
    ("https://www.googleapis.com/auth/admin.directory.user.security", "3LO Tokens (read-write)"),
    ("https://www.googleapis.com/auth/apps.groups.migration", "Groups Mail Migration"),
    ("https://www.googleapis.com/auth/apps.groups.settings", "Groups Settings"),
    ("https://www.googleapis.com/auth/calendar", "Calendar (Read-Write)"),
    ("https://www.googleapis.com/auth/tasks", "Tasks (Read/Write)"),
    ("https://www.googleapis.com/auth/tasks.readonly", "Tasks (Read Only)"),
    ("https://www.googleapis.com/doclist.createnew", "Docs created with this application"),
    ("https://www.googleapis.com/doclist.openwith", "Docs opened with this application"),
];

/// `"<readable> [<scope>]"` for known scopes, the scope itself otherwise.
/// Trailing slashes are ignored when matching.
pub fn lookup_scope(scope: &str) -> String {
    let key = scope.trim_end_matches('/');
    match SCOPE_MAP.iter().find(|(url, _)| *url == key) {
        Some((_, readable)) => format!("{} [{}]", readable, scope),
        None => scope.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_scope_with_trailing_slash() {
        assert_eq!(
            lookup_scope("https://mail.google.com/"),
            "Email (Read/Write/Send) [https://mail.google.com/]"
        );
    }

    #[test]
    fn unknown_scope_passes_through() {
        assert_eq!(lookup_scope("https://example.com/x"), "https://example.com/x");
    }
}

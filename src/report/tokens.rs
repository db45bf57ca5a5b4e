use super::{border, report_line, separator, wrap_report_text};
use crate::tokens::{lookup_scope, TokenStats};

pub const TOP_CLIENT_IDS_FILE_NAME: &str = "top_client_ids.csv";
pub const TOP_SCOPES_FILE_NAME: &str = "top_scopes.csv";
pub const CLIENT_ID_CSV_HEADER: &[&str] = &["NUM_USERS", "CLIENT_ID"];
pub const SCOPE_CSV_HEADER: &[&str] = &["NUM_USERS", "SCOPE"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenReportOptions {
    /// 0 keeps every entry.
    pub top_n: usize,
    pub long_list: bool,
    /// Implies `long_list`.
    pub show_users: bool,
}

impl TokenReportOptions {
    fn top_n(&self) -> Option<usize> {
        (self.top_n > 0).then_some(self.top_n)
    }

    fn long_list(&self) -> bool {
        self.long_list || self.show_users
    }
}

fn format_ranking(
    title: &str,
    header: &[&str],
    stats: &TokenStats,
    options: &TokenReportOptions,
    display_primary: impl Fn(&str) -> String,
    display_secondary: impl Fn(&str) -> String,
) -> Vec<String> {
    let mut lines = vec![String::new(), border(), title.to_string(), border()];
    lines.push(report_line(&header.join("\t"), 1));
    for (primary, user_count) in stats.rank(options.top_n()) {
        lines.push(report_line(
            &format!("{}:\t{}", user_count, display_primary(&primary)),
            1,
        ));
        if !options.long_list() {
            continue;
        }
        for bucket in stats.drilldown(&primary) {
            let mut secondaries = bucket.secondaries.iter().map(|s| display_secondary(s));
            let first = secondaries.next().unwrap_or_default();
            lines.push(report_line(&format!("{:2}: {}", bucket.users.len(), first), 2));
            lines.extend(secondaries.map(|s| report_line(&s, 3)));
            if options.show_users {
                let users: Vec<&str> = bucket.users.iter().map(String::as_str).collect();
                lines.push(report_line(&separator(), 3));
                lines.push(wrap_report_text(&users.join(", ")));
            }
        }
    }
    lines
}

/// Client ids ranked by how many users granted them a token.
pub fn format_client_report(by_client: &TokenStats, options: &TokenReportOptions) -> Vec<String> {
    format_ranking(
        "MOST COMMON CLIENT IDs:",
        CLIENT_ID_CSV_HEADER,
        by_client,
        options,
        str::to_string,
        lookup_scope,
    )
}

/// Scopes ranked by how many users granted them.
pub fn format_scope_report(by_scope: &TokenStats, options: &TokenReportOptions) -> Vec<String> {
    format_ranking(
        "MOST COMMON SCOPES:",
        SCOPE_CSV_HEADER,
        by_scope,
        options,
        lookup_scope,
        str::to_string,
    )
}

/// `(num_users, key)` rows for the csv output.
pub fn ranking_rows(stats: &TokenStats, top_n: usize) -> Vec<Vec<String>> {
    stats
        .rank((top_n > 0).then_some(top_n))
        .into_iter()
        .map(|(key, count)| vec![count.to_string(), key])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::stats::TokenStatsMap;
    use crate::tokens::summarize_token_stats;

    const MAIL: &str = "https://mail.google.com/";
    const TASKS: &str = "https://www.googleapis.com/auth/tasks";

    fn summaries() -> (TokenStats, TokenStats) {
        let mut raw = TokenStatsMap::new();
        raw.insert(format!("{} sync.example.com", MAIL), vec!["a@x.com".into(), "b@x.com".into()]);
        raw.insert(format!("{} sync.example.com", TASKS), vec!["a@x.com".into(), "b@x.com".into()]);
        raw.insert(format!("{} notes.example.com", MAIL), vec!["c@x.com".into()]);
        summarize_token_stats(&raw)
    }

    #[test]
    fn short_client_report() {
        let (by_client, _) = summaries();
        let lines = format_client_report(&by_client, &TokenReportOptions::default());
        assert_eq!(lines[2], "MOST COMMON CLIENT IDs:");
        assert_eq!(lines[4], "    NUM_USERS\tCLIENT_ID");
        assert_eq!(lines[5], "    2:\tsync.example.com");
        assert_eq!(lines[6], "    1:\tnotes.example.com");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn show_users_drills_down() {
        let (by_client, _) = summaries();
        let options = TokenReportOptions {
            top_n: 1,
            show_users: true,
            ..Default::default()
        };
        let lines = format_client_report(&by_client, &options);
        assert_eq!(lines[5], "    2:\tsync.example.com");
        assert_eq!(
            lines[6],
            format!("         2: Email (Read/Write/Send) [{}]", MAIL)
        );
        assert_eq!(lines[7], format!("            Tasks (Read/Write) [{}]", TASKS));
        assert_eq!(lines[9], "            a@x.com, b@x.com");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn scope_rows_for_csv() {
        let (_, by_scope) = summaries();
        let rows = ranking_rows(&by_scope, 0);
        assert_eq!(rows[0], vec!["3".to_string(), MAIL.to_string()]);
        assert_eq!(rows.len(), 2);
        let lines = format_scope_report(&by_scope, &TokenReportOptions::default());
        assert!(lines[5].ends_with(&format!("Email (Read/Write/Send) [{}]", MAIL)));
    }
}

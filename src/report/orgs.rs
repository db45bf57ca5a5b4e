use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{border, Counter};
use crate::error::{ToolError, ToolResult};
use crate::storage::WorkingStore;

/// Intermediate user report reused between runs unless `--force` is given.
pub const ORG_USERS_TEMP_FILE_NAME: &str = "_report_users_orgs.csv.tmp";
pub const ORGS_BY_ACTIVE_FILE_NAME: &str = "orgs_by_active.csv";
pub const ORGS_BY_OU_FILE_NAME: &str = "orgs_by_ou.csv";

/// Columns the intermediate report is generated with.
pub const ORG_REPORT_FIELDS: &[&str] = &["orgUnitPath", "suspended"];
pub const BY_ACTIVE_HEADER: &[&str] = &["ACTIVE", "SUSPENDED", "OU"];
pub const BY_OU_HEADER: &[&str] = &["OU", "ACTIVE", "SUSPENDED"];

/// Active and suspended user counts per org unit.
#[derive(Debug, Default, Clone)]
pub struct OrgCounts {
    pub active: Counter,
    pub suspended: Counter,
}

/// Tallies rows of `orgUnitPath,suspended`; the header row must come first.
pub fn count_org_rows(rows: &[Vec<String>]) -> ToolResult<OrgCounts> {
    let (header, rows) = rows.split_first().ok_or_else(|| {
        ToolError::MissingData(format!(
            "{} is empty. Use --force to regenerate it.",
            ORG_USERS_TEMP_FILE_NAME
        ))
    })?;
    if header.iter().map(String::as_str).ne(ORG_REPORT_FIELDS.iter().copied()) {
        return Err(ToolError::MissingData(format!(
            "Unexpected header in {}: {}. Use --force to regenerate it.",
            ORG_USERS_TEMP_FILE_NAME,
            header.join(",")
        )));
    }

    let mut counts = OrgCounts::default();
    for row in rows {
        let (Some(org), Some(suspended)) = (row.first(), row.get(1)) else {
            continue;
        };
        if suspended == "True" {
            counts.suspended.increment(org, 1);
        } else {
            counts.active.increment(org, 1);
        }
    }
    Ok(counts)
}

/// `(by_active, by_ou)` rows.
///
/// By-active lists org units with active users, busiest first. By-ou lists
/// every org unit in path order.
pub fn summarize_org_counts(counts: &OrgCounts) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    let by_active = counts
        .active
        .most_common(None)
        .into_iter()
        .map(|(org, active)| {
            vec![
                active.to_string(),
                counts.suspended.get(&org).to_string(),
                org,
            ]
        })
        .collect();

    let orgs: BTreeSet<String> = counts
        .active
        .most_common(None)
        .into_iter()
        .chain(counts.suspended.most_common(None))
        .map(|(org, _)| org)
        .collect();
    let by_ou = orgs
        .into_iter()
        .map(|org| {
            let active = counts.active.get(&org).to_string();
            let suspended = counts.suspended.get(&org).to_string();
            vec![org, active, suspended]
        })
        .collect();

    (by_active, by_ou)
}

/// Console rendering of both tables.
pub fn format_org_counts(by_active: &[Vec<String>], by_ou: &[Vec<String>]) -> Vec<String> {
    let mut lines = vec![border(), BY_ACTIVE_HEADER.join(",")];
    lines.extend(by_active.iter().map(|row| row.join(",")));
    lines.push(border());
    lines.push(BY_OU_HEADER.join(","));
    lines.extend(by_ou.iter().map(|row| row.join(",")));
    lines.push(border());
    lines
}

/// Writes both csv files, checking both are writable before writing either.
pub fn write_org_counts(
    store: &WorkingStore,
    by_active: Vec<Vec<String>>,
    by_ou: Vec<Vec<String>>,
    overwrite_ok: bool,
) -> ToolResult<Vec<PathBuf>> {
    store.ensure_writable(ORGS_BY_ACTIVE_FILE_NAME, overwrite_ok)?;
    store.ensure_writable(ORGS_BY_OU_FILE_NAME, overwrite_ok)?;
    let mut written = Vec::new();
    written.extend(store.write_csv(ORGS_BY_ACTIVE_FILE_NAME, BY_ACTIVE_HEADER, by_active, overwrite_ok)?);
    written.extend(store.write_csv(ORGS_BY_OU_FILE_NAME, BY_OU_HEADER, by_ou, overwrite_ok)?);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[(&str, &str)]) -> Vec<Vec<String>> {
        let mut rows = vec![vec!["orgUnitPath".to_string(), "suspended".to_string()]];
        rows.extend(data.iter().map(|(o, s)| vec![o.to_string(), s.to_string()]));
        rows
    }

    #[test]
    fn counts_active_and_suspended() {
        let counts = count_org_rows(&rows(&[
            ("/", "False"),
            ("/Sales", "False"),
            ("/Sales", "False"),
            ("/Sales", "True"),
            ("/Alumni", "True"),
        ]))
        .unwrap();
        let (by_active, by_ou) = summarize_org_counts(&counts);
        assert_eq!(
            by_active,
            vec![vec!["2", "1", "/Sales"], vec!["1", "0", "/"]]
        );
        assert_eq!(
            by_ou,
            vec![
                vec!["/", "1", "0"],
                vec!["/Alumni", "0", "1"],
                vec!["/Sales", "2", "1"],
            ]
        );
    }

    #[test]
    fn wrong_header_is_rejected() {
        let bad = vec![vec!["primaryEmail".to_string()]];
        let err = count_org_rows(&bad).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(count_org_rows(&[]).is_err());
    }

    #[test]
    fn formats_both_tables() {
        let lines = format_org_counts(
            &[vec!["1".into(), "0".into(), "/".into()]],
            &[vec!["/".into(), "1".into(), "0".into()]],
        );
        assert_eq!(lines[1], "ACTIVE,SUSPENDED,OU");
        assert_eq!(lines[2], "1,0,/");
        assert_eq!(lines[4], "OU,ACTIVE,SUSPENDED");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn csv_output_requires_force_for_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkingStore::at(dir.path().to_path_buf(), "altostrat.com").unwrap();
        let row = || vec![vec!["/".to_string(), "1".to_string(), "0".to_string()]];
        assert_eq!(write_org_counts(&store, row(), row(), false).unwrap().len(), 2);
        assert!(matches!(
            write_org_counts(&store, row(), row(), false),
            Err(ToolError::FileConflict { .. })
        ));
        write_org_counts(&store, row(), row(), true).unwrap();
    }
}

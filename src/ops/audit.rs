//! Fleet audit report.
//!
//! Read-only: gathers one CSV row per repository describing how far it has
//! drifted from its canonical state. `n/a` marks cells that do not apply,
//! e.g. remote-derived columns for a repository with no remote configured.

use std::io::Write;

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::{GitRepo, RemoteProtocol};
use crate::report::{Event, codes};

use super::ExecutorContext;

pub const AUDIT_HEADER: &str = "folder_name,final_github_repo,name_matches,remote_default_branch,local_branch,in_sync,remote_protocol,origin_matches_canonical,worktree_dirty,dirty_files";

const NOT_APPLICABLE: &str = "n/a";

/// One audit row, in column order.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub folder_name: String,
    pub final_github_repo: String,
    pub name_matches: String,
    pub remote_default_branch: String,
    pub local_branch: String,
    pub in_sync: String,
    pub remote_protocol: String,
    pub origin_matches_canonical: String,
    pub worktree_dirty: String,
    pub dirty_files: String,
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Inspect one repository. Lookup failures degrade cells to `n/a` rather
/// than failing the audit.
pub fn collect_row(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    remote_name: &str,
) -> Result<AuditRow, OperationError> {
    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
    let folder_name = record.folder_name();

    let final_pair = record.canonical.as_ref().or(record.origin.as_ref());
    let final_github_repo = final_pair
        .map(|pair| pair.to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());
    let name_matches = final_pair
        .map(|pair| yes_no(pair.repo == folder_name))
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let remote_default_branch = record
        .default_branch
        .clone()
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let local_branch = git.current_branch().ok();
    let local_head = git.rev_parse("HEAD").ok().flatten();
    let in_sync = match (&local_branch, &local_head, record.remote_detected) {
        (Some(branch), Some(head), true) => match git.remote_head(remote_name, branch) {
            Some(remote_head) => yes_no(remote_head == *head),
            None => NOT_APPLICABLE.to_string(),
        },
        _ => NOT_APPLICABLE.to_string(),
    };

    let remote_protocol = if record.remote_detected {
        git.try_remote_url(remote_name)
            .ok()
            .flatten()
            .map(|url| RemoteProtocol::classify(&url).to_string())
            .unwrap_or_else(|| NOT_APPLICABLE.to_string())
    } else {
        NOT_APPLICABLE.to_string()
    };

    let origin_matches_canonical = match (&record.origin, &record.canonical) {
        (Some(origin), Some(canonical)) => yes_no(
            origin.owner.eq_ignore_ascii_case(&canonical.owner)
                && origin.repo.eq_ignore_ascii_case(&canonical.repo),
        ),
        _ => NOT_APPLICABLE.to_string(),
    };

    let dirty_entries = git.status_lines().ok();
    let (worktree_dirty, dirty_files) = match dirty_entries {
        Some(entries) if entries.is_empty() => (yes_no(false), String::new()),
        Some(entries) => (yes_no(true), entries.join("; ")),
        None => (NOT_APPLICABLE.to_string(), String::new()),
    };

    ctx.reporter.report(
        &Event::info(codes::AUDIT_ROW)
            .repo(record.identity(), &record.path)
            .detail("folder", &folder_name),
    );

    Ok(AuditRow {
        folder_name,
        final_github_repo,
        name_matches,
        remote_default_branch,
        local_branch: local_branch.unwrap_or_else(|| NOT_APPLICABLE.to_string()),
        in_sync,
        remote_protocol,
        origin_matches_canonical,
        worktree_dirty,
        dirty_files,
    })
}

/// Write the report with its fixed header.
pub fn write_report(rows: &[AuditRow], out: &mut dyn Write) -> Result<(), OperationError> {
    let write = |out: &mut dyn Write, line: &str| {
        writeln!(out, "{line}").map_err(|err| {
            OperationError::new(
                operations::AUDIT,
                "audit report",
                Sentinel::FilesystemUnavailable,
                err.to_string(),
            )
        })
    };

    write(out, AUDIT_HEADER)?;
    for row in rows {
        let fields = [
            &row.folder_name,
            &row.final_github_repo,
            &row.name_matches,
            &row.remote_default_branch,
            &row.local_branch,
            &row.in_sync,
            &row.remote_protocol,
            &row.origin_matches_canonical,
            &row.worktree_dirty,
            &row.dirty_files,
        ];
        let line = fields
            .iter()
            .map(|field| csv_escape(field))
            .collect::<Vec<_>>()
            .join(",");
        write(out, &line)?;
    }
    Ok(())
}

/// Quote a CSV field when it contains a separator, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn report_has_fixed_header_and_one_line_per_row() {
        let row = AuditRow {
            folder_name: "widgets".to_string(),
            final_github_repo: "acme/widgets".to_string(),
            name_matches: "yes".to_string(),
            remote_default_branch: "master".to_string(),
            local_branch: "master".to_string(),
            in_sync: "n/a".to_string(),
            remote_protocol: "https".to_string(),
            origin_matches_canonical: "yes".to_string(),
            worktree_dirty: "yes".to_string(),
            dirty_files: "?? a.txt; M b.txt".to_string(),
        };
        let mut out = Vec::new();
        write_report(&[row], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(AUDIT_HEADER));
        assert_eq!(
            lines.next(),
            Some("widgets,acme/widgets,yes,master,master,n/a,https,yes,yes,?? a.txt; M b.txt")
        );
        assert_eq!(lines.next(), None);
    }
}

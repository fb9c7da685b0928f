//! History purging.
//!
//! Rewrites the full history of a repository to drop the given paths, then
//! expires reflogs so the purged blobs become collectable. Destructive and
//! always confirmation-gated.

use std::borrow::Cow;

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::GitRepo;
use crate::migrate::summarize_anyhow;
use crate::report::{Event, codes};
use crate::shell_exec::{Cmd, CommandError};

use super::ExecutorContext;

fn command_summary(err: CommandError) -> String {
    match err {
        CommandError::Failed(failed) => failed.summary(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    /// Repository-relative paths to remove from history. At least one.
    pub paths: Vec<String>,
}

pub fn purge_history(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &PurgeOptions,
) -> Result<(), OperationError> {
    let fail = |sentinel, message: String| {
        OperationError::new(
            operations::HISTORY_PURGE,
            record.path.display().to_string(),
            sentinel,
            message,
        )
    };

    if options.paths.is_empty() {
        return Err(fail(
            Sentinel::PathsRequired,
            "at least one path is required".to_string(),
        ));
    }

    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
    let clean = git
        .is_clean()
        .map_err(|err| fail(Sentinel::GitManagerUnavailable, summarize_anyhow(&err)))?;
    if !clean {
        return Err(fail(
            Sentinel::DirtyWorktree,
            "worktree must be clean before rewriting history".to_string(),
        ));
    }

    let escaped = options
        .paths
        .iter()
        .map(|path| shell_escape::escape(Cow::Borrowed(path.as_str())).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::HISTORY_PLAN)
                .repo(record.identity(), &record.path)
                .detail("paths", options.paths.join(";")),
        );
        return Ok(());
    }

    let prompt = format!(
        "Rewrite ALL history of {} to drop: {}?",
        record.identity(),
        options.paths.join(", ")
    );
    let allowed = ctx
        .gate
        .allow(&prompt)
        .map_err(|err| fail(Sentinel::UserConfirmationFailed, summarize_anyhow(&err)))?;
    if !allowed {
        ctx.reporter.report(
            &Event::info(codes::HISTORY_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "declined"),
        );
        return Ok(());
    }

    let index_filter = format!("git rm -r --cached --ignore-unmatch -- {escaped}");
    Cmd::git([
        "filter-branch",
        "--force",
        "--index-filter",
        index_filter.as_str(),
        "--prune-empty",
        "--tag-name-filter",
        "cat",
        "--",
        "--all",
    ])
    .current_dir(&record.path)
    .cancel_token(ctx.cancel)
    // filter-branch otherwise stalls on its scare warning
    .env("FILTER_BRANCH_SQUELCH_WARNING", "1")
    .run()
    .map_err(|err| fail(Sentinel::HistoryPurgeFailed, command_summary(err)))?;

    // Drop the filter-branch backup refs, or the purged objects stay
    // reachable through refs/original
    match git.run_command(
        &["for-each-ref", "--format=%(refname)", "refs/original/"],
        "list backup refs",
    ) {
        Ok(output) => {
            for reference in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
                git.run_command(&["update-ref", "-d", reference], "drop backup ref")
                    .map_err(|err| fail(Sentinel::HistoryPurgeFailed, summarize_anyhow(&err)))?;
            }
        }
        Err(err) => {
            log::warn!(
                "listing backup refs failed in {}: {err:#}",
                record.path.display()
            );
        }
    }

    // Make the purge effective on disk; failures here only leave garbage
    if let Err(err) = git.run_command(&["reflog", "expire", "--expire=now", "--all"], "reflog expire")
    {
        log::warn!("reflog expire failed in {}: {err:#}", record.path.display());
    }
    if let Err(err) = git.run_command(&["gc", "--prune=now"], "garbage collection") {
        log::warn!("gc failed in {}: {err:#}", record.path.display());
    }

    ctx.reporter.report(
        &Event::info(codes::HISTORY_PURGE)
            .repo(record.identity(), &record.path)
            .detail("paths", options.paths.join(";")),
    );
    Ok(())
}

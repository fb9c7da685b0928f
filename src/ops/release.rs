//! Release tagging.

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::GitRepo;
use crate::migrate::summarize_anyhow;
use crate::report::{Event, codes};
use crate::shell_exec::CommandError;

use super::ExecutorContext;

#[derive(Debug, Clone)]
pub struct TagOptions {
    pub remote_name: String,
    pub name: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetagOptions {
    pub remote_name: String,
    pub name: String,
    /// Ref the recreated tag must point at.
    pub target_ref: String,
}

fn fail(record: &RepoRecord, sentinel: Sentinel, message: String) -> OperationError {
    OperationError::new(
        operations::RELEASE_TAG,
        record.path.display().to_string(),
        sentinel,
        message,
    )
}

fn command_summary(err: &CommandError) -> String {
    match err {
        CommandError::Failed(failed) => failed.summary(),
        other => other.to_string(),
    }
}

/// Create an annotated tag and push it. An existing tag is a skip, which
/// makes re-runs no-ops.
pub fn tag(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &TagOptions,
) -> Result<(), OperationError> {
    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);

    let exists = git
        .tag_exists(&options.name)
        .map_err(|err| fail(record, Sentinel::ReleaseTagResolveFailed, summarize_anyhow(&err)))?;
    if exists {
        ctx.reporter.report(
            &Event::info(codes::RELEASE_SKIP)
                .repo(record.identity(), &record.path)
                .detail("tag", &options.name)
                .detail("reason", "exists"),
        );
        return Ok(());
    }

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::RELEASE_PLAN)
                .repo(record.identity(), &record.path)
                .detail("tag", &options.name),
        );
        return Ok(());
    }

    let message = options.message.clone().unwrap_or_else(|| {
        format!(
            "Release {} ({})",
            options.name,
            ctx.clock.now().format("%Y-%m-%d")
        )
    });

    git.create_annotated_tag(&options.name, &message, None)
        .map_err(|err| fail(record, Sentinel::ReleaseTagCreateFailed, command_summary(&err)))?;
    git.push_tag(&options.remote_name, &options.name, false)
        .map_err(|err| fail(record, Sentinel::ReleaseTagPushFailed, command_summary(&err)))?;

    ctx.reporter.report(
        &Event::info(codes::RELEASE_TAG)
            .repo(record.identity(), &record.path)
            .detail("tag", &options.name),
    );
    Ok(())
}

/// Move an existing tag to `target_ref`: verify the ref, delete the old tag
/// if present, recreate it, and force-push.
pub fn retag(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &RetagOptions,
) -> Result<(), OperationError> {
    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);

    let target_commit = git
        .rev_parse(&options.target_ref)
        .map_err(|err| fail(record, Sentinel::ReleaseTagResolveFailed, summarize_anyhow(&err)))?
        .ok_or_else(|| {
            fail(
                record,
                Sentinel::ReleaseTagResolveFailed,
                format!("target ref {} does not resolve", options.target_ref),
            )
        })?;

    let existing = git
        .rev_parse(&format!("refs/tags/{}", options.name))
        .map_err(|err| fail(record, Sentinel::ReleaseTagResolveFailed, summarize_anyhow(&err)))?;
    if existing.as_deref() == Some(target_commit.as_str()) {
        ctx.reporter.report(
            &Event::info(codes::RELEASE_SKIP)
                .repo(record.identity(), &record.path)
                .detail("tag", &options.name)
                .detail("reason", "up_to_date"),
        );
        return Ok(());
    }

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::RELEASE_PLAN)
                .repo(record.identity(), &record.path)
                .detail("tag", &options.name)
                .detail("target_ref", &options.target_ref),
        );
        return Ok(());
    }

    if existing.is_some() {
        git.delete_tag(&options.name).map_err(|err| {
            fail(record, Sentinel::ReleaseTagDeleteFailed, command_summary(&err))
        })?;
    }

    let message = format!(
        "Release {} ({})",
        options.name,
        ctx.clock.now().format("%Y-%m-%d")
    );
    git.create_annotated_tag(&options.name, &message, Some(&options.target_ref))
        .map_err(|err| fail(record, Sentinel::ReleaseTagCreateFailed, command_summary(&err)))?;
    git.push_tag(&options.remote_name, &options.name, true)
        .map_err(|err| fail(record, Sentinel::ReleaseTagPushFailed, command_summary(&err)))?;

    ctx.reporter.report(
        &Event::info(codes::RELEASE_TAG)
            .repo(record.identity(), &record.path)
            .detail("tag", &options.name)
            .detail("target_ref", &options.target_ref),
    );
    Ok(())
}

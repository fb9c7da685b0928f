//! Canonical remote retargeting.
//!
//! When the forge reports that a repository now lives under a different
//! owner (or name), the configured remote still points at the old location
//! and every push follows a redirect. This executor rewrites the remote URL
//! to the canonical pair, keeping the protocol the repository already uses.

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::{GitRepo, RemoteProtocol, host_of};
use crate::migrate::summarize_anyhow;
use crate::report::{Event, codes};

use super::ExecutorContext;

#[derive(Debug, Clone)]
pub struct RemoteUpdateOptions {
    pub remote_name: String,
}

pub fn update_to_canonical(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &RemoteUpdateOptions,
) -> Result<(), OperationError> {
    let fail = |sentinel, message: String| {
        OperationError::new(
            operations::REMOTE_UPDATE,
            record.path.display().to_string(),
            sentinel,
            message,
        )
    };

    let origin = record.origin.as_ref().ok_or_else(|| {
        fail(
            Sentinel::OriginOwnerMissing,
            "no owner/repository detected on the configured remote".to_string(),
        )
    })?;
    let canonical = record.canonical.as_ref().ok_or_else(|| {
        fail(
            Sentinel::CanonicalOwnerMissing,
            "forge did not resolve a canonical owner/repository".to_string(),
        )
    })?;

    if origin.owner.eq_ignore_ascii_case(&canonical.owner)
        && origin.repo.eq_ignore_ascii_case(&canonical.repo)
    {
        ctx.reporter.report(
            &Event::info(codes::REMOTE_SKIP)
                .repo(record.identity(), &record.path)
                .detail("origin", origin.to_string()),
        );
        return Ok(());
    }

    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
    let url = git
        .remote_url(&options.remote_name)
        .map_err(|err| fail(Sentinel::RemoteEnumerationFailed, summarize_anyhow(&err)))?;

    let protocol = RemoteProtocol::classify(&url);
    let target_url = canonical.url_for(&host_of(&url), protocol).ok_or_else(|| {
        fail(
            Sentinel::UnknownProtocol,
            format!("cannot rebuild {url} for an unrecognised protocol"),
        )
    })?;

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::REMOTE_PLAN)
                .repo(record.identity(), &record.path)
                .detail("from", url)
                .detail("to", target_url),
        );
        return Ok(());
    }

    let prompt = format!(
        "Retarget {} remote {} from {origin} to {canonical}?",
        record.folder_name(),
        options.remote_name
    );
    let allowed = ctx
        .gate
        .allow(&prompt)
        .map_err(|err| fail(Sentinel::UserConfirmationFailed, summarize_anyhow(&err)))?;
    if !allowed {
        ctx.reporter.report(
            &Event::info(codes::REMOTE_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "declined"),
        );
        return Ok(());
    }

    git.set_remote_url(&options.remote_name, &target_url)
        .map_err(|err| fail(Sentinel::RemoteUpdateFailed, summarize_anyhow(&err)))?;

    ctx.reporter.report(
        &Event::info(codes::REMOTE_UPDATE)
            .repo(record.identity(), &record.path)
            .detail("origin", origin.to_string())
            .detail("canonical", canonical.to_string())
            .detail("url", target_url),
    );
    Ok(())
}

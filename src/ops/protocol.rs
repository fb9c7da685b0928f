//! Remote protocol conversion.

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::{GitRepo, OwnerRepo, RemoteProtocol, host_of};
use crate::migrate::summarize_anyhow;
use crate::report::{Event, codes};

use super::ExecutorContext;

#[derive(Debug, Clone)]
pub struct ProtocolConvertOptions {
    pub remote_name: String,
    pub from: RemoteProtocol,
    pub to: RemoteProtocol,
}

/// Convert the configured remote's URL from one protocol to another.
///
/// Skips (with an event) when the current URL is not using the `from`
/// protocol, which also makes a second run a no-op.
pub fn convert(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &ProtocolConvertOptions,
) -> Result<(), OperationError> {
    let fail = |sentinel, message: String| {
        OperationError::new(
            operations::PROTOCOL_CONVERT,
            record.path.display().to_string(),
            sentinel,
            message,
        )
    };

    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
    let url = git.remote_url(&options.remote_name).map_err(|err| {
        fail(
            Sentinel::RemoteEnumerationFailed,
            summarize_anyhow(&err),
        )
    })?;

    let current = RemoteProtocol::classify(&url);
    if current != options.from {
        ctx.reporter.report(
            &Event::info(codes::PROTOCOL_SKIP)
                .repo(record.identity(), &record.path)
                .detail("current", current.to_string())
                .detail("from", options.from.to_string()),
        );
        return Ok(());
    }

    let pair = record
        .canonical
        .clone()
        .or_else(|| record.origin.clone())
        .or_else(|| OwnerRepo::from_url(&url))
        .ok_or_else(|| {
            fail(
                Sentinel::OriginOwnerMissing,
                format!("cannot derive owner/repository from {url}"),
            )
        })?;

    let target_url = pair.url_for(&host_of(&url), options.to).ok_or_else(|| {
        fail(
            Sentinel::UnknownProtocol,
            format!("no URL shape for protocol {}", options.to),
        )
    })?;

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::PROTOCOL_PLAN)
                .repo(record.identity(), &record.path)
                .detail("from", url)
                .detail("to", target_url),
        );
        return Ok(());
    }

    let prompt = format!(
        "Convert {} remote {} from {} to {}?",
        record.identity(),
        options.remote_name,
        options.from,
        options.to
    );
    let allowed = ctx
        .gate
        .allow(&prompt)
        .map_err(|err| fail(Sentinel::UserConfirmationFailed, summarize_anyhow(&err)))?;
    if !allowed {
        ctx.reporter.report(
            &Event::info(codes::PROTOCOL_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "declined"),
        );
        return Ok(());
    }

    git.set_remote_url(&options.remote_name, &target_url)
        .map_err(|err| fail(Sentinel::RemoteUpdateFailed, summarize_anyhow(&err)))?;

    ctx.reporter.report(
        &Event::info(codes::PROTOCOL_UPDATE)
            .repo(record.identity(), &record.path)
            .detail("from", options.from.to_string())
            .detail("to", options.to.to_string())
            .detail("url", target_url),
    );
    Ok(())
}

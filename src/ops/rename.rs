//! Repository folder renaming.
//!
//! Renames a repository directory to match its canonical name on the forge.
//! Case-only renames go through an intermediate path so they work on
//! case-insensitive filesystems, where the target name already "exists".

use std::fs;
use std::path::PathBuf;

use crate::discover::RepoRecord;
use crate::errors::{OperationError, Sentinel, operations};
use crate::git::GitRepo;
use crate::migrate::summarize_anyhow;
use crate::report::{Event, codes};

use super::ExecutorContext;

/// Attempts for the intermediate path of a case-only rename.
const CASE_RENAME_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct RenameOptions {
    /// Explicit target name. When unset, the canonical repository name is
    /// used, falling back to the origin repository name.
    pub desired_name: Option<String>,
    /// Create missing parent directories instead of failing.
    pub ensure_parents: bool,
}

/// Rename the repository folder. Returns the new path when a rename actually
/// happened so callers can keep operating on the moved worktree.
pub fn rename_folder(
    ctx: &ExecutorContext<'_>,
    record: &RepoRecord,
    options: &RenameOptions,
) -> Result<Option<PathBuf>, OperationError> {
    let fail = |sentinel, message: String| {
        OperationError::new(
            operations::FOLDER_RENAME,
            record.path.display().to_string(),
            sentinel,
            message,
        )
    };

    let desired = options.desired_name.clone().or_else(|| {
        record
            .canonical
            .as_ref()
            .or(record.origin.as_ref())
            .map(|pair| pair.repo.clone())
    });
    let Some(desired) = desired else {
        ctx.reporter.report(
            &Event::info(codes::REPO_FOLDER_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "no_target_name"),
        );
        return Ok(None);
    };

    let current_name = record.folder_name();
    if current_name == desired {
        ctx.reporter.report(
            &Event::info(codes::REPO_FOLDER_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "already_named")
                .detail("name", desired),
        );
        return Ok(None);
    }

    let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
    let dirty_entries = git
        .status_lines()
        .map_err(|err| fail(Sentinel::GitManagerUnavailable, summarize_anyhow(&err)))?;
    if !dirty_entries.is_empty() {
        ctx.reporter.report(
            &Event::warn(codes::REPO_FOLDER_SKIP)
                .repo(record.identity(), &record.path)
                .detail("reason", "dirty_worktree")
                .detail("dirty", dirty_entries.join("; ")),
        );
        return Ok(None);
    }

    let parent = record
        .path
        .parent()
        .map(PathBuf::from)
        .ok_or_else(|| fail(Sentinel::ParentMissing, "repository has no parent directory".into()))?;
    if !parent.exists() {
        if options.ensure_parents {
            fs::create_dir_all(&parent)
                .map_err(|err| fail(Sentinel::ParentCreationFailed, err.to_string()))?;
        } else {
            return Err(fail(
                Sentinel::ParentMissing,
                format!("{} does not exist", parent.display()),
            ));
        }
    } else if !parent.is_dir() {
        return Err(fail(
            Sentinel::ParentNotDirectory,
            format!("{} is not a directory", parent.display()),
        ));
    }

    let target = parent.join(&desired);
    let case_only = current_name.eq_ignore_ascii_case(&desired);
    if !case_only && target.exists() {
        return Err(fail(
            Sentinel::TargetExists,
            format!("{} already exists", target.display()),
        ));
    }

    if ctx.runtime.dry_run {
        ctx.reporter.report(
            &Event::info(codes::REPO_FOLDER_PLAN)
                .repo(record.identity(), &record.path)
                .detail("from", current_name)
                .detail("to", desired),
        );
        return Ok(None);
    }

    if case_only {
        rename_via_intermediate(record, &target, &fail)?;
    } else {
        fs::rename(&record.path, &target)
            .map_err(|err| fail(Sentinel::RenameFailed, err.to_string()))?;
    }

    ctx.reporter.report(
        &Event::info(codes::REPO_FOLDER_RENAME)
            .repo(record.identity(), &target)
            .detail("from", current_name)
            .detail("to", desired),
    );
    Ok(Some(target))
}

/// Two-step rename through `<old>.rename.<attempt>`, for filesystems where
/// the target name is the same directory as the source.
fn rename_via_intermediate(
    record: &RepoRecord,
    target: &PathBuf,
    fail: &dyn Fn(Sentinel, String) -> OperationError,
) -> Result<(), OperationError> {
    let mut last_error = None;
    for attempt in 1..=CASE_RENAME_ATTEMPTS {
        let intermediate = record
            .path
            .with_file_name(format!("{}.rename.{attempt}", record.folder_name()));
        if intermediate.exists() {
            continue;
        }
        match fs::rename(&record.path, &intermediate) {
            Ok(()) => {
                return match fs::rename(&intermediate, target) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // Put the worktree back where we found it
                        let _ = fs::rename(&intermediate, &record.path);
                        Err(fail(Sentinel::RenameFailed, err.to_string()))
                    }
                };
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(fail(
        Sentinel::RenameFailed,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no free intermediate path".to_string()),
    ))
}

//! Default-branch migration.
//!
//! [`BranchMigrator`] promotes a target branch to the repository default,
//! mutating local state (workflow files, commits) and forge state (Pages,
//! default branch, pull requests) with partial-failure tolerance. Phases are
//! classified three ways:
//!
//! - **fatal** — validation, dirty worktree, missing token, rewrite or
//!   push failures, non-404 default-branch failures: the migration aborts
//!   and yields no result;
//! - **warning** — Pages, PR listing/retargeting, protection checks, and
//!   deletion failures: recorded on the result as `*-SKIP:` lines;
//! - **silent skip** — every forge phase when no repository identifier is
//!   configured, and every remote phase after the forge signals that the
//!   repository does not exist (404-class).

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use anyhow::Context;

use crate::cancel::CancelToken;
use crate::forge::{Forge, MissingTokenError, PullRequest, PullRequestQuery};
use crate::git::GitRepo;
use crate::shell_exec::{CommandError, CommandFailed};

pub mod pages;
pub mod safety;
pub mod workflows;

pub use safety::{SafetyInputs, SafetyStatus};
pub use workflows::{RewriteRequest, WorkflowOutcome};

/// A required option was blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidInputError {
    pub field: &'static str,
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: value required", self.field)
    }
}

impl Error for InvalidInputError {}

/// The worktree had uncommitted changes and the caller did not opt out of
/// the clean gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyWorktreeError;

impl fmt::Display for DirtyWorktreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worktree must be clean")
    }
}

impl Error for DirtyWorktreeError {}

/// Fatal failure while updating the default branch on the forge.
#[derive(Debug)]
pub struct DefaultBranchUpdateError {
    pub repository_path: PathBuf,
    pub repository_identifier: String,
    pub source_branch: String,
    pub target_branch: String,
    source: Box<dyn Error + Send + Sync>,
}

impl DefaultBranchUpdateError {
    fn new(
        options: &MigrationOptions,
        identifier: &str,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            repository_path: options.repository_path.clone(),
            repository_identifier: identifier.to_string(),
            source_branch: options.source_branch.clone(),
            target_branch: options.target_branch.clone(),
            source: Box::new(source),
        }
    }
}

impl fmt::Display for DefaultBranchUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DEFAULT-BRANCH-UPDATE repository={} path={} source={} target={}: {}",
            self.repository_identifier,
            self.repository_path.display(),
            self.source_branch,
            self.target_branch,
            summarize_error(self.source.as_ref())
        )
    }
}

impl Error for DefaultBranchUpdateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref() as &(dyn Error + 'static))
    }
}

/// One-line summary of an error chain, stable across wrapping layers.
///
/// A [`MissingTokenError`] anywhere in the chain wins; otherwise the deepest
/// [`CommandFailed`]'s trimmed stderr; otherwise the error's own text.
pub fn summarize_error(err: &(dyn Error + 'static)) -> String {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(token) = e.downcast_ref::<MissingTokenError>() {
            return token.to_string();
        }
        current = e.source();
    }
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(failed) = e.downcast_ref::<CommandFailed>() {
            return failed.summary();
        }
        current = e.source();
    }
    err.to_string().trim().to_string()
}

/// [`summarize_error`] over an `anyhow` chain.
pub fn summarize_anyhow(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(token) = cause.downcast_ref::<MissingTokenError>() {
            return token.to_string();
        }
    }
    for cause in err.chain() {
        if let Some(failed) = cause.downcast_ref::<CommandFailed>() {
            return failed.summary();
        }
    }
    err.to_string().trim().to_string()
}

/// What to migrate and how.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub repository_path: PathBuf,
    pub remote_name: String,
    /// `owner/repository` on the forge. Blank switches every forge-touching
    /// phase into skip mode.
    pub repository_identifier: Option<String>,
    /// Repository-relative workflows directory, e.g. `.github/workflows`.
    pub workflows_directory: String,
    pub source_branch: String,
    pub target_branch: String,
    pub push_updates: bool,
    pub delete_source_branch: bool,
    pub enable_debug_logging: bool,
}

impl MigrationOptions {
    /// Trim all inputs and reject blank required fields.
    fn validated(&self) -> Result<MigrationOptions, InvalidInputError> {
        fn required(field: &'static str, value: &str) -> Result<String, InvalidInputError> {
            let value = value.trim();
            if value.is_empty() {
                Err(InvalidInputError { field })
            } else {
                Ok(value.to_string())
            }
        }

        if self.repository_path.as_os_str().is_empty() {
            return Err(InvalidInputError {
                field: "repository_path",
            });
        }

        let identifier = self
            .repository_identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(MigrationOptions {
            repository_path: self.repository_path.clone(),
            remote_name: required("remote_name", &self.remote_name)?,
            repository_identifier: identifier,
            workflows_directory: required("workflows_directory", &self.workflows_directory)?,
            source_branch: required("source_branch", &self.source_branch)?,
            target_branch: required("target_branch", &self.target_branch)?,
            push_updates: self.push_updates,
            delete_source_branch: self.delete_source_branch,
            enable_debug_logging: self.enable_debug_logging,
        })
    }
}

/// Per-invocation context for a migration.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    /// Opt-out for the clean-worktree gate.
    pub require_clean: bool,
    pub cancel: CancelToken,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self {
            require_clean: true,
            cancel: CancelToken::new(),
        }
    }
}

/// Everything a successful migration reports back.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub workflow_outcome: WorkflowOutcome,
    pub pages_configuration_updated: bool,
    pub default_branch_updated: bool,
    pub retargeted_pull_requests: Vec<u64>,
    pub safety_status: SafetyStatus,
    pub warnings: Vec<String>,
}

/// Orchestrates the migration phases.
pub struct BranchMigrator<'a> {
    forge: Option<&'a dyn Forge>,
    token: Option<String>,
}

impl<'a> BranchMigrator<'a> {
    pub fn new(forge: Option<&'a dyn Forge>, token: Option<String>) -> Self {
        Self { forge, token }
    }

    pub fn run(
        &self,
        ctx: &MigrationContext,
        options: &MigrationOptions,
    ) -> anyhow::Result<MigrationResult> {
        let options = options.validated()?;
        let debug = |phase: &str| {
            if options.enable_debug_logging {
                log::debug!(
                    "migration phase {phase} [{}]",
                    options.repository_path.display()
                );
            }
        };

        let git = GitRepo::at(&options.repository_path).with_cancel(&ctx.cancel);

        debug("clean-gate");
        if ctx.require_clean && !git.is_clean()? {
            return Err(DirtyWorktreeError.into());
        }

        debug("token-gate");
        if let Some(identifier) = options.repository_identifier.as_deref()
            && self.token.is_none()
        {
            return Err(DefaultBranchUpdateError::new(
                &options,
                identifier,
                MissingTokenError { required: true },
            )
            .into());
        }

        debug("workflow-rewrite");
        let workflow_outcome = workflows::rewrite_branch_filters(&RewriteRequest {
            repository_path: &options.repository_path,
            workflows_directory: &options.workflows_directory,
            source_branch: &options.source_branch,
            target_branch: &options.target_branch,
        })
        .context("workflow rewrite failed")?;

        debug("commit");
        let mut committed = false;
        if !workflow_outcome.updated_files.is_empty() {
            git.add_all(&options.workflows_directory)?;
            let subject = format!(
                "CI: switch workflow branch filters to {}",
                options.target_branch
            );
            match git.commit(&subject) {
                Ok(()) => committed = true,
                // Commonly "nothing to commit" when the index already matched
                Err(CommandError::Failed(failed)) => {
                    log::info!(
                        "workflow commit skipped in {}: {}",
                        options.repository_path.display(),
                        failed.summary()
                    );
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("committing workflow changes"));
                }
            }
        }

        debug("push");
        if committed && options.push_updates {
            git.push(&options.remote_name, &options.target_branch)?;
        }

        let mut warnings: Vec<String> = Vec::new();
        let mut remote_enabled = true;
        let mut pages_configuration_updated = false;
        let mut default_branch_updated = false;
        let mut retargeted_pull_requests: Vec<u64> = Vec::new();
        let mut listed: Vec<PullRequest> = Vec::new();
        let mut branch_protected = false;

        if let (Some(identifier), Some(forge)) =
            (options.repository_identifier.as_deref(), self.forge)
        {
            debug("pages");
            match pages::ensure_legacy_branch(
                Some(forge),
                identifier,
                &options.source_branch,
                &options.target_branch,
            ) {
                Ok(updated) => pages_configuration_updated = updated,
                Err(err) => {
                    warnings.push(format!("PAGES-SKIP: {identifier} ({})", summarize_error(&err)));
                }
            }

            debug("default-branch");
            match forge.set_default_branch(identifier, &options.target_branch) {
                Ok(()) => default_branch_updated = true,
                // The repository is gone remotely: no warning, no error, and
                // every later remote phase is skipped for this repository.
                Err(err) if err.is_missing_remote() => remote_enabled = false,
                Err(err) => {
                    return Err(DefaultBranchUpdateError::new(&options, identifier, err).into());
                }
            }

            debug("pr-list");
            if remote_enabled {
                match forge.list_pull_requests(
                    identifier,
                    &PullRequestQuery::open_against(&options.source_branch),
                ) {
                    Ok(pull_requests) => listed = pull_requests,
                    Err(err) => {
                        if err.is_missing_remote() {
                            remote_enabled = false;
                        }
                        warnings.push(format!("PR-LIST-SKIP: {}", summarize_error(&err)));
                    }
                }
            }

            debug("pr-retarget");
            if remote_enabled {
                for pull_request in &listed {
                    match forge.update_pull_request_base(
                        identifier,
                        pull_request.number,
                        &options.target_branch,
                    ) {
                        Ok(()) => retargeted_pull_requests.push(pull_request.number),
                        Err(err) => {
                            let missing = err.is_missing_remote();
                            warnings.push(format!(
                                "PR-RETARGET-SKIP: #{} ({})",
                                pull_request.number,
                                summarize_error(&err)
                            ));
                            if missing {
                                remote_enabled = false;
                                break;
                            }
                        }
                    }
                }
            }

            debug("protection");
            if remote_enabled {
                match forge.branch_protected(identifier, &options.source_branch) {
                    Ok(protected) => branch_protected = protected,
                    Err(err) => {
                        warnings.push(format!("PROTECTION-SKIP: {}", summarize_error(&err)));
                        // Fail closed: an unknown protection state blocks deletion
                        branch_protected = true;
                    }
                }
            }
        }

        debug("safety");
        let safety_status = safety::evaluate(SafetyInputs {
            open_pull_request_count: listed.len(),
            branch_protected,
            workflow_mentions: workflow_outcome.remaining_main_references,
        });

        debug("deletion");
        if options.delete_source_branch {
            if !safety_status.safe_to_delete {
                let reasons = safety_status.blocking_reasons.join("; ");
                log::warn!(
                    "not deleting {} in {}: {reasons}",
                    options.source_branch,
                    options.repository_path.display()
                );
                warnings.push(format!("DELETE-SKIP: unsafe to delete ({reasons})"));
            } else {
                let deletion = git
                    .delete_local_branch(&options.source_branch)
                    .and_then(|()| {
                        git.delete_remote_branch(&options.remote_name, &options.source_branch)
                    });
                if let Err(err) = deletion {
                    warnings.push(format!("DELETE-SKIP: {}", summarize_anyhow(&err)));
                }
            }
        }

        Ok(MigrationResult {
            workflow_outcome,
            pages_configuration_updated,
            default_branch_updated,
            retargeted_pull_requests,
            safety_status,
            warnings,
        })
    }
}

//! Typed operations over a single Git worktree.
//!
//! [`GitRepo`] binds a worktree path and runs `git` through
//! [`Cmd`](crate::shell_exec::Cmd). Errors are wrapped with the originating
//! operation and the repository path so they stay diagnosable after crossing
//! the workflow engine.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::cancel::CancelToken;
use crate::shell_exec::{Cmd, CommandError, CommandOutput};

mod url;

pub use url::{OwnerRepo, RemoteProtocol, host_of};

/// Handle for git operations on one worktree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    cancel: CancelToken,
}

impl GitRepo {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, token: &CancelToken) -> Self {
        self.cancel = token.clone();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name used as logging context ("." for a bare relative path).
    fn context(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    }

    fn git<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::git(args)
            .current_dir(&self.path)
            .cancel_token(&self.cancel)
            .context(self.context())
    }

    /// Run an arbitrary git command, wrapping failures with the operation
    /// name and the repository path.
    pub fn run_command(&self, args: &[&str], operation: &str) -> anyhow::Result<CommandOutput> {
        self.git(args.iter().copied())
            .run()
            .with_context(|| format!("{operation} in {}", self.path.display()))
    }

    /// True iff `git status --porcelain` yields no entries.
    pub fn is_clean(&self) -> anyhow::Result<bool> {
        Ok(self.status_lines()?.is_empty())
    }

    /// Raw porcelain status lines, trimmed.
    pub fn status_lines(&self) -> anyhow::Result<Vec<String>> {
        let output = self.run_command(&["status", "--porcelain"], "worktree status")?;
        Ok(output
            .stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub fn current_branch(&self) -> anyhow::Result<String> {
        let output = self.run_command(&["rev-parse", "--abbrev-ref", "HEAD"], "current branch")?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn remote_url(&self, remote: &str) -> anyhow::Result<String> {
        let output = self
            .git(["remote", "get-url", remote])
            .run()
            .with_context(|| {
                format!("remote url for {remote} in {}", self.path.display())
            })?;
        Ok(output.stdout.trim().to_string())
    }

    /// Remote URL, or `None` when the remote is not configured.
    pub fn try_remote_url(&self, remote: &str) -> anyhow::Result<Option<String>> {
        match self.git(["remote", "get-url", remote]).run() {
            Ok(output) => Ok(Some(output.stdout.trim().to_string())),
            // git exits 2 (modern) or 128 (older) for an unknown remote
            Err(CommandError::Failed(_)) => Ok(None),
            Err(err) => Err(anyhow::Error::new(err))
                .with_context(|| format!("remote url for {remote} in {}", self.path.display())),
        }
    }

    pub fn set_remote_url(&self, remote: &str, url: &str) -> anyhow::Result<()> {
        self.git(["remote", "set-url", remote, url])
            .run()
            .with_context(|| format!("set remote url for {remote} in {}", self.path.display()))?;
        Ok(())
    }

    /// Stage everything under `dir` (repository-relative).
    pub fn add_all(&self, dir: &str) -> anyhow::Result<()> {
        self.run_command(&["add", "-A", dir], "stage changes")?;
        Ok(())
    }

    /// Commit with the given subject. The raw [`CommandError`] is surfaced so
    /// callers can treat "nothing to commit" as a no-op.
    pub fn commit(&self, subject: &str) -> Result<(), CommandError> {
        self.git(["commit", "-m", subject]).run().map(|_| ())
    }

    pub fn push(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        self.run_command(&["push", remote, branch], "push")?;
        Ok(())
    }

    pub fn delete_local_branch(&self, branch: &str) -> anyhow::Result<()> {
        self.run_command(&["branch", "-D", branch], "delete local branch")?;
        Ok(())
    }

    pub fn delete_remote_branch(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        self.run_command(&["push", remote, "--delete", branch], "delete remote branch")?;
        Ok(())
    }

    /// Resolve a ref to a commit id; `None` when it does not resolve.
    pub fn rev_parse(&self, reference: &str) -> anyhow::Result<Option<String>> {
        let spec = format!("{reference}^{{commit}}");
        match self
            .git(["rev-parse", "--verify", "--quiet", spec.as_str()])
            .run()
        {
            Ok(output) => Ok(Some(output.stdout.trim().to_string())),
            Err(CommandError::Failed(_)) => Ok(None),
            Err(err) => Err(anyhow::Error::new(err))
                .with_context(|| format!("rev-parse {reference} in {}", self.path.display())),
        }
    }

    pub fn tag_exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.rev_parse(&format!("refs/tags/{name}"))?.is_some())
    }

    pub fn create_annotated_tag(
        &self,
        name: &str,
        message: &str,
        target: Option<&str>,
    ) -> Result<(), CommandError> {
        let mut args = vec!["tag", "-a", name, "-m", message];
        if let Some(target) = target {
            args.push(target);
        }
        self.git(args).run().map(|_| ())
    }

    pub fn delete_tag(&self, name: &str) -> Result<(), CommandError> {
        self.git(["tag", "-d", name]).run().map(|_| ())
    }

    pub fn push_tag(&self, remote: &str, name: &str, force: bool) -> Result<(), CommandError> {
        let refspec = format!("refs/tags/{name}");
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        args.push(&refspec);
        self.git(args).run().map(|_| ())
    }

    /// Commit id the remote advertises for `branch`, or `None` when the
    /// remote is unreachable or does not have the branch.
    pub fn remote_head(&self, remote: &str, branch: &str) -> Option<String> {
        let refspec = format!("refs/heads/{branch}");
        let output = self
            .git(["ls-remote", remote, refspec.as_str()])
            .run()
            .ok()?;
        output
            .stdout
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .filter(|sha| !sha.is_empty())
            .map(str::to_string)
    }
}

//! Typed operations over the code forge.
//!
//! The [`Forge`] trait is the narrow capability contract the migration
//! service and the audit executor consume; [`GhForge`] implements it by
//! driving the GitHub CLI (`gh`) through [`Cmd`](crate::shell_exec::Cmd).
//! Tests substitute their own implementations.

use std::error::Error;
use std::fmt;

use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::shell_exec::{Cmd, CommandError, CommandFailed};

mod token;

pub use token::{MissingTokenError, TOKEN_VARIABLES, resolve_token};

/// Basic repository metadata.
#[derive(Debug, Clone)]
pub struct RepoMetadata {
    pub name_with_owner: String,
    pub default_branch: Option<String>,
}

/// Pages publishing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesBuildType {
    /// Branch + path publishing (the pre-Actions mode).
    Legacy,
    /// Published from a workflow run.
    Workflow,
    None,
}

/// Pages configuration for a repository.
#[derive(Debug, Clone)]
pub struct PagesConfig {
    pub enabled: bool,
    pub build_type: PagesBuildType,
    pub source_branch: Option<String>,
    pub source_path: Option<String>,
}

impl PagesConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            build_type: PagesBuildType::None,
            source_branch: None,
            source_path: None,
        }
    }
}

/// Pull request listing filter.
#[derive(Debug, Clone)]
pub struct PullRequestQuery {
    pub state: String,
    pub base_branch: String,
    pub result_limit: u32,
}

impl PullRequestQuery {
    pub fn open_against(base: &str) -> Self {
        Self {
            state: "open".to_string(),
            base_branch: base.to_string(),
            result_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
}

/// Failures from forge operations.
///
/// `Operation` wraps the underlying command failure with the operation tag;
/// `Decode` covers unparsable CLI responses. The cause chain is preserved so
/// [`ForgeError::is_missing_remote`] and error summaries can inspect it.
#[derive(Debug)]
pub enum ForgeError {
    Operation {
        operation: &'static str,
        source: Box<dyn Error + Send + Sync>,
    },
    Decode {
        operation: &'static str,
        source: serde_json::Error,
    },
}

impl ForgeError {
    fn operation(operation: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
        ForgeError::Operation {
            operation,
            source: Box::new(source),
        }
    }

    /// Whether the failure signals that the repository does not exist on the
    /// forge (a 404-class response).
    ///
    /// Keys on English stderr substrings from the forge CLI; a non-English
    /// locale bypasses this classification and the caller sees a plain
    /// operation error instead.
    pub fn is_missing_remote(&self) -> bool {
        let mut current: Option<&(dyn Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(failed) = err.downcast_ref::<CommandFailed>() {
                let stderr = failed.stderr.to_ascii_lowercase();
                if stderr.contains("http 404")
                    || (stderr.contains("repository") && stderr.contains("not found"))
                {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeError::Operation { operation, .. } => write!(f, "forge {operation} failed"),
            ForgeError::Decode { operation, .. } => {
                write!(f, "decoding forge {operation} response failed")
            }
        }
    }
}

impl Error for ForgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ForgeError::Operation { source, .. } => Some(source.as_ref()),
            ForgeError::Decode { source, .. } => Some(source),
        }
    }
}

/// Capability contract over the forge.
pub trait Forge: Send + Sync {
    fn repo_metadata(&self, id: &str) -> Result<RepoMetadata, ForgeError>;
    fn pages_config(&self, id: &str) -> Result<PagesConfig, ForgeError>;
    fn update_pages_config(&self, id: &str, branch: &str, path: &str) -> Result<(), ForgeError>;
    fn list_pull_requests(
        &self,
        id: &str,
        query: &PullRequestQuery,
    ) -> Result<Vec<PullRequest>, ForgeError>;
    fn update_pull_request_base(&self, id: &str, number: u64, base: &str)
    -> Result<(), ForgeError>;
    fn set_default_branch(&self, id: &str, branch: &str) -> Result<(), ForgeError>;
    fn branch_protected(&self, id: &str, branch: &str) -> Result<bool, ForgeError>;
}

/// [`Forge`] implementation over the GitHub CLI.
pub struct GhForge {
    token: Option<String>,
    cancel: CancelToken,
}

impl GhForge {
    pub fn new(token: Option<String>, cancel: &CancelToken) -> Self {
        Self {
            token,
            cancel: cancel.clone(),
        }
    }

    /// Non-interactive `gh` invocation: no prompts, no color, no browser.
    fn gh<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Cmd::gh(args)
            .cancel_token(&self.cancel)
            .env("NO_COLOR", "1")
            .env("GH_PROMPT_DISABLED", "1")
            .env("GH_NO_UPDATE_NOTIFIER", "1");
        if let Some(token) = &self.token {
            cmd = cmd.env("GH_TOKEN", token);
        }
        cmd
    }

    fn run(&self, operation: &'static str, cmd: Cmd) -> Result<String, ForgeError> {
        match cmd.run() {
            Ok(output) => Ok(output.stdout),
            Err(CommandError::Failed(failed)) => Err(ForgeError::operation(operation, failed)),
            Err(err) => Err(ForgeError::operation(operation, err)),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        payload: &str,
    ) -> Result<T, ForgeError> {
        serde_json::from_str(payload).map_err(|source| ForgeError::Decode { operation, source })
    }
}

#[derive(Deserialize)]
struct GhRepoView {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<GhBranchRef>,
}

#[derive(Deserialize)]
struct GhBranchRef {
    name: String,
}

#[derive(Deserialize)]
struct GhPages {
    #[serde(default)]
    build_type: Option<String>,
    #[serde(default)]
    source: Option<GhPagesSource>,
}

#[derive(Deserialize)]
struct GhPagesSource {
    branch: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct GhBranch {
    #[serde(default)]
    protected: bool,
}

impl Forge for GhForge {
    fn repo_metadata(&self, id: &str) -> Result<RepoMetadata, ForgeError> {
        const OP: &str = "repo metadata";
        let stdout = self.run(
            OP,
            self.gh([
                "repo",
                "view",
                id,
                "--json",
                "nameWithOwner,defaultBranchRef",
            ]),
        )?;
        let view: GhRepoView = Self::decode(OP, &stdout)?;
        Ok(RepoMetadata {
            name_with_owner: view.name_with_owner,
            default_branch: view.default_branch_ref.map(|r| r.name),
        })
    }

    fn pages_config(&self, id: &str) -> Result<PagesConfig, ForgeError> {
        const OP: &str = "pages config";
        let endpoint = format!("repos/{id}/pages");
        match self.gh(["api", endpoint.as_str()]).run() {
            Ok(output) => {
                let pages: GhPages = Self::decode(OP, &output.stdout)?;
                let build_type = match pages.build_type.as_deref() {
                    Some("legacy") => PagesBuildType::Legacy,
                    Some("workflow") => PagesBuildType::Workflow,
                    _ => PagesBuildType::None,
                };
                let (source_branch, source_path) = match pages.source {
                    Some(source) => (Some(source.branch), source.path),
                    None => (None, None),
                };
                Ok(PagesConfig {
                    enabled: true,
                    build_type,
                    source_branch,
                    source_path,
                })
            }
            // The pages endpoint answers 404 when Pages is not enabled
            Err(CommandError::Failed(failed)) if is_http_404(&failed) => {
                Ok(PagesConfig::disabled())
            }
            Err(CommandError::Failed(failed)) => Err(ForgeError::operation(OP, failed)),
            Err(err) => Err(ForgeError::operation(OP, err)),
        }
    }

    fn update_pages_config(&self, id: &str, branch: &str, path: &str) -> Result<(), ForgeError> {
        let endpoint = format!("repos/{id}/pages");
        let branch_field = format!("source[branch]={branch}");
        let path_field = format!("source[path]={path}");
        self.run(
            "pages update",
            self.gh([
                "api",
                "--method",
                "PUT",
                endpoint.as_str(),
                "-f",
                branch_field.as_str(),
                "-f",
                path_field.as_str(),
            ]),
        )?;
        Ok(())
    }

    fn list_pull_requests(
        &self,
        id: &str,
        query: &PullRequestQuery,
    ) -> Result<Vec<PullRequest>, ForgeError> {
        const OP: &str = "pull request list";
        let limit = query.result_limit.to_string();
        let stdout = self.run(
            OP,
            self.gh([
                "pr",
                "list",
                "--repo",
                id,
                "--state",
                query.state.as_str(),
                "--base",
                query.base_branch.as_str(),
                "--limit",
                limit.as_str(),
                "--json",
                "number",
            ]),
        )?;
        Self::decode(OP, &stdout)
    }

    fn update_pull_request_base(
        &self,
        id: &str,
        number: u64,
        base: &str,
    ) -> Result<(), ForgeError> {
        let number = number.to_string();
        self.run(
            "pull request retarget",
            self.gh(["pr", "edit", number.as_str(), "--repo", id, "--base", base]),
        )?;
        Ok(())
    }

    fn set_default_branch(&self, id: &str, branch: &str) -> Result<(), ForgeError> {
        self.run(
            "default branch update",
            self.gh(["repo", "edit", id, "--default-branch", branch]),
        )?;
        Ok(())
    }

    fn branch_protected(&self, id: &str, branch: &str) -> Result<bool, ForgeError> {
        const OP: &str = "branch protection check";
        let endpoint = format!("repos/{id}/branches/{branch}");
        let stdout = self.run(OP, self.gh(["api", endpoint.as_str()]))?;
        let branch: GhBranch = Self::decode(OP, &stdout)?;
        Ok(branch.protected)
    }
}

fn is_http_404(failed: &CommandFailed) -> bool {
    failed.stderr.to_ascii_lowercase().contains("http 404")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_failed(stderr: &str) -> CommandFailed {
        CommandFailed {
            command: "gh repo edit acme/widgets --default-branch master".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn missing_remote_detected_from_http_404() {
        let err = ForgeError::operation("default branch update", command_failed("gh: Not Found (HTTP 404)"));
        assert!(err.is_missing_remote());
    }

    #[test]
    fn missing_remote_detected_from_repository_not_found() {
        let err = ForgeError::operation(
            "default branch update",
            command_failed("GraphQL: Could not resolve to a Repository with the name 'acme/gone'. repository not found"),
        );
        assert!(err.is_missing_remote());
    }

    #[test]
    fn unrelated_failures_are_not_missing_remote() {
        let err = ForgeError::operation(
            "default branch update",
            command_failed("gh: API rate limit exceeded (HTTP 403)"),
        );
        assert!(!err.is_missing_remote());
    }

    #[test]
    fn decode_errors_are_not_missing_remote() {
        let source = serde_json::from_str::<Vec<PullRequest>>("not json").unwrap_err();
        let err = ForgeError::Decode {
            operation: "pull request list",
            source,
        };
        assert!(!err.is_missing_remote());
        assert!(err.to_string().contains("decoding"));
    }

    #[test]
    fn pull_request_query_defaults() {
        let query = PullRequestQuery::open_against("main");
        assert_eq!(query.state, "open");
        assert_eq!(query.base_branch, "main");
        assert_eq!(query.result_limit, 100);
    }
}

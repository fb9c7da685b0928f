//! Executor-facing error taxonomy.
//!
//! Every per-repository operation converts its low-level failures into an
//! [`OperationError`] carrying a stable operation identifier, the subject it
//! was working on (usually a repository path or `owner/repo` identity), a
//! [`Sentinel`] code, and a human-readable message. The underlying cause is
//! preserved on the chain so callers can still `downcast_ref` to the original
//! failure (for example a [`CommandFailed`](crate::shell_exec::CommandFailed)).

use std::error::Error;
use std::fmt;

/// Stable operation identifiers used in diagnostics and event streams.
pub mod operations {
    pub const PROTOCOL_CONVERT: &str = "repo.protocol.convert";
    pub const REMOTE_UPDATE: &str = "repo.remote.update";
    pub const FOLDER_RENAME: &str = "repo.folder.rename";
    pub const HISTORY_PURGE: &str = "repo.history.purge";
    pub const RELEASE_TAG: &str = "release.tag";
    pub const AUDIT: &str = "repo.audit";
}

/// Stable sentinel codes for executor failures.
///
/// The `Display` form is the snake_case code that appears in diagnostics and
/// that tests assert against; do not rename variants without considering the
/// event stream contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Sentinel {
    GitManagerUnavailable,
    OriginOwnerMissing,
    CanonicalOwnerMissing,
    UnknownProtocol,
    RemoteUrlBuildFailed,
    UserConfirmationFailed,
    RemoteUpdateFailed,
    RemoteEnumerationFailed,
    FetchFailed,
    PullFailed,
    BranchSwitchFailed,
    BranchCreateFailed,
    FilesystemUnavailable,
    ParentMissing,
    ParentNotDirectory,
    TargetExists,
    DirtyWorktree,
    PathsRequired,
    ExecutorDependenciesMissing,
    RenameFailed,
    ParentCreationFailed,
    HistoryPurgeFailed,
    ReleaseTagCreateFailed,
    ReleaseTagPushFailed,
    ReleaseTagDeleteFailed,
    ReleaseTagResolveFailed,
}

/// An executor failure wrapped with its operation tag and subject.
#[derive(Debug)]
pub struct OperationError {
    pub operation: &'static str,
    pub subject: String,
    pub sentinel: Sentinel,
    pub message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl OperationError {
    pub fn new(
        operation: &'static str,
        subject: impl Into<String>,
        sentinel: Sentinel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            subject: subject.into(),
            sentinel,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause, preserving it for downstream inspection.
    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}: {}",
            self.operation, self.subject, self.sentinel, self.message
        )
    }
}

impl Error for OperationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

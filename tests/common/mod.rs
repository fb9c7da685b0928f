//! Shared test harness.
//!
//! `TestRepo` creates isolated git repositories in temporary directories
//! with local identity configured, so commits work without touching global
//! git config. `StubForge` is a scriptable forge with call recording, and
//! `buffered_reporter` captures the event stream for assertions.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use gitfleet::forge::{
    Forge, ForgeError, PagesBuildType, PagesConfig, PullRequest, PullRequestQuery, RepoMetadata,
};
use gitfleet::report::{Reporter, ReporterOptions};
use gitfleet::shell_exec::CommandFailed;
use tempfile::TempDir;

/// An isolated git repository in a temporary directory.
pub struct TestRepo {
    // Field order matters: the TempDir must drop last
    pub path: PathBuf,
    _dir: TempDir,
}

impl TestRepo {
    /// `git init` with a deterministic identity and an initial commit.
    pub fn new(initial_branch: &str) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dunce::canonicalize(dir.path()).expect("canonicalize temp dir");
        let repo = Self { path, _dir: dir };
        repo.git(&["init", "-q", "-b", initial_branch]);
        repo.git(&["config", "user.name", "test"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.write("README.md", "hello\n");
        repo.git(&["add", "-A"]);
        repo.git(&["commit", "-q", "-m", "init"]);
        repo
    }

    /// A named repository directory inside its own temp dir, so renames have
    /// a stable parent.
    pub fn named(folder: &str, initial_branch: &str) -> (TempDir, PathBuf) {
        let parent = TempDir::new().expect("create temp dir");
        let path = dunce::canonicalize(parent.path())
            .expect("canonicalize temp dir")
            .join(folder);
        std::fs::create_dir_all(&path).unwrap();
        run_git(&path, &["init", "-q", "-b", initial_branch]);
        run_git(&path, &["config", "user.name", "test"]);
        run_git(&path, &["config", "user.email", "test@example.com"]);
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        run_git(&path, &["add", "-A"]);
        run_git(&path, &["commit", "-q", "-m", "init"]);
        (parent, path)
    }

    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.path, args)
    }

    pub fn write(&self, relative: &str, content: &str) {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(target, content).unwrap();
    }

    pub fn commit_all(&self, subject: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", subject]);
    }

    pub fn add_remote(&self, name: &str, url: &str) {
        self.git(&["remote", "add", name, url]);
    }

    /// A bare repository usable as a push target over the filesystem.
    pub fn bare_remote(&self, name: &str) -> TempDir {
        let dir = TempDir::new().expect("create temp dir");
        let status = Command::new("git")
            .args(["init", "-q", "--bare"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
        self.add_remote(name, &dir.path().display().to_string());
        dir
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }
}

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .env("GIT_AUTHOR_DATE", "2024-01-01T00:00:00Z")
        .env("GIT_COMMITTER_DATE", "2024-01-01T00:00:00Z")
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Reporter writing into a shared in-memory buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn buffered_reporter() -> (Reporter, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let reporter = Reporter::new(
        Box::new(buffer.clone()),
        ReporterOptions { repo_headers: false },
    );
    (reporter, buffer)
}

fn command_failed(stderr: &str) -> CommandFailed {
    CommandFailed {
        command: "gh".to_string(),
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn operation_error(operation: &'static str, stderr: &str) -> ForgeError {
    ForgeError::Operation {
        operation,
        source: Box::new(command_failed(stderr)),
    }
}

/// Scriptable forge with call recording.
#[derive(Default)]
pub struct StubForge {
    pub pages: Option<PagesConfig>,
    pub open_pull_requests: Vec<u64>,
    pub protected: bool,
    /// stderr of a failure to inject into `set_default_branch`
    pub default_branch_stderr: Option<String>,
    /// stderr of a failure to inject into `update_pull_request_base`
    pub retarget_stderr: Option<String>,
    /// stderr of a failure to inject into `branch_protected`
    pub protection_stderr: Option<String>,
    pub calls: Mutex<Vec<String>>,
    pub pages_updates: Mutex<Vec<(String, String)>>,
    pub retargeted: Mutex<Vec<(u64, String)>>,
}

impl StubForge {
    pub fn legacy_pages_on(branch: &str) -> Option<PagesConfig> {
        Some(PagesConfig {
            enabled: true,
            build_type: PagesBuildType::Legacy,
            source_branch: Some(branch.to_string()),
            source_path: Some("/".to_string()),
        })
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Forge for StubForge {
    fn repo_metadata(&self, id: &str) -> Result<RepoMetadata, ForgeError> {
        self.record("repo_metadata");
        Ok(RepoMetadata {
            name_with_owner: id.to_string(),
            default_branch: Some("main".to_string()),
        })
    }

    fn pages_config(&self, _id: &str) -> Result<PagesConfig, ForgeError> {
        self.record("pages_config");
        Ok(self.pages.clone().unwrap_or_else(PagesConfig::disabled))
    }

    fn update_pages_config(&self, _id: &str, branch: &str, path: &str) -> Result<(), ForgeError> {
        self.record("update_pages_config");
        self.pages_updates
            .lock()
            .unwrap()
            .push((branch.to_string(), path.to_string()));
        Ok(())
    }

    fn list_pull_requests(
        &self,
        _id: &str,
        query: &PullRequestQuery,
    ) -> Result<Vec<PullRequest>, ForgeError> {
        self.record("list_pull_requests");
        assert_eq!(query.state, "open");
        Ok(self
            .open_pull_requests
            .iter()
            .map(|&number| PullRequest { number })
            .collect())
    }

    fn update_pull_request_base(
        &self,
        _id: &str,
        number: u64,
        base: &str,
    ) -> Result<(), ForgeError> {
        self.record("update_pull_request_base");
        if let Some(stderr) = &self.retarget_stderr {
            return Err(operation_error("pull request retarget", stderr));
        }
        self.retargeted
            .lock()
            .unwrap()
            .push((number, base.to_string()));
        Ok(())
    }

    fn set_default_branch(&self, _id: &str, _branch: &str) -> Result<(), ForgeError> {
        self.record("set_default_branch");
        match &self.default_branch_stderr {
            Some(stderr) => Err(operation_error("default branch update", stderr)),
            None => Ok(()),
        }
    }

    fn branch_protected(&self, _id: &str, _branch: &str) -> Result<bool, ForgeError> {
        self.record("branch_protected");
        match &self.protection_stderr {
            Some(stderr) => Err(operation_error("branch protection check", stderr)),
            None => Ok(self.protected),
        }
    }
}

//! Repository discovery.
//!
//! Walks the user-supplied roots looking for Git worktrees (directories
//! containing a `.git` entry) and builds one [`RepoRecord`] per repository.
//! Records are ordered by canonical absolute path so every run processes the
//! fleet in the same order.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::forge::Forge;
use crate::git::{GitRepo, OwnerRepo};

/// Everything later steps need to know about one discovered repository.
#[derive(Debug, Clone)]
pub struct RepoRecord {
    pub path: PathBuf,
    pub remote_detected: bool,
    /// Owner/repository parsed from the configured remote URL.
    pub origin: Option<OwnerRepo>,
    /// Owner/repository the forge reports (after redirects), when resolvable.
    pub canonical: Option<OwnerRepo>,
    pub default_branch: Option<String>,
}

impl RepoRecord {
    pub fn local_only(path: PathBuf) -> Self {
        Self {
            path,
            remote_detected: false,
            origin: None,
            canonical: None,
            default_branch: None,
        }
    }

    /// Identity used in event streams: canonical pair, else origin pair,
    /// else the directory name.
    pub fn identity(&self) -> String {
        self.canonical
            .as_ref()
            .or(self.origin.as_ref())
            .map(|pair| pair.to_string())
            .unwrap_or_else(|| self.folder_name())
    }

    pub fn folder_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The forge identifier for this repository, preferring the canonical
    /// pair over the origin one.
    pub fn identifier(&self) -> Option<String> {
        self.canonical
            .as_ref()
            .or(self.origin.as_ref())
            .map(|pair| pair.to_string())
    }
}

/// Find repositories under the given roots.
///
/// A root that is itself a repository is returned as-is; otherwise its
/// subdirectories are walked. Walking does not descend into a repository.
pub fn discover_repositories(roots: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for root in roots {
        let root = dunce::canonicalize(root)
            .with_context(|| format!("resolving root {}", root.display()))?;
        walk(&root, &mut found)
            .with_context(|| format!("scanning root {}", root.display()))?;
    }
    Ok(found.into_iter().collect())
}

fn walk(dir: &Path, found: &mut BTreeSet<PathBuf>) -> std::io::Result<()> {
    if dir.join(".git").exists() {
        found.insert(dir.to_path_buf());
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Symlinked directories are skipped to keep the walk loop-free
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        walk(&entry.path(), found)?;
    }
    Ok(())
}

/// Build discovery records for the given repositories.
///
/// Remote lookups are best-effort: a repository without the named remote, or
/// whose forge lookup fails, still produces a record with the corresponding
/// fields unset.
pub fn build_records(
    paths: Vec<PathBuf>,
    remote_name: &str,
    forge: Option<&dyn Forge>,
) -> Vec<RepoRecord> {
    paths
        .into_iter()
        .map(|path| build_record(path, remote_name, forge))
        .collect()
}

fn build_record(path: PathBuf, remote_name: &str, forge: Option<&dyn Forge>) -> RepoRecord {
    let git = GitRepo::at(&path);
    let url = match git.try_remote_url(remote_name) {
        Ok(url) => url,
        Err(err) => {
            log::debug!("remote detection failed in {}: {err:#}", path.display());
            None
        }
    };

    let Some(url) = url else {
        return RepoRecord::local_only(path);
    };

    let origin = OwnerRepo::from_url(&url);
    let mut canonical = None;
    let mut default_branch = None;

    if let (Some(forge), Some(origin)) = (forge, origin.as_ref()) {
        match forge.repo_metadata(&origin.to_string()) {
            Ok(metadata) => {
                canonical = OwnerRepo::parse_opt(&metadata.name_with_owner);
                default_branch = metadata.default_branch;
            }
            Err(err) => {
                log::debug!("forge lookup failed for {origin}: {err}");
            }
        }
    }

    RepoRecord {
        path,
        remote_detected: true,
        origin,
        canonical,
        default_branch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_init(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        let status = Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn finds_repos_under_roots_in_stable_order() {
        let tmp = TempDir::new().unwrap();
        git_init(&tmp.path().join("beta"));
        git_init(&tmp.path().join("alpha"));
        fs::create_dir_all(tmp.path().join("nested/deep")).unwrap();
        git_init(&tmp.path().join("nested/deep/gamma"));
        // A repo inside a repo is not descended into
        git_init(&tmp.path().join("alpha/vendored"));

        let repos = discover_repositories(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<String> = repos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn a_root_that_is_a_repo_is_returned_directly() {
        let tmp = TempDir::new().unwrap();
        git_init(tmp.path());
        let repos = discover_repositories(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(repos.len(), 1);
    }

    #[test]
    fn duplicate_roots_are_deduplicated() {
        let tmp = TempDir::new().unwrap();
        git_init(&tmp.path().join("repo"));
        let repos = discover_repositories(&[tmp.path().to_path_buf(), tmp.path().to_path_buf()])
            .unwrap();
        assert_eq!(repos.len(), 1);
    }

    #[test]
    fn record_without_remote_is_local_only() {
        let tmp = TempDir::new().unwrap();
        git_init(tmp.path());
        let records = build_records(vec![tmp.path().to_path_buf()], "origin", None);
        assert_eq!(records.len(), 1);
        assert!(!records[0].remote_detected);
        assert_eq!(records[0].origin, None);
        assert_eq!(records[0].identity(), records[0].folder_name());
    }

    #[test]
    fn record_parses_origin_from_remote_url() {
        let tmp = TempDir::new().unwrap();
        git_init(tmp.path());
        let status = Command::new("git")
            .args(["remote", "add", "origin", "git@github.com:acme/widgets.git"])
            .current_dir(tmp.path())
            .status()
            .unwrap();
        assert!(status.success());

        let records = build_records(vec![tmp.path().to_path_buf()], "origin", None);
        assert!(records[0].remote_detected);
        assert_eq!(records[0].origin, Some(OwnerRepo::new("acme", "widgets")));
        assert_eq!(records[0].identity(), "acme/widgets");
    }
}

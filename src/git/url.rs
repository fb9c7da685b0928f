//! Git remote URL parsing and construction.
//!
//! Classifies remote URLs by transport protocol and extracts the
//! `owner/repository` pair. Supports the URL shapes GitHub-family forges
//! actually hand out:
//!
//! - `https://<host>/<owner>/<repo>.git`
//! - `git@<host>:<owner>/<repo>.git`
//! - `ssh://git@<host>/<owner>/<repo>.git`
//! - `git://<host>/<owner>/<repo>.git`

use std::fmt;
use std::str::FromStr;

/// Transport protocol of a remote URL, classified by prefix.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RemoteProtocol {
    Git,
    Ssh,
    Https,
    Other,
}

impl RemoteProtocol {
    /// Classify a raw remote URL by its prefix.
    pub fn classify(url: &str) -> Self {
        let url = url.trim();
        if url.starts_with("git://") {
            RemoteProtocol::Git
        } else if url.starts_with("ssh://") || url.starts_with("git@") {
            RemoteProtocol::Ssh
        } else if url.starts_with("https://") || url.starts_with("http://") {
            RemoteProtocol::Https
        } else {
            RemoteProtocol::Other
        }
    }
}

/// An `owner/repository` pair with string round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRepo {
    pub owner: String,
    pub repo: String,
}

impl OwnerRepo {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse `owner/repository`. Empty input parses to `None`.
    pub fn parse_opt(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        input.parse().ok()
    }

    /// Extract the owner/repository pair from a remote URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();

        let path = if let Some(rest) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .or_else(|| url.strip_prefix("git://"))
        {
            // host/owner/repo
            rest.splitn(2, '/').nth(1)?
        } else if let Some(rest) = url.strip_prefix("ssh://") {
            // ssh://[user@]host/owner/repo
            let without_user = rest.rsplit('@').next()?;
            without_user.splitn(2, '/').nth(1)?
        } else if let Some(rest) = url.strip_prefix("git@") {
            // git@host:owner/repo
            rest.split_once(':')?.1
        } else {
            return None;
        };

        let mut parts = path.split('/');
        let owner = parts.next()?;
        let repo = parts.next()?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self::new(owner, repo))
    }

    /// Build a remote URL for this pair on `host` using the given protocol.
    ///
    /// Returns `None` for [`RemoteProtocol::Other`], which has no canonical
    /// URL shape.
    pub fn url_for(&self, host: &str, protocol: RemoteProtocol) -> Option<String> {
        match protocol {
            RemoteProtocol::Https => {
                Some(format!("https://{host}/{}/{}.git", self.owner, self.repo))
            }
            RemoteProtocol::Ssh => Some(format!("git@{host}:{}/{}.git", self.owner, self.repo)),
            RemoteProtocol::Git => Some(format!("git://{host}/{}/{}.git", self.owner, self.repo)),
            RemoteProtocol::Other => None,
        }
    }
}

impl fmt::Display for OwnerRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for OwnerRepo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, repo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected owner/repository, got {s:?}"))?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(format!("expected owner/repository, got {s:?}"));
        }
        Ok(Self::new(owner, repo))
    }
}

/// Extract the hostname from a remote URL, defaulting to `github.com` when
/// the URL cannot be parsed.
pub fn host_of(url: &str) -> String {
    let url = url.trim();
    let host = if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("git://"))
    {
        rest.split('/').next()
    } else if let Some(rest) = url.strip_prefix("ssh://") {
        rest.rsplit('@').next().and_then(|r| r.split('/').next())
    } else if let Some(rest) = url.strip_prefix("git@") {
        rest.split(':').next()
    } else {
        None
    };
    match host {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => "github.com".to_string(),
    }
}

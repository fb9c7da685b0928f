//! Configuration document.
//!
//! One YAML file declares common settings, reusable operations, and the
//! workflow step list. Unknown keys anywhere in the document are errors, so
//! typos fail fast instead of silently dropping steps.
//!
//! Search order: `--config <file>`, then
//! `$GITFLEET_CONFIG_SEARCH_PATH/gitfleet.yaml`, then `./gitfleet.yaml`.
//! A missing document (without `--config`) yields the default, empty one.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::engine::StepSpec;

pub const CONFIG_SEARCH_PATH_ENV: &str = "GITFLEET_CONFIG_SEARCH_PATH";
pub const CONFIG_FILE_NAME: &str = "gitfleet.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub common: CommonConfig,
    /// Named, reusable multi-action operations referencable from workflow
    /// steps by name.
    #[serde(default)]
    pub operations: IndexMap<String, TaskDefinition>,
    #[serde(default)]
    pub workflow: Vec<StepSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    /// Seed for the logger when `--log-level` and `RUST_LOG` are absent.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// A reusable sequence of actions with a shared clean-worktree gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    #[serde(default)]
    pub ensure_clean: bool,
    pub actions: Vec<TaskActionDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskActionDefinition {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub options: IndexMap<String, serde_yaml::Value>,
}

impl ConfigDocument {
    /// Load the configuration document.
    ///
    /// An explicit path must exist; the searched locations are optional.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in Self::search_candidates() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn search_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(dir) = std::env::var(CONFIG_SEARCH_PATH_ENV) {
            let dir = shellexpand::tilde(&dir).into_owned();
            candidates.push(PathBuf::from(dir).join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        candidates
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_document() {
        let doc: ConfigDocument = serde_yaml::from_str(
            r#"
common:
  log_level: debug
operations:
  housekeeping:
    ensure_clean: true
    actions:
      - type: repo.remote.update-protocol
        options: { from: git, to: https }
workflow:
  - name: convert
    action: repo.remote.update-protocol
    with: { from: git, to: https }
  - name: canonical
    after: [convert]
    action: repo.remote.update-to-canonical
"#,
        )
        .unwrap();

        assert_eq!(doc.common.log_level.as_deref(), Some("debug"));
        assert!(doc.operations["housekeeping"].ensure_clean);
        assert_eq!(
            doc.operations["housekeeping"].actions[0].action_type,
            "repo.remote.update-protocol"
        );
        assert_eq!(doc.workflow.len(), 2);
        assert_eq!(doc.workflow[1].after, vec!["convert"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_yaml::from_str::<ConfigDocument>("workflows: []\n").unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let err = serde_yaml::from_str::<ConfigDocument>(
            "workflow:\n  - action: x\n    wth: {}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn empty_document_is_default() {
        let doc: ConfigDocument = serde_yaml::from_str("{}").unwrap();
        assert!(doc.workflow.is_empty());
        assert!(doc.operations.is_empty());
        assert!(doc.common.log_level.is_none());
    }
}

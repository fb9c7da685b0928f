//! Pages retargeting.
//!
//! When a repository publishes Pages from a branch (the legacy build type)
//! and that branch is the one being migrated away from, the Pages source must
//! follow the rename or the site goes dark. Workflow-built Pages are
//! untouched.

use crate::forge::{Forge, ForgeError, PagesBuildType};

/// Retarget Pages from `source_branch` to `target_branch` when the legacy
/// build type points at the source branch.
///
/// Returns whether the configuration was updated. Skips silently when there
/// is no client, Pages is disabled, the build type is not legacy, the
/// configured branch differs, or the branches are equal. Errors propagate;
/// the migration service decides their criticality.
pub fn ensure_legacy_branch(
    forge: Option<&dyn Forge>,
    repository_identifier: &str,
    source_branch: &str,
    target_branch: &str,
) -> Result<bool, ForgeError> {
    let Some(forge) = forge else {
        return Ok(false);
    };
    if source_branch == target_branch {
        return Ok(false);
    }

    let config = forge.pages_config(repository_identifier)?;
    if !config.enabled
        || config.build_type != PagesBuildType::Legacy
        || config.source_branch.as_deref() != Some(source_branch)
    {
        return Ok(false);
    }

    let path = config.source_path.as_deref().unwrap_or("/");
    forge.update_pages_config(repository_identifier, target_branch, path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{PagesConfig, PullRequest, PullRequestQuery, RepoMetadata};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingForge {
        pages: Option<PagesConfig>,
        updates: Mutex<Vec<(String, String)>>,
    }

    impl Forge for RecordingForge {
        fn repo_metadata(&self, _id: &str) -> Result<RepoMetadata, ForgeError> {
            unimplemented!("not used")
        }

        fn pages_config(&self, _id: &str) -> Result<PagesConfig, ForgeError> {
            Ok(self.pages.clone().unwrap_or_else(PagesConfig::disabled))
        }

        fn update_pages_config(
            &self,
            _id: &str,
            branch: &str,
            path: &str,
        ) -> Result<(), ForgeError> {
            self.updates
                .lock()
                .unwrap()
                .push((branch.to_string(), path.to_string()));
            Ok(())
        }

        fn list_pull_requests(
            &self,
            _id: &str,
            _query: &PullRequestQuery,
        ) -> Result<Vec<PullRequest>, ForgeError> {
            Ok(Vec::new())
        }

        fn update_pull_request_base(
            &self,
            _id: &str,
            _number: u64,
            _base: &str,
        ) -> Result<(), ForgeError> {
            Ok(())
        }

        fn set_default_branch(&self, _id: &str, _branch: &str) -> Result<(), ForgeError> {
            Ok(())
        }

        fn branch_protected(&self, _id: &str, _branch: &str) -> Result<bool, ForgeError> {
            Ok(false)
        }
    }

    fn legacy_on(branch: &str) -> PagesConfig {
        PagesConfig {
            enabled: true,
            build_type: PagesBuildType::Legacy,
            source_branch: Some(branch.to_string()),
            source_path: Some("/docs".to_string()),
        }
    }

    #[test]
    fn no_client_is_a_silent_skip() {
        assert!(!ensure_legacy_branch(None, "acme/widgets", "main", "master").unwrap());
    }

    #[test]
    fn retargets_legacy_pages_on_the_source_branch() {
        let forge = RecordingForge {
            pages: Some(legacy_on("main")),
            ..Default::default()
        };
        let updated = ensure_legacy_branch(Some(&forge), "acme/widgets", "main", "master").unwrap();
        assert!(updated);
        assert_eq!(
            *forge.updates.lock().unwrap(),
            vec![("master".to_string(), "/docs".to_string())]
        );
    }

    #[test]
    fn skips_disabled_pages() {
        let forge = RecordingForge::default();
        assert!(!ensure_legacy_branch(Some(&forge), "acme/widgets", "main", "master").unwrap());
        assert!(forge.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn skips_workflow_build_type() {
        let forge = RecordingForge {
            pages: Some(PagesConfig {
                build_type: PagesBuildType::Workflow,
                ..legacy_on("main")
            }),
            ..Default::default()
        };
        assert!(!ensure_legacy_branch(Some(&forge), "acme/widgets", "main", "master").unwrap());
    }

    #[test]
    fn skips_when_pages_publishes_from_another_branch() {
        let forge = RecordingForge {
            pages: Some(legacy_on("gh-pages")),
            ..Default::default()
        };
        assert!(!ensure_legacy_branch(Some(&forge), "acme/widgets", "main", "master").unwrap());
        assert!(forge.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn skips_identical_branches() {
        let forge = RecordingForge {
            pages: Some(legacy_on("main")),
            ..Default::default()
        };
        assert!(!ensure_legacy_branch(Some(&forge), "acme/widgets", "main", "main").unwrap());
    }
}

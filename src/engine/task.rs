//! Step dispatch.
//!
//! [`Tasks`] maps a step's action name onto the per-repository executors,
//! parsing the (already templated) options into typed structs. Unknown
//! option keys are errors. Steps may also reference a reusable operation
//! from the configuration document by name; its actions run in sequence
//! behind an optional clean-worktree gate.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::config::TaskDefinition;
use crate::discover::RepoRecord;
use crate::forge::Forge;
use crate::git::{GitRepo, RemoteProtocol};
use crate::migrate::{BranchMigrator, MigrationContext, MigrationOptions};
use crate::ops::audit::{self, AuditRow};
use crate::ops::protocol::{self, ProtocolConvertOptions};
use crate::ops::purge::{self, PurgeOptions};
use crate::ops::release::{self, RetagOptions, TagOptions};
use crate::ops::remote::{self, RemoteUpdateOptions};
use crate::ops::rename::{self, RenameOptions};
use crate::ops::ExecutorContext;
use crate::report::{Event, codes};

use super::{Step, template};

/// Executes one `(step, repository)` pair. The engine renders templates and
/// holds the per-repository lock before calling in.
pub trait ActionDispatcher: Send + Sync {
    /// Whether this dispatcher can execute the action; checked during
    /// workflow validation, before anything runs.
    fn knows_action(&self, action: &str) -> bool;

    fn execute(
        &self,
        ctx: &ExecutorContext<'_>,
        step: &Step,
        options: &IndexMap<String, Value>,
        record: &mut RepoRecord,
    ) -> anyhow::Result<()>;

    /// Called once after the whole workflow completed.
    fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

const BUILTIN_ACTIONS: [&str; 8] = [
    "repo.remote.update-protocol",
    "repo.remote.update-to-canonical",
    "repo.folder.rename",
    "repo.history.purge",
    "branch.default",
    "release.tag",
    "release.retag",
    "audit",
];

fn default_remote() -> String {
    "origin".to_string()
}

fn default_workflows_dir() -> String {
    ".github/workflows".to_string()
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolStepOptions {
    from: RemoteProtocol,
    to: RemoteProtocol,
    #[serde(default = "default_remote")]
    remote: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct CanonicalStepOptions {
    #[serde(default = "default_remote")]
    remote: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RenameStepOptions {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ensure_parents: bool,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct PurgeStepOptions {
    paths: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TagStepOptions {
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "default_remote")]
    remote: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RetagStepOptions {
    name: String,
    target_ref: String,
    #[serde(default = "default_remote")]
    remote: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultBranchStepOptions {
    source: String,
    target: String,
    #[serde(default = "default_remote")]
    remote: String,
    #[serde(default = "default_workflows_dir")]
    workflows_dir: String,
    #[serde(default)]
    push: bool,
    #[serde(default)]
    delete_source: bool,
    /// Forge identifier override; defaults to the discovered identity.
    #[serde(default)]
    repo: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct AuditStepOptions {
    #[serde(default)]
    output: Option<String>,
}

fn parse_options<T: DeserializeOwned>(
    action: &str,
    options: &IndexMap<String, Value>,
) -> anyhow::Result<T> {
    let mapping: serde_yaml::Mapping = options
        .iter()
        .map(|(key, value)| (Value::String(key.clone()), value.clone()))
        .collect();
    serde_yaml::from_value(Value::Mapping(mapping))
        .with_context(|| format!("invalid options for action {action}"))
}

/// The default dispatcher wiring actions to executors.
pub struct Tasks<'a> {
    remote_name: String,
    forge: Option<&'a dyn Forge>,
    token: Option<String>,
    operations: IndexMap<String, TaskDefinition>,
    audit_rows: Mutex<Vec<(PathBuf, AuditRow)>>,
    audit_output: Mutex<Option<PathBuf>>,
}

impl<'a> Tasks<'a> {
    pub fn new(
        forge: Option<&'a dyn Forge>,
        token: Option<String>,
        operations: IndexMap<String, TaskDefinition>,
    ) -> Self {
        Self {
            remote_name: default_remote(),
            forge,
            token,
            operations,
            audit_rows: Mutex::new(Vec::new()),
            audit_output: Mutex::new(None),
        }
    }

    fn run_builtin(
        &self,
        ctx: &ExecutorContext<'_>,
        action: &str,
        options: &IndexMap<String, Value>,
        record: &mut RepoRecord,
    ) -> anyhow::Result<()> {
        match action {
            "repo.remote.update-protocol" => {
                let opts: ProtocolStepOptions = parse_options(action, options)?;
                protocol::convert(
                    ctx,
                    record,
                    &ProtocolConvertOptions {
                        remote_name: opts.remote,
                        from: opts.from,
                        to: opts.to,
                    },
                )?;
            }
            "repo.remote.update-to-canonical" => {
                let opts: CanonicalStepOptions = parse_options(action, options)?;
                remote::update_to_canonical(
                    ctx,
                    record,
                    &RemoteUpdateOptions {
                        remote_name: opts.remote,
                    },
                )?;
            }
            "repo.folder.rename" => {
                let opts: RenameStepOptions = parse_options(action, options)?;
                let moved = rename::rename_folder(
                    ctx,
                    record,
                    &RenameOptions {
                        desired_name: opts.name,
                        ensure_parents: opts.ensure_parents,
                    },
                )?;
                if let Some(new_path) = moved {
                    // Later steps must operate on the moved worktree
                    record.path = new_path;
                }
            }
            "repo.history.purge" => {
                let opts: PurgeStepOptions = parse_options(action, options)?;
                purge::purge_history(ctx, record, &PurgeOptions { paths: opts.paths })?;
            }
            "release.tag" => {
                let opts: TagStepOptions = parse_options(action, options)?;
                release::tag(
                    ctx,
                    record,
                    &TagOptions {
                        remote_name: opts.remote,
                        name: opts.name,
                        message: opts.message,
                    },
                )?;
            }
            "release.retag" => {
                let opts: RetagStepOptions = parse_options(action, options)?;
                release::retag(
                    ctx,
                    record,
                    &RetagOptions {
                        remote_name: opts.remote,
                        name: opts.name,
                        target_ref: opts.target_ref,
                    },
                )?;
            }
            "branch.default" => {
                let opts: DefaultBranchStepOptions = parse_options(action, options)?;
                self.run_default_branch(ctx, record, opts)?;
            }
            "audit" => {
                let opts: AuditStepOptions = parse_options(action, options)?;
                if let Some(output) = opts.output {
                    *self.audit_output.lock().unwrap() = Some(PathBuf::from(output));
                }
                let row = audit::collect_row(ctx, record, &self.remote_name)?;
                self.audit_rows
                    .lock()
                    .unwrap()
                    .push((record.path.clone(), row));
            }
            other => anyhow::bail!("unknown action {other}"),
        }
        Ok(())
    }

    fn run_default_branch(
        &self,
        ctx: &ExecutorContext<'_>,
        record: &RepoRecord,
        opts: DefaultBranchStepOptions,
    ) -> anyhow::Result<()> {
        if ctx.runtime.dry_run {
            ctx.reporter.report(
                &Event::info(codes::WORKFLOW_PLAN)
                    .repo(record.identity(), &record.path)
                    .detail("source", &opts.source)
                    .detail("target", &opts.target),
            );
            return Ok(());
        }

        let identifier = opts.repo.clone().or_else(|| record.identifier());
        let migrator = BranchMigrator::new(self.forge, self.token.clone());
        let migration_ctx = MigrationContext {
            require_clean: true,
            cancel: ctx.cancel.clone(),
        };
        let result = migrator.run(
            &migration_ctx,
            &MigrationOptions {
                repository_path: record.path.clone(),
                remote_name: opts.remote,
                repository_identifier: identifier,
                workflows_directory: opts.workflows_dir,
                source_branch: opts.source,
                target_branch: opts.target,
                push_updates: opts.push,
                delete_source_branch: opts.delete_source,
                enable_debug_logging: false,
            },
        )?;

        for warning in &result.warnings {
            ctx.reporter.report(
                &Event::warn(codes::WORKFLOW_DEFAULT)
                    .repo(record.identity(), &record.path)
                    .message(warning),
            );
        }
        ctx.reporter.report(
            &Event::info(codes::WORKFLOW_DEFAULT)
                .repo(record.identity(), &record.path)
                .detail("updated_files", result.workflow_outcome.updated_files.len().to_string())
                .detail("default_branch_updated", result.default_branch_updated.to_string())
                .detail("pages_updated", result.pages_configuration_updated.to_string())
                .detail("retargeted_prs", result.retargeted_pull_requests.len().to_string())
                .detail("safe_to_delete", result.safety_status.safe_to_delete.to_string()),
        );
        Ok(())
    }

    fn run_operation(
        &self,
        ctx: &ExecutorContext<'_>,
        step: &Step,
        definition: &TaskDefinition,
        record: &mut RepoRecord,
    ) -> anyhow::Result<()> {
        if definition.ensure_clean {
            let git = GitRepo::at(&record.path).with_cancel(ctx.cancel);
            if !git.is_clean()? {
                ctx.reporter.report(
                    &Event::warn(codes::TASK_SKIP)
                        .repo(record.identity(), &record.path)
                        .detail("step", &step.name)
                        .detail("reason", "dirty_worktree"),
                );
                return Ok(());
            }
        }

        for action in &definition.actions {
            let rendered = template::render_options(&action.options, record)?;
            self.run_builtin(ctx, &action.action_type, &rendered, record)?;
        }
        Ok(())
    }
}

impl ActionDispatcher for Tasks<'_> {
    fn knows_action(&self, action: &str) -> bool {
        BUILTIN_ACTIONS.contains(&action) || self.operations.contains_key(action)
    }

    fn execute(
        &self,
        ctx: &ExecutorContext<'_>,
        step: &Step,
        options: &IndexMap<String, Value>,
        record: &mut RepoRecord,
    ) -> anyhow::Result<()> {
        if let Some(definition) = self.operations.get(&step.action) {
            return self.run_operation(ctx, step, definition, record);
        }
        self.run_builtin(ctx, &step.action, options, record)
    }

    fn finish(&self) -> anyhow::Result<()> {
        let mut rows = self.audit_rows.lock().unwrap();
        if rows.is_empty() {
            return Ok(());
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        let rows: Vec<AuditRow> = rows.iter().map(|(_, row)| row.clone()).collect();

        let output = self.audit_output.lock().unwrap().clone();
        match output {
            Some(path) => {
                let mut file = std::fs::File::create(&path)
                    .with_context(|| format!("creating audit report {}", path.display()))?;
                audit::write_report(&rows, &mut file)?;
                file.flush()?;
            }
            None => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                audit::write_report(&rows, &mut out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_options(source: &str) -> IndexMap<String, Value> {
        serde_yaml::from_str(source).unwrap()
    }

    #[test]
    fn parses_typed_options_with_defaults() {
        let opts: ProtocolStepOptions =
            parse_options("repo.remote.update-protocol", &yaml_options("{from: git, to: https}"))
                .unwrap();
        assert_eq!(opts.remote, "origin");
        assert_eq!(opts.from, RemoteProtocol::Git);
        assert_eq!(opts.to, RemoteProtocol::Https);

        let opts: DefaultBranchStepOptions = parse_options(
            "branch.default",
            &yaml_options("{source: main, target: master}"),
        )
        .unwrap();
        assert_eq!(opts.workflows_dir, ".github/workflows");
        assert!(!opts.push);
        assert_eq!(opts.repo, None);
    }

    #[test]
    fn unknown_option_keys_are_errors() {
        let err = parse_options::<ProtocolStepOptions>(
            "repo.remote.update-protocol",
            &yaml_options("{from: git, to: https, remot: origin}"),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn builtin_actions_are_known() {
        let tasks = Tasks::new(None, None, IndexMap::new());
        assert!(tasks.knows_action("branch.default"));
        assert!(tasks.knows_action("audit"));
        assert!(!tasks.knows_action("no.such.action"));
    }

    #[test]
    fn configured_operations_are_known() {
        let mut operations = IndexMap::new();
        operations.insert(
            "housekeeping".to_string(),
            TaskDefinition {
                ensure_clean: true,
                actions: Vec::new(),
            },
        );
        let tasks = Tasks::new(None, None, operations);
        assert!(tasks.knows_action("housekeeping"));
    }
}

//! Command-line surface.
//!
//! Thin glue: flags are parsed into a synthetic one-step workflow (or, for
//! `gf workflow`, the configuration document's step list) and handed to the
//! engine, so every command shares discovery, concurrency, events, and
//! failure aggregation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde_yaml::Value;

use crate::cancel::CancelToken;
use crate::config::ConfigDocument;
use crate::confirm::{ConfirmPolicy, Gate, StdinPrompter};
use crate::discover;
use crate::engine::{Engine, ResolvedWorkflow, StepSpec, Tasks};
use crate::forge::{Forge, GhForge, resolve_token};
use crate::git::RemoteProtocol;
use crate::ops::{RuntimeOptions, SystemClock};
use crate::report::{Reporter, ReporterOptions};

#[derive(Debug, Parser)]
#[command(
    name = "gf",
    version,
    about = "Fleet-wide maintenance for GitHub-hosted Git repositories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Root directories to scan for repositories (repeatable)
    #[arg(long, global = true, value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Configuration document
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Plan without mutating anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Answer yes to every confirmation
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Worker threads for fanning out across repositories
    #[arg(long, global = true, default_value_t = 4)]
    pub workers: usize,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a CSV report describing every discovered repository
    Audit {
        /// Report file; stdout when omitted
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Promote a new default branch, locally and on the forge
    #[command(alias = "branch-default")]
    Default {
        #[arg(long, default_value = "main")]
        source: String,
        #[arg(long, default_value = "master")]
        target: String,
        #[arg(long, default_value = "origin")]
        remote: String,
        /// Forge identifier override (owner/repository); detected per
        /// repository when omitted
        #[arg(long, value_name = "OWNER/REPO")]
        repo: Option<String>,
        #[arg(long, default_value = ".github/workflows", value_name = "DIR")]
        workflows_dir: String,
        /// Push the workflow rewrite commit
        #[arg(long)]
        push: bool,
        /// Delete the source branch when the safety evaluation allows it
        #[arg(long)]
        delete_source: bool,
    },
    /// Repository maintenance operations
    #[command(subcommand)]
    Repo(RepoCommands),
    /// Release tagging operations
    #[command(subcommand)]
    Release(ReleaseCommands),
    /// Run the workflow declared in the configuration document
    Workflow,
}

#[derive(Debug, Subcommand)]
pub enum RepoCommands {
    #[command(subcommand)]
    Folder(FolderCommands),
    #[command(subcommand)]
    Remote(RemoteCommands),
    #[command(subcommand)]
    History(HistoryCommands),
}

#[derive(Debug, Subcommand)]
pub enum FolderCommands {
    /// Rename repository folders to their canonical repository name
    Rename {
        /// Explicit target name instead of the canonical one
        #[arg(long)]
        name: Option<String>,
        /// Create missing parent directories
        #[arg(long)]
        ensure_parents: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RemoteCommands {
    /// Convert remote URLs between protocols
    UpdateProtocol {
        #[arg(long)]
        from: RemoteProtocol,
        #[arg(long)]
        to: RemoteProtocol,
        #[arg(long, default_value = "origin")]
        remote: String,
    },
    /// Point remotes at the canonical owner/repository
    UpdateToCanonical {
        #[arg(long, default_value = "origin")]
        remote: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommands {
    /// Rewrite history to drop the given paths everywhere
    Purge {
        /// Repository-relative path to purge (repeatable)
        #[arg(long = "path", value_name = "PATH", required = true)]
        paths: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReleaseCommands {
    /// Create and push an annotated release tag
    Tag {
        #[arg(long)]
        name: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long, default_value = "origin")]
        remote: String,
    },
    /// Move an existing release tag to a new target ref
    Retag {
        #[arg(long)]
        name: String,
        #[arg(long)]
        target_ref: String,
        #[arg(long, default_value = "origin")]
        remote: String,
    },
}

fn string(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn options(pairs: Vec<(&str, Value)>) -> IndexMap<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Translate a subcommand into workflow steps.
fn steps_for(command: &Commands, config: &ConfigDocument) -> anyhow::Result<Vec<StepSpec>> {
    let single = |name: &str, action: &str, with: IndexMap<String, Value>| {
        vec![StepSpec {
            name: Some(name.to_string()),
            after: Vec::new(),
            action: action.to_string(),
            with,
        }]
    };

    Ok(match command {
        Commands::Audit { output } => {
            let mut with = IndexMap::new();
            if let Some(output) = output {
                with.insert("output".to_string(), string(output.display().to_string()));
            }
            single("audit", "audit", with)
        }
        Commands::Default {
            source,
            target,
            remote,
            repo,
            workflows_dir,
            push,
            delete_source,
        } => {
            let mut with = options(vec![
                ("source", string(source)),
                ("target", string(target)),
                ("remote", string(remote)),
                ("workflows_dir", string(workflows_dir)),
                ("push", Value::Bool(*push)),
                ("delete_source", Value::Bool(*delete_source)),
            ]);
            if let Some(repo) = repo {
                with.insert("repo".to_string(), string(repo));
            }
            single("default-branch", "branch.default", with)
        }
        Commands::Repo(RepoCommands::Folder(FolderCommands::Rename { name, ensure_parents })) => {
            let mut with = options(vec![("ensure_parents", Value::Bool(*ensure_parents))]);
            if let Some(name) = name {
                with.insert("name".to_string(), string(name));
            }
            single("folder-rename", "repo.folder.rename", with)
        }
        Commands::Repo(RepoCommands::Remote(RemoteCommands::UpdateProtocol {
            from,
            to,
            remote,
        })) => single(
            "update-protocol",
            "repo.remote.update-protocol",
            options(vec![
                ("from", string(from.to_string())),
                ("to", string(to.to_string())),
                ("remote", string(remote)),
            ]),
        ),
        Commands::Repo(RepoCommands::Remote(RemoteCommands::UpdateToCanonical { remote })) => {
            single(
                "update-to-canonical",
                "repo.remote.update-to-canonical",
                options(vec![("remote", string(remote))]),
            )
        }
        Commands::Repo(RepoCommands::History(HistoryCommands::Purge { paths })) => single(
            "history-purge",
            "repo.history.purge",
            options(vec![(
                "paths",
                Value::Sequence(paths.iter().map(string).collect()),
            )]),
        ),
        Commands::Release(ReleaseCommands::Tag {
            name,
            message,
            remote,
        }) => {
            let mut with = options(vec![
                ("name", string(name)),
                ("remote", string(remote)),
            ]);
            if let Some(message) = message {
                with.insert("message".to_string(), string(message));
            }
            single("release-tag", "release.tag", with)
        }
        Commands::Release(ReleaseCommands::Retag {
            name,
            target_ref,
            remote,
        }) => single(
            "release-retag",
            "release.retag",
            options(vec![
                ("name", string(name)),
                ("target_ref", string(target_ref)),
                ("remote", string(remote)),
            ]),
        ),
        Commands::Workflow => {
            if config.workflow.is_empty() {
                anyhow::bail!("configuration document declares no workflow steps");
            }
            config.workflow.clone()
        }
    })
}

/// Run the parsed command. Returns the process exit code.
pub fn run(cli: Cli, cancel: CancelToken) -> anyhow::Result<i32> {
    let config = ConfigDocument::load(cli.config.as_deref())?;
    let steps = steps_for(&cli.command, &config)?;
    let workflow = ResolvedWorkflow::resolve(&steps)?;

    let roots = if cli.roots.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.roots
            .iter()
            .map(|root| {
                PathBuf::from(shellexpand::tilde(&root.display().to_string()).into_owned())
            })
            .collect()
    };
    let paths = discover::discover_repositories(&roots)?;
    if paths.is_empty() {
        anyhow::bail!("no repositories found under the given roots");
    }

    let token = resolve_token().ok();
    let forge = GhForge::new(token.clone(), &cancel);
    let records = discover::build_records(paths, "origin", Some(&forge as &dyn Forge));

    let runtime = RuntimeOptions {
        dry_run: cli.dry_run,
        assume_yes: cli.yes,
        workers: cli.workers,
    };
    let policy = if cli.dry_run {
        ConfirmPolicy::AssumeNo
    } else if cli.yes {
        ConfirmPolicy::AssumeYes
    } else {
        ConfirmPolicy::Prompt
    };
    let gate = Gate::new(policy, Box::new(StdinPrompter));
    let reporter = Reporter::stderr(ReporterOptions::default());
    let tasks = Tasks::new(Some(&forge as &dyn Forge), token, config.operations.clone());
    let clock = SystemClock;

    let engine = Engine {
        dispatcher: &tasks,
        reporter: &reporter,
        gate: &gate,
        runtime,
        cancel,
        clock: &clock,
    };
    let report = engine.run(&workflow, records)?;
    reporter.emit_summary();

    Ok(if report.success() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_command_builds_a_branch_default_step() {
        let cli = Cli::parse_from([
            "gf", "default", "--source", "main", "--target", "master", "--push",
        ]);
        let steps = steps_for(&cli.command, &ConfigDocument::default()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, "branch.default");
        assert_eq!(steps[0].with["push"], Value::Bool(true));
        assert_eq!(steps[0].with["source"], Value::String("main".into()));
    }

    #[test]
    fn branch_default_alias_is_accepted() {
        let cli = Cli::parse_from(["gf", "branch-default"]);
        assert!(matches!(cli.command, Commands::Default { .. }));
    }

    #[test]
    fn purge_requires_at_least_one_path() {
        assert!(Cli::try_parse_from(["gf", "repo", "history", "purge"]).is_err());
        let cli = Cli::parse_from(["gf", "repo", "history", "purge", "--path", "secrets.env"]);
        let steps = steps_for(&cli.command, &ConfigDocument::default()).unwrap();
        assert_eq!(steps[0].action, "repo.history.purge");
    }

    #[test]
    fn workflow_command_requires_configured_steps() {
        let cli = Cli::parse_from(["gf", "workflow"]);
        let err = steps_for(&cli.command, &ConfigDocument::default()).unwrap_err();
        assert!(err.to_string().contains("no workflow steps"));
    }
}

//! Fleet-wide maintenance of GitHub-hosted Git repositories.
//!
//! gitfleet discovers repositories under user-supplied roots and applies
//! maintenance operations to each: remote protocol conversion, canonical
//! remote retargeting, folder renaming, default-branch promotion, release
//! tagging, and history purges. Operations run individually via CLI
//! subcommands or as an ordered multi-step workflow declared in a YAML
//! configuration document and executed by a bounded-concurrency engine with
//! strict per-repository serialisation.
//!
//! Both Git and the forge are driven through their command-line tools
//! (`git`, `gh`); nothing in this crate speaks the protocols directly.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod discover;
pub mod engine;
pub mod errors;
pub mod forge;
pub mod git;
pub mod migrate;
pub mod ops;
pub mod report;
pub mod shell_exec;

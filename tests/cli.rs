//! End-to-end CLI tests over the `gf` binary.

mod common;

use assert_cmd::Command;
use common::TestRepo;
use predicates::prelude::*;

fn gf() -> Command {
    let mut cmd = Command::cargo_bin("gf").unwrap();
    // Keep forge lookups deterministic regardless of the host environment
    cmd.env_remove("GH_TOKEN")
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITHUB_API_TOKEN")
        .env_remove("GITFLEET_CONFIG_SEARCH_PATH");
    cmd
}

#[test]
fn help_lists_the_command_surface() {
    gf().arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("audit")
                .and(predicate::str::contains("default"))
                .and(predicate::str::contains("workflow"))
                .and(predicate::str::contains("release")),
        );
}

#[test]
fn audit_writes_the_csv_report() {
    let repo = TestRepo::new("main");
    let out = tempfile::TempDir::new().unwrap();
    let report = out.path().join("audit.csv");

    gf().args(["audit", "--roots"])
        .arg(&repo.path)
        .arg("--output")
        .arg(&report)
        .assert()
        .success();

    let content = std::fs::read_to_string(&report).unwrap();
    let mut lines = content.lines();
    assert_eq!(
        lines.next().unwrap(),
        "folder_name,final_github_repo,name_matches,remote_default_branch,local_branch,in_sync,remote_protocol,origin_matches_canonical,worktree_dirty,dirty_files"
    );
    let row = lines.next().unwrap();
    // No remote configured: the forge-derived cells are n/a
    assert!(row.contains(",n/a,"), "row: {row}");
    assert!(row.contains(",main,"), "row: {row}");
    assert!(row.ends_with(",no,"), "row: {row}");
}

#[test]
fn workflow_dry_run_plans_without_mutating() {
    let repo = TestRepo::new("main");
    repo.add_remote("origin", "git://github.com/acme/widgets.git");
    let out = tempfile::TempDir::new().unwrap();
    let config = out.path().join("gitfleet.yaml");
    std::fs::write(
        &config,
        "workflow:\n  - name: convert\n    action: repo.remote.update-protocol\n    with:\n      from: git\n      to: https\n",
    )
    .unwrap();

    gf().args(["workflow", "--dry-run", "--config"])
        .arg(&config)
        .arg("--roots")
        .arg(&repo.path)
        .assert()
        .success()
        .stderr(predicate::str::contains("event=PROTOCOL_PLAN"));

    assert_eq!(
        repo.git(&["remote", "get-url", "origin"]).trim(),
        "git://github.com/acme/widgets.git"
    );
}

#[test]
fn workflow_executes_steps_in_order() {
    let repo = TestRepo::new("main");
    repo.add_remote("origin", "git://github.com/acme/widgets.git");
    let out = tempfile::TempDir::new().unwrap();
    let config = out.path().join("gitfleet.yaml");
    std::fs::write(
        &config,
        concat!(
            "workflow:\n",
            "  - name: convert\n",
            "    action: repo.remote.update-protocol\n",
            "    with: { from: git, to: https }\n",
            "  - name: convert-again\n",
            "    after: [convert]\n",
            "    action: repo.remote.update-protocol\n",
            "    with: { from: git, to: https }\n",
        ),
    )
    .unwrap();

    gf().args(["workflow", "--yes", "--config"])
        .arg(&config)
        .arg("--roots")
        .arg(&repo.path)
        .assert()
        .success()
        .stderr(
            predicate::str::contains("event=PROTOCOL_UPDATE")
                .and(predicate::str::contains("event=PROTOCOL_SKIP"))
                .and(predicate::str::contains("Summary:")),
        );

    assert_eq!(
        repo.git(&["remote", "get-url", "origin"]).trim(),
        "https://github.com/acme/widgets.git"
    );
}

#[test]
fn unknown_config_keys_are_fatal() {
    let repo = TestRepo::new("main");
    let out = tempfile::TempDir::new().unwrap();
    let config = out.path().join("bad.yaml");
    std::fs::write(&config, "workflows: []\n").unwrap();

    gf().args(["workflow", "--config"])
        .arg(&config)
        .arg("--roots")
        .arg(&repo.path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown field"));
}

#[test]
fn workflow_without_steps_is_an_error() {
    let repo = TestRepo::new("main");
    gf().arg("workflow")
        .arg("--roots")
        .arg(&repo.path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no workflow steps"));
}

#[test]
fn empty_roots_are_an_error() {
    let empty = tempfile::TempDir::new().unwrap();
    gf().arg("audit")
        .arg("--roots")
        .arg(empty.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no repositories found"));
}

#[test]
fn default_branch_dry_run_only_plans() {
    let repo = TestRepo::new("main");
    repo.write(".github/workflows/ci.yml", "on:\n  push:\n    branches: [main]\n");
    repo.commit_all("add ci");

    gf().args(["default", "--source", "main", "--target", "master", "--dry-run", "--roots"])
        .arg(&repo.path)
        .assert()
        .success()
        .stderr(predicate::str::contains("event=WORKFLOW-PLAN"));

    let content =
        std::fs::read_to_string(repo.path.join(".github/workflows/ci.yml")).unwrap();
    assert!(content.contains("branches: [main]"), "must not rewrite in dry-run");
}

#[test]
fn release_tag_via_cli() {
    let repo = TestRepo::new("main");
    let bare = repo.bare_remote("origin");
    repo.git(&["push", "-q", "origin", "main"]);

    gf().args(["release", "tag", "--name", "v0.1.0", "--yes", "--roots"])
        .arg(&repo.path)
        .assert()
        .success()
        .stderr(predicate::str::contains("event=RELEASE_TAG"));

    assert_eq!(repo.git(&["tag", "-l", "v0.1.0"]).trim(), "v0.1.0");
    let remote_tags = common::run_git(bare.path(), &["tag", "-l"]);
    assert!(remote_tags.contains("v0.1.0"));
}

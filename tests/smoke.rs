//! Smoke tests -- verify the binary runs and key subcommands work end to end.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &Path, jobs: &str) -> PathBuf {
    let path = dir.join("pipeline.toml");
    let db = dir.join("data").join("pipeline.db");
    let content = format!(
        "[storage]\ndb_path = {:?}\n\n[logging]\nlevel = \"warn\"\n{}",
        db.display().to_string(),
        jobs
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("discovery-pipeline").unwrap();
    cmd.env_remove("DISCOVERY_PIPELINE_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Cron-driven discovery pipeline"));
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("discovery-pipeline"));
}

#[test]
fn test_subcommands_exist() {
    for args in [
        vec!["serve", "--help"],
        vec!["run", "--help"],
        vec!["status", "--help"],
        vec!["history", "--help"],
        vec!["jobs", "list", "--help"],
        vec!["jobs", "dry-run", "--help"],
        vec!["incidents", "--help"],
    ] {
        cli().args(&args).assert().success();
    }
}

#[test]
fn test_jobs_list_shows_default_heartbeat() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    cli()
        .arg("--config")
        .arg(&config)
        .args(["jobs", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("heartbeat").and(predicates::str::contains("*/5 * * * *")));
}

#[test]
fn test_jobs_dry_run_lists_upcoming_runs() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[jobs]]
id = "hourly-scan"
schedule = "0 * * * *"
collector = { kind = "echo" }
"#,
    );
    cli()
        .arg("--config")
        .arg(&config)
        .args(["jobs", "dry-run", "--hours", "3"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Upcoming runs (next 3 hours)").and(predicates::str::contains("hourly-scan")));
}

#[test]
fn test_run_then_history() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    cli()
        .arg("--config")
        .arg(&config)
        .args(["run", "heartbeat"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"ok\": true"));

    cli()
        .arg("--config")
        .arg(&config)
        .args(["history", "--job", "heartbeat"])
        .assert()
        .success()
        .stdout(predicates::str::contains("heartbeat").and(predicates::str::contains("succeeded")));
}

#[test]
fn test_run_unknown_job_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    cli()
        .arg("--config")
        .arg(&config)
        .args(["run", "nope"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("not registered"));
}

#[test]
fn test_status_without_snapshots() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    cli()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("No health snapshots recorded yet").and(predicates::str::contains("healthy")));
}

#[test]
fn test_bad_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[pipeline]\nconcurrency_limit = 0\n").unwrap();
    cli()
        .arg("--config")
        .arg(&path)
        .args(["jobs", "list"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("concurrency_limit"));
}

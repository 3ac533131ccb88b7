//! Integration tests for the sandbench CLI.
//!
//! These run the built binary. None of them needs a Sandkasten daemon or a
//! Docker installation: either validation fails first, or every Sandkasten
//! run count is zero and Docker is hidden from `PATH`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the sandbench binary.
#[allow(deprecated)]
fn sandbench() -> Command {
    Command::cargo_bin("sandbench").expect("failed to find sandbench binary")
}

/// Creates a Command isolated in `dir`: no config files are picked up, no
/// API key leaks in from the environment, and `PATH` holds no binaries.
fn sandbench_in(dir: &TempDir) -> Command {
    let mut cmd = sandbench();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env("PATH", dir.path())
        .env_remove("SANDKASTEN_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_options() {
    sandbench()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--cold-runs"))
        .stdout(predicate::str::contains("--warm-runs"))
        .stdout(predicate::str::contains("--workload"))
        .stdout(predicate::str::contains("--workspace-mode"))
        .stdout(predicate::str::contains("--fresh-environment"))
        .stdout(predicate::str::contains("--docker-image"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("SANDKASTEN_API_KEY"));
}

#[test]
fn test_version_shows_version() {
    sandbench()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandbench"));
}

// -----------------------------------------------------------------------------
// Validation tests
// -----------------------------------------------------------------------------

#[test]
fn test_negative_run_count_rejected() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--cold-runs", "-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cold-runs must be >= 0"));
}

#[test]
fn test_zero_poll_interval_rejected() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--poll-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll-ms must be > 0"));
}

#[test]
fn test_unknown_target_rejected() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--target", "kubernetes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "target must be sandkasten, docker, or both",
        ));
}

#[test]
fn test_unknown_workspace_mode_rejected() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--workspace-mode", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workspace-mode"));
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandbench.toml"), "[docker]\nruns = -4\n").unwrap();

    sandbench_in(&dir)
        .arg("--target=docker")
        .assert()
        .failure()
        .stderr(predicate::str::contains("docker-runs must be >= 0"));
}

#[test]
fn test_missing_explicit_config_rejected() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--config", "does-not-exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

// -----------------------------------------------------------------------------
// Backend availability tests
// -----------------------------------------------------------------------------

#[test]
fn test_both_targets_skip_missing_docker() {
    let dir = TempDir::new().unwrap();
    let output = sandbench_in(&dir)
        .args([
            "--target",
            "both",
            "--cold-runs",
            "0",
            "--warm-runs",
            "0",
            "--json",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("skipped"))
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(report["sandkasten"].is_object());
    assert!(report.get("docker").is_none());
    assert!(report["generated_at"].is_string());
    assert!(report["hardware"]["logical_cpus"].is_number());
    assert_eq!(report["sandkasten"]["cold_summary"]["count"], 0);
}

#[test]
fn test_docker_target_alone_fails_without_docker() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--target", "docker"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("docker unavailable"));
}

#[test]
fn test_config_file_values_apply() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandbench.toml"),
        "target = \"sandkasten\"\njson = true\n\n[sandkasten]\nimage = \"node\"\ncold_runs = 0\nwarm_runs = 0\n",
    )
    .unwrap();

    let output = sandbench_in(&dir)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["sandkasten"]["image"], "node");
    assert_eq!(report["sandkasten"]["workspace"]["mode"], "none");
}

#[test]
fn test_text_report_without_runs() {
    let dir = TempDir::new().unwrap();
    sandbench_in(&dir)
        .args(["--cold-runs", "0", "--warm-runs", "0", "--image", "python"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sandbench report ("))
        .stdout(predicate::str::contains("image=python, workspace=none"))
        .stdout(predicate::str::contains("Cold: runs=0"));
}

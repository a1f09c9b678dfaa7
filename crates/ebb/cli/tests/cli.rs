//! CLI tests against the local simulated provider

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = r#"
[data]
connectivity_url = "sim://data/main"

[[data.resources]]
kind = "database"
name = "app-db"

[[data.resources]]
kind = "storage"
name = "ebbassets"

[[workloads]]
name = "web"
source_ref = "git:main"

[[secrets]]
name = "auth-client-id"
format = { type = "fixed_alphanumeric", length = 32 }
consumers = [{ workload = "web", env_var = "AUTH_CLIENT_ID" }]

[retry]
initial_delay_ms = 1
max_delay_ms = 1

[health.window]
max_attempts = 2
initial_delay_ms = 1
max_delay_ms = 1

[verification]
propagation_delay_ms = 0
grace_period_ms = 0

[verification.backoff]
max_attempts = 2
initial_delay_ms = 1
max_delay_ms = 1
"#;

const VAULT: &str = r#"
[auth-client-id]
"1" = "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"
"2" = "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d"
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ebb.toml"), CONFIG).unwrap();
        std::fs::write(dir.path().join("vault.toml"), VAULT).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn ebb(&self) -> Command {
        let mut cmd = Command::cargo_bin("ebb").unwrap();
        cmd.env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.path("ebb.toml"))
            .arg("--state")
            .arg(self.path("state.json"))
            .write_stdin("");
        cmd
    }

    fn status(&self) -> serde_json::Value {
        let output = self
            .ebb()
            .args(["--output", "json", "status"])
            .output()
            .unwrap();
        assert!(output.status.success());
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn phase(status: &serde_json::Value, layer: &str) -> String {
    status[layer]["phase"].as_str().unwrap().to_string()
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[test]
fn test_help() {
    Command::cargo_bin("ebb")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy-data"))
        .stdout(predicate::str::contains("rotate-secret"));
}

#[test]
fn test_status_of_fresh_workspace() {
    let ws = Workspace::new();
    let status = ws.status();
    assert_eq!(phase(&status, "data"), "absent");
    assert_eq!(phase(&status, "compute"), "absent");
}

#[test]
fn test_compute_before_data_is_dependency_error() {
    let ws = Workspace::new();
    ws.ebb()
        .arg("deploy-compute")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("dependency error"));
}

#[test]
fn test_full_lifecycle() {
    let ws = Workspace::new();

    ws.ebb().arg("deploy-data").assert().success();
    ws.ebb().arg("deploy-compute").assert().success();
    assert!(exists(&ws.path("state.cloud.json")));

    let status = ws.status();
    assert_eq!(phase(&status, "data"), "active");
    assert_eq!(phase(&status, "compute"), "active");
    assert_eq!(status["workloads"][0]["name"], "web");

    ws.ebb()
        .args(["rotate-secret", "auth-client-id", "auth-client-id@1"])
        .assert()
        .success();
    let status = ws.status();
    assert_eq!(status["secrets"][0]["latest"]["verified"], true);

    ws.ebb().arg("pause").assert().success();
    ws.ebb()
        .arg("pause")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to do"));
    assert_eq!(phase(&ws.status(), "compute"), "paused");

    ws.ebb().arg("resume").assert().success();
    assert_eq!(phase(&ws.status(), "compute"), "active");
}

#[test]
fn test_invalid_secret_exits_one() {
    let ws = Workspace::new();
    ws.ebb().arg("deploy-data").assert().success();
    ws.ebb().arg("deploy-compute").assert().success();

    ws.ebb()
        .args(["rotate-secret", "auth-client-id", "auth-client-id@2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expected 32 characters, got 31"));

    let status = ws.status();
    assert!(status["secrets"].as_array().unwrap().is_empty());
}

#[test]
fn test_decommission_needs_confirmation() {
    let ws = Workspace::new();
    ws.ebb().arg("deploy-data").assert().success();

    ws.ebb().arg("decommission-data").assert().code(1);
    assert_eq!(phase(&ws.status(), "data"), "active");

    ws.ebb()
        .args(["decommission-data", "--confirm"])
        .assert()
        .success();
    assert_eq!(phase(&ws.status(), "data"), "absent");
}

#[test]
fn test_plan_as_json() {
    let ws = Workspace::new();
    let output = ws.ebb().args(["-o", "json", "plan"]).output().unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["workloads"][0]["workload"], "web");
    assert_eq!(plan["workloads"][0]["scale"]["tier"], "standard");
    assert!(plan["alert"].is_null());
}

//! CLI tests: flag handling, exit codes and artifacts.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn phasegate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("phasegate").unwrap();
    cmd.env_remove("PHASEGATE_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--cwd")
        .arg(dir.path());
    cmd
}

fn write_config(dir: &TempDir, body: &str) {
    std::fs::write(dir.path().join("phasegate.toml"), body).unwrap();
}

const RUNTIME_OK: &str = r#"
kill_grace_ms = 200

[coverage]
enabled = false

[runtime]
command = "sh"
args = ["-c", "echo v20.1.0"]
"#;

#[test]
fn help_lists_flags() {
    Command::cargo_bin("phasegate")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--bail"))
        .stdout(predicate::str::contains("--no-coverage"))
        .stdout(predicate::str::contains("--types"));
}

#[test]
fn unknown_flag_is_rejected() {
    let dir = TempDir::new().unwrap();
    phasegate(&dir)
        .arg("--shard")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--shard"));
}

#[test]
fn zero_workers_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    phasegate(&dir)
        .args(["--workers", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("workers must be at least 1"));
}

#[test]
fn unknown_phase_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    phasegate(&dir)
        .arg("smoke")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown phase type 'smoke'"));
}

#[cfg(unix)]
#[test]
fn passing_phase_exits_zero_and_writes_summary() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        &format!("{}\n[phases.unit]\ncommands = [[\"true\"]]\n", RUNTIME_OK),
    );

    phasegate(&dir)
        .arg("unit")
        .assert()
        .success()
        .stdout(predicate::str::contains("Test Run Complete"));

    let summary = std::fs::read_to_string(dir.path().join("TEST_SUMMARY.md")).unwrap();
    assert!(summary.contains("**Status:** ✅ PASSED"));
}

#[cfg(unix)]
#[test]
fn bail_stops_at_first_failure_and_exits_one() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        &format!(
            "{}\n[phases.lint]\ncommands = [[\"false\"]]\n\n[phases.unit]\ncommands = [[\"true\"]]\n",
            RUNTIME_OK
        ),
    );

    phasegate(&dir)
        .args(["--bail", "--types", "lint,unit"])
        .assert()
        .code(1);

    let junit = std::fs::read_to_string(dir.path().join("coverage/junit.xml")).unwrap();
    assert_eq!(junit.matches("<testcase ").count(), 1);
    assert!(junit.contains(r#"name="lint""#));
}

#[cfg(unix)]
#[test]
fn old_runtime_aborts_with_failure_report() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "[runtime]\ncommand = \"sh\"\nargs = [\"-c\", \"echo v12.22.0\"]\n",
    );

    phasegate(&dir)
        .arg("unit")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Test Run Aborted"));

    assert!(dir.path().join("coverage/failure-report.json").is_file());
    assert!(!dir.path().join("TEST_SUMMARY.md").exists());
}

#[test]
fn unknown_config_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "retries = 3\n");

    phasegate(&dir)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

//! CLI contract tests: the binary is executed for real, so these cover
//! argument parsing, config loading and the maintenance subcommands.

use assert_cmd::Command;

fn armitage() -> Command {
    Command::cargo_bin("armitage").expect("binary builds")
}

#[test]
fn help_lists_the_subcommands() {
    let output = armitage().arg("--help").output().expect("run binary");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("start"));
    assert!(stdout.contains("check-config"));
    assert!(stdout.contains("seed-slots"));
}

#[test]
fn version_prints_the_package_name() {
    let output = armitage().arg("--version").output().expect("run binary");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("armitage"));
}

#[test]
fn check_config_passes_on_defaults() {
    let output = armitage().arg("check-config").output().expect("run binary");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("configuration OK"));
    assert!(stdout.contains("service: 127.0.0.1:8080"));
}

#[test]
fn check_config_rejects_a_malformed_sidecar_url() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config_path = dir.path().join("armitage.toml");
    std::fs::write(&config_path, "[gateway]\nbase_url = \"not a url\"\n").expect("write config");

    let output = armitage()
        .args(["--config"])
        .arg(&config_path)
        .arg("check-config")
        .output()
        .expect("run binary");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("gateway base_url"));
}

#[test]
fn a_missing_config_file_fails_loudly() {
    let output = armitage()
        .args(["--config", "/definitely/not/here.toml", "check-config"])
        .output()
        .expect("run binary");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to load configuration"));
}

#[test]
fn seed_slots_creates_and_fills_the_database() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("armitage-test.db");
    let config_path = dir.path().join("armitage.toml");
    std::fs::write(
        &config_path,
        format!("[service]\ndb_path = \"{}\"\n", db_path.display()),
    )
    .expect("write config");

    let output = armitage()
        .args(["--config"])
        .arg(&config_path)
        .args(["seed-slots", "--days", "3"])
        .output()
        .expect("run binary");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("slots over the next 3 days"));
    assert!(db_path.exists());
}

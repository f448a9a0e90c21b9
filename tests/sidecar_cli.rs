use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

fn write_valid_config(dir: &Path, file_name: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(
        &config_path,
        format!(
            r#"
config_dir = "{config_dir}"
pid = "{pid}"

[k2_center]
enabled = true
base_url = "https://center.example.com"
secret = "node-secret"
billing_start_date = "2025-01-15"
traffic_limit_gb = 1024

[tunnel]
domain = "k2.example.com"
hop_port_start = 20000
hop_port_end = 20100

[observability.log]
output = "console"
"#,
            config_dir = dir.join("kaitu").display(),
            pid = dir.join("k2-sidecar.pid").display()
        ),
    )
    .expect("write valid config");

    config_path
}

fn write_warning_only_config(dir: &Path, file_name: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(
        &config_path,
        format!(
            r#"
config_dir = "{config_dir}"

[k2_center]
enabled = false

[tunnel]
enabled = false

[relay]
enabled = false
"#,
            config_dir = dir.join("kaitu").display(),
        ),
    )
    .expect("write warning-only config");

    config_path
}

fn write_validation_error_config(dir: &Path, file_name: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(
        &config_path,
        format!(
            r#"
config_dir = "{config_dir}"

# Intentionally no secret and an inverted hop range
[k2_center]
enabled = true
base_url = "https://center.example.com"

[tunnel]
hop_port_start = 30000
hop_port_end = 20000
"#,
            config_dir = dir.join("kaitu").display(),
        ),
    )
    .expect("write validation-error config");

    config_path
}

fn run_sidecar(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_k2-sidecar")));
    cmd.args(args);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run k2-sidecar command")
}

#[test]
fn check_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "valid.toml");
    let output = run_sidecar(&["check", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn check_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path(), "config.toml");
    let output = run_sidecar(&["check"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn check_command_passes_with_warnings_only() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_warning_only_config(temp.path(), "warn.toml");
    let output = run_sidecar(&["check", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "warnings must not fail the check, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Warning:"), "unexpected stdout: {stdout}");
}

#[test]
fn check_command_reports_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_validation_error_config(temp.path(), "invalid.toml");
    let output = run_sidecar(&["check", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("k2_center.secret"), "unexpected stderr: {stderr}");
    assert!(stderr.contains("hop_port_start"), "unexpected stderr: {stderr}");
}

#[test]
fn check_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_sidecar(&["check", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn check_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = temp.path().join("bad.toml");
    fs::write(&bad_path, "config_dir = [\n").expect("write invalid toml");

    let output = run_sidecar(&["check", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("配置解析失败") || stderr.contains("parse") || stderr.contains("invalid"),
        "unexpected stderr: {stderr}"
    );
}

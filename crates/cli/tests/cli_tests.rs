//! CLI integration tests

use std::process::{Command, Output};

fn scalerctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scalerctl"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = scalerctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Resource Scaler"), "Should show app name");
    let commands = [
        "status", "start", "stop", "config", "decisions", "history", "stats", "scale", "pod",
        "resize", "model",
    ];
    for command in commands {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = scalerctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("scalerctl"), "Should show binary name");
}

#[test]
fn test_config_set_help() {
    let output = scalerctl(&["config", "set", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in ["--dry-run", "--interval", "--cooldown", "--scale-factor", "--enabled"] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

#[test]
fn test_decisions_help() {
    let output = scalerctl(&["decisions", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--limit"), "Should show limit option");
}

#[test]
fn test_scale_help() {
    let output = scalerctl(&["scale", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--all"), "Should show all option");
    assert!(stdout.contains("WORKLOAD"), "Should show workload argument");
}

#[test]
fn test_scale_requires_target() {
    let output = scalerctl(&["scale"]);
    assert!(!output.status.success(), "scale without a target should fail");
}

#[test]
fn test_resize_help_and_requires_a_limit() {
    let output = scalerctl(&["resize", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("--cpu"), "Should show cpu option");
    assert!(stdout.contains("--memory"), "Should show memory option");

    let output = scalerctl(&["resize", "default/api"]);
    assert!(!output.status.success(), "resize without limits should fail");
}

#[test]
fn test_invalid_format_is_rejected() {
    let output = scalerctl(&["--format", "yaml", "status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("yaml"));
}

#[test]
fn test_unreachable_api_fails_cleanly() {
    let output = scalerctl(&["--api-url", "http://127.0.0.1:1", "status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}

//! Integration tests for the `ddcsync` CLI binary.
//!
//! Everything runs against the simulated backend, so no monitor, bus
//! service or `ddcutil` install is needed.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ddcsync` binary with env isolation.
///
/// Clears the `DDCSYNC_*` variables the tests could trip over and points
/// config directories at a nonexistent path.
fn ddcsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ddcsync");
    cmd.env("HOME", "/tmp/ddcsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ddcsync-cli-test-nonexistent")
        .env_remove("DDCSYNC_BACKEND__PREFERENCE")
        .env_remove("DDCSYNC_SYNC__RAW_VALUES")
        .env_remove("DDCSYNC_SYNC__CLIENT_CONTEXT")
        .env_remove("DDCSYNC_DEFAULTS__OUTPUT")
        .env_remove("DDCSYNC_DEFAULTS__COLOR")
        .env_remove("RUST_LOG")
        .env_remove("NO_COLOR");
    cmd
}

/// Same, bound to the simulated monitors.
fn simulated() -> assert_cmd::Command {
    let mut cmd = ddcsync_cmd();
    cmd.args(["--backend", "simulated", "--color", "never"]);
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn stdout_json(cmd: &mut assert_cmd::Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    serde_json::from_slice(&output.stdout).unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = ddcsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    ddcsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("detect")
            .and(predicate::str::contains("features"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    ddcsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ddcsync"));
}

#[test]
fn test_completions_zsh() {
    ddcsync_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_unknown_backend_is_a_usage_error() {
    let output = ddcsync_cmd()
        .args(["--backend", "carrier-pigeon", "detect"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("carrier-pigeon"));
}

// ── Detection ───────────────────────────────────────────────────────

#[test]
fn test_detect_lists_three_simulated_monitors() {
    simulated()
        .arg("detect")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("MockView 1")
                .and(predicate::str::contains("ColorPro 2"))
                .and(predicate::str::contains("UltraWide 3")),
        );
}

#[test]
fn test_detect_json_has_descriptors() {
    let json = stdout_json(simulated().args(["detect", "-o", "json"]));
    let monitors = json.as_array().unwrap();
    assert_eq!(monitors.len(), 3);
    assert_eq!(monitors[0]["edid"], "MOCK-MockView-01");
    assert_eq!(monitors[0]["display_number"], 1);
    assert_eq!(monitors[0]["feature_count"], 5);
}

#[test]
fn test_detect_plain_prints_edids() {
    simulated()
        .args(["detect", "-o", "plain"])
        .assert()
        .success()
        .stdout("MOCK-MockView-01\nMOCK-ColorPro-02\nMOCK-UltraWide-03\n");
}

// ── Reading ─────────────────────────────────────────────────────────

#[test]
fn test_features_by_display_number() {
    simulated()
        .args(["features", "2", "-o", "plain"])
        .assert()
        .success()
        .stdout("0x10\n0x12\n0x14\n0x60\n0x62\n");
}

#[test]
fn test_get_by_name_and_prefix() {
    simulated()
        .args(["get", "MOCK-Color", "brightness", "-o", "plain"])
        .assert()
        .success()
        .stdout("40\n");
}

#[test]
fn test_get_choice_shows_label() {
    let json = stdout_json(simulated().args(["get", "1", "0x60", "-o", "json"]));
    assert_eq!(json["current"], 0x0F);
    assert_eq!(json["display"], "DisplayPort-1");
}

#[test]
fn test_get_raw_skips_label() {
    let json = stdout_json(simulated().args(["get", "1", "0x60", "--raw", "-o", "json"]));
    assert_eq!(json["display"], "15");
}

#[test]
fn test_ambiguous_prefix_fails() {
    let output = simulated().args(["get", "MOCK", "0x10"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("more than one monitor"));
}

#[test]
fn test_unknown_monitor_exit_code() {
    let output = simulated().args(["get", "nobody", "0x10"]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("ddcsync detect"));
}

#[test]
fn test_unsupported_feature_is_not_found() {
    let output = simulated().args(["get", "1", "0xDC"]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
}

// ── Writing ─────────────────────────────────────────────────────────

#[test]
fn test_set_reports_new_value() {
    simulated()
        .args(["set", "1", "brightness", "65", "-o", "plain"])
        .assert()
        .success()
        .stdout("65\n");
}

#[test]
fn test_set_clamps_to_maximum() {
    simulated()
        .args(["set", "1", "0x10", "250", "-o", "plain"])
        .assert()
        .success()
        .stdout("100\n");
}

#[test]
fn test_set_accepts_choice_label() {
    let json = stdout_json(simulated().args(["set", "3", "input-source", "hdmi-2", "-o", "json"]));
    assert_eq!(json["current"], 0x12);
}

#[test]
fn test_set_rejects_bad_value() {
    let output = simulated()
        .args(["set", "1", "0x60", "thunderbolt"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("HDMI-1"));
}

#[test]
fn test_set_rejects_unlisted_choice_code() {
    let output = simulated()
        .args(["set", "1", "input-source", "0x01"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("0x0F"));
}

#[test]
fn test_reset_writes_default() {
    simulated()
        .args(["reset", "1", "0x62", "-o", "plain"])
        .assert()
        .success()
        .stdout("30\n");
}

#[test]
fn test_reset_without_default_uses_midpoint() {
    simulated()
        .args(["reset", "1", "0x60", "-o", "plain", "--raw"])
        .assert()
        .success()
        .stdout("127\n");
}

// ── Capabilities and service ────────────────────────────────────────

#[test]
fn test_capabilities_prints_raw_string() {
    simulated()
        .args(["capabilities", "2", "-o", "plain"])
        .assert()
        .success()
        .stdout(
            predicate::str::starts_with("(prot(monitor)")
                .and(predicate::str::contains("model(ColorPro 2)")),
        );
}

#[test]
fn test_describe_reports_choices() {
    let json = stdout_json(simulated().args(["describe", "1", "input-source", "-o", "json"]));
    assert_eq!(json["edid"], "MOCK-MockView-01");
    assert_eq!(json["kind"], "choice");
    assert_eq!(json["choices"]["17"], "HDMI-1");
}

#[test]
fn test_sleep_multiplier_set_and_show() {
    simulated()
        .args(["sleep-multiplier", "1", "2.5", "-o", "plain"])
        .assert()
        .success()
        .stdout("2.5\n");
    simulated()
        .args(["sleep-multiplier", "1", "-o", "plain"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_sleep_multiplier_out_of_range_is_a_usage_error() {
    let output = simulated()
        .args(["sleep-multiplier", "1", "12"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("sleep multiplier"));
}

#[test]
fn test_service_info_shows_properties() {
    let json = stdout_json(simulated().args(["service", "info", "-o", "json"]));
    assert_eq!(json["kind"], "simulated");
    assert_eq!(json["target"], "simulated");
    assert_eq!(json["properties"]["DdcutilVersion"], "simulated");
}

#[test]
fn test_service_restart_is_acknowledged() {
    simulated()
        .args(["service", "restart", "--options", "--disable-dynamic-sleep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restart requested"));
}

// ── Catalog ─────────────────────────────────────────────────────────

#[test]
fn test_catalog_category_filter() {
    ddcsync_cmd()
        .args(["catalog", "--category", "audio", "-o", "plain"])
        .assert()
        .success()
        .stdout("0x62\n");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    ddcsync_cmd()
        .args(["config", "init", "--config", path_arg])
        .assert()
        .success();
    assert!(path.exists());

    ddcsync_cmd()
        .args(["config", "show", "--config", path_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("debounce_ms = 150"));

    let output = ddcsync_cmd()
        .args(["config", "init", "--config", path_arg])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6), "second init must refuse");
}

#[test]
fn test_config_file_selects_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[backend]\npreference = \"simulated\"\n").unwrap();

    ddcsync_cmd()
        .args(["detect", "-o", "plain", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("MOCK-UltraWide-03"));
}

#[test]
fn test_env_selects_backend() {
    ddcsync_cmd()
        .env("DDCSYNC_BACKEND__PREFERENCE", "simulated")
        .args(["detect", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MOCK-MockView-01"));
}

#[test]
fn test_config_path_honours_flag() {
    ddcsync_cmd()
        .args(["config", "path", "--config", "/tmp/elsewhere.toml"])
        .assert()
        .success()
        .stdout("/tmp/elsewhere.toml\n");
}

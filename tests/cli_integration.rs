// CLI integration tests for offline configuration checks and error reporting.
use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_phal");
    Command::new(exe)
}

fn parse_json(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

#[test]
fn check_accepts_valid_config_and_echoes_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("limbs.json");
    std::fs::write(
        &config,
        r#"[
            {"name": "led", "kind": "pin", "direction": "output", "resource": "gpio17", "init": "High"},
            {"name": "console", "kind": "serial", "resource": "uart0"}
        ]"#,
    )
    .expect("write");

    let output = cmd().arg("check").arg(&config).output().expect("check");
    assert!(output.status.success());
    let report = parse_json(&output.stdout);
    assert_eq!(report["ok"], true);
    assert_eq!(report["limbs"][0]["init"], "High");
    assert_eq!(report["limbs"][1]["baud-rate"], 9600);
    assert_eq!(report["limbs"][1]["parity"], "none");
}

#[test]
fn check_reports_validation_kind_and_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("limbs.json");
    std::fs::write(
        &config,
        r#"[
            {"name": "a", "kind": "pin", "direction": "output", "resource": "gpio1"},
            {"name": "a", "kind": "pin", "direction": "input", "resource": "gpio2"}
        ]"#,
    )
    .expect("write");

    let output = cmd().arg("check").arg(&config).output().expect("check");
    assert_eq!(output.status.code(), Some(4));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "DuplicateName");
    assert_eq!(err["error"]["limb"], "a");
}

#[test]
fn check_uses_the_given_board() {
    let temp = tempfile::tempdir().expect("tempdir");
    let board = temp.path().join("board.json");
    std::fs::write(&board, r#"{"gpio": ["gpioA"], "uart": []}"#).expect("write");
    let config = r#"[{"name": "led", "kind": "pin", "direction": "output", "resource": "gpio17"}]"#;

    let mut child = cmd()
        .args(["check", "-", "--board"])
        .arg(&board)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(config.as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert_eq!(output.status.code(), Some(6));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "UnknownResource");
    assert_eq!(err["error"]["resource"], "gpio17");
}

#[test]
fn missing_config_file_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .arg("check")
        .arg(temp.path().join("absent.json"))
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(11));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Io");
}

#[test]
fn unknown_flag_is_usage_error() {
    let output = cmd().args(["serve", "--port", "80"]).output().expect("serve");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn get_without_server_reports_io_with_hint() {
    let output = cmd()
        .args(["get", "led", "--url", "http://127.0.0.1:9"])
        .output()
        .expect("get");
    assert_eq!(output.status.code(), Some(11));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Io");
    assert!(err["error"]["hint"].is_string());
}

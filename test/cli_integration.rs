//! CLI Integration Tests for prefill
//!
//! Drives the built `prefill` binary end to end: compile, check, decode,
//! replay and validate.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

/// Path to the prefill binary built for this test run
fn prefill_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_prefill"))
}

/// Get a temp directory for test outputs
fn temp_dir() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("structured_prefill_tests");
    fs::create_dir_all(&path).ok();
    path
}

fn prefill(args: &[&str]) -> Output {
    Command::new(prefill_binary())
        .args(args)
        .current_dir(temp_dir())
        .output()
        .expect("Failed to run prefill")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ============================================================================
// Compile
// ============================================================================

#[test]
fn test_compile_prints_wire_constraint() {
    let output = prefill(&["compile", "She said, \"[[w:3-5]]\" [[keep]][[free]]"]);
    assert!(
        output.status.success(),
        "compile failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let wire: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("wire is JSON");
    assert_eq!(wire["name"], "structured_prefill");
    assert_eq!(wire["strict"], true);
    assert_eq!(wire["value"]["type"], "object");
    assert_eq!(wire["value"]["required"][0], "value");
    assert_eq!(wire["value"]["additionalProperties"], false);
    let pattern = wire["value"]["properties"]["value"]["pattern"]
        .as_str()
        .expect("pattern string");
    assert!(pattern.starts_with('^') && pattern.ends_with('$'));
    assert!(pattern.contains("{20,}"));
}

#[test]
fn test_compile_conservative_has_no_counted_repetition() {
    let output = prefill(&["compile", "--dialect", "conservative", "[[w:2-3]] [[free]]"]);
    assert!(output.status.success());
    let wire: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let pattern = wire["value"]["properties"]["value"]["pattern"].as_str().unwrap();
    assert!(!pattern.contains('{'));
    assert!(!pattern.contains("\\s") && !pattern.contains("\\S"));
}

#[test]
fn test_compile_reports_degraded_slot() {
    let output = prefill(&["compile", "[[re:(unclosed]] tail"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("warning:"));
}

#[test]
fn test_compile_rejects_unknown_dialect() {
    let output = prefill(&["compile", "--dialect", "pcre", "hi"]);
    assert!(!output.status.success());
}

// ============================================================================
// Check
// ============================================================================

#[test]
fn test_check_candidate() {
    let template = "She said, \"[[w:3-5]]\" [[keep]][[free]]";
    let good = prefill(&[
        "check",
        template,
        "--candidate",
        "She said, \"not today, thanks\" and closed the door behind her.",
    ]);
    assert!(good.status.success(), "{}", stdout(&good));
    assert!(stdout(&good).contains("MATCHES"));

    let short = prefill(&[
        "check",
        template,
        "--candidate",
        "She said, \"not today, thanks\" ok.",
    ]);
    assert!(!short.status.success());
    assert!(stdout(&short).contains("does NOT match"));
}

#[test]
fn test_check_ban_file() {
    let ban_path = temp_dir().join("ban_gaze.txt");
    fs::write(&ban_path, "gaze\n").unwrap();
    let output = prefill(&[
        "check",
        "",
        "--ban-file",
        ban_path.to_str().unwrap(),
        "--candidate",
        "and then her gaze fell on the letter again",
    ]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("\"gaze\""));
}

// ============================================================================
// Decode
// ============================================================================

#[test]
fn test_decode_from_stdin() {
    let mut child = Command::new(prefill_binary())
        .args(["decode", "--newline-token", "<br>"])
        .current_dir(temp_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to run prefill");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(br#"{"value": "one<br>two"}"#)
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output), "one\ntwo\n");
}

#[test]
fn test_decode_pending_payload_fails() {
    let path = temp_dir().join("pending_payload.json");
    fs::write(&path, "{\"val").unwrap();
    let output = prefill(&["decode", path.to_str().unwrap()]);
    assert!(!output.status.success());
}

// ============================================================================
// Replay
// ============================================================================

#[test]
fn test_replay_prints_final_text() {
    let path = temp_dir().join("replay_basic.jsonl");
    let lines = [
        r#"{"value": "Hel"#,
        r#"{"value": "Hello the"#,
        r#"{"value": "Hello there, friend."}"#,
    ];
    let content: Vec<String> = lines
        .iter()
        .map(|l| serde_json::to_string(l).unwrap())
        .collect();
    fs::write(&path, content.join("\n")).unwrap();

    let output = prefill(&["replay", path.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "replay failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout(&output), "Hello there, friend.\n");
}

#[test]
fn test_replay_continuation() {
    let base_path = temp_dir().join("replay_base.txt");
    fs::write(&base_path, "The lamp went out.\n").unwrap();
    let path = temp_dir().join("replay_continue.jsonl");
    let payload = serde_json::to_string(r#"{"value": "The lamp went out. Silence."}"#).unwrap();
    fs::write(&path, payload).unwrap();

    let output = prefill(&[
        "replay",
        path.to_str().unwrap(),
        "--continue-file",
        base_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "The lamp went out. Silence.\n");
}

#[test]
fn test_replay_rejects_non_json_lines() {
    let path = temp_dir().join("replay_bad.jsonl");
    fs::write(&path, "not json\n").unwrap();
    let output = prefill(&["replay", path.to_str().unwrap()]);
    assert!(!output.status.success());
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn test_validate_valid_template() {
    let output = prefill(&["validate", "Hello [[name]], [[w:2-4]]."]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("VALID"));
}

#[test]
fn test_validate_inverted_range() {
    let output = prefill(&["validate", "[[w:5-2]]"]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("INVALID"));
}

#[test]
fn test_validate_with_config_file() {
    let config_path = temp_dir().join("conservative.toml");
    fs::write(&config_path, "[compiler]\ndialect = \"conservative\"\n").unwrap();
    let output = prefill(&[
        "validate",
        "--config",
        config_path.to_str().unwrap(),
        "[[w:1-2]]",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("(conservative)"));
}

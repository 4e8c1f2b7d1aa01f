#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/spacebus-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spacebus() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_spacebus"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn segment_reports_packets_as_json() {
    let dir = unique_temp_dir("segment");
    let file = dir.join("blob.bin");
    std::fs::write(&file, vec![7u8; 3_000]).expect("blob should be writable");

    let output = spacebus()
        .arg("--format")
        .arg("json")
        .arg("segment")
        .arg(&file)
        .arg("--limit")
        .arg("512")
        .output()
        .expect("segment should run");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("output should be json");
    assert_eq!(report["bytes"], 3_000);
    assert_eq!(report["reassembled"], true);
    let packets = report["packets"].as_u64().expect("packets should be a number");
    assert!(packets > 5);
    assert_eq!(report["segments"][0]["flags"], "first");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn segment_with_tiny_limit_is_usage_error() {
    let dir = unique_temp_dir("tiny");
    let file = dir.join("blob.bin");
    std::fs::write(&file, b"payload").expect("blob should be writable");

    let output = spacebus()
        .arg("segment")
        .arg(&file)
        .arg("--limit")
        .arg("16")
        .output()
        .expect("segment should run");

    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn inspect_rejects_non_hex_input() {
    let output = spacebus()
        .arg("inspect")
        .arg("not-hex")
        .output()
        .expect("inspect should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_to_closed_port_fails() {
    let output = spacebus()
        .arg("send")
        .arg("maltcp://127.0.0.1:1/nobody")
        .arg("--data")
        .arg("hi")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn send_waits_for_echo_acknowledgement() {
    let mut child = spacebus()
        .arg("--format")
        .arg("json")
        .arg("echo")
        .arg("127.0.0.1:0")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("echo command should start");

    let stdout = child.stdout.take().expect("echo stdout should be piped");
    let mut lines = BufReader::new(stdout).lines();
    let ready = lines
        .next()
        .expect("echo should announce itself")
        .expect("ready line should be readable");
    let ready: serde_json::Value = serde_json::from_str(&ready).expect("ready line should be json");
    let uri = ready["uri"].as_str().expect("ready line should carry the uri").to_string();

    let output = spacebus()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&uri)
        .arg("--data")
        .arg("hello spacebus")
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply should be json");
    assert_eq!(reply["interaction_type"], "Submit");
    assert_eq!(reply["interaction_stage"], 2);
    assert_eq!(reply["body"][0], "hello spacebus");

    let status = child.wait().expect("echo should exit after one message");
    assert!(status.success());
}

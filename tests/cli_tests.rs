//! CLI integration tests for bincore.

use std::path::PathBuf;
use std::process::Command;

fn bincore_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bincore"))
}

fn temp_file(name: &str, data: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let output = bincore_cmd()
        .arg("--help")
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("bincore"));
    assert!(stdout.contains("--min-length"));
    assert!(stdout.contains("--hashes"));
    assert!(stdout.contains("--raw"));
}

#[test]
fn test_cli_version() {
    let output = bincore_cmd()
        .arg("--version")
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
}

#[test]
fn test_cli_nonexistent_file() {
    let output = bincore_cmd()
        .arg("/nonexistent/file/path")
        .output()
        .expect("Failed to execute bincore");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"));
}

#[test]
fn test_cli_raw_strings() {
    let mut data = vec![0u8; 256];
    data[16..35].copy_from_slice(b"interesting_string\0");
    let path = temp_file("bincore_cli_raw.bin", &data);

    let output = bincore_cmd()
        .arg("--raw")
        .arg("-m")
        .arg("4")
        .arg(&path)
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("interesting_string"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_cli_json_strings() {
    let mut data = vec![0u8; 128];
    data[..8].copy_from_slice(b"jsonstr\0");
    let path = temp_file("bincore_cli_json.bin", &data);

    let output = bincore_cmd()
        .args(["--raw", "--json"])
        .arg(&path)
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let arr = parsed.as_array().unwrap();
    assert_eq!(arr[0]["string"], "jsonstr");
    assert_eq!(arr[0]["paddr"], 0);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_cli_hashes() {
    let path = temp_file("bincore_cli_hash.bin", b"abc");

    let output = bincore_cmd()
        .arg("--hashes")
        .arg(&path)
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("900150983cd24fb0d6963f7d28e17f72"));
    assert!(stdout.contains("crc32"));
    assert!(stdout.contains("entropy"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_cli_hash_limit_refusal() {
    let path = temp_file("bincore_cli_hashlimit.bin", &[0u8; 4096]);

    let output = bincore_cmd()
        .args(["--hashes", "--hash-limit", "1024"])
        .arg(&path)
        .output()
        .expect("Failed to execute bincore");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hash limit"));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_cli_info_on_unknown_format() {
    let path = temp_file("bincore_cli_info.bin", &[0u8; 64]);

    let output = bincore_cmd()
        .arg("--info")
        .arg(&path)
        .output()
        .expect("Failed to execute bincore");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // nothing matches, so the catch-all takes the file
    assert!(stdout.contains("format  any"));

    std::fs::remove_file(&path).ok();
}

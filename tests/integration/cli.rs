#![allow(missing_docs)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::tempdir;

fn radixdb(dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    cargo_bin_cmd!("radixdb")
        .arg("--dir")
        .arg(dir)
        .args(args)
        .assert()
}

fn stdout(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.success().get_output().stdout.clone()).expect("utf8 output")
}

#[test]
fn set_get_del_round_trip() {
    let dir = tempdir().expect("tmpdir");
    radixdb(dir.path(), &["set", "greeting", "hello"]).success();
    assert_eq!(stdout(radixdb(dir.path(), &["get", "greeting"])), "hello\n");

    radixdb(dir.path(), &["del", "greeting"]).success();
    radixdb(dir.path(), &["get", "greeting"]).code(2);
}

#[test]
fn scan_honours_prefix_order_and_limit() {
    let dir = tempdir().expect("tmpdir");
    for key in ["user/3", "user/1", "user/2", "group/1"] {
        radixdb(dir.path(), &["set", key, "x"]).success();
    }

    let all = stdout(radixdb(dir.path(), &["scan", "--prefix", "user/"]));
    assert_eq!(all, "user/1\tx\nuser/2\tx\nuser/3\tx\n");

    let last = stdout(radixdb(
        dir.path(),
        &["scan", "--prefix", "user/", "--reverse", "--limit", "1"],
    ));
    assert_eq!(last, "user/3\tx\n");

    let json = stdout(radixdb(dir.path(), &["--format", "json", "scan"]));
    let entries: Value = serde_json::from_str(&json).expect("valid json");
    let entries = entries.as_array().expect("array");
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0]["key"], "group/1");
}

#[test]
fn hex_mode_accepts_binary_keys() {
    let dir = tempdir().expect("tmpdir");
    radixdb(dir.path(), &["--hex", "set", "00ff10", "cafe"]).success();
    assert_eq!(
        stdout(radixdb(dir.path(), &["--hex", "get", "00ff10"])),
        "cafe\n"
    );
    radixdb(dir.path(), &["--hex", "get", "zz"]).failure();
}

#[test]
fn stats_reports_json() {
    let dir = tempdir().expect("tmpdir");
    radixdb(dir.path(), &["set", "k", "v"]).success();
    let json = stdout(radixdb(dir.path(), &["--format", "json", "stats"]));
    let stats: Value = serde_json::from_str(&json).expect("valid json");
    assert!(stats["blocks"].as_u64().expect("blocks") >= 257);
    assert_eq!(stats["wal_files"], 1);
    assert!(stats["blob_bytes"].as_u64().expect("blob bytes") > 8);
}

#[test]
fn config_file_sets_the_directory() {
    let dir = tempdir().expect("tmpdir");
    let data = dir.path().join("data");
    let config = dir.path().join("radixdb.toml");
    std::fs::write(
        &config,
        format!(
            "dir = {:?}\ncache_pages = 2000\nwal_file_size = 1048576\n",
            data.display().to_string()
        ),
    )
    .expect("write config");

    cargo_bin_cmd!("radixdb")
        .arg("--config")
        .arg(&config)
        .args(["set", "from", "config"])
        .assert()
        .success();
    assert!(data.join("IDX").exists());
    assert_eq!(stdout(radixdb(&data, &["get", "from"])), "config\n");
}

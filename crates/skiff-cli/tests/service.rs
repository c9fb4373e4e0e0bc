use std::fs;

use serde_json::json;

mod common;

use common::{parse_json, skiff};

#[test]
fn info_describes_the_fixed_tenant() {
    let data = tempfile::tempdir().expect("data dir");
    let assert = skiff(data.path()).arg("info").assert().success();
    let info = parse_json(&assert);
    assert_eq!(info["server"]["flavor"], "skiff");
    assert_eq!(info["user"]["id"], 42);
    assert_eq!(info["projects"]["count"], 1);
    assert_eq!(info["environments"]["count"], 1);
    assert!(data.path().join("token_secret.json").is_file());
}

#[test]
fn json_envelope_wraps_success() {
    let data = tempfile::tempdir().expect("data dir");
    let assert = skiff(data.path()).args(["--json", "info"]).assert().success();
    let envelope = parse_json(&assert);
    assert_eq!(envelope["status"], "ok");
    assert_eq!(envelope["message"], "server info");
    assert_eq!(envelope["details"]["server"]["flavor"], "skiff");
}

#[test]
fn anonymous_tokens_when_auth_is_off() {
    let data = tempfile::tempdir().expect("data dir");
    let assert = skiff(data.path()).args(["token", "issue"]).assert().success();
    let token = parse_json(&assert)["token"]
        .as_str()
        .expect("token")
        .to_string();
    assert_eq!(token.split('.').count(), 3);

    let assert = skiff(data.path())
        .args(["token", "verify", "anything at all"])
        .assert()
        .success();
    assert_eq!(parse_json(&assert)["user"], json!(null));
}

#[test]
fn configured_users_need_valid_credentials() {
    let data = tempfile::tempdir().expect("data dir");
    let config = data.path().join("skiff-config.yaml");
    fs::write(&config, "auth:\n  alice: hunter2\n").expect("write config");

    let assert = skiff(data.path())
        .env("SKIFF_CONFIG", &config)
        .args(["token", "issue", "--username", "alice"])
        .env("SKIFF_PASSWORD", "hunter2")
        .assert()
        .success();
    let token = parse_json(&assert)["token"]
        .as_str()
        .expect("token")
        .to_string();

    let assert = skiff(data.path())
        .env("SKIFF_CONFIG", &config)
        .args(["token", "verify", &format!("Token {token}")])
        .assert()
        .success();
    assert_eq!(parse_json(&assert)["user"], "alice");

    skiff(data.path())
        .env("SKIFF_CONFIG", &config)
        .args(["token", "issue", "--username", "alice", "--password", "wrong"])
        .assert()
        .code(1);
    skiff(data.path())
        .env("SKIFF_CONFIG", &config)
        .args(["token", "verify", &format!("Bearer {token}")])
        .assert()
        .code(1);
}

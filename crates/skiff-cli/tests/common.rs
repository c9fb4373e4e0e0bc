#![allow(dead_code)]

use std::{fs, io::Write, path::Path, path::PathBuf};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use flate2::{write::GzEncoder, Compression};
use serde_json::Value;

pub const MANIFEST: &str = "\
- step:
    name: greet
    image: busybox:latest
    command: echo hello
    environment-variables:
      - name: GREETING
        default: hi
";

/// Engine path that never exists, so every boot fails fast.
pub const MISSING_ENGINE: &str = "/nonexistent/skiff-docker";

pub fn skiff(data: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.env_remove("SKIFF_CONFIG")
        .env_remove("SKIFF_TOKEN_SECRET")
        .env_remove("SKIFF_PASSWORD")
        .env("SKIFF_DATA_PATH", data)
        .env("SKIFF_CONTAINER_PROGRAM", MISSING_ENGINE)
        .env("NO_COLOR", "1");
    cmd
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

pub fn write_tarball(dir: &Path, manifest: &str) -> PathBuf {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append(&mut builder, "./skiff.yaml", manifest.as_bytes());
    append(&mut builder, "./train.sh", b"#!/bin/sh\necho training\n");
    let bytes = builder
        .into_inner()
        .expect("tar")
        .finish()
        .expect("gzip");
    let path = dir.join("bundle.tgz");
    fs::File::create(&path)
        .and_then(|mut file| file.write_all(&bytes))
        .expect("write tarball");
    path
}

fn append<W: Write>(builder: &mut tar::Builder<W>, name: &str, contents: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, contents)
        .expect("append tar member");
}

/// Import the fixture bundle and return the commit id.
pub fn import_commit(data: &Path, scratch: &Path) -> String {
    let tarball = write_tarball(scratch, MANIFEST);
    let assert = skiff(data)
        .args(["commit", "import"])
        .arg(&tarball)
        .assert()
        .success();
    parse_json(&assert)["identifier"]
        .as_str()
        .expect("commit identifier")
        .to_string()
}

pub fn create_execution(data: &Path, commit: &str, extra: &[&str]) -> Value {
    let assert = skiff(data)
        .args(["execution", "create", "--commit", commit, "--step", "greet"])
        .args(extra)
        .assert()
        .success();
    parse_json(&assert)
}

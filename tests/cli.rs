use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};
use tiny_http::{Header, Response, Server};

struct Env {
    dir: TempDir,
    config: PathBuf,
}

impl Env {
    fn new(directory_url: &str) -> Self {
        let dir = tempdir().expect("tempdir");
        let config = dir.path().join("config.yaml");
        write_config(&config, directory_url, &dir.path().join("state.db"));
        Self { dir, config }
    }

    fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("tube-instances").expect("binary built");
        cmd.arg("--config").arg(&self.config).args(args);
        cmd.env("RUST_LOG", "off");
        cmd
    }
}

fn write_config(path: &Path, directory_url: &str, db: &Path) {
    let yaml = format!(
        "directory:\n  url: {directory_url}\n  timeout: 2s\napi:\n  default_instance: https://default.example\nstorage:\n  path: {}\n",
        db.display()
    );
    fs::write(path, yaml).expect("write config");
}

fn serve_directory(body: &'static str) -> String {
    let server = Server::http("127.0.0.1:0").expect("bind");
    let url = format!("http://{}/", server.server_addr());
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let response = Response::from_string(body).with_header(
                Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .expect("valid header"),
            );
            let _ = request.respond(response);
        }
    });
    url
}

#[test]
fn prints_version() {
    let mut cmd = Command::cargo_bin("tube-instances").expect("binary built");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    let mut cmd = Command::cargo_bin("tube-instances").expect("binary built");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tube-instances"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("auth-toggle"));
}

#[test]
fn unknown_command_fails() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["frobnicate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized command"));
}

#[test]
fn custom_instances_persist_between_runs() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["custom", "add", "mine", "https://mine.example/"])
        .assert()
        .success();
    env.cmd(&["custom", "add", "other", "https://other.example"])
        .assert()
        .success();
    env.cmd(&["custom", "add", "again", "https://mine.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already registered"));

    env.cmd(&["custom", "list"])
        .assert()
        .success()
        .stdout("mine\thttps://mine.example\nother\thttps://other.example\n");

    env.cmd(&["custom", "clear"]).assert().success();
    env.cmd(&["custom", "list"]).assert().success().stdout("");
    assert!(env.dir.path().join("state.db").exists());
}

#[test]
fn choices_fall_back_to_custom_when_offline() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["custom", "add", "mine", "https://mine.example"])
        .assert()
        .success();
    env.cmd(&["choices"])
        .assert()
        .success()
        .stdout("  mine\thttps://mine.example\n");
}

#[test]
fn choices_list_public_before_custom() {
    let url = serve_directory(
        r#"[{"name":"A","api_url":"https://a.example"},{"name":null,"api_url":"https://x.example"},{"name":"B","api_url":"https://b.example"}]"#,
    );
    let env = Env::new(&url);
    env.cmd(&["custom", "add", "C", "https://c.example"])
        .assert()
        .success();
    env.cmd(&["use", "https://b.example"]).assert().success();
    env.cmd(&["choices"])
        .assert()
        .success()
        .stdout("  A\thttps://a.example\n* B\thttps://b.example\n  C\thttps://c.example\n");
}

#[test]
fn auth_instance_selection_round_trip() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auth instance:    https://default.example"))
        .stdout(predicate::str::contains("separate auth:    off"));

    env.cmd(&["auth-toggle", "on"]).assert().success();
    env.cmd(&["auth-instance", "https://auth.example"])
        .assert()
        .success();
    env.cmd(&["auth-toggle", "off"]).assert().success();
    env.cmd(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auth instance:    https://default.example"));

    env.cmd(&["auth-toggle", "on"]).assert().success();
    env.cmd(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auth instance:    https://auth.example"))
        .stdout(predicate::str::contains("logged in:        no"));
}

#[test]
fn import_requires_login() {
    let env = Env::new("http://127.0.0.1:9/");
    let file = env.dir.path().join("subs.json");
    fs::write(&file, r#"{"subscriptions":[]}"#).expect("write subs");
    env.cmd(&["import", file.to_str().expect("utf8 path")])
        .assert()
        .failure()
        .stderr(predicate::function(|err: &str| {
            err.matches("not logged in").count() == 1
        }));
}

#[test]
fn export_failure_is_printed_once() {
    let env = Env::new("http://127.0.0.1:9/");
    let file = env.dir.path().join("out.json");
    env.cmd(&["export", file.to_str().expect("utf8 path")])
        .assert()
        .failure()
        .stderr("error: not logged in\n");
    assert!(!file.exists());
}

#[test]
fn logout_without_session_still_notifies() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["logout"])
        .assert()
        .success()
        .stdout("Logged out\n");
}

#[test]
fn switching_instance_reports_logout() {
    let env = Env::new("http://127.0.0.1:9/");
    env.cmd(&["use", "https://other.example"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out"));
    env.cmd(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default instance: https://other.example"));
}

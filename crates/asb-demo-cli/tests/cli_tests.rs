//! Exit code tests for the asb-demo binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const CONNECTION: &str = "Endpoint=sb://foo.servicebus.windows.net/;SharedAccessKeyName=someKeyName;SharedAccessKey=someKeyValue";

fn asb_demo() -> Command {
    let mut cmd = Command::cargo_bin("asb-demo").unwrap();
    cmd.env_remove("AsbDemoConnection")
        .env_remove("AsbDemoQueue")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn valid_config_file() -> NamedTempFile {
    config_file(&format!(
        r#"{{ "connectionString": "{}", "queue": "testqueue" }}"#,
        CONNECTION
    ))
}

#[test]
fn test_missing_config_file_exits_8() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    asb_demo()
        .arg("--config")
        .arg(&path)
        .assert()
        .code(8)
        .stdout(predicate::str::contains("Unable to find '-config' file"));
}

#[test]
fn test_invalid_connection_exits_6() {
    let file = config_file("{}");

    asb_demo()
        .arg("-c")
        .arg(file.path())
        .assert()
        .code(6)
        .stdout(predicate::str::contains(
            "\"Connection String or Queue name is invalid from file or environment variables\"",
        ));
}

#[test]
fn test_environment_fallback_succeeds() {
    let file = config_file("{}");

    asb_demo()
        .arg("-c")
        .arg(file.path())
        .env("AsbDemoConnection", CONNECTION)
        .env("AsbDemoQueue", "envqueue")
        .assert()
        .code(0);
}

#[test]
fn test_send_over_limit_exits_4() {
    let file = valid_config_file();

    asb_demo()
        .arg("-c")
        .arg(file.path())
        .args(["--send", "21"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("Send can not exceed 20."));
}

#[test]
fn test_receive_over_limit_exits_5() {
    let file = valid_config_file();

    asb_demo()
        .arg("-c")
        .arg(file.path())
        .args(["--receive", "6"])
        .assert()
        .code(5)
        .stdout(predicate::str::contains("receive can not exceed 5 minutes"));
}

#[test]
fn test_nothing_to_do_exits_0() {
    let file = valid_config_file();

    asb_demo()
        .arg("-c")
        .arg(file.path())
        .args(["--send", "-3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Normal Exit\""));
}

#[test]
fn test_missing_config_argument_is_usage_error() {
    asb_demo().args(["--send", "1"]).assert().code(2);
}

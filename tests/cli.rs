//! Tests running the compiled binary.

#![cfg(unix)]

use std::io::Write;
use std::process::{Command, Stdio};

mod common;

use common::{BINARY, SERVICE_SCRIPT};

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_invalid_config_exits_with_two() {
    let file = config_file(
        r#"
        [services.a]
        command = "true"
        dependencies = ["b"]

        [services.b]
        command = "true"
        dependencies = ["a"]
        "#,
    );

    let output = Command::new(BINARY).arg("run").arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid Config: Found cyclic dependency a -> b -> a"), "{}", stderr);
}

#[test]
fn test_invalid_config_is_printed_when_requested() {
    let file = config_file(
        r#"
        [services.a]
        command = "true"
        dependencies = ["a"]
        "#,
    );

    let output = Command::new(BINARY)
        .arg("run")
        .arg(file.path())
        .arg("--print-config")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Config:\n"), "{}", stdout);
    assert!(stdout.contains("\"dependencies\""), "{}", stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid Config: Found cyclic dependency a -> a"), "{}", stderr);
}

#[test]
fn test_crash_exits_with_one() {
    let file = config_file(&format!(
        r#"
        [services.crasher]
        command = ["sh", "{script}"]
        ready = {{ kind = "output-line-includes", value = "never" }}
        env = {{ CRASH_BEFORE_STARTED = 1 }}
        "#,
        script = SERVICE_SCRIPT,
    ));

    let output = Command::new(BINARY).arg("run").arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Starting all services...",
            "Starting service 'crasher'...",
            "Error: Service 'crasher' exited",
            "Stopping all services...",
            "Stopped all services",
        ]
    );
}

#[test]
fn test_check_prints_normalized_config() {
    let file = config_file(
        r#"
        [services]
        disabled = false

        [services.web]
        command = "python -m http.server"
        env = { PORT = 8000 }
        ready = { kind = "port-used", port = 8000 }
        "#,
    );

    let output = Command::new(BINARY).arg("check").arg(file.path()).output().unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let services = config["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], "web");
    assert_eq!(services[0]["command"], serde_json::json!(["python", "-m", "http.server"]));
    assert_eq!(services[0]["env"]["PORT"], "8000");
    assert_eq!(services[0]["ready"], "port localhost:8000 in use");
}

#[tokio::test]
async fn test_http_proxy_subcommand() {
    let backend = common::start_mock_backend("from backend").await;
    let port = common::unused_port().await;
    let proxies = format!(
        r#"[{{"context":["/api"],"target":"http://{}"}}]"#,
        backend
    );

    let mut child = tokio::process::Command::new(BINARY)
        .arg("http-proxy")
        .env("HOST", "127.0.0.1")
        .env("PORT", port.to_string())
        .env("PROXIES", proxies)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdout));
    let first = tokio::time::timeout(std::time::Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first, format!("Listening @ http://127.0.0.1:{}", port));

    let body = reqwest::get(format!("http://127.0.0.1:{}/api/items", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "from backend");

    let pid = nix::unistd::Pid::from_raw(child.id().unwrap() as i32);
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT).unwrap();
    let status = tokio::time::timeout(std::time::Duration::from_secs(10), child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
}

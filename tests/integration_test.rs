// Integration tests for fuze-sync
// Run with: cargo test --test integration_test

use std::path::Path;
use std::process::Command;

fn run_cli(args: &[&str], home: &Path) -> (bool, String, String) {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .env("HOME", home)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (output.status.success(), stdout, stderr)
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().expect("tempdir");
    let (_, stdout, stderr) = run_cli(&["--help"], home.path());
    let combined = format!("{}{}", stdout, stderr);

    for command in ["login", "status", "add", "remove", "import", "watch", "config"] {
        assert!(
            combined.contains(command),
            "Help should list the {} command",
            command
        );
    }
}

#[test]
fn test_import_help_shows_source_and_ceiling_flags() {
    let home = tempfile::tempdir().expect("tempdir");
    let (_, stdout, stderr) = run_cli(&["import", "--help"], home.path());
    let combined = format!("{}{}", stdout, stderr);

    assert!(combined.contains("--source"), "import help should show --source");
    assert!(combined.contains("--first-1000"), "import help should show --first-1000");
    assert!(combined.contains("--all"), "import help should show --all");
}

#[test]
fn test_config_round_trip() {
    let home = tempfile::tempdir().expect("tempdir");

    let (success, stdout, _) = run_cli(
        &["config", "--api-url", "http://localhost:3000"],
        home.path(),
    );
    assert!(success, "config --api-url should succeed");
    assert!(stdout.contains("http://localhost:3000"));

    // Fresh invocation reads the persisted settings back
    let (success, stdout, _) = run_cli(&["config"], home.path());
    assert!(success, "config should succeed");
    assert!(stdout.contains("http://localhost:3000"));
    assert!(stdout.contains("autoSync:  true"), "autoSync should default to true");
    assert!(stdout.contains("(none)"), "no token should be stored yet");
}

#[test]
fn test_status_reports_missing_configuration() {
    let home = tempfile::tempdir().expect("tempdir");
    let (success, stdout, _) = run_cli(&["status"], home.path());

    assert!(success, "status should not fail on a fresh profile");
    assert!(
        stdout.contains("API URL not configured"),
        "status should explain that no API URL is set"
    );
}

#[test]
fn test_status_reports_missing_login() {
    let home = tempfile::tempdir().expect("tempdir");
    run_cli(&["config", "--api-url", "http://localhost:3000"], home.path());

    let (success, stdout, _) = run_cli(&["status"], home.path());
    assert!(success);
    assert!(
        stdout.contains("Not authenticated"),
        "status should ask the user to log in"
    );
}

fn write_settings(home: &Path, api_url: &str) {
    let dir = home.join(".fuze-sync");
    std::fs::create_dir_all(&dir).expect("settings dir");
    std::fs::write(
        dir.join("settings.json"),
        format!(
            r#"{{"authToken":"tok-test","apiUrl":"{}","autoSync":true,"updatedAt":"2024-01-01T00:00:00Z"}}"#,
            api_url
        ),
    )
    .expect("settings file");
}

#[test]
fn test_status_clears_session_when_server_rejects_token() {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let mut buffer = [0u8; 4096];
        let _ = socket.read(&mut buffer);
        let _ = socket.write_all(
            b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
    });

    let home = tempfile::tempdir().expect("tempdir");
    write_settings(home.path(), &format!("http://{}", addr));

    let (success, stdout, _) = run_cli(&["status"], home.path());
    assert!(success);
    assert!(
        stdout.contains("Session expired - please login"),
        "rejected token should expire the session, got: {}",
        stdout
    );
    server.join().expect("server thread");

    // The token is gone now; the next status asks for a login
    let (_, stdout, _) = run_cli(&["status"], home.path());
    assert!(stdout.contains("Not authenticated"));
}

#[test]
fn test_status_keeps_session_when_server_is_unreachable() {
    let home = tempfile::tempdir().expect("tempdir");
    // Port 9 (discard) refuses connections on any sane machine
    write_settings(home.path(), "http://127.0.0.1:9");

    let (success, stdout, _) = run_cli(&["status"], home.path());
    assert!(success);
    assert!(
        stdout.contains("Connected (offline)"),
        "unreachable server must not log the user out, got: {}",
        stdout
    );

    // Session survived: same answer on a second run
    let (_, stdout, _) = run_cli(&["status"], home.path());
    assert!(stdout.contains("Connected (offline)"));
}

#[test]
fn test_add_refuses_browser_internal_urls() {
    let home = tempfile::tempdir().expect("tempdir");
    let (success, _, stderr) = run_cli(
        &["add", "--url", "chrome://settings", "--title", "Settings"],
        home.path(),
    );

    assert!(!success, "internal URLs must be rejected");
    assert!(stderr.contains("Cannot save browser internal pages"));
}

#[test]
fn test_import_from_html_export_requires_file() {
    let home = tempfile::tempdir().expect("tempdir");
    let (success, _, stderr) = run_cli(&["import", "--source", "html"], home.path());

    assert!(!success);
    assert!(stderr.contains("--file"), "html source should demand a file path");
}

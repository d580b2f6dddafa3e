//! End-to-end tests for the imgvary binary.

use assert_cmd::Command;
use base64::Engine;
use predicates::prelude::*;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PNG_MAGIC: [u8; 16] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

/// Command with a clean environment and a working directory inside `dir`.
#[allow(deprecated)]
fn imgvary_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("imgvary").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env("RUST_LOG", "imgvary=warn");
    cmd
}

fn write_png(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), PNG_MAGIC).unwrap();
}

/// Reads one HTTP request off the socket, body included.
fn drain_request(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(read) => buf.extend_from_slice(&chunk[..read]),
        }
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// How the stub hands back generated images.
#[derive(Clone, Copy, PartialEq)]
enum Payload {
    /// Inline `b64_json` entries.
    Base64,
    /// `url` entries pointing back at the stub's `/files/{k}.png`.
    Url,
    /// `url` entries whose download answers 404.
    BrokenUrl,
}

/// Bytes served for every downloaded image.
const DOWNLOADED: [u8; 20] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R', b'u',
    b'r', b'l', b'!',
];

struct StubApi {
    base_url: String,
    variation_calls: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

/// Serves `/images/variations`, answering each request with as many images
/// as the `n` form field asks for, plus the downloads for `url` payloads.
fn spawn_stub_api(payload: Payload) -> StubApi {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let variation_calls = Arc::new(AtomicUsize::new(0));
    let downloads = Arc::new(AtomicUsize::new(0));
    let (calls, fetched) = (Arc::clone(&variation_calls), Arc::clone(&downloads));

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let request = drain_request(&mut stream);

            if request.starts_with("GET /files/") {
                fetched.fetch_add(1, Ordering::SeqCst);
                if payload == Payload::BrokenUrl {
                    respond(&mut stream, "404 Not Found", "text/plain", b"expired");
                } else {
                    respond(&mut stream, "200 OK", "image/png", &DOWNLOADED);
                }
                continue;
            }
            calls.fetch_add(1, Ordering::SeqCst);

            let n = request
                .split("name=\"n\"\r\n\r\n")
                .nth(1)
                .and_then(|rest| rest.split("\r\n").next())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(1);
            let image = base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC);
            let data: Vec<_> = (0..n)
                .map(|k| match payload {
                    Payload::Base64 => serde_json::json!({ "b64_json": image }),
                    Payload::Url | Payload::BrokenUrl => {
                        serde_json::json!({ "url": format!("http://{addr}/files/{k}.png") })
                    }
                })
                .collect();
            let body = serde_json::json!({ "created": 0, "data": data }).to_string();
            respond(&mut stream, "200 OK", "application/json", body.as_bytes());
        }
    });

    StubApi {
        base_url: format!("http://{addr}/v1"),
        variation_calls,
        downloads,
    }
}

#[test]
fn test_missing_credential_is_auth_error() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");

    imgvary_cmd(&dir)
        .args(["cat.png", "-n", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication failed"));

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_missing_image_fails_before_network() {
    let dir = TempDir::new().unwrap();
    let stub = spawn_stub_api(Payload::Base64);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["does-not-exist.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("source image not found"));

    assert_eq!(stub.variation_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_non_png_rejected_before_network() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("photo.jpg"), [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0])
        .unwrap();
    let stub = spawn_stub_api(Payload::Base64);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["photo.jpg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a PNG"));

    assert_eq!(stub.variation_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_zero_count_rejected() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");
    let stub = spawn_stub_api(Payload::Base64);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["cat.png", "-n", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));

    assert_eq!(stub.variation_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_writes_requested_number_of_variations() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");
    std::fs::create_dir(dir.path().join("out")).unwrap();
    let stub = spawn_stub_api(Payload::Base64);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args([
            "cat.png",
            "-n",
            "3",
            "-o",
            "out",
            "--batch-size",
            "2",
            "--batch-pause",
            "0",
            "--response-format",
            "b64-json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated 3 variation(s)"));

    let out = dir.path().join("out");
    let mut written: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec!["regen1_cat.png", "regen2_cat.png", "regen3_cat.png"]
    );
    assert_eq!(std::fs::read(out.join("regen2_cat.png")).unwrap(), PNG_MAGIC);
    assert_eq!(stub.variation_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_json_report() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");
    let stub = spawn_stub_api(Payload::Base64);

    let output = imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["cat.png", "--response-format", "b64-json", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["requests"], 1);
    assert_eq!(report["outputs"].as_array().unwrap().len(), 1);
    assert_eq!(report["outputs"][0]["index"], 1);
}

#[test]
fn test_downloads_url_payloads() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");
    let stub = spawn_stub_api(Payload::Url);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["cat.png", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Image 2 created"));

    assert_eq!(std::fs::read(dir.path().join("regen1_cat.png")).unwrap(), DOWNLOADED);
    assert_eq!(std::fs::read(dir.path().join("regen2_cat.png")).unwrap(), DOWNLOADED);
    assert_eq!(stub.variation_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.downloads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_download_fails_the_run() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "cat.png");
    let stub = spawn_stub_api(Payload::BrokenUrl);

    imgvary_cmd(&dir)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .args(["cat.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API error: 404"));

    assert!(!dir.path().join("regen1_cat.png").exists());
    assert_eq!(stub.downloads.load(Ordering::SeqCst), 1);
}

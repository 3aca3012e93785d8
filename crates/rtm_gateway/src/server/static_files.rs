//! Development-only static file serving on the WebSocket port.
//!
//! Plain HTTP requests that are not WebSocket upgrades are answered from a
//! directory; upgrade requests are left untouched for the handshake.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

const PEEK_BUFFER: usize = 4096;
const PEEK_ATTEMPTS: usize = 20;
const PEEK_RETRY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serves `stream` if it carries a plain HTTP request.
    ///
    /// Returns `Ok(false)` without consuming any bytes when the request is a
    /// WebSocket upgrade.
    pub async fn try_serve(&self, stream: &mut TcpStream) -> io::Result<bool> {
        let head = peek_request_head(stream).await?;
        if is_websocket_upgrade(&head) {
            return Ok(false);
        }

        let response = match request_path(&head) {
            Some(path) => self.respond(path).await,
            None => http_response(400, "text/plain", b"Bad Request".to_vec()),
        };
        stream.write_all(&response).await?;
        stream.shutdown().await?;
        Ok(true)
    }

    async fn respond(&self, request_path: &str) -> Vec<u8> {
        let Some(file) = self.resolve(request_path) else {
            return http_response(404, "text/plain", b"Not Found".to_vec());
        };
        match tokio::fs::read(&file).await {
            Ok(body) => {
                debug!("Serving {}", file.display());
                http_response(200, content_type(&file), body)
            }
            Err(_) => http_response(404, "text/plain", b"Not Found".to_vec()),
        }
    }

    /// Maps a URL path onto the root, refusing anything that escapes it.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let path = request_path.split(['?', '#']).next().unwrap_or("/");
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let mut file = self.root.join(relative);
        if path.ends_with('/') || relative.as_os_str().is_empty() {
            file.push("index.html");
        }
        Some(file)
    }
}

async fn peek_request_head(stream: &TcpStream) -> io::Result<String> {
    let mut buf = vec![0u8; PEEK_BUFFER];
    let mut head = String::new();
    for _ in 0..PEEK_ATTEMPTS {
        let n = stream.peek(&mut buf).await?;
        head = String::from_utf8_lossy(&buf[..n]).into_owned();
        if n == 0 || n == buf.len() || head.contains("\r\n\r\n") {
            break;
        }
        tokio::time::sleep(PEEK_RETRY).await;
    }
    Ok(head)
}

fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade") && value.trim().eq_ignore_ascii_case("websocket")
        })
    })
}

fn request_path(head: &str) -> Option<&str> {
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next()?, parts.next()?) {
        ("GET", path) | ("HEAD", path) if path.starts_with('/') => Some(path),
        _ => None,
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn http_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    response
}

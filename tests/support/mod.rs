//! Canned-response HTTP stub for wire-level tests
//!
//! Binds an ephemeral local port and answers each request from a static
//! route table keyed by (method, path). One response per connection;
//! `Connection: close` keeps the client from pooling.

#![allow(dead_code)]

use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct StubResponse {
    pub status: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status("200 OK", body)
    }

    pub fn with_status(status: &'static str, body: impl Into<String>) -> Self {
        StubResponse {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// UWS-style job-creation redirect
    pub fn redirect(location: impl Into<String>) -> Self {
        StubResponse {
            status: "303 See Other",
            headers: vec![("Location".to_string(), location.into())],
            body: String::new(),
        }
    }
}

pub type Routes = HashMap<(String, String), StubResponse>;

/// Convenience for building route keys
pub fn route(method: &str, path: &str) -> (String, String) {
    (method.to_string(), path.to_string())
}

/// Start the stub and return its address. The accept loop runs until the
/// test process exits.
pub async fn serve(routes: Routes) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let _ = handle(stream, &routes).await;
            });
        }
    });

    Ok(addr)
}

/// Stub that accepts connections but never answers, for timeout tests
pub async fn serve_unresponsive() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    Ok(addr)
}

async fn handle(mut stream: TcpStream, routes: &Routes) -> Result<()> {
    let (method, path) = read_request(&mut stream).await?;
    let fallback = StubResponse::with_status(
        "404 Not Found",
        format!("no route for {} {}", method, path),
    );
    let response = routes.get(&(method, path)).unwrap_or(&fallback);
    stream.write_all(format_response(response).as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_request(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before headers arrived");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();

    // Drain the request body before answering
    let expected = content_length(&head);
    let mut body_read = buf.len() - header_end;
    while body_read < expected {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Ok((method, path))
}

fn content_length(head: &str) -> usize {
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.trim().parse() {
                    return n;
                }
            }
        }
    }
    0
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn format_response(response: &StubResponse) -> String {
    let mut extra = String::new();
    for (name, value) in &response.headers {
        extra.push_str(&format!("{}: {}\r\n", name, value));
    }
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
        response.status,
        response.body.len(),
        extra,
        response.body
    )
}

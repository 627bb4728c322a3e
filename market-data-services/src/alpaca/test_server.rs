//! Local HTTP server with canned replies for exercising the REST client

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::config::AlpacaConfig;

/// What the server answers to one request
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Json(u16, String),
    /// Send the headers and part of the body, then hang
    StallBody,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Json(200, body.into())
    }

    pub fn status(status: u16, message: &str) -> Self {
        Reply::Json(status, format!(r#"{{"message":"{}"}}"#, message))
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Answer requests with `replies` in order, 404 once they run out
    pub async fn start(replies: Vec<Reply>) -> Self {
        Self::with_handler(move |index| {
            replies
                .get(index)
                .cloned()
                .unwrap_or_else(|| Reply::status(404, "no more replies"))
        })
        .await
    }

    /// Answer the n-th request (from 0) with `handler(n)`
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let target = read_request_target(&mut socket).await;
                let index = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(target);
                    seen.len() - 1
                };
                let reply = handler(index);
                tokio::spawn(write_reply(socket, reply));
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointing both APIs here, with caching off
    pub fn config(&self) -> AlpacaConfig {
        AlpacaConfig {
            data_url: self.url(),
            trading_url: self.url(),
            requests_per_minute: 100_000,
            cache_ttl_seconds: 0,
            ..AlpacaConfig::new("key", "secret")
        }
    }

    /// Request targets (path and query) in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request_target(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    String::from_utf8_lossy(&buf)
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

async fn write_reply(mut socket: TcpStream, reply: Reply) {
    match reply {
        Reply::Json(status, body) => {
            let response = format!(
                "HTTP/1.1 {} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::StallBody => {
            let head = "HTTP/1.1 200 Test\r\ncontent-type: application/json\r\ncontent-length: 100\r\nconnection: close\r\n\r\n{";
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

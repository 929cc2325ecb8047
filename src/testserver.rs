//! Minimal HTTP stub for exercising the API client against canned responses.
//! Test builds only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type Responder = Arc<dyn Fn(&str, usize) -> Option<(u16, String)> + Send + Sync>;

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a stub server. The responder receives `"METHOD /path"` and the
    /// zero-based hit count for that exact request, and returns
    /// `(status, json body)`; `None` becomes a 404.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Option<(u16, String)> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
        let addr = listener.local_addr().expect("stub server addr");
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let responder: Responder = Arc::new(responder);

        let requests_for_task = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(
                    socket,
                    responder.clone(),
                    requests_for_task.clone(),
                    hits.clone(),
                ));
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every `"METHOD /path"` seen so far, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    responder: Responder,
    requests: Arc<Mutex<Vec<String>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
                    break pos + 4;
                }
                if buffer.len() > 65536 {
                    return;
                }
            }
            Err(_) => return,
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or("").to_string();
    let method_path = request_line
        .rsplit_once(' ')
        .map(|(method_path, _version)| method_path.to_string())
        .unwrap_or(request_line);

    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body_read = buffer.len() - header_end;
    while body_read < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => body_read += n,
            Err(_) => return,
        }
    }

    requests.lock().expect("requests lock").push(method_path.clone());
    let hit = {
        let mut hits = hits.lock().expect("hits lock");
        let count = hits.entry(method_path.clone()).or_insert(0);
        let current = *count;
        *count += 1;
        current
    };

    let (status, body) = responder(&method_path, hit)
        .unwrap_or((404, r#"{"message":"not found"}"#.to_string()));
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

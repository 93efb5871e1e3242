//! An in-process JSON-RPC backend for exercising the clients over real HTTP.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

type Responder = dyn Fn(&str, &Value) -> (u16, Value) + Send + Sync;

/// Wraps `result` into a successful envelope.
pub fn ok(result: Value) -> (u16, Value) {
    (200, serde_json::json!({ "jsonrpc": "2.0", "result": result }))
}

/// Answers every request with the reply of its responder and records the called methods.
pub struct StubBackend {
    pub url: String,
    calls: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl StubBackend {
    /// Binds to a free local port and serves one request per connection.
    pub async fn spawn(
        respond: impl Fn(&str, &Value) -> (u16, Value) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let recorded = Arc::clone(&calls);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (respond, recorded) = (Arc::clone(&respond), Arc::clone(&recorded));
                tokio::spawn(async move {
                    let _ = serve(stream, respond, recorded).await;
                });
            }
        });

        Self { url, calls, handle }
    }

    /// Returns the methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    respond: Arc<Responder>,
    calls: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let (body_start, content_length) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (end + 4, length);
        }
    };
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let end = buf.len().min(body_start + content_length);
    let request: Value = serde_json::from_slice(&buf[body_start..end]).unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default().to_string();
    calls.lock().unwrap().push(method.clone());

    let (status, mut reply) = respond(&method, &request["params"]);
    if reply.get("jsonrpc").is_some() {
        reply["id"] = request["id"].clone();
    }
    let body = serde_json::to_vec(&reply)?;
    let head = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}

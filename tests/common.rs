// Shared helpers for the integration tests: a canned-response HTTP stub
// (enough of HTTP/1.1 for one request per connection) and a minimal chat
// hub acceptor over tokio-tungstenite.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path with the query string stripped.
    pub path: String,
    /// Raw request head, lowercased, for header assertions.
    pub head: String,
}

pub struct HttpStub {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn find(&self, method: &str, path: &str) -> Option<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Spawn an HTTP responder on an ephemeral port. `respond` maps
/// `(method, path)` to `(status, json_body)`; every request is recorded.
pub async fn spawn_http_stub<F>(respond: F) -> HttpStub
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let log = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let head_end = loop {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
                let content_length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < head_end + content_length {
                    let Ok(n) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let request_line = head.lines().next().unwrap_or("").to_string();
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or("").to_uppercase();
                let target = parts.next().unwrap_or("").to_string();
                let path = target.split('?').next().unwrap_or("").to_string();

                log.lock().unwrap().push(RecordedRequest {
                    method: method.clone(),
                    path: path.clone(),
                    head,
                });

                let (status, body) = respond(&method, &path);
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    HttpStub { addr, requests }
}

pub struct HubStub {
    pub addr: SocketAddr,
    /// Text frames received from the client.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Text frames to push to the client.
    pub to_client: mpsc::UnboundedSender<String>,
    /// Request URI of the first accepted handshake.
    pub request_uri: oneshot::Receiver<String>,
}

impl HubStub {
    pub fn hub_url(&self) -> String {
        format!("ws://{}/chatHub", self.addr)
    }
}

/// Spawn a one-connection chat hub acceptor.
pub async fn spawn_hub_stub() -> HubStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client_tx, from_client) = mpsc::unbounded_channel::<String>();
    let (to_client, mut push_rx) = mpsc::unbounded_channel::<String>();
    let (uri_tx, request_uri) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
             resp: tokio_tungstenite::tungstenite::handshake::server::Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            },
        )
        .await;
        let Ok(ws) = ws else {
            return;
        };
        let (mut sink, mut source) = ws.split();

        tokio::spawn(async move {
            while let Some(text) = push_rx.recv().await {
                if sink
                    .send(tokio_tungstenite::tungstenite::Message::Text(text))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        while let Some(Ok(frame)) = source.next().await {
            if let tokio_tungstenite::tungstenite::Message::Text(text) = frame {
                if client_tx.send(text).is_err() {
                    break;
                }
            }
        }
    });

    HubStub {
        addr,
        from_client,
        to_client,
        request_uri,
    }
}

enum HubCommand {
    Push(String),
    Kill,
}

/// Hub acceptor that keeps accepting connections, so transport loss and
/// reconnection can be exercised. `kill_current` drops the live socket.
pub struct ReconnectingHubStub {
    addr: SocketAddr,
    accepted: Arc<std::sync::atomic::AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<HubCommand>>>>,
}

impl ReconnectingHubStub {
    pub fn hub_url(&self) -> String {
        format!("ws://{}/chatHub", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn push(&self, text: String) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.send(HubCommand::Push(text));
        }
    }

    pub fn kill_current(&self) {
        if let Some(tx) = self.current.lock().unwrap().take() {
            let _ = tx.send(HubCommand::Kill);
        }
    }
}

pub async fn spawn_reconnecting_hub_stub() -> ReconnectingHubStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let current: Arc<Mutex<Option<mpsc::UnboundedSender<HubCommand>>>> =
        Arc::new(Mutex::new(None));

    let accepted_counter = Arc::clone(&accepted);
    let current_slot = Arc::clone(&current);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            accepted_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<HubCommand>();
            *current_slot.lock().unwrap() = Some(cmd_tx);
            tokio::spawn(async move {
                let (mut sink, mut source) = ws.split();
                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            Some(HubCommand::Push(text)) => {
                                if sink
                                    .send(tokio_tungstenite::tungstenite::Message::Text(text))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Some(HubCommand::Kill) | None => {
                                let _ = sink.close().await;
                                return;
                            }
                        },
                        frame = source.next() => {
                            if !matches!(frame, Some(Ok(_))) {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    ReconnectingHubStub {
        addr,
        accepted,
        current,
    }
}

/// Unsigned JWT good for an hour, enough for client-side inspection.
pub fn make_token(user_id: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    let claims = json!({ "sub": user_id.to_string(), "email": "test@example.com", "exp": exp });
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.sig", header, payload)
}

/// Poll `check` until it passes or the deadline elapses.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

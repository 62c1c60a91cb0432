//! Shared fixtures for the integration tests
//!
//! - [`mock_api`]: a wiremock server answering the catalog endpoints
//! - [`PushServer`]: an in-process WebSocket server that pushes frames on demand

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nexus_session::session::HttpTransport;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

pub fn tools_body() -> Value {
    json!({
        "tools": [
            {"name": "echo", "description": "Echo the input", "inputSchema": {"type": "object"}},
            {"name": "search", "description": "Search notes", "inputSchema": {"type": "object"}}
        ]
    })
}

/// Start a mock API server with the three catalog endpoints mounted
pub async fn mock_api() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tools_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [{"uri": "file:///notes.md", "name": "notes", "mimeType": "text/markdown"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/resource-templates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "templates": [{"uriTemplate": "file:///{path}", "name": "files"}]
        })))
        .mount(&server)
        .await;

    server
}

#[derive(Debug, Clone)]
enum PushCommand {
    Send(String),
    Close,
}

/// WebSocket server standing in for the `/ws` endpoint
pub struct PushServer {
    pub url: Url,
    commands: broadcast::Sender<PushCommand>,
    connections: Arc<AtomicUsize>,
}

impl PushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_commands = commands.clone();
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                // Subscribe before the handshake completes so no command is missed
                let mut rx = accept_commands.subscribe();
                let connections = Arc::clone(&accept_connections);

                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    loop {
                        tokio::select! {
                            command = rx.recv() => match command {
                                Ok(PushCommand::Send(text)) => {
                                    if ws.send(Message::text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(PushCommand::Close) | Err(_) => {
                                    let _ = ws.close(None).await;
                                    break;
                                }
                            },
                            incoming = ws.next() => match incoming {
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: ws_url(addr),
            commands,
            connections,
        }
    }

    /// Push a text frame to every open connection
    pub fn push(&self, frame: Value) {
        let _ = self.commands.send(PushCommand::Send(frame.to_string()));
    }

    /// Close every open connection from the server side
    pub fn close_all(&self) {
        let _ = self.commands.send(PushCommand::Close);
    }

    /// Completed handshakes so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn ws_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

/// Transport talking HTTP to `api` and WebSocket to `push`
pub fn transport(api: &MockServer, push: &PushServer) -> HttpTransport {
    HttpTransport::new(&api.uri())
        .unwrap()
        .with_ws_url(push.url.clone())
}

/// An address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

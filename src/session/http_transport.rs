//! HTTP + WebSocket Transport
//!
//! This module implements [`Transport`] against a live Nexus API server.
//!
//! # Architecture
//!
//! - **Requests** are plain HTTP calls made with `reqwest`. Each call is an
//!   independent round-trip; nothing is buffered between calls.
//! - **Push events** arrive on a single WebSocket opened by
//!   [`connect`](Transport::connect). A background reader task parses each
//!   text frame as a `{type, ...payload}` envelope and publishes recognized
//!   envelopes to the [`SubscriptionRegistry`]. Unrecognized or unhandled
//!   envelopes are logged and dropped.
//!
//! The WebSocket URL is derived from the base URL (`http` → `ws`,
//! `https` → `wss`) with the configured path, `/ws` by default.
//!
//! # Example
//!
//! ```ignore
//! use nexus_session::session::{HttpTransport, Session};
//!
//! let transport = HttpTransport::new("http://127.0.0.1:3001")?;
//! let session = Session::new(transport, SessionConfig::default());
//! session.connect().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServerConfig;
use crate::session::error::SessionError;
use crate::session::protocol::PushEnvelope;
use crate::session::registry::SubscriptionRegistry;
use crate::session::transport::{ApiRequest, Transport};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport for a remote Nexus API server
///
/// # Configuration
///
/// - **base_url**: server root, e.g. `http://127.0.0.1:3001`
/// - **ws_path**: push channel path (default: `/ws`)
/// - **request_timeout_secs**: per-request timeout (default: 30 seconds)
pub struct HttpTransport {
    client: reqwest::Client,

    /// Base URL without a trailing slash
    base_url: String,

    ws_url: Url,

    timeout: Duration,

    registry: SubscriptionRegistry,

    /// The one live push channel, if any
    socket: Mutex<Option<LiveSocket>>,

    link: Arc<watch::Sender<bool>>,
}

struct LiveSocket {
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
}

impl HttpTransport {
    /// Create a transport for `base_url` with default settings
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_config(&ServerConfig {
            base_url: base_url.to_string(),
            ..ServerConfig::default()
        })
    }

    /// Create a transport from the `[server]` configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid server URL: {}", config.base_url))?;
        let ws_url = websocket_url(&base, &config.ws_path)?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let (link, _) = watch::channel(false);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ws_url,
            timeout,
            registry: SubscriptionRegistry::new(),
            socket: Mutex::new(None),
            link: Arc::new(link),
        })
    }

    /// Open the push channel at `url` instead of deriving it from the base URL
    pub fn with_ws_url(mut self, url: Url) -> Self {
        self.ws_url = url;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), SessionError> {
        let mut socket = self.socket.lock().await;

        if socket.is_some() && *self.link.borrow() {
            tracing::debug!("Push channel already open");
            return Ok(());
        }

        // Reap the reader of a channel the server already closed, so its final
        // link update cannot land after ours
        if let Some(stale) = socket.take() {
            stale.shutdown.cancel();
            let _ = stale.reader.await;
        }

        tracing::info!(url = %self.ws_url, "Opening push channel");
        let (stream, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| SessionError::connection(self.ws_url.as_str(), e))?;

        self.link.send_replace(true);

        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            stream,
            self.registry.clone(),
            Arc::clone(&self.link),
            shutdown.clone(),
        ));

        *socket = Some(LiveSocket { shutdown, reader });
        Ok(())
    }

    async fn disconnect(&self) {
        let live = self.socket.lock().await.take();

        if let Some(live) = live {
            live.shutdown.cancel();
            if let Err(e) = live.reader.await {
                tracing::warn!(error = %e, "Push reader task ended abnormally");
            }
            tracing::info!(url = %self.ws_url, "Push channel closed");
        }

        self.link.send_replace(false);
    }

    async fn request(&self, request: ApiRequest) -> Result<Value, SessionError> {
        let url = format!("{}{}", self.base_url, request.endpoint);
        tracing::debug!(method = %request.method, endpoint = %request.endpoint, "Sending request");

        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            SessionError::api(None, &request.endpoint, format!("request failed: {e}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SessionError::api(
                Some(status.as_u16()),
                &request.endpoint,
                format!("failed to read response body: {e}"),
            )
        })?;

        if !status.is_success() {
            let detail = error_detail(status, &body);
            tracing::debug!(status = status.as_u16(), endpoint = %request.endpoint, %detail, "Request rejected");
            return Err(SessionError::api(
                Some(status.as_u16()),
                &request.endpoint,
                detail,
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            SessionError::api(
                Some(status.as_u16()),
                &request.endpoint,
                format!("malformed response body: {e}"),
            )
        })
    }

    fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    fn target(&self) -> String {
        self.ws_url.to_string()
    }

    fn link_state(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }

    fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(live) = self.socket.get_mut().take() {
            live.shutdown.cancel();
        }
    }
}

/// Derive the push channel URL from the server base URL
fn websocket_url(base: &Url, path: &str) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("Unsupported server URL scheme: {other}"),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| anyhow::anyhow!("Cannot use scheme {scheme} for {base}"))?;
    url.set_path(path);
    url.set_query(None);
    Ok(url)
}

/// Extract the server-supplied `detail` from an error body
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("unknown error")
        .to_string()
}

/// Parse one inbound frame and publish it to its topic
///
/// Returns the number of handlers that received it.
pub(crate) fn dispatch_push(registry: &SubscriptionRegistry, raw: &str) -> usize {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid push message");
            return 0;
        }
    };

    let envelope: PushEnvelope = match serde_json::from_value(value.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Push message is not an envelope");
            return 0;
        }
    };

    match envelope.topic() {
        Some(topic) => registry.publish(topic, &value),
        None => {
            tracing::debug!(kind = %envelope.kind, "Unrecognized push envelope dropped");
            0
        }
    }
}

async fn read_loop(
    mut stream: PushStream,
    registry: SubscriptionRegistry,
    link: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Err(e) = stream.close(None).await {
                    tracing::debug!(error = %e, "Close handshake failed");
                }
                break;
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_push(&registry, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            dispatch_push(&registry, text);
                        }
                        Err(_) => tracing::warn!("Non-UTF-8 binary push message dropped"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Push channel closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Push channel error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    link.send_replace(false);
}

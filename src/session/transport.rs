//! Transport Layer
//!
//! The transport is the single point of contact with the Nexus API server. It
//! hides the two channels the server exposes:
//!
//! - a **duplex** push channel (WebSocket) that is opened and closed
//!   explicitly and delivers asynchronous events, and
//! - a **request/response** channel (HTTP) used for every typed call.
//!
//! The session manager is generic over [`Transport`], so tests can drive it
//! with an in-memory implementation.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;

use crate::session::error::SessionError;
use crate::session::registry::{Subscription, SubscriptionRegistry};

/// One request/response exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,

    /// Path relative to the server base URL, e.g. `/api/tools`
    pub endpoint: String,

    /// JSON body, sent only when present
    pub payload: Option<Value>,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            endpoint: endpoint.into(),
            payload: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::POST,
            endpoint: endpoint.into(),
            payload: Some(payload),
        }
    }
}

/// Transport trait for the Nexus API server
///
/// All methods take `&self`; implementations synchronize internally so that
/// several requests can be in flight at once. Completion order of concurrent
/// requests is not guaranteed to match issue order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the duplex channel
    ///
    /// Idempotent: resolves immediately when the channel is already open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the socket cannot be established.
    async fn connect(&self) -> Result<(), SessionError>;

    /// Close the duplex channel if open. Idempotent, never fails.
    async fn disconnect(&self);

    /// Perform a single request/response exchange
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Api`] on a non-success status or on a
    /// transport-level failure, including an unparseable body.
    async fn request(&self, request: ApiRequest) -> Result<Value, SessionError>;

    /// Whether the duplex channel is currently open
    fn is_connected(&self) -> bool;

    /// Address of the remote service, for diagnostics
    fn target(&self) -> String;

    /// Watch channel that flips to `false` whenever the duplex channel closes
    fn link_state(&self) -> watch::Receiver<bool>;

    /// Registry that inbound push messages are published to
    fn registry(&self) -> &SubscriptionRegistry;

    /// Register interest in push messages for `topic`
    fn on_message<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
        Self: Sized,
    {
        self.registry().subscribe(topic, handler)
    }
}

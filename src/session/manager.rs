//! Session Manager
//!
//! This module turns raw transport events into a coherent connection
//! lifecycle with automatic recovery, and exposes the typed request surface.
//!
//! # State machine
//!
//! ```text
//!              connect()                tools fetched
//! Disconnected ─────────▶ Connecting ─────────────────▶ Connected
//!      ▲                    │    ▲                          │
//!      │                    │    │ retry after delay        │ push channel lost
//!      │ disconnect()       ▼    │ (attempts remaining)     ▼
//!      └──────────────── Error ◀────────────────────────────┘
//! ```
//!
//! - A connect attempt opens the transport, then fetches the tool list
//!   (mandatory) and the resource and template lists (optional, replaced by
//!   empty lists on failure).
//! - A failed attempt moves to `Error` and, while the retry budget lasts,
//!   schedules another attempt after a fixed delay.
//! - `disconnect()` from any state cancels the scheduled retry, clears the
//!   catalog and closes the transport.
//! - Typed operations require `Connected` and fail fast with
//!   [`SessionError::NotConnected`] otherwise. They are never retried.
//!
//! # Usage
//!
//! ```ignore
//! use nexus_session::session::{HttpTransport, Session};
//!
//! let transport = HttpTransport::new("http://127.0.0.1:3001")?;
//! let session = Session::new(transport, SessionConfig::default());
//!
//! session.connect().await?;
//! let tools = session.list_tools()?;
//! let result = session.execute_tool("echo", json!({"text": "hi"})).await?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::SessionConfig;
use crate::session::error::SessionError;
use crate::session::protocol::{
    resource_endpoint, tool_execute_endpoint, QueryRequest, QueryResponse, Resource,
    ResourceContent, ResourceList, ResourceTemplate, ResourceTemplateList, ServerList, Tool,
    ToolExecutionEvent, ToolList, QUERY_ENDPOINT, RESOURCES_ENDPOINT,
    RESOURCE_TEMPLATES_ENDPOINT, SERVERS_ENDPOINT, TOOLS_ENDPOINT, TOOL_EXECUTION_TOPIC,
};
use crate::session::registry::Subscription;
use crate::session::retry::{PendingRetry, RetryPolicy, ScheduledTask};
use crate::session::transport::{ApiRequest, Transport};

/// Capacity of the status transition channel
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Initial state, and the state after an explicit disconnect
    #[default]
    Disconnected,

    /// A connect attempt is in progress
    Connecting,

    /// Transport open and tool list loaded
    Connected,

    /// The last connect attempt failed
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata snapshot fetched on connect
///
/// Replaced wholesale on every successful connect and cleared on disconnect;
/// consumers only ever see it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub resource_templates: Vec<ResourceTemplate>,
}

impl Catalog {
    /// Look up a tool by name
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.resource_templates.is_empty()
    }
}

struct SessionState {
    status: ConnectionState,

    catalog: Arc<Catalog>,

    /// Retry bookkeeping for the current reconnect sequence
    retry: Option<PendingRetry>,

    /// Next reconnect attempt, if one is scheduled
    scheduled: Option<ScheduledTask>,

    /// Watches the transport link while connected
    monitor: Option<ScheduledTask>,

    /// Bumped by every manual `connect()` and `disconnect()`; attempts from an
    /// older generation are discarded.
    generation: u64,
}

struct Inner<T> {
    transport: T,
    config: SessionConfig,
    policy: RetryPolicy,
    state: Mutex<SessionState>,
    status_tx: broadcast::Sender<ConnectionState>,
}

/// Session with a remote Nexus API server
///
/// The session is an explicitly constructed service object. Cloning is cheap
/// and every clone drives the same session, so it can be handed to whatever
/// needs it.
///
/// # Type Parameters
///
/// * `T` - The transport type (e.g., `HttpTransport`)
pub struct Session<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Session")
            .field("status", &state.status)
            .field("retry", &state.retry)
            .field("tools", &state.catalog.tools.len())
            .finish()
    }
}

impl<T: Transport + 'static> Session<T> {
    /// Create a new session over `transport`
    ///
    /// Nothing is connected until [`connect`](Self::connect) or
    /// [`start`](Self::start) is called.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let policy = RetryPolicy::from(&config);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                policy,
                state: Mutex::new(SessionState {
                    status: ConnectionState::Disconnected,
                    catalog: Arc::new(Catalog::default()),
                    retry: None,
                    scheduled: None,
                    monitor: None,
                    generation: 0,
                }),
                status_tx,
            }),
        }
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Get the current connection state
    pub fn status(&self) -> ConnectionState {
        self.inner.lock().status
    }

    /// Receive every state transition from now on, in order
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Retry bookkeeping of the reconnect sequence in progress, if any
    pub fn pending_retry(&self) -> Option<PendingRetry> {
        self.inner.lock().retry
    }

    /// Read-only snapshot of tools, resources and resource templates
    ///
    /// Empty while disconnected.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.inner.lock().catalog)
    }

    /// Connect if `auto_connect` is enabled, otherwise do nothing
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.inner.config.auto_connect {
            self.connect().await
        } else {
            tracing::debug!("Auto-connect disabled, waiting for explicit connect");
            Ok(())
        }
    }

    /// Establish the session
    ///
    /// From `Disconnected` or `Error` this cancels any scheduled retry and
    /// starts a fresh connect sequence. While `Connecting` or `Connected` it
    /// is a no-op that resolves immediately with `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the failure of this first attempt. Automatic retries, if any
    /// are configured, continue in the background.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let generation = {
            let mut state = self.inner.lock();
            match state.status {
                ConnectionState::Connecting => {
                    tracing::debug!("Connect already in progress");
                    return Ok(());
                }
                ConnectionState::Connected => {
                    tracing::debug!("Session already connected");
                    return Ok(());
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }

            if let Some(task) = state.scheduled.take() {
                task.cancel();
            }
            state.retry = None;
            state.generation += 1;
            self.inner.transition(&mut state, ConnectionState::Connecting);
            state.generation
        };

        Arc::clone(&self.inner).run_attempt(generation).await
    }

    /// Tear the session down
    ///
    /// Works from any state: cancels a scheduled retry, clears the catalog,
    /// closes the transport and ends in `Disconnected`.
    pub async fn disconnect(&self) {
        {
            let mut state = self.inner.lock();
            state.generation += 1;
            if let Some(task) = state.scheduled.take() {
                task.cancel();
            }
            if let Some(task) = state.monitor.take() {
                task.cancel();
            }
            state.retry = None;
            state.catalog = Arc::new(Catalog::default());
            self.inner.transition(&mut state, ConnectionState::Disconnected);
        }

        self.inner.transport.disconnect().await;

        if self.inner.config.clear_subscriptions_on_disconnect {
            self.inner.transport.registry().clear(None);
        }

        tracing::info!("Session disconnected");
    }

    /// List tools from the cached snapshot
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    pub fn list_tools(&self) -> Result<Vec<Tool>, SessionError> {
        Ok(self.connected_catalog()?.tools.clone())
    }

    /// List resources from the cached snapshot
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    pub fn list_resources(&self) -> Result<Vec<Resource>, SessionError> {
        Ok(self.connected_catalog()?.resources.clone())
    }

    /// List resource templates from the cached snapshot
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is connected.
    pub fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, SessionError> {
        Ok(self.connected_catalog()?.resource_templates.clone())
    }

    /// Execute a tool on the server
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the tool to call
    /// * `arguments` - Request body, matching the tool's input schema
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless connected, or the
    /// transport's [`SessionError::Api`] if the call fails.
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value, SessionError> {
        self.ensure_connected()?;

        tracing::debug!(tool = name, "Executing tool");
        let result = self
            .inner
            .transport
            .request(ApiRequest::post(tool_execute_endpoint(name), arguments))
            .await;

        if let Err(e) = &result {
            tracing::warn!(tool = name, error = %e, "Tool execution failed");
        }
        result
    }

    /// Fetch the content of a resource
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless connected, or
    /// [`SessionError::Api`] if the call fails or the body is not a resource.
    pub async fn get_resource(&self, uri: &str) -> Result<ResourceContent, SessionError> {
        self.ensure_connected()?;

        tracing::debug!(uri, "Fetching resource");
        self.inner.fetch(&resource_endpoint(uri)).await
    }

    /// Send a free-form query to the server
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless connected, or
    /// [`SessionError::Api`] if the call fails.
    pub async fn process_query(
        &self,
        content: &str,
        context: Option<Value>,
    ) -> Result<QueryResponse, SessionError> {
        self.ensure_connected()?;

        let body = serde_json::to_value(QueryRequest {
            content: content.to_string(),
            context,
        })
        .context("Failed to encode query")?;

        let value = self
            .inner
            .transport
            .request(ApiRequest::post(QUERY_ENDPOINT, body))
            .await?;
        decode(QUERY_ENDPOINT, value)
    }

    /// List the upstream servers the API server is connected to
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless connected, or
    /// [`SessionError::Api`] if the call fails.
    pub async fn list_servers(&self) -> Result<Vec<String>, SessionError> {
        self.ensure_connected()?;
        let list: ServerList = self.inner.fetch(SERVERS_ENDPOINT).await?;
        Ok(list.servers)
    }

    /// Register a handler for push events on `topic`
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.transport.on_message(topic, handler)
    }

    /// Register a typed handler for `tool_execution` push events
    pub fn on_tool_execution<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ToolExecutionEvent) + Send + Sync + 'static,
    {
        self.subscribe(TOOL_EXECUTION_TOPIC, move |event: &Value| {
            let event: ToolExecutionEvent = serde_json::from_value(event.clone())
                .context("Malformed tool_execution event")?;
            handler(event);
            Ok(())
        })
    }

    /// Remove push handlers for `topic`, or all of them
    pub fn clear_subscriptions(&self, topic: Option<&str>) {
        self.inner.transport.registry().clear(topic);
    }

    /// Wait until the session stops changing on its own
    ///
    /// Resolves with `Connected`, `Disconnected`, or `Error` once no
    /// automatic retry remains.
    pub async fn settled(&self) -> ConnectionState {
        let mut rx = self.subscribe_status();
        loop {
            {
                let state = self.inner.lock();
                match state.status {
                    ConnectionState::Connected | ConnectionState::Disconnected => {
                        return state.status
                    }
                    ConnectionState::Error if state.retry.is_none() => return state.status,
                    _ => {}
                }
            }

            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.status(),
            }
        }
    }

    /// Catalog snapshot, read under the same lock as the state check
    fn connected_catalog(&self) -> Result<Arc<Catalog>, SessionError> {
        let state = self.inner.lock();
        match state.status {
            ConnectionState::Connected => Ok(Arc::clone(&state.catalog)),
            status => Err(SessionError::NotConnected { state: status }),
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.status() {
            ConnectionState::Connected => Ok(()),
            state => Err(SessionError::NotConnected { state }),
        }
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport + 'static> Inner<T> {
    /// Record a state change; called with the state lock held so transitions
    /// are observed in order
    fn transition(&self, state: &mut SessionState, next: ConnectionState) {
        if state.status == next {
            return;
        }
        let previous = std::mem::replace(&mut state.status, next);
        tracing::info!(from = %previous, to = %next, "Session state changed");
        let _ = self.status_tx.send(next);
    }

    /// Run one connect attempt; the caller has already moved to `Connecting`
    fn run_attempt(self: Arc<Self>, generation: u64) -> BoxFuture<'static, Result<(), SessionError>> {
        Box::pin(async move {
            match self.establish().await {
                Ok(catalog) => self.complete(generation, catalog).await,
                Err(err) => match self.superseded(generation) {
                    None => {
                        self.transport.disconnect().await;
                        Err(self.fail(generation, err))
                    }
                    Some(disconnected) => {
                        tracing::debug!(error = %err, "Discarding failure of a superseded connect attempt");
                        if disconnected {
                            self.transport.disconnect().await;
                        }
                        Err(SessionError::Cancelled)
                    }
                },
            }
        })
    }

    /// Open the transport and load the catalog
    async fn establish(&self) -> Result<Catalog, SessionError> {
        self.transport.connect().await?;

        let tools = self.fetch::<ToolList>(TOOLS_ENDPOINT).await?.tools;

        let (resources, templates) = tokio::join!(
            self.fetch::<ResourceList>(RESOURCES_ENDPOINT),
            self.fetch::<ResourceTemplateList>(RESOURCE_TEMPLATES_ENDPOINT),
        );

        let resources = resources.map(|list| list.resources).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load resources, continuing without them");
            Vec::new()
        });
        let resource_templates = templates.map(|list| list.templates).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load resource templates, continuing without them");
            Vec::new()
        });

        Ok(Catalog {
            tools,
            resources,
            resource_templates,
        })
    }

    async fn complete(self: &Arc<Self>, generation: u64, catalog: Catalog) -> Result<(), SessionError> {
        let (tools, resources, templates) = (
            catalog.tools.len(),
            catalog.resources.len(),
            catalog.resource_templates.len(),
        );

        let superseded_by_disconnect = {
            let mut state = self.lock();
            if state.generation != generation {
                Some(state.status == ConnectionState::Disconnected)
            } else {
                state.catalog = Arc::new(catalog);
                state.retry = None;
                state.scheduled = None;
                if let Some(task) = state.monitor.take() {
                    task.cancel();
                }
                state.monitor = Some(self.watch_link(generation));
                self.transition(&mut state, ConnectionState::Connected);
                None
            }
        };

        match superseded_by_disconnect {
            None => {
                tracing::info!(tools, resources, templates, "Session connected");
                Ok(())
            }
            Some(disconnected) => {
                tracing::debug!("Discarding result of a superseded connect attempt");
                if disconnected {
                    self.transport.disconnect().await;
                }
                Err(SessionError::Cancelled)
            }
        }
    }

    /// Move to `Error` and schedule the next retry while the budget lasts
    ///
    /// Returns `err` so the caller can hand it back to whoever awaited the attempt.
    fn fail(self: &Arc<Self>, generation: u64, err: SessionError) -> SessionError {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(error = %err, "Ignoring failure of a superseded connect attempt");
            return err;
        }

        self.transition(&mut state, ConnectionState::Error);
        if let Some(task) = state.monitor.take() {
            task.cancel();
        }

        let mut pending = state.retry.take().unwrap_or_else(|| self.policy.begin());
        if pending.try_advance() {
            tracing::warn!(
                error = %err,
                attempt = pending.attempt_count,
                max_attempts = pending.max_attempts,
                delay_ms = pending.delay.as_millis() as u64,
                "Connect failed, retry scheduled"
            );

            let weak = Arc::downgrade(self);
            state.scheduled = Some(ScheduledTask::schedule(pending.delay, async move {
                if let Some(inner) = weak.upgrade() {
                    inner.retry(generation).await;
                }
            }));
            state.retry = Some(pending);
        } else {
            tracing::error!(
                error = %err,
                retries = pending.attempt_count,
                "Connect failed, no retries left"
            );
            state.scheduled = None;
        }

        err
    }

    /// Body of a scheduled retry
    async fn retry(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.lock();
            if state.generation != generation || state.status != ConnectionState::Error {
                return;
            }
            self.transition(&mut state, ConnectionState::Connecting);
        }

        // Failures are logged and rescheduled by `fail`
        let _ = self.run_attempt(generation).await;
    }

    /// Watch the transport link; losing it while connected starts recovery
    fn watch_link(self: &Arc<Self>, generation: u64) -> ScheduledTask {
        let weak = Arc::downgrade(self);
        let mut link = self.transport.link_state();

        ScheduledTask::spawn_watcher(move |token| async move {
            let lost = tokio::select! {
                _ = token.cancelled() => false,
                closed = link.wait_for(|open| !*open) => closed.is_ok(),
            };

            if lost {
                if let Some(inner) = weak.upgrade() {
                    inner.connection_lost(generation).await;
                }
            }
        })
    }

    async fn connection_lost(self: Arc<Self>, generation: u64) {
        {
            let state = self.lock();
            if state.generation != generation || state.status != ConnectionState::Connected {
                return;
            }
        }

        tracing::warn!(target_addr = %self.transport.target(), "Push channel lost, reconnecting");
        self.transport.disconnect().await;

        let err = SessionError::connection(self.transport.target(), "push channel closed unexpectedly");
        self.fail(generation, err);
    }

    /// `None` while `generation` is current, otherwise whether the session
    /// has since been disconnected
    ///
    /// A superseded attempt may have opened the transport after `disconnect()`
    /// closed it, so it must close it again unless a newer attempt owns it.
    fn superseded(&self, generation: u64) -> Option<bool> {
        let state = self.lock();
        (state.generation != generation).then_some(state.status == ConnectionState::Disconnected)
    }

    /// GET `endpoint` and decode the body
    async fn fetch<D: DeserializeOwned>(&self, endpoint: &str) -> Result<D, SessionError> {
        let value = self.transport.request(ApiRequest::get(endpoint)).await?;
        decode(endpoint, value)
    }
}

fn decode<D: DeserializeOwned>(endpoint: &str, value: Value) -> Result<D, SessionError> {
    serde_json::from_value(value).map_err(|e| {
        SessionError::api(None, endpoint, format!("unexpected response shape: {e}"))
    })
}

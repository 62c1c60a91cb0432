//! Nexus Session Client
//!
//! This module keeps a client connected to a remote Nexus API server, which
//! fronts a set of tool servers behind an HTTP API plus a WebSocket push
//! channel.
//!
//! # Architecture
//!
//! The implementation is organized into three layers:
//!
//! 1. **Transport Layer** (`transport`, `http_transport`): the push channel
//!    and request/response calls against the server
//! 2. **Subscription Layer** (`registry`): topic-keyed fan-out of push events
//! 3. **Session Layer** (`manager`, `retry`): connection state machine with
//!    fixed-delay reconnects and the typed request surface
//!
//! Every failure surfaces as a [`SessionError`] with a stable code.

// Wire types and endpoint paths
pub mod protocol;

// Transport trait and the HTTP + WebSocket implementation
pub mod transport;
pub mod http_transport;

// Push event fan-out
pub mod registry;

// Retry bookkeeping and cancellable delayed tasks
pub mod retry;

// Error taxonomy
pub mod error;

// Session state machine and typed operations
pub mod manager;

pub use error::SessionError;
pub use http_transport::HttpTransport;
pub use manager::{Catalog, ConnectionState, Session};
pub use protocol::{
    ContentBlock, QueryResponse, Resource, ResourceContent, ResourceTemplate, Tool,
    ToolExecutionEvent, TOOL_EXECUTION_TOPIC,
};
pub use registry::{Subscription, SubscriptionRegistry};
pub use retry::{PendingRetry, RetryPolicy, ScheduledTask};
pub use transport::{ApiRequest, Transport};

// Property-based tests module
#[cfg(test)]
mod proptests;

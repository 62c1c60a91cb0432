//! Session Error Types
//!
//! Every failure surfaced by the transport or the session manager is a
//! [`SessionError`]. All variants share a common shape: a human readable
//! message (`Display`), a stable [`code`](SessionError::code), and optional
//! structured [`details`](SessionError::details).

use serde_json::{json, Value};

use crate::session::ConnectionState;

/// Error types for session and transport operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The duplex connection could not be established
    #[error("Failed to connect to {target}: {cause}")]
    Connection {
        /// Address that was dialed
        target: String,
        /// Underlying cause as reported by the socket layer
        cause: String,
    },

    /// A request/response exchange did not succeed
    #[error("Request to {endpoint} failed{}: {detail}", fmt_status(.status_code))]
    Api {
        /// HTTP status, absent when the failure happened before a response arrived
        status_code: Option<u16>,
        /// Endpoint path the request targeted
        endpoint: String,
        /// Server-supplied `detail`, or a description of the transport failure
        detail: String,
    },

    /// A typed operation was attempted while the session was not connected
    #[error("Session is not connected (current state: {state})")]
    NotConnected {
        /// State at the time of the call
        state: ConnectionState,
    },

    /// A connect attempt was abandoned because the session was disconnected
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    /// Anything that does not fit the categories above
    #[error("{message}")]
    Unknown {
        message: String,
        details: Option<Value>,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

impl SessionError {
    /// Build a connection error
    pub fn connection(target: impl Into<String>, cause: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            cause: cause.to_string(),
        }
    }

    /// Build an API error
    pub fn api(status_code: Option<u16>, endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }

    /// Wrap an uncategorized failure
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Api { .. } => "API_ERROR",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown { .. } => "UNKNOWN_ERROR",
        }
    }

    /// Human readable message
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Structured details for display or logging
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Connection { target, cause } => Some(json!({
                "target": target,
                "cause": cause,
            })),
            Self::Api {
                status_code,
                endpoint,
                detail,
            } => Some(json!({
                "statusCode": status_code,
                "endpoint": endpoint,
                "detail": detail,
            })),
            Self::NotConnected { state } => Some(json!({ "state": state.as_str() })),
            Self::Cancelled => None,
            Self::Unknown { details, .. } => details.clone(),
        }
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::unknown(format!("{err:#}"))
    }
}

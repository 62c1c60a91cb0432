//! Nexus Session Library
//!
//! This library keeps a client connected to a Nexus API server: it opens the
//! WebSocket push channel, loads the tool and resource catalog, reconnects on
//! failure with a fixed delay, and exposes typed calls for tools, resources
//! and queries.

pub mod config;
pub mod logging;
pub mod session;

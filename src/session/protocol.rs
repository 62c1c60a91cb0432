//! Nexus API Wire Types
//!
//! Data records exchanged with the Nexus API server over its REST endpoints
//! and its push channel. All bodies are JSON.
//!
//! # Endpoints
//!
//! | Method | Path                           | Body / Response                 |
//! |--------|--------------------------------|---------------------------------|
//! | GET    | `/api/tools`                   | `{"tools": [Tool]}`             |
//! | GET    | `/api/resources`               | `{"resources": [Resource]}`     |
//! | GET    | `/api/resource-templates`      | `{"templates": [Template]}`     |
//! | GET    | `/api/resources/{uri}`         | `ResourceContent`               |
//! | GET    | `/api/servers`                 | `{"servers": [String]}`         |
//! | POST   | `/api/tools/{name}/execute`    | arguments → tool result         |
//! | POST   | `/api/query`                   | `QueryRequest` → `QueryResponse`|
//!
//! Non-2xx responses carry `{"detail": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Topic that `tool_execution` push envelopes are routed to
pub const TOOL_EXECUTION_TOPIC: &str = "tool_execution";

pub const TOOLS_ENDPOINT: &str = "/api/tools";
pub const RESOURCES_ENDPOINT: &str = "/api/resources";
pub const RESOURCE_TEMPLATES_ENDPOINT: &str = "/api/resource-templates";
pub const SERVERS_ENDPOINT: &str = "/api/servers";
pub const QUERY_ENDPOINT: &str = "/api/query";

/// Path for fetching a single resource's content
pub fn resource_endpoint(uri: &str) -> String {
    format!("{RESOURCES_ENDPOINT}/{}", urlencoding::encode(uri))
}

/// Path for executing a named tool
pub fn tool_execute_endpoint(name: &str) -> String {
    format!("{TOOLS_ENDPOINT}/{}/execute", urlencoding::encode(name))
}

/// Tool definition advertised by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// Unique tool name
    pub name: String,

    /// Servers send `null` for tools without one
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Value,
}

/// Static resource advertised by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(rename = "mimeType", alias = "mime_type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameterized resource advertised by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceTemplate {
    #[serde(rename = "uriTemplate", alias = "uri_template")]
    pub uri_template: String,
    pub name: String,
    #[serde(rename = "mimeType", alias = "mime_type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Content of a single resource, fetched on demand and never cached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolList {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceList {
    pub resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceTemplateList {
    pub templates: Vec<ResourceTemplate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerList {
    pub servers: Vec<String>,
}

/// Body of `POST /api/query`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// One block of a query answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Response of `POST /api/query`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryResponse {
    pub content: Vec<ContentBlock>,
}

impl QueryResponse {
    /// Concatenated text of all `text` blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Envelope of every message delivered on the push channel
///
/// ```json
/// {"type": "tool_execution", "tool": "echo", "result": {...}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PushEnvelope {
    /// Topic this envelope is routed to, `None` for unrecognized types
    pub fn topic(&self) -> Option<&'static str> {
        match self.kind.as_str() {
            TOOL_EXECUTION_TOPIC => Some(TOOL_EXECUTION_TOPIC),
            _ => None,
        }
    }
}

/// Payload of a `tool_execution` push envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionEvent {
    pub tool: String,
    #[serde(default)]
    pub result: Value,
}

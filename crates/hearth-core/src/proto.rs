//! Wire types shared by the server and its clients
//!
//! Request/response bodies plus the tagged event envelope streamed from
//! `/v1/instances/{id}/events`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Started,
    Stopped,
}

/// Body of `POST /v1/instances`, also returned by it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    #[serde(default)]
    pub id: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
    /// Auto-approve every permission request
    #[serde(default)]
    pub yolo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<InstanceState>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_path: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /v1/instances/{id}/agent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub session_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    pub is_busy: bool,
    pub is_ready: bool,
    pub queued: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    #[serde(flatten)]
    pub session: Session,
    pub is_busy: bool,
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    Started,
    Response,
    Error,
    Summarize,
    Cancelled,
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Sessions and messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A file version recorded for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryFile {
    pub id: String,
    pub session_id: String,
    pub path: String,
    pub content: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub params: Value,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionNotification {
    pub tool_call_id: String,
    pub granted: bool,
    pub denied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Allow,
    AllowSession,
    Deny,
}

/// Body of `POST /v1/instances/{id}/permissions/grant`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub request_id: String,
    pub action: PermissionAction,
}

/// Body of `POST /v1/instances/{id}/permissions/skip`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PermissionSkip {
    pub skip: bool,
}

// ---------------------------------------------------------------------------
// Tool providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpState {
    Disabled,
    Starting,
    Connected,
    Error,
}

impl std::fmt::Display for McpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpState::Disabled => write!(f, "disabled"),
            McpState::Starting => write!(f, "starting"),
            McpState::Connected => write!(f, "connected"),
            McpState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpEventType {
    StateChanged,
    ToolsListChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpEvent {
    #[serde(rename = "type")]
    pub event_type: McpEventType,
    pub name: String,
    pub state: McpState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_count: usize,
}

/// Provider diagnostics for `GET /v1/instances/{id}/mcp`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpProviderInfo {
    pub name: String,
    pub transport: String,
    pub state: McpState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// LSP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LspState {
    Starting,
    Ready,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspInfo {
    pub name: String,
    pub state: LspState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub diagnostic_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspEvent {
    pub name: String,
    pub state: LspState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub diagnostic_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub character: u32,
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Diagnostics keyed by document URI
pub type Diagnostics = BTreeMap<String, Vec<Diagnostic>>;

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error envelope returned by every failing RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: String,
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// Typed payload of an event frame. The wire tag comes from [`Self::type_name`].
#[derive(Debug, Clone)]
pub enum EventPayload {
    Lsp(LspEvent),
    Mcp(McpEvent),
    PermissionRequest(PermissionRequest),
    PermissionNotification(PermissionNotification),
    Message(Message),
    Session(Session),
    File(HistoryFile),
    Agent(AgentEvent),
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Lsp(_) => "lsp",
            EventPayload::Mcp(_) => "mcp",
            EventPayload::PermissionRequest(_) => "permission_request",
            EventPayload::PermissionNotification(_) => "permission_notification",
            EventPayload::Message(_) => "message",
            EventPayload::Session(_) => "session",
            EventPayload::File(_) => "file",
            EventPayload::Agent(_) => "agent_event",
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            EventPayload::Lsp(p) => serde_json::to_value(p),
            EventPayload::Mcp(p) => serde_json::to_value(p),
            EventPayload::PermissionRequest(p) => serde_json::to_value(p),
            EventPayload::PermissionNotification(p) => serde_json::to_value(p),
            EventPayload::Message(p) => serde_json::to_value(p),
            EventPayload::Session(p) => serde_json::to_value(p),
            EventPayload::File(p) => serde_json::to_value(p),
            EventPayload::Agent(p) => serde_json::to_value(p),
        }
    }

    /// Second decode pass: interpret `payload` according to `type_name`.
    /// Returns `Ok(None)` for types this build does not know.
    pub fn decode(type_name: &str, payload: Value) -> serde_json::Result<Option<Self>> {
        let decoded = match type_name {
            "lsp" => EventPayload::Lsp(serde_json::from_value(payload)?),
            "mcp" => EventPayload::Mcp(serde_json::from_value(payload)?),
            "permission_request" => EventPayload::PermissionRequest(serde_json::from_value(payload)?),
            "permission_notification" => {
                EventPayload::PermissionNotification(serde_json::from_value(payload)?)
            }
            "message" => EventPayload::Message(serde_json::from_value(payload)?),
            "session" => EventPayload::Session(serde_json::from_value(payload)?),
            "file" => EventPayload::File(serde_json::from_value(payload)?),
            "agent_event" => EventPayload::Agent(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// First decode pass: only the discriminator is interpreted
#[derive(Debug, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_kind")]
    pub action: EventKind,
    #[serde(default)]
    pub payload: Value,
}

fn default_kind() -> EventKind {
    EventKind::Updated
}

impl Envelope {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self { kind, payload }
    }

    /// Encode as one JSON frame body
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RawEnvelope {
            event_type: self.payload.type_name().to_string(),
            action: self.kind,
            payload: self.payload.to_value()?,
        })
    }

    /// Two-pass decode of one frame. `Ok(None)` means an unknown type.
    pub fn from_json(frame: &str) -> serde_json::Result<Option<Self>> {
        let raw: RawEnvelope = serde_json::from_str(frame)?;
        Ok(EventPayload::decode(&raw.event_type, raw.payload)?
            .map(|payload| Envelope::new(raw.action, payload)))
    }
}

//! One line of terminal output per interesting event

use hearth_core::proto::{
    AgentEventType, Envelope, EventKind, EventPayload, McpEventType, McpState, MessageRole,
};

const TOOL_PREVIEW_CHARS: usize = 120;

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() <= TOOL_PREVIEW_CHARS {
        first.to_string()
    } else {
        let cut: String = first.chars().take(TOOL_PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

/// Text to print for `envelope`, or `None` when it is not worth a line
pub fn render(envelope: &Envelope) -> Option<String> {
    match &envelope.payload {
        EventPayload::Agent(e) => match e.event_type {
            AgentEventType::Started => None,
            AgentEventType::Response => e.message.clone(),
            AgentEventType::Error => Some(format!(
                "\x1b[31merror:\x1b[0m {}",
                e.error.as_deref().unwrap_or("turn failed")
            )),
            AgentEventType::Cancelled => Some("\x1b[33mcancelled\x1b[0m".to_string()),
            AgentEventType::Summarize => e
                .message
                .as_ref()
                .map(|m| format!("\x1b[2msummary:\x1b[0m {}", m)),
            AgentEventType::Idle => None,
        },
        EventPayload::Mcp(e) => match e.event_type {
            McpEventType::ToolsListChanged => Some(format!("[mcp] {} tools changed", e.name)),
            McpEventType::StateChanged => Some(match (e.state, &e.error) {
                (McpState::Connected, _) => {
                    format!("[mcp] {} connected ({} tools)", e.name, e.tool_count)
                }
                (state, Some(err)) => format!("[mcp] {} {}: {}", e.name, state, err),
                (state, None) => format!("[mcp] {} {}", e.name, state),
            }),
        },
        EventPayload::PermissionRequest(r) => Some(format!(
            "\x1b[1;33m[permission]\x1b[0m {} wants to {}: {}\n  /allow {id}  /always {id}  /deny {id}",
            r.tool_name,
            r.action,
            r.description,
            id = r.id
        )),
        EventPayload::PermissionNotification(n) => Some(format!(
            "[permission] {}",
            if n.granted { "granted" } else { "denied" }
        )),
        EventPayload::Message(m) if envelope.kind == EventKind::Created => match m.role {
            MessageRole::Tool => Some(format!(
                "\x1b[2m[{}]\x1b[0m {}",
                m.tool_name.as_deref().unwrap_or("tool"),
                preview(&m.content)
            )),
            _ => None,
        },
        EventPayload::Lsp(e) => Some(format!(
            "[lsp] {} {:?} ({} diagnostics)",
            e.name, e.state, e.diagnostic_count
        )),
        EventPayload::File(f) => Some(format!("[file] {} v{}", f.path, f.version)),
        EventPayload::Message(_) | EventPayload::Session(_) => None,
    }
}

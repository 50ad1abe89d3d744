//! Wire types for the agent execution protocol.
//!
//! Frames are JSON-RPC 2.0 objects, one per line. The agent sends
//! `session/update` notifications with a `sessionUpdate` discriminant; each
//! kind is modeled as its own variant rather than matched ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol version offered during the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SESSION_NEW: &str = "session/new";
pub const METHOD_SESSION_PROMPT: &str = "session/prompt";
pub const METHOD_SESSION_UPDATE: &str = "session/update";
pub const METHOD_SESSION_CANCEL: &str = "session/cancel";
/// Client-exposed method the agent calls to ask for permission.
pub const METHOD_PERMISSION_REQUEST: &str = "permission/request";

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl OutgoingRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Response to an agent-initiated request (e.g. a permission request).
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub result: Value,
}

impl OutgoingResponse {
    pub fn new(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Raw incoming frame before classification.
#[derive(Debug, Clone, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// A classified incoming frame.
#[derive(Debug)]
pub enum IncomingMessage {
    /// Response to one of our requests.
    Response {
        id: u64,
        result: Result<Value, RpcErrorObject>,
    },
    /// Agent-initiated request we must answer (permission requests).
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// One-way notification (session updates).
    Notification { method: String, params: Value },
}

/// Classify one line of agent output.
pub fn classify_line(line: &str) -> Result<IncomingMessage, String> {
    let frame: RawFrame =
        serde_json::from_str(line).map_err(|e| format!("unparseable frame: {}", e))?;

    match (frame.id, frame.method) {
        (Some(id), Some(method)) => Ok(IncomingMessage::Request {
            id,
            method,
            params: frame.params.unwrap_or(Value::Null),
        }),
        (None, Some(method)) => Ok(IncomingMessage::Notification {
            method,
            params: frame.params.unwrap_or(Value::Null),
        }),
        (Some(id), None) => {
            let id = id
                .as_u64()
                .ok_or_else(|| format!("response with non-numeric id: {}", id))?;
            let result = match frame.error {
                Some(error) => Err(error),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            Ok(IncomingMessage::Response { id, result })
        }
        (None, None) => Err("frame has neither id nor method".to_string()),
    }
}

/// Params of a `session/update` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionNotification {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    pub update: SessionUpdate,
}

/// The typed update stream. Three variants are terminal for a turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(rename = "rawInput", default)]
        raw_input: Option<Value>,
    },
    ToolCallUpdate {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(rename = "rawOutput", default)]
        raw_output: Option<Value>,
    },
    AgentMessageChunk {
        content: MessageChunk,
    },
    TurnComplete {
        #[serde(rename = "stopReason", default)]
        stop_reason: Option<String>,
    },
    EndTurn {
        #[serde(rename = "stopReason", default)]
        stop_reason: Option<String>,
    },
    SessionComplete {
        #[serde(rename = "stopReason", default)]
        stop_reason: Option<String>,
    },
}

impl SessionUpdate {
    /// For terminal frames, the stop reason to record (falling back to the
    /// frame's own kind). `None` for non-terminal frames.
    pub fn terminal_stop_reason(&self) -> Option<String> {
        match self {
            SessionUpdate::TurnComplete { stop_reason } => {
                Some(stop_reason.clone().unwrap_or_else(|| "turn_complete".to_string()))
            }
            SessionUpdate::EndTurn { stop_reason } => {
                Some(stop_reason.clone().unwrap_or_else(|| "end_turn".to_string()))
            }
            SessionUpdate::SessionComplete { stop_reason } => Some(
                stop_reason
                    .clone()
                    .unwrap_or_else(|| "session_complete".to_string()),
            ),
            _ => None,
        }
    }
}

/// Content carried by an `agent_message_chunk` update.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageChunk {
    Text { text: String },
    #[serde(other)]
    Unknown,
}

// ── Request param builders ────────────────────────────────────────

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": false, "writeTextFile": false }
        }
    })
}

pub fn session_new_params(cwd: &str, mcp_servers: &[Value]) -> Value {
    json!({
        "cwd": cwd,
        "mcpServers": mcp_servers,
    })
}

pub fn prompt_params(session_id: &str, text: &str) -> Value {
    json!({
        "sessionId": session_id,
        "prompt": [ { "type": "text", "text": text } ],
    })
}

/// The unattended policy: every permission request is approved.
pub fn permission_approval() -> Value {
    json!({ "outcome": "approved", "reason": "auto-approved (unattended orchestrator)" })
}

//! Lifecycle events emitted while an agent handles a turn

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Thinking,
    ToolCall,
    ToolResult,
    Token,
    Complete,
    Error,
}

/// Event payload, serialized as `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    Start {
        model: String,
        provider: String,
    },
    Thinking,
    ToolCall {
        tool_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult {
        tool_id: String,
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Token {
        content: String,
    },
    Complete {
        content: String,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentEvent {
    pub agent_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(flatten)]
    pub data: EventData,
}

impl AgentEvent {
    pub fn event_type(&self) -> EventType {
        match self.data {
            EventData::Start { .. } => EventType::Start,
            EventData::Thinking => EventType::Thinking,
            EventData::ToolCall { .. } => EventType::ToolCall,
            EventData::ToolResult { .. } => EventType::ToolResult,
            EventData::Token { .. } => EventType::Token,
            EventData::Complete { .. } => EventType::Complete,
            EventData::Error { .. } => EventType::Error,
        }
    }
}

/// Invoked synchronously, in registration order, for every event.
pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

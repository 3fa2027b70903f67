use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::block::ContentBlock;

/// One unit of incremental progress pushed by the server.
///
/// Events are transient: they are folded into blocks or discarded, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text delta for the currently open assistant text block.
    Chunk {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    /// Reasoning delta for the active turn.
    Thought {
        #[serde(default)]
        content: String,
    },
    /// A tool call has begun; its arguments are not known yet.
    ActionStreaming {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default)]
        step: u32,
    },
    /// Cumulative serialized-argument prefix for a tool call in progress.
    ActionArgsChunk {
        tool: String,
        #[serde(default)]
        partial_args: String,
        #[serde(default)]
        step: u32,
    },
    /// Tool call with complete arguments.
    Action {
        tool: String,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        step: u32,
    },
    /// Result of the most recent tool call.
    Observation {
        #[serde(default)]
        content: String,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    AssistantTextStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
    },
    AssistantTextEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        #[serde(default)]
        cancelled: bool,
        #[serde(default, alias = "error")]
        has_error: bool,
    },
    UserTextBlock {
        block: ContentBlock,
    },
    /// Server-confirmed persisted tool-call block.
    ToolCallBlock {
        block: ContentBlock,
    },
    ToolResultBlock {
        block: ContentBlock,
    },
    /// Authoritative snapshot of a streaming block, sent on reconnect or on demand.
    StreamSync {
        block_id: String,
        #[serde(default)]
        accumulated_content: String,
        #[serde(default)]
        streaming: bool,
        sequence_number: u64,
    },
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_content: Option<String>,
    },
    Error {
        #[serde(default, alias = "message")]
        content: String,
    },
    CancelAcknowledged,
    TitleUpdated {
        #[serde(default)]
        session_id: Option<String>,
        title: String,
    },
}

impl StreamEvent {
    /// Returns the wire `type` discriminator of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Thought { .. } => "thought",
            Self::ActionStreaming { .. } => "action_streaming",
            Self::ActionArgsChunk { .. } => "action_args_chunk",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::AssistantTextStart { .. } => "assistant_text_start",
            Self::AssistantTextEnd { .. } => "assistant_text_end",
            Self::UserTextBlock { .. } => "user_text_block",
            Self::ToolCallBlock { .. } => "tool_call_block",
            Self::ToolResultBlock { .. } => "tool_result_block",
            Self::StreamSync { .. } => "stream_sync",
            Self::Cancelled { .. } => "cancelled",
            Self::Error { .. } => "error",
            Self::CancelAcknowledged => "cancel_acknowledged",
            Self::TitleUpdated { .. } => "title_updated",
        }
    }

    /// Returns true for events that must not wait for the next batch flush.
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Outbound command sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Submits user input and starts a run.
    Message { content: String },
    /// Aborts the active run.
    Cancel,
}

impl ClientCommand {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn default_success() -> bool {
    true
}

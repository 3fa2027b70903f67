use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::ProtocolError;

/// Kind of a durable conversation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    UserText,
    AssistantText,
    ToolCall,
    ToolResult,
    System,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserText => "user_text",
            Self::AssistantText => "assistant_text",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::System => "system",
        }
    }

    /// Returns true for block types whose payload is `{text}`.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::UserText | Self::AssistantText | Self::System)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
    System,
    Tool,
}

/// Lifecycle status of a tool call, also used for in-progress block previews.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "incomplete")]
    Incomplete,
    #[serde(rename = "requires-action", alias = "requires_action")]
    RequiresAction,
}

impl ToolStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "running" | "streaming" => Self::Running,
            "complete" | "completed" => Self::Complete,
            "error" => Self::Error,
            "incomplete" => Self::Incomplete,
            "requires-action" | "requires_action" => Self::RequiresAction,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Incomplete => "incomplete",
            Self::RequiresAction => "requires-action",
        }
    }

    /// Returns true once no further progress is expected for the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Incomplete)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    #[serde(default)]
    pub status: ToolStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub is_binary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_data: Option<String>,
}

impl ToolResultContent {
    /// Decodes the base64 `binary_data` payload of a binary result.
    ///
    /// Returns `None` when the result is not binary or carries no data.
    pub fn decode_binary(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        if !self.is_binary {
            return None;
        }
        let data = self.binary_data.as_deref()?;
        Some(general_purpose::STANDARD.decode(data.trim()))
    }
}

/// Block payload; its shape is selected by the owning block's [`BlockType`].
#[derive(Debug, Clone, PartialEq)]
pub enum BlockContent {
    Text(TextContent),
    ToolCall(ToolCallContent),
    ToolResult(ToolResultContent),
}

impl BlockContent {
    pub fn from_value(block_type: BlockType, value: Value) -> Result<Self, serde_json::Error> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };

        Ok(match block_type {
            BlockType::UserText | BlockType::AssistantText | BlockType::System => {
                Self::Text(serde_json::from_value(value)?)
            }
            BlockType::ToolCall => Self::ToolCall(serde_json::from_value(value)?),
            BlockType::ToolResult => Self::ToolResult(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            Self::Text(content) => serde_json::to_value(content),
            Self::ToolCall(content) => serde_json::to_value(content),
            Self::ToolResult(content) => serde_json::to_value(content),
        };
        value.unwrap_or_default()
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(content) => Some(&content.text),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::ToolCall(content) => Some(&content.tool_name),
            Self::ToolResult(content) => Some(&content.tool_name),
        }
    }
}

/// Durable, ordered unit of conversation content.
///
/// `sequence_number` is the only authoritative ordering within a session and `id`
/// is unique within a session. Blocks are immutable from the consumer side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContentBlock", into = "RawContentBlock")]
pub struct ContentBlock {
    pub id: String,
    pub chat_session_id: Option<String>,
    pub sequence_number: u64,
    pub block_type: BlockType,
    pub author: Author,
    pub content: BlockContent,
    /// Back-reference only (for example tool result -> tool call).
    pub parent_block_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

impl ContentBlock {
    #[must_use]
    pub fn text(
        id: impl Into<String>,
        sequence_number: u64,
        block_type: BlockType,
        text: impl Into<String>,
    ) -> Self {
        let author = match block_type {
            BlockType::UserText => Author::User,
            BlockType::System => Author::System,
            _ => Author::Assistant,
        };
        Self::new(
            id,
            sequence_number,
            block_type,
            author,
            BlockContent::Text(TextContent { text: text.into() }),
        )
    }

    #[must_use]
    pub fn tool_call(
        id: impl Into<String>,
        sequence_number: u64,
        tool_name: impl Into<String>,
        arguments: Value,
        status: ToolStatus,
    ) -> Self {
        Self::new(
            id,
            sequence_number,
            BlockType::ToolCall,
            Author::Assistant,
            BlockContent::ToolCall(ToolCallContent {
                tool_name: tool_name.into(),
                arguments,
                status,
            }),
        )
    }

    #[must_use]
    pub fn tool_result(
        id: impl Into<String>,
        sequence_number: u64,
        tool_name: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) -> Self {
        let result = result.into();
        let error = (!success).then(|| result.clone());
        Self::new(
            id,
            sequence_number,
            BlockType::ToolResult,
            Author::Tool,
            BlockContent::ToolResult(ToolResultContent {
                tool_name: tool_name.into(),
                result: Some(result),
                success,
                error,
                is_binary: false,
                binary_type: None,
                binary_data: None,
            }),
        )
    }

    fn new(
        id: impl Into<String>,
        sequence_number: u64,
        block_type: BlockType,
        author: Author,
        content: BlockContent,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            chat_session_id: None,
            sequence_number,
            block_type,
            author,
            content,
            parent_block_id: None,
            metadata: Map::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_block_id: impl Into<String>) -> Self {
        self.parent_block_id = Some(parent_block_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, chat_session_id: impl Into<String>) -> Self {
        self.chat_session_id = Some(chat_session_id.into());
        self
    }

    pub fn text_content(&self) -> Option<&str> {
        self.content.text()
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.content.tool_name()
    }

    pub fn tool_status(&self) -> Option<ToolStatus> {
        match &self.content {
            BlockContent::ToolCall(content) => Some(content.status),
            _ => None,
        }
    }

    /// Returns whether the server still marks this block as streaming.
    pub fn is_streaming(&self) -> bool {
        self.metadata
            .get("streaming")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize)]
struct RawContentBlock {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_session_id: Option<String>,
    sequence_number: u64,
    block_type: BlockType,
    author: Author,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    parent_block_id: Option<String>,
    #[serde(default, alias = "metadata")]
    block_metadata: Option<Map<String, Value>>,
    #[serde(default, with = "timestamp")]
    created_at: Option<OffsetDateTime>,
    #[serde(default, with = "timestamp")]
    updated_at: Option<OffsetDateTime>,
}

impl TryFrom<RawContentBlock> for ContentBlock {
    type Error = ProtocolError;

    fn try_from(raw: RawContentBlock) -> Result<Self, Self::Error> {
        let content = BlockContent::from_value(raw.block_type, raw.content).map_err(|source| {
            ProtocolError::BlockContent {
                block_type: raw.block_type.as_str(),
                source,
            }
        })?;

        Ok(Self {
            id: raw.id,
            chat_session_id: raw.chat_session_id,
            sequence_number: raw.sequence_number,
            block_type: raw.block_type,
            author: raw.author,
            content,
            parent_block_id: raw.parent_block_id,
            metadata: raw.block_metadata.unwrap_or_default(),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        })
    }
}

impl From<ContentBlock> for RawContentBlock {
    fn from(block: ContentBlock) -> Self {
        Self {
            content: block.content.to_value(),
            id: block.id,
            chat_session_id: block.chat_session_id,
            sequence_number: block.sequence_number,
            block_type: block.block_type,
            author: block.author,
            parent_block_id: block.parent_block_id,
            block_metadata: Some(block.metadata),
            created_at: block.created_at,
            updated_at: block.updated_at,
        }
    }
}

/// Parses an RFC 3339 timestamp, or a naive ISO 8601 timestamp interpreted as UTC.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }

    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

mod timestamp {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => {
                let formatted = value.format(&Rfc3339).map_err(S::Error::custom)?;
                serializer.serialize_some(&formatted)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| {
            super::parse_timestamp(&value)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value}")))
        })
        .transpose()
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn default_success() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{BlockContent, BlockType, ContentBlock, ToolStatus};

    #[test]
    fn persisted_block_decodes_typed_payload_and_naive_timestamps() {
        let block: ContentBlock = serde_json::from_value(json!({
            "id": "b-1",
            "chat_session_id": "s-1",
            "sequence_number": 4,
            "block_type": "tool_call",
            "author": "assistant",
            "content": {"tool_name": "bash", "arguments": {"command": "ls"}, "status": "pending"},
            "parent_block_id": null,
            "block_metadata": {"step": 1},
            "created_at": "2025-01-02T03:04:05.123456",
            "updated_at": "2025-01-02T03:04:05Z"
        }))
        .expect("persisted block should decode");

        assert_eq!(block.sequence_number, 4);
        assert_eq!(block.tool_name(), Some("bash"));
        assert_eq!(block.tool_status(), Some(ToolStatus::Pending));
        assert_eq!(block.metadata["step"], 1);
        assert!(block.created_at.is_some());
        assert!(block.updated_at.is_some());
    }

    #[test]
    fn tool_call_payload_without_tool_name_is_rejected() {
        let error = serde_json::from_value::<ContentBlock>(json!({
            "id": "b-2",
            "sequence_number": 1,
            "block_type": "tool_call",
            "author": "assistant",
            "content": {"arguments": {}}
        }))
        .expect_err("tool_call without tool_name must not decode");

        assert!(error.to_string().contains("tool_call"));
    }

    #[test]
    fn serialized_block_uses_wire_field_names() {
        let block = ContentBlock::text("b-3", 9, BlockType::AssistantText, "hi")
            .with_metadata("streaming", false);
        let value = serde_json::to_value(&block).expect("serialize block");

        assert_eq!(value["block_type"], "assistant_text");
        assert_eq!(value["author"], "assistant");
        assert_eq!(value["content"], json!({"text": "hi"}));
        assert_eq!(value["block_metadata"]["streaming"], false);
    }

    #[test]
    fn requires_action_status_accepts_both_spellings() {
        let hyphen: ToolStatus = serde_json::from_value(json!("requires-action")).expect("hyphen");
        let underscore: ToolStatus =
            serde_json::from_value(json!("requires_action")).expect("underscore");

        assert_eq!(hyphen, ToolStatus::RequiresAction);
        assert_eq!(underscore, ToolStatus::RequiresAction);
        assert_eq!(ToolStatus::parse("streaming"), Some(ToolStatus::Running));
        assert!(ToolStatus::Incomplete.is_terminal());
        assert!(!ToolStatus::Running.is_terminal());
    }

    #[test]
    fn binary_tool_result_decodes_base64_payload() {
        let content = BlockContent::from_value(
            BlockType::ToolResult,
            json!({
                "tool_name": "screenshot",
                "success": true,
                "is_binary": true,
                "binary_type": "image/png",
                "binary_data": "iVBORw=="
            }),
        )
        .expect("tool result content");

        let BlockContent::ToolResult(result) = content else {
            panic!("expected tool result payload");
        };
        let bytes = result
            .decode_binary()
            .expect("binary payload present")
            .expect("valid base64");
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn failed_tool_result_constructor_copies_error_text() {
        let block = ContentBlock::tool_result("r-1", 3, "bash", "exit 1", false);
        let BlockContent::ToolResult(result) = &block.content else {
            panic!("expected tool result payload");
        };

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("exit 1"));
        assert!(result.decode_binary().is_none());
    }
}

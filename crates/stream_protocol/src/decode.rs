use serde_json::Value;

use crate::error::ProtocolError;
use crate::event::StreamEvent;

/// Inbound `type` discriminators understood by [`decode_frame`].
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "chunk",
    "thought",
    "action_streaming",
    "action_args_chunk",
    "action",
    "observation",
    "assistant_text_start",
    "assistant_text_end",
    "user_text_block",
    "tool_call_block",
    "tool_result_block",
    "stream_sync",
    "cancelled",
    "error",
    "cancel_acknowledged",
    "title_updated",
];

/// Decodes one text frame into a [`StreamEvent`].
///
/// The `type` discriminator is checked before the payload so unknown event types
/// are reported distinctly from malformed payloads of known types.
pub fn decode_frame(text: &str) -> Result<StreamEvent, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Json)?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();

    if !KNOWN_EVENT_TYPES.contains(&event_type.as_str()) {
        return Err(ProtocolError::UnknownType(event_type));
    }

    serde_json::from_value(value).map_err(|source| ProtocolError::Payload { event_type, source })
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame has no string `type` discriminator")]
    MissingType,

    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("invalid '{event_type}' payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {block_type} content: {source}")]
    BlockContent {
        block_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Returns true when the frame was well-formed but not understood.
    ///
    /// Callers log these at a lower level than malformed frames.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

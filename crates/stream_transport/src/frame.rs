use stream_protocol::{decode_frame, StreamEvent};
use tokio_tungstenite::tungstenite::Message;

/// Turns WebSocket messages into stream events, dropping what it cannot use.
///
/// Malformed frames and unknown event types never reach the caller; they are
/// logged and counted so tests and diagnostics can observe them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    decoded: u64,
    dropped: u64,
}

impl FrameDecoder {
    /// Decodes one inbound message. Control frames yield `None` without being
    /// counted as drops.
    pub fn decode(&mut self, message: &Message) -> Option<StreamEvent> {
        let text = match message {
            Message::Text(text) => text.as_str(),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(%error, "dropping non-UTF-8 binary frame");
                    self.dropped += 1;
                    return None;
                }
            },
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => {
                return None;
            }
        };
        self.decode_text(text)
    }

    pub fn decode_text(&mut self, text: &str) -> Option<StreamEvent> {
        match decode_frame(text) {
            Ok(event) => {
                self.decoded += 1;
                Some(event)
            }
            Err(error) if error.is_unknown_type() => {
                tracing::debug!(%error, "ignoring stream frame");
                self.dropped += 1;
                None
            }
            Err(error) => {
                tracing::warn!(%error, "dropping malformed stream frame");
                self.dropped += 1;
                None
            }
        }
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

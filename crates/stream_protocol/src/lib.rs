//! Wire-level types shared by the streaming transport and the reconciliation engine.
//!
//! This crate only defines the durable [`ContentBlock`] model, the transient
//! [`StreamEvent`] variants a server pushes while a turn is in flight, the
//! outbound [`ClientCommand`]s, and frame decoding. It contains no connection
//! handling and no reconstruction state.
//!
//! Every inbound frame is a JSON object carrying a `type` discriminator. Frames
//! that fail to decode are reported as [`ProtocolError`] so callers can drop the
//! single frame without disturbing the rest of the stream.

mod block;
mod decode;
mod error;
mod event;

pub use block::{
    parse_timestamp, Author, BlockContent, BlockType, ContentBlock, TextContent, ToolCallContent,
    ToolResultContent, ToolStatus,
};
pub use decode::{decode_frame, KNOWN_EVENT_TYPES};
pub use error::ProtocolError;
pub use event::{ClientCommand, StreamEvent};

//! Connection plumbing for the conversation stream.
//!
//! [`Transport`] owns the single WebSocket connection of a session: it decodes
//! inbound frames into [`stream_protocol::StreamEvent`]s and forwards them, in
//! arrival order, over a channel; it queues outbound commands without blocking;
//! and it reconnects with bounded backoff after unexpected closure. Reconnection
//! is the only automatic retry in the stack.
//!
//! [`BlocksClient`] wraps the REST resource that lists the persisted, ordered
//! blocks of a session. It is used for initial load and out-of-band resync.

pub mod blocks;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod retry;
pub mod url;

pub use blocks::BlocksClient;
pub use client::{ConnectionState, Transport, TransportEvent};
pub use config::TransportConfig;
pub use error::TransportError;
pub use frame::FrameDecoder;
pub use url::{blocks_url, stream_url};

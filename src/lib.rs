//! Streaming reconciliation engine for live agent conversations.
//!
//! Inbound events flow one way: transport, batcher, reconstructor, reconciler
//! (on resync), then a read-only projection of ordered blocks and in-progress
//! previews. Commands flow back through [`Session::send_message`] and
//! [`Session::cancel`].
//!
//! # Public API Overview
//! - [`Session`] owns the connection and all mutable state, with explicit
//!   `init`/`start`/`teardown` lifecycle.
//! - [`ConversationEngine`] folds events deterministically and can be driven
//!   without a connection.
//! - [`ViewportPolicy`] decides auto-follow and filters its own scrolls.

pub mod batcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod runtime;

pub use batcher::{EventBatcher, PushHint};
pub use config::{EnvConfig, SessionConfig};
pub use engine::{
    preview_arguments, Applied, BatchSummary, BlockChange, BlockKey, BlockPreview,
    BlockProjection, ConversationEngine, DropReason, StreamingBlockState, StreamingKind,
    TurnOutcome,
};
pub use error::SessionError;
pub use runtime::{
    ConnectionSignal, ScrollAttribution, ScrollRequest, Session, SessionUpdate, SessionView,
    ViewportPolicy,
};

pub use stream_protocol as protocol;
pub use stream_transport as transport;

#![allow(unused_imports)]

use chat_stream::{
    logging::init_tracing, preview_arguments, Applied, BatchSummary, BlockChange, BlockKey,
    BlockPreview, BlockProjection, ConnectionSignal, ConversationEngine, DropReason, EnvConfig,
    EventBatcher, PushHint, ScrollAttribution, ScrollRequest, Session, SessionConfig, SessionError,
    SessionUpdate, SessionView, StreamingBlockState, StreamingKind, TurnOutcome, ViewportPolicy,
};
use chat_stream::protocol::{ClientCommand, ContentBlock, StreamEvent};
use chat_stream::transport::{BlocksClient, ConnectionState, Transport, TransportConfig};

#[test]
fn public_api_exports_compile() {}

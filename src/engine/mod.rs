//! Event folding: reconstruction, resync and the block projection.

pub mod args_preview;
pub mod projection;
pub mod reconciler;
pub mod reconstructor;

use stream_protocol::{ContentBlock, StreamEvent};

pub use args_preview::preview_arguments;
pub use projection::{is_local_id, BlockChange, BlockProjection, LOCAL_ID_PREFIX};
pub use reconciler::Reconciler;
pub use reconstructor::{BlockKey, BlockPreview, Reconstructor, StreamingBlockState, StreamingKind};

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    Dropped(DropReason),
}

impl Applied {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The key was closed by cancellation.
    CancelledKey,
    /// The key already closed normally.
    Redelivered,
    /// Argument chunk for a tool whose call already completed.
    SuppressedArguments,
    /// Argument chunk older than the buffered prefix.
    StaleArguments,
    StaleSync,
    /// Nothing open to attach the event to.
    Unmatched,
    /// Payload shape does not fit the event.
    InvalidPayload,
}

/// How the most recent turn ended, if it has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TurnOutcome {
    #[default]
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Errored(String),
}

/// Counts for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub changed: usize,
    pub dropped: usize,
}

/// Single owner of all reconstruction state for a session.
#[derive(Debug, Default)]
pub struct ConversationEngine {
    reconstructor: Reconstructor,
    reconciler: Reconciler,
}

impl ConversationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) -> Applied {
        let recon = &mut self.reconstructor;
        let applied = match event {
            StreamEvent::Chunk { content, block_id } => recon.chunk(content, block_id.as_deref()),
            StreamEvent::Thought { content } => recon.push_thought(content),
            StreamEvent::ActionStreaming { tool, .. } => recon.action_streaming(tool),
            StreamEvent::ActionArgsChunk {
                tool, partial_args, ..
            } => recon.args_chunk(tool, partial_args),
            StreamEvent::Action { tool, args, .. } => recon.action(tool, args),
            StreamEvent::Observation {
                content,
                success,
                metadata,
                tool,
            } => recon.observation(content, *success, metadata, tool.as_deref()),
            StreamEvent::AssistantTextStart {
                block_id,
                sequence_number,
            } => recon.text_start(block_id.as_deref(), *sequence_number),
            StreamEvent::AssistantTextEnd {
                block_id,
                cancelled,
                has_error,
            } => recon.text_end(block_id.as_deref(), *cancelled, *has_error),
            StreamEvent::UserTextBlock { block } => recon.user_block(block),
            StreamEvent::ToolCallBlock { block } => recon.tool_call_block(block),
            StreamEvent::ToolResultBlock { block } => recon.tool_result_block(block),
            StreamEvent::StreamSync {
                block_id,
                accumulated_content,
                streaming,
                sequence_number,
            } => self.reconciler.apply_sync(
                recon,
                block_id,
                accumulated_content,
                *streaming,
                *sequence_number,
            ),
            StreamEvent::Cancelled { .. } => recon.cancel_open(),
            StreamEvent::Error { content } => recon.fail(content),
            // Session-level signals; nothing to reconstruct.
            StreamEvent::CancelAcknowledged | StreamEvent::TitleUpdated { .. } => Applied::Unchanged,
        };

        if let Applied::Dropped(reason) = applied {
            tracing::debug!(event = event.event_type(), ?reason, "stream event dropped");
        }
        applied
    }

    pub fn apply_all<'a, I>(&mut self, events: I) -> BatchSummary
    where
        I: IntoIterator<Item = &'a StreamEvent>,
    {
        let mut summary = BatchSummary::default();
        for event in events {
            summary.applied += 1;
            match self.apply(event) {
                Applied::Changed => summary.changed += 1,
                Applied::Unchanged => {}
                Applied::Dropped(_) => summary.dropped += 1,
            }
        }
        summary
    }

    /// Merges the authoritative persisted block list.
    pub fn apply_snapshot(&mut self, blocks: Vec<ContentBlock>) -> Applied {
        self.reconciler
            .apply_snapshot(&mut self.reconstructor, blocks)
    }

    /// Closes every open block as incomplete ahead of any queued events.
    pub fn cancel_open(&mut self) -> Applied {
        self.reconstructor.cancel_open()
    }

    pub fn begin_turn(&mut self) {
        self.reconstructor.begin_turn();
    }

    /// Discards all ephemeral state; returns how many open blocks were dropped.
    pub fn teardown(&mut self) -> usize {
        self.reconstructor.teardown()
    }

    pub fn projection(&self) -> &BlockProjection {
        self.reconstructor.projection()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.reconstructor.projection().iter()
    }

    pub fn block(&self, id: &str) -> Option<&ContentBlock> {
        self.reconstructor.projection().get(id)
    }

    pub fn previews(&self) -> Vec<BlockPreview> {
        self.reconstructor.previews()
    }

    pub fn state(&self, key: &BlockKey) -> Option<&StreamingBlockState> {
        self.reconstructor.state(key)
    }

    pub fn is_cancelled(&self, key: &BlockKey) -> bool {
        self.reconstructor.is_cancelled(key)
    }

    pub fn open_count(&self) -> usize {
        self.reconstructor.open_count()
    }

    pub fn thought(&self) -> Option<&str> {
        self.reconstructor.thought()
    }

    pub fn outcome(&self) -> &TurnOutcome {
        self.reconstructor.outcome()
    }

    pub fn error(&self) -> Option<&str> {
        self.reconstructor.error()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn take_changes(&mut self) -> Vec<BlockChange> {
        self.reconstructor.projection_mut().take_changes()
    }
}

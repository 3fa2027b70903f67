//! Folds stream events into ordered blocks and in-progress previews.
//!
//! Every block key moves `Empty -> Streaming -> Closed`. Open keys own a
//! [`StreamingBlockState`]; closing a key materializes its state into the
//! projection and destroys it. Keys closed by cancellation stay poisoned, so
//! late chunks for them are dropped rather than resumed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{Map, Value};
use stream_protocol::{BlockContent, BlockType, ContentBlock, ToolStatus};

use super::args_preview::preview_arguments;
use super::projection::{is_local_id, local_block_id, BlockProjection};
use super::{Applied, DropReason, TurnOutcome};

/// Identity of an in-progress block: its id, or the tool name while a tool
/// call has no id yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKey {
    Block(String),
    Tool(String),
}

impl BlockKey {
    pub fn block(id: impl Into<String>) -> Self {
        Self::Block(id.into())
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Self::Tool(name.into())
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(id) => write!(f, "block:{id}"),
            Self::Tool(name) => write!(f, "tool:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingKind {
    Text,
    ToolCall,
}

/// Ephemeral state of one open block.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingBlockState {
    pub kind: StreamingKind,
    /// Set for text blocks and for tool calls past their argument phase.
    pub block_id: Option<String>,
    pub tool_name: Option<String>,
    /// Accumulated text, or the latest argument-JSON prefix.
    pub buffer: String,
    pub status: ToolStatus,
    pub sequence_number: Option<u64>,
    /// Tool call whose arguments are final and whose result is pending.
    pub awaiting_result: bool,
    opened: u64,
}

impl StreamingBlockState {
    fn text(block_id: String, sequence_number: u64, opened: u64) -> Self {
        Self {
            kind: StreamingKind::Text,
            block_id: Some(block_id),
            tool_name: None,
            buffer: String::new(),
            status: ToolStatus::Running,
            sequence_number: Some(sequence_number),
            awaiting_result: false,
            opened,
        }
    }

    fn tool_arguments(tool: &str, opened: u64) -> Self {
        Self {
            kind: StreamingKind::ToolCall,
            block_id: None,
            tool_name: Some(tool.to_string()),
            buffer: String::new(),
            status: ToolStatus::Running,
            sequence_number: None,
            awaiting_result: false,
            opened,
        }
    }

    fn awaiting(block: &ContentBlock, opened: u64) -> Self {
        let (tool_name, arguments, status) = match &block.content {
            BlockContent::ToolCall(call) => (
                Some(call.tool_name.clone()),
                call.arguments.to_string(),
                call.status,
            ),
            _ => (None, String::new(), ToolStatus::Running),
        };
        Self {
            kind: StreamingKind::ToolCall,
            block_id: Some(block.id.clone()),
            tool_name,
            buffer: arguments,
            status,
            sequence_number: Some(block.sequence_number),
            awaiting_result: true,
            opened,
        }
    }
}

/// Read-only rendering of an open block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPreview {
    pub key: BlockKey,
    pub kind: StreamingKind,
    pub block_id: Option<String>,
    pub tool_name: Option<String>,
    /// Raw text or raw argument prefix, exactly as accumulated.
    pub raw: String,
    /// Best-effort interpretation of `raw` for tool calls.
    pub arguments: Option<Value>,
    pub status: ToolStatus,
    pub sequence_number: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Reconstructor {
    projection: BlockProjection,
    open: HashMap<BlockKey, StreamingBlockState>,
    closed: HashSet<BlockKey>,
    cancelled: HashSet<BlockKey>,
    last_text_key: Option<BlockKey>,
    /// Tools whose `action` arrived; their argument chunks are stale.
    completed_tools: HashSet<String>,
    /// Local tool-call blocks not yet confirmed by a persisted block.
    unconfirmed_calls: Vec<String>,
    /// Tool-call id to the locally created result block.
    local_results: HashMap<String, String>,
    thought: String,
    outcome: TurnOutcome,
    error: Option<String>,
    opened: u64,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(&self) -> &BlockProjection {
        &self.projection
    }

    pub(crate) fn projection_mut(&mut self) -> &mut BlockProjection {
        &mut self.projection
    }

    pub fn outcome(&self) -> &TurnOutcome {
        &self.outcome
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reasoning text of the active turn, if any.
    pub fn thought(&self) -> Option<&str> {
        (!self.thought.is_empty()).then_some(self.thought.as_str())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn state(&self, key: &BlockKey) -> Option<&StreamingBlockState> {
        self.open.get(key)
    }

    pub fn is_cancelled(&self, key: &BlockKey) -> bool {
        self.cancelled.contains(key)
    }

    /// Previews of open blocks in the order they opened.
    pub fn previews(&self) -> Vec<BlockPreview> {
        let mut states: Vec<(&BlockKey, &StreamingBlockState)> = self.open.iter().collect();
        states.sort_by_key(|(_, state)| state.opened);
        states
            .into_iter()
            .map(|(key, state)| BlockPreview {
                key: key.clone(),
                kind: state.kind,
                block_id: state.block_id.clone(),
                tool_name: state.tool_name.clone(),
                raw: state.buffer.clone(),
                arguments: match state.kind {
                    StreamingKind::ToolCall => preview_arguments(&state.buffer),
                    StreamingKind::Text => None,
                },
                status: state.status,
                sequence_number: state.sequence_number,
            })
            .collect()
    }

    pub(crate) fn text_start(&mut self, block_id: Option<&str>, sequence_number: Option<u64>) -> Applied {
        let id = block_id.map_or_else(local_block_id, str::to_string);
        let key = BlockKey::Block(id.clone());
        if let Some(reason) = self.refuse(&key) {
            return Applied::Dropped(reason);
        }

        if let Some(state) = self.open.get_mut(&key) {
            return match sequence_number {
                Some(seq) if state.sequence_number != Some(seq) => {
                    state.sequence_number = Some(seq);
                    self.projection.note_sequence(seq);
                    Applied::Changed
                }
                _ => Applied::Unchanged,
            };
        }

        self.open_text(key, id, sequence_number);
        Applied::Changed
    }

    pub(crate) fn chunk(&mut self, content: &str, block_id: Option<&str>) -> Applied {
        let key = match block_id {
            Some(id) => BlockKey::block(id),
            None => match &self.last_text_key {
                Some(key) if self.open.contains_key(key) => key.clone(),
                Some(key) if self.cancelled.contains(key) => {
                    return Applied::Dropped(DropReason::CancelledKey)
                }
                _ => BlockKey::Block(local_block_id()),
            },
        };
        if let Some(reason) = self.refuse(&key) {
            return Applied::Dropped(reason);
        }

        if !self.open.contains_key(&key) {
            let BlockKey::Block(id) = &key else {
                return Applied::Dropped(DropReason::InvalidPayload);
            };
            let id = id.clone();
            self.open_text(key.clone(), id, None);
        }

        match self.open.get_mut(&key) {
            Some(state) if !content.is_empty() => {
                state.buffer.push_str(content);
                Applied::Changed
            }
            Some(_) => Applied::Unchanged,
            None => Applied::Dropped(DropReason::Unmatched),
        }
    }

    pub(crate) fn text_end(&mut self, block_id: Option<&str>, cancelled: bool, has_error: bool) -> Applied {
        let key = match block_id {
            Some(id) => BlockKey::block(id),
            None => match &self.last_text_key {
                Some(key) => key.clone(),
                None => return Applied::Dropped(DropReason::Unmatched),
            },
        };
        if let Some(reason) = self.refuse(&key) {
            return Applied::Dropped(reason);
        }
        let Some(state) = self.open.remove(&key) else {
            return Applied::Dropped(DropReason::Unmatched);
        };

        let status = if cancelled {
            ToolStatus::Incomplete
        } else if has_error {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };
        self.materialize_text(state, status);
        self.thought.clear();

        if cancelled {
            self.cancelled.insert(key);
            self.outcome = TurnOutcome::Cancelled;
        } else {
            self.closed.insert(key);
            if has_error {
                let message = self
                    .error
                    .clone()
                    .unwrap_or_else(|| "stream ended with an error".to_string());
                self.outcome = TurnOutcome::Errored(message);
            } else if self.open.is_empty() {
                self.outcome = TurnOutcome::Completed;
            }
        }
        Applied::Changed
    }

    pub(crate) fn push_thought(&mut self, content: &str) -> Applied {
        if content.is_empty() {
            return Applied::Unchanged;
        }
        self.thought.push_str(content);
        Applied::Changed
    }

    pub(crate) fn action_streaming(&mut self, tool: &str) -> Applied {
        let key = BlockKey::tool(tool);
        if self.cancelled.contains(&key) {
            return Applied::Dropped(DropReason::CancelledKey);
        }
        self.completed_tools.remove(tool);
        if self.open.contains_key(&key) {
            return Applied::Unchanged;
        }

        let opened = self.next_opened();
        self.open.insert(key, StreamingBlockState::tool_arguments(tool, opened));
        self.outcome = TurnOutcome::Streaming;
        Applied::Changed
    }

    pub(crate) fn args_chunk(&mut self, tool: &str, partial_args: &str) -> Applied {
        let key = BlockKey::tool(tool);
        if let Some(state) = self.open.get_mut(&key) {
            if state.buffer == partial_args {
                return Applied::Unchanged;
            }
            if state.buffer.starts_with(partial_args) {
                return Applied::Dropped(DropReason::StaleArguments);
            }
            state.buffer = partial_args.to_string();
            return Applied::Changed;
        }
        if self.cancelled.contains(&key) {
            return Applied::Dropped(DropReason::CancelledKey);
        }
        if self.completed_tools.contains(tool) {
            return Applied::Dropped(DropReason::SuppressedArguments);
        }

        let opened = self.next_opened();
        let mut state = StreamingBlockState::tool_arguments(tool, opened);
        state.buffer = partial_args.to_string();
        self.open.insert(key, state);
        self.outcome = TurnOutcome::Streaming;
        Applied::Changed
    }

    pub(crate) fn action(&mut self, tool: &str, args: &Value) -> Applied {
        let key = BlockKey::tool(tool);
        if self.cancelled.contains(&key) {
            return Applied::Dropped(DropReason::CancelledKey);
        }
        let argument_phase = self.open.remove(&key);
        if argument_phase.is_none() && self.is_redelivered_action(tool, args) {
            return Applied::Dropped(DropReason::Redelivered);
        }

        let id = local_block_id();
        let seq = self.projection.allocate_sequence();
        let arguments = if args.is_null() {
            Value::Object(Map::new())
        } else {
            args.clone()
        };
        let block = ContentBlock::tool_call(&id, seq, tool, arguments, ToolStatus::Running);
        let opened = argument_phase.map_or_else(|| self.next_opened(), |state| state.opened);
        let state = StreamingBlockState::awaiting(&block, opened);

        self.projection.upsert(block);
        self.unconfirmed_calls.push(id.clone());
        self.open.insert(BlockKey::Block(id), state);
        self.completed_tools.insert(tool.to_string());
        self.outcome = TurnOutcome::Streaming;
        Applied::Changed
    }

    pub(crate) fn observation(
        &mut self,
        content: &str,
        success: bool,
        metadata: &Map<String, Value>,
        tool: Option<&str>,
    ) -> Applied {
        let Some(key) = self.find_awaiting(tool) else {
            return Applied::Dropped(DropReason::Unmatched);
        };
        let Some(state) = self.open.remove(&key) else {
            return Applied::Dropped(DropReason::Unmatched);
        };
        let Some(call_id) = state.block_id else {
            return Applied::Dropped(DropReason::Unmatched);
        };
        let tool_name = state.tool_name.unwrap_or_default();
        let status = if success {
            ToolStatus::Complete
        } else {
            ToolStatus::Error
        };
        self.projection
            .update(&call_id, |block| set_tool_status(block, status));

        let result_id = local_block_id();
        let seq = self.projection.allocate_sequence();
        let mut result = ContentBlock::tool_result(&result_id, seq, &tool_name, content, success)
            .with_parent(&call_id);
        result.metadata = metadata.clone();
        self.projection.upsert(result);
        self.local_results.insert(call_id, result_id);
        self.closed.insert(key);
        Applied::Changed
    }

    pub(crate) fn user_block(&mut self, block: &ContentBlock) -> Applied {
        if !matches!(block.block_type, BlockType::UserText | BlockType::System) {
            return Applied::Dropped(DropReason::InvalidPayload);
        }
        if block.block_type == BlockType::UserText {
            self.begin_turn();
        }
        self.projection.upsert(block.clone());
        Applied::Changed
    }

    /// Persisted tool call. Server data wins over any local reconstruction
    /// of the same call.
    pub(crate) fn tool_call_block(&mut self, block: &ContentBlock) -> Applied {
        if block.block_type != BlockType::ToolCall {
            return Applied::Dropped(DropReason::InvalidPayload);
        }
        let tool = block.tool_name().unwrap_or_default().to_string();
        let persisted_key = BlockKey::block(&block.id);
        let mut persisted = block.clone();
        let mut keep_awaiting = !block.tool_status().is_some_and(|status| status.is_terminal());

        let ephemeral_key = if self.open.contains_key(&persisted_key) {
            Some(persisted_key.clone())
        } else {
            self.most_recent_open(|state| {
                state.kind == StreamingKind::ToolCall
                    && state.tool_name.as_deref() == Some(tool.as_str())
                    && state.block_id.as_deref().is_some_and(is_local_id)
            })
            .or_else(|| {
                let key = BlockKey::tool(&tool);
                self.open.contains_key(&key).then_some(key)
            })
        };

        let mut replaced_local = None;
        if let Some(key) = ephemeral_key {
            if let Some(state) = self.open.remove(&key) {
                replaced_local = state.block_id.filter(|id| is_local_id(id));
            }
        } else if let Some(position) = self.unconfirmed_calls.iter().rposition(|id| {
            self.projection.get(id).and_then(ContentBlock::tool_name) == Some(tool.as_str())
        }) {
            let local = self.unconfirmed_calls.remove(position);
            let local_status = self.projection.get(&local).and_then(ContentBlock::tool_status);
            if let Some(status) = local_status.filter(|status| status.is_terminal()) {
                if keep_awaiting {
                    set_tool_status(&mut persisted, status);
                    keep_awaiting = false;
                }
            }
            replaced_local = Some(local);
        }

        if let Some(local) = replaced_local.filter(|local| *local != block.id) {
            self.unconfirmed_calls.retain(|id| *id != local);
            self.projection.remove(&local);
            if let Some(result_id) = self.local_results.remove(&local) {
                let parent = block.id.clone();
                self.projection.update(&result_id, |result| {
                    result.parent_block_id = Some(parent);
                });
                self.local_results.insert(block.id.clone(), result_id);
            }
        }

        self.completed_tools.insert(tool);
        self.projection.upsert(persisted.clone());
        if keep_awaiting && !self.cancelled.contains(&persisted_key) {
            let opened = self.next_opened();
            self.open
                .insert(persisted_key, StreamingBlockState::awaiting(&persisted, opened));
        } else {
            self.closed.insert(persisted_key);
        }
        Applied::Changed
    }

    pub(crate) fn tool_result_block(&mut self, block: &ContentBlock) -> Applied {
        if block.block_type != BlockType::ToolResult {
            return Applied::Dropped(DropReason::InvalidPayload);
        }
        let success = match &block.content {
            BlockContent::ToolResult(result) => result.success,
            _ => true,
        };

        if let Some(parent) = &block.parent_block_id {
            if let Some(local) = self.local_results.remove(parent) {
                if local != block.id {
                    self.projection.remove(&local);
                }
            }
            let key = BlockKey::block(parent);
            if self.open.remove(&key).is_some() {
                self.closed.insert(key);
            }
            let status = if success {
                ToolStatus::Complete
            } else {
                ToolStatus::Error
            };
            self.projection
                .update(parent, |call| set_tool_status(call, status));
        }

        self.projection.upsert(block.clone());
        Applied::Changed
    }

    /// Force-closes every open block as incomplete and poisons its key.
    pub(crate) fn cancel_open(&mut self) -> Applied {
        let keys: Vec<BlockKey> = self.open.keys().cloned().collect();
        let closed_any = !keys.is_empty();
        for key in keys {
            if let Some(state) = self.open.remove(&key) {
                // Awaiting calls are keyed by block id; poison the tool name
                // too, so a redelivered action stays dropped.
                if let Some(tool) = &state.tool_name {
                    self.cancelled.insert(BlockKey::tool(tool));
                }
                self.close_state(state, ToolStatus::Incomplete);
            }
            self.cancelled.insert(key);
        }
        if let Some(key) = &self.last_text_key {
            self.cancelled.insert(key.clone());
        }
        self.thought.clear();

        let outcome_changed = self.outcome != TurnOutcome::Cancelled;
        self.outcome = TurnOutcome::Cancelled;
        if closed_any || outcome_changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    /// Records a session fault. Open blocks are marked, not closed.
    pub(crate) fn fail(&mut self, message: &str) -> Applied {
        for state in self.open.values_mut() {
            state.status = ToolStatus::Error;
        }
        self.error = Some(message.to_string());
        self.outcome = TurnOutcome::Errored(message.to_string());
        Applied::Changed
    }

    /// Starts a new turn: finalizes blocks left open by a failed turn and
    /// clears per-turn state.
    pub(crate) fn begin_turn(&mut self) {
        let failed: Vec<BlockKey> = self
            .open
            .iter()
            .filter(|(_, state)| state.status == ToolStatus::Error)
            .map(|(key, _)| key.clone())
            .collect();
        for key in failed {
            if let Some(state) = self.open.remove(&key) {
                self.close_state(state, ToolStatus::Error);
            }
            self.closed.insert(key);
        }

        self.cancelled.retain(|key| matches!(key, BlockKey::Block(_)));
        self.completed_tools.clear();
        self.thought.clear();
        self.error = None;
        self.outcome = TurnOutcome::Streaming;
    }

    /// Overwrites a text block with an authoritative snapshot.
    pub(crate) fn resync_text(
        &mut self,
        block_id: &str,
        accumulated: &str,
        streaming: bool,
        sequence_number: u64,
    ) -> Applied {
        let key = BlockKey::block(block_id);
        if self.cancelled.contains(&key) {
            let changed = self.projection.update(block_id, |block| {
                block.content = BlockContent::Text(stream_protocol::TextContent {
                    text: accumulated.to_string(),
                });
            });
            return if changed {
                Applied::Changed
            } else {
                Applied::Unchanged
            };
        }
        self.projection.note_sequence(sequence_number);

        if streaming {
            self.closed.remove(&key);
            self.projection.remove(block_id);
            let opened = self.next_opened();
            let state = self.open.entry(key.clone()).or_insert_with(|| {
                StreamingBlockState::text(block_id.to_string(), sequence_number, opened)
            });
            let unchanged = state.buffer == accumulated
                && state.sequence_number == Some(sequence_number)
                && state.status == ToolStatus::Running;
            state.buffer = accumulated.to_string();
            state.sequence_number = Some(sequence_number);
            state.status = ToolStatus::Running;
            self.last_text_key = Some(key);
            self.outcome = TurnOutcome::Streaming;
            return if unchanged {
                Applied::Unchanged
            } else {
                Applied::Changed
            };
        }

        let opened = self.next_opened();
        let mut state = self.open.remove(&key).unwrap_or_else(|| {
            StreamingBlockState::text(block_id.to_string(), sequence_number, opened)
        });
        state.buffer = accumulated.to_string();
        state.sequence_number = Some(sequence_number);
        let changed = self.materialize_text(state, ToolStatus::Complete);
        self.closed.insert(key);
        if self.open.is_empty() && self.outcome == TurnOutcome::Streaming {
            self.outcome = TurnOutcome::Completed;
        }
        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    /// Drops tool calls still in their argument phase.
    pub(crate) fn discard_argument_states(&mut self) -> usize {
        let before = self.open.len();
        self.open
            .retain(|key, _| !matches!(key, BlockKey::Tool(_)));
        before - self.open.len()
    }

    /// Merges an authoritative block list from the server.
    pub(crate) fn apply_snapshot(&mut self, blocks: Vec<ContentBlock>) -> Applied {
        let Some(max_seq) = blocks.iter().map(|block| block.sequence_number).max() else {
            return Applied::Unchanged;
        };
        let mut changed = false;

        for block in blocks {
            let key = BlockKey::block(&block.id);
            let finished = !block.is_streaming()
                && block.tool_status().map_or(true, |status| status.is_terminal());
            if finished {
                if self.open.remove(&key).is_some() {
                    changed = true;
                }
                if !self.cancelled.contains(&key) {
                    self.closed.insert(key);
                }
                changed |= self.projection.upsert(block);
            } else if !self.open.contains_key(&key) {
                if block.block_type == BlockType::ToolCall {
                    let opened = self.next_opened();
                    self.open
                        .insert(key, StreamingBlockState::awaiting(&block, opened));
                }
                changed |= self.projection.upsert(block);
            }
        }

        for local in self.projection.local_ids_up_to(max_seq) {
            self.projection.remove(&local);
            self.open
                .retain(|_, state| state.block_id.as_deref() != Some(local.as_str()));
            self.unconfirmed_calls.retain(|id| *id != local);
            self.local_results
                .retain(|call, result| *call != local && *result != local);
            changed = true;
        }

        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    /// Destroys all open state. Materialized blocks are kept.
    pub(crate) fn teardown(&mut self) -> usize {
        let discarded = self.open.len();
        self.open.clear();
        self.thought.clear();
        discarded
    }

    fn refuse(&self, key: &BlockKey) -> Option<DropReason> {
        if self.cancelled.contains(key) {
            Some(DropReason::CancelledKey)
        } else if self.closed.contains(key) {
            Some(DropReason::Redelivered)
        } else {
            None
        }
    }

    fn open_text(&mut self, key: BlockKey, id: String, sequence_number: Option<u64>) {
        let seq = match sequence_number {
            Some(seq) => {
                self.projection.note_sequence(seq);
                seq
            }
            None => self.projection.allocate_sequence(),
        };
        let opened = self.next_opened();
        self.open.insert(key.clone(), StreamingBlockState::text(id, seq, opened));
        self.last_text_key = Some(key);
        self.outcome = TurnOutcome::Streaming;
    }

    /// Writes a closed text state into the projection, keeping the timestamps
    /// of an already materialized block with the same id.
    fn materialize_text(&mut self, state: StreamingBlockState, status: ToolStatus) -> bool {
        let id = state.block_id.unwrap_or_else(local_block_id);
        let seq = state
            .sequence_number
            .unwrap_or_else(|| self.projection.allocate_sequence());

        let mut block = match self.projection.get(&id) {
            Some(existing) => {
                let mut block = existing.clone();
                block.sequence_number = seq;
                block.content = BlockContent::Text(stream_protocol::TextContent {
                    text: state.buffer.clone(),
                });
                block
            }
            None => ContentBlock::text(&id, seq, BlockType::AssistantText, state.buffer.clone()),
        };
        block.metadata.remove("streaming");
        match status {
            ToolStatus::Incomplete => {
                block.metadata.insert("cancelled".to_string(), Value::Bool(true));
            }
            ToolStatus::Error => {
                block.metadata.insert("error".to_string(), Value::Bool(true));
            }
            _ => {}
        }
        self.projection.upsert(block)
    }

    fn close_state(&mut self, state: StreamingBlockState, status: ToolStatus) {
        match (state.kind, state.block_id.clone()) {
            (StreamingKind::Text, _) => {
                self.materialize_text(state, status);
            }
            (StreamingKind::ToolCall, Some(call_id)) => {
                self.projection
                    .update(&call_id, |call| set_tool_status(call, status));
            }
            (StreamingKind::ToolCall, None) => {
                let tool = state.tool_name.clone().unwrap_or_default();
                let arguments =
                    preview_arguments(&state.buffer).unwrap_or_else(|| Value::Object(Map::new()));
                let id = local_block_id();
                let seq = self.projection.allocate_sequence();
                let mut block = ContentBlock::tool_call(&id, seq, tool, arguments, status);
                if !state.buffer.is_empty() {
                    block
                        .metadata
                        .insert("raw_arguments".to_string(), Value::String(state.buffer));
                }
                self.projection.upsert(block);
                self.unconfirmed_calls.push(id);
            }
        }
    }

    fn find_awaiting(&self, tool: Option<&str>) -> Option<BlockKey> {
        let awaiting = |state: &StreamingBlockState| state.awaiting_result;
        tool.and_then(|tool| {
            self.most_recent_open(|state| {
                awaiting(state) && state.tool_name.as_deref() == Some(tool)
            })
        })
        .or_else(|| self.most_recent_open(awaiting))
    }

    fn most_recent_open<P>(&self, predicate: P) -> Option<BlockKey>
    where
        P: Fn(&StreamingBlockState) -> bool,
    {
        self.open
            .iter()
            .filter(|(_, state)| predicate(state))
            .max_by_key(|(_, state)| state.opened)
            .map(|(key, _)| key.clone())
    }

    fn is_redelivered_action(&self, tool: &str, args: &Value) -> bool {
        self.completed_tools.contains(tool)
            && self.open.values().any(|state| {
                state.awaiting_result
                    && state.tool_name.as_deref() == Some(tool)
                    && serde_json::from_str::<Value>(&state.buffer).ok().as_ref() == Some(args)
            })
    }

    fn next_opened(&mut self) -> u64 {
        self.opened += 1;
        self.opened
    }
}

fn set_tool_status(block: &mut ContentBlock, status: ToolStatus) {
    if let BlockContent::ToolCall(call) = &mut block.content {
        call.status = status;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use stream_protocol::{BlockType, ContentBlock, ToolStatus};

    use super::{BlockKey, Reconstructor, StreamingKind};
    use crate::engine::{Applied, DropReason, TurnOutcome};

    #[test]
    fn thought_accumulates_until_text_closes() {
        let mut recon = Reconstructor::new();
        recon.push_thought("look");
        recon.push_thought("ing");
        assert_eq!(recon.thought(), Some("looking"));

        recon.text_start(Some("a"), Some(1));
        recon.chunk("done", Some("a"));
        recon.text_end(Some("a"), false, false);
        assert_eq!(recon.thought(), None);
    }

    #[test]
    fn redelivered_action_is_dropped_while_result_pending() {
        let mut recon = Reconstructor::new();
        let args = json!({"cmd": "ls"});
        assert_eq!(recon.action("bash", &args), Applied::Changed);
        assert_eq!(
            recon.action("bash", &args),
            Applied::Dropped(DropReason::Redelivered)
        );
        assert_eq!(recon.projection().len(), 1);
    }

    #[test]
    fn new_turn_lifts_cancellation_of_tool_keys_only() {
        let mut recon = Reconstructor::new();
        recon.text_start(Some("a"), Some(1));
        recon.args_chunk("bash", "{");
        recon.cancel_open();
        assert!(recon.is_cancelled(&BlockKey::tool("bash")));

        recon.begin_turn();
        assert!(!recon.is_cancelled(&BlockKey::tool("bash")));
        assert!(recon.is_cancelled(&BlockKey::block("a")));
        assert_eq!(recon.args_chunk("bash", "{\"cmd\""), Applied::Changed);
        assert_eq!(
            recon.chunk("late", Some("a")),
            Applied::Dropped(DropReason::CancelledKey)
        );
    }

    #[test]
    fn cancelled_argument_phase_materializes_with_raw_arguments() {
        let mut recon = Reconstructor::new();
        recon.action_streaming("write");
        recon.args_chunk("write", r#"{"path":"a.txt","body":"hel"#);
        recon.cancel_open();

        let call = recon.projection().iter().next().expect("call block");
        assert_eq!(call.block_type, BlockType::ToolCall);
        assert_eq!(call.tool_status(), Some(ToolStatus::Incomplete));
        assert_eq!(
            call.metadata.get("raw_arguments"),
            Some(&json!(r#"{"path":"a.txt","body":"hel"#))
        );
        assert_eq!(recon.outcome(), &TurnOutcome::Cancelled);
    }

    #[test]
    fn snapshot_reopens_running_tool_calls() {
        let mut recon = Reconstructor::new();
        let running = ContentBlock::tool_call("c-1", 3, "bash", json!({}), ToolStatus::Running);
        recon.apply_snapshot(vec![running]);

        let state = recon.state(&BlockKey::block("c-1")).expect("awaiting state");
        assert_eq!(state.kind, StreamingKind::ToolCall);
        assert!(state.awaiting_result);

        recon.observation("ok", true, &Map::new(), Some("bash"));
        assert_eq!(recon.open_count(), 0);
        assert_eq!(
            recon.projection().get("c-1").and_then(ContentBlock::tool_status),
            Some(ToolStatus::Complete)
        );
    }

    #[test]
    fn observation_without_pending_call_is_unmatched() {
        let mut recon = Reconstructor::new();
        assert_eq!(
            recon.observation("orphan", true, &Map::new(), None),
            Applied::Dropped(DropReason::Unmatched)
        );
        assert!(recon.projection().is_empty());
    }
}

//! Timed grouping of inbound events.
//!
//! The batcher only groups delivery: events leave in the order they arrived,
//! with nothing dropped or merged. The owner drains it on its flush tick, or
//! right away when [`EventBatcher::push`] reports a priority event.

use std::collections::VecDeque;

use stream_protocol::StreamEvent;

/// What the owner should do after a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushHint {
    /// Wait for the next flush tick.
    Deferred,
    /// Flush now; a priority event is queued.
    FlushNow,
}

#[derive(Debug, Default)]
pub struct EventBatcher {
    pending: VecDeque<StreamEvent>,
    pushed: u64,
    flushes: u64,
}

impl EventBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StreamEvent) -> PushHint {
        let hint = if event.is_priority() {
            PushHint::FlushNow
        } else {
            PushHint::Deferred
        };
        self.pending.push_back(event);
        self.pushed += 1;
        hint
    }

    /// Drains everything queued, in arrival order. A flush with nothing
    /// pending is a no-op and returns `None`.
    pub fn take_batch(&mut self) -> Option<Vec<StreamEvent>> {
        if self.pending.is_empty() {
            return None;
        }
        self.flushes += 1;
        Some(self.pending.drain(..).collect())
    }

    /// Discards pending events, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events accepted since creation.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Non-empty flushes since creation.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

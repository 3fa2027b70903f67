//! Authoritative resync on top of local reconstruction.
//!
//! A `stream_sync` replaces the block's state wholesale; there is no
//! character-level merge. Snapshots are ordered per block by sequence number:
//! an older snapshot never overwrites a newer one, and reapplying the same
//! snapshot changes nothing.

use std::collections::HashMap;

use stream_protocol::ContentBlock;

use super::reconstructor::Reconstructor;
use super::{Applied, DropReason};

#[derive(Debug, Default)]
pub struct Reconciler {
    applied: HashMap<String, u64>,
    rejected: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply_sync(
        &mut self,
        reconstructor: &mut Reconstructor,
        block_id: &str,
        accumulated: &str,
        streaming: bool,
        sequence_number: u64,
    ) -> Applied {
        if let Some(current) = self.applied.get(block_id) {
            if sequence_number < *current {
                self.rejected += 1;
                tracing::debug!(
                    block_id,
                    sequence_number,
                    current = *current,
                    "rejecting stale stream_sync"
                );
                return Applied::Dropped(DropReason::StaleSync);
            }
        }
        self.applied.insert(block_id.to_string(), sequence_number);

        let discarded = reconstructor.discard_argument_states();
        if discarded > 0 {
            tracing::debug!(discarded, "stream_sync discarded argument-phase tool calls");
        }
        let applied = reconstructor.resync_text(block_id, accumulated, streaming, sequence_number);
        if discarded > 0 {
            Applied::Changed
        } else {
            applied
        }
    }

    /// Merges the persisted block list fetched over REST.
    pub(crate) fn apply_snapshot(
        &mut self,
        reconstructor: &mut Reconstructor,
        blocks: Vec<ContentBlock>,
    ) -> Applied {
        for block in &blocks {
            let mark = self.applied.entry(block.id.clone()).or_insert(block.sequence_number);
            *mark = (*mark).max(block.sequence_number);
        }
        reconstructor.apply_snapshot(blocks)
    }

    /// Sequence number of the newest snapshot applied to `block_id`.
    pub fn applied_sequence(&self, block_id: &str) -> Option<u64> {
        self.applied.get(block_id).copied()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

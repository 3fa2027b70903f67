//! Ordered, read-only view of materialized blocks.

use std::collections::{BTreeMap, HashMap};

use stream_protocol::ContentBlock;
use uuid::Uuid;

/// Prefix of ids minted locally for blocks the server has not named.
pub const LOCAL_ID_PREFIX: &str = "local-";

pub fn local_block_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockChange {
    Inserted(String),
    Replaced(String),
    Removed(String),
}

/// Blocks ordered by `(sequence_number, id)` with an id index.
///
/// Only the engine mutates the projection. Every mutation is recorded so the
/// owner can report what changed in one flush.
#[derive(Debug, Default)]
pub struct BlockProjection {
    ordered: BTreeMap<(u64, String), ContentBlock>,
    by_id: HashMap<String, u64>,
    high_water: Option<u64>,
    changes: Vec<BlockChange>,
}

impl BlockProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block or replaces the block with the same id. Returns false
    /// when an identical block was already present.
    pub fn upsert(&mut self, block: ContentBlock) -> bool {
        self.note_sequence(block.sequence_number);
        let id = block.id.clone();

        if let Some(previous_seq) = self.by_id.get(&id).copied() {
            let key = (previous_seq, id.clone());
            if self.ordered.get(&key) == Some(&block) {
                return false;
            }
            self.ordered.remove(&key);
            self.by_id.insert(id.clone(), block.sequence_number);
            self.ordered.insert((block.sequence_number, id.clone()), block);
            self.changes.push(BlockChange::Replaced(id));
            return true;
        }

        self.by_id.insert(id.clone(), block.sequence_number);
        self.ordered.insert((block.sequence_number, id.clone()), block);
        self.changes.push(BlockChange::Inserted(id));
        true
    }

    /// Applies `edit` to a copy of the block and stores the result.
    pub fn update<F>(&mut self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut ContentBlock),
    {
        let Some(mut block) = self.get(id).cloned() else {
            return false;
        };
        edit(&mut block);
        self.upsert(block)
    }

    pub fn remove(&mut self, id: &str) -> Option<ContentBlock> {
        let seq = self.by_id.remove(id)?;
        let removed = self.ordered.remove(&(seq, id.to_string()));
        if removed.is_some() {
            self.changes.push(BlockChange::Removed(id.to_string()));
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&ContentBlock> {
        let seq = self.by_id.get(id)?;
        self.ordered.get(&(*seq, id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Blocks in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentBlock> {
        self.ordered.values()
    }

    pub fn to_vec(&self) -> Vec<ContentBlock> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Highest sequence number seen or handed out so far.
    pub fn max_sequence(&self) -> Option<u64> {
        self.high_water
    }

    /// Hands out the next free sequence number for a locally created block.
    pub fn allocate_sequence(&mut self) -> u64 {
        let next = self.high_water.map_or(0, |seq| seq + 1);
        self.high_water = Some(next);
        next
    }

    pub fn note_sequence(&mut self, seq: u64) {
        self.high_water = Some(self.high_water.map_or(seq, |current| current.max(seq)));
    }

    pub fn take_changes(&mut self) -> Vec<BlockChange> {
        std::mem::take(&mut self.changes)
    }

    pub(crate) fn local_ids_up_to(&self, seq: u64) -> Vec<String> {
        self.ordered
            .range(..(seq.saturating_add(1), String::new()))
            .filter(|((_, id), _)| is_local_id(id))
            .map(|((_, id), _)| id.clone())
            .collect()
    }
}

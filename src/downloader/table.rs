use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::error::{Error, Result};

const UNKNOWN: u8 = 0;
const CLAIMED: u8 = 1;
const OBTAINED: u8 = 2;

/// Shared record of which fragment indices have been persisted.
///
/// Slots move unknown -> claimed -> obtained. A claim dropped without being
/// committed falls back to unknown; an obtained slot never changes again.
#[derive(Debug)]
pub struct CompletionTable {
    slots: Vec<AtomicU8>,
    obtained: AtomicUsize,
}

/// Outcome of trying to take ownership of a sequence number.
#[derive(Debug)]
pub enum ClaimResult<'a> {
    /// Caller now owns the slot and must persist the fragment.
    Claimed(SlotClaim<'a>),
    /// Another worker already holds or finished this index.
    Duplicate,
}

impl CompletionTable {
    pub fn new(total: usize) -> Self {
        Self {
            slots: (0..total).map(|_| AtomicU8::new(UNKNOWN)).collect(),
            obtained: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn obtained(&self) -> usize {
        self.obtained.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.obtained() == self.slots.len()
    }

    pub fn is_obtained(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.load(Ordering::Acquire) == OBTAINED)
    }

    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.load(Ordering::Acquire) != OBTAINED)
            .map(|(i, _)| i)
            .collect()
    }

    /// Validate a sequence number from the wire against `[0, total)`.
    pub fn index_of(&self, seq: i64) -> Result<usize> {
        usize::try_from(seq)
            .ok()
            .filter(|index| *index < self.slots.len())
            .ok_or(Error::SequenceOutOfRange {
                seq,
                total: self.slots.len(),
            })
    }

    pub fn try_claim(&self, index: usize) -> Result<ClaimResult<'_>> {
        let slot = self
            .slots
            .get(index)
            .ok_or(Error::SequenceOutOfRange {
                seq: index as i64,
                total: self.slots.len(),
            })?;
        match slot.compare_exchange(UNKNOWN, CLAIMED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(ClaimResult::Claimed(SlotClaim {
                table: self,
                index,
                committed: false,
            })),
            Err(_) => Ok(ClaimResult::Duplicate),
        }
    }
}

/// Exclusive right to persist one fragment index.
#[derive(Debug)]
pub struct SlotClaim<'a> {
    table: &'a CompletionTable,
    index: usize,
    committed: bool,
}

impl SlotClaim<'_> {
    /// Mark the fragment obtained; call only after its file is in place.
    pub fn commit(mut self) {
        self.table.slots[self.index].store(OBTAINED, Ordering::Release);
        self.table.obtained.fetch_add(1, Ordering::AcqRel);
        self.committed = true;
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.table.slots[self.index].store(UNKNOWN, Ordering::Release);
        }
    }
}

//! Append-only log of undo records, truncatable from either end.

use crate::undo::UndoRecord;

/// The ordered sequence of [`UndoRecord`]s for a single guest.
///
/// The only mutations permitted are append on the tail (during guest
/// execution), truncation of the tail (by the Rewinder, down to a prior
/// length), and truncation of the head (by history compaction, once the
/// Scheduler has proven those records are unreachable).
#[derive(Debug, Default)]
pub struct Journal {
    records: Vec<UndoRecord>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    /// Discard records at `new_len..len()`. The caller is responsible for
    /// first applying those records in reverse to the VM.
    pub fn truncate_tail(&mut self, new_len: usize) {
        self.records.truncate(new_len);
    }

    /// Discard records at `0..new_head`. Safe only when the caller has
    /// proven those records will never be reapplied.
    pub fn truncate_head(&mut self, new_head: usize) {
        self.records.drain(0..new_head.min(self.records.len()));
    }

    /// Pop and return the last record, if any — the primitive the
    /// Rewinder uses to walk the tail backwards one record at a time.
    pub fn pop(&mut self) -> Option<UndoRecord> {
        self.records.pop()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

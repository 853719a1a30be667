//! Ordered sequence of invocations with timestamps.

use crate::{scalar::Scalar, timestamp::Timestamp};

/// A single submitted guest invocation, as recorded in the Call Log.
#[derive(Debug, Clone, PartialEq)]
pub struct CallLogEntry {
    pub name: String,
    pub args: Vec<Scalar>,
    /// Journal length observed immediately before this invocation executed.
    pub journal_length_before: usize,
    pub timestamp: Timestamp,
}

/// Invariant: strictly ascending by `timestamp`; `journal_length_before`
/// is non-decreasing along the log and equals the cumulative count of
/// undo records produced by all earlier entries.
#[derive(Debug, Default)]
pub struct CallLog {
    entries: Vec<CallLogEntry>,
}

impl CallLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&CallLogEntry> {
        self.entries.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut CallLogEntry> {
        self.entries.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallLogEntry> {
        self.entries.iter()
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.entries.iter().map(|e| e.timestamp).collect()
    }

    /// Smallest `i` such that `log[i].timestamp > ts` (or `len()` if none).
    ///
    /// Typical inserts land near the tail, so scan backwards from the end;
    /// fall back to binary search once the log grows large enough for the
    /// linear scan to matter.
    pub fn find_insertion_index(&self, ts: Timestamp) -> usize {
        const LINEAR_SCAN_THRESHOLD: usize = 64;

        if self.entries.len() > LINEAR_SCAN_THRESHOLD {
            return self.entries.partition_point(|e| e.timestamp <= ts);
        }

        let mut i = self.entries.len();
        while i > 0 && self.entries[i - 1].timestamp > ts {
            i -= 1;
        }
        i
    }

    pub fn insert_at(&mut self, i: usize, entry: CallLogEntry) {
        self.entries.insert(i, entry);
    }

    pub fn remove_prefix(&mut self, k: usize) {
        self.entries.drain(0..k.min(self.entries.len()));
    }

    /// Subtract `cutoff` from every surviving entry's `journal_length_before`,
    /// keeping those values valid offsets into a Journal whose head was
    /// just truncated by `cutoff` records.
    pub fn rebase_journal_lengths(&mut self, cutoff: usize) {
        for entry in self.entries.iter_mut() {
            entry.journal_length_before = entry.journal_length_before.saturating_sub(cutoff);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: i64, jlb: usize) -> CallLogEntry {
        CallLogEntry {
            name: "f".to_string(),
            args: vec![],
            journal_length_before: jlb,
            timestamp: Timestamp::new(t, 0, 0),
        }
    }

    #[test]
    fn insertion_index_into_empty_log_is_zero() {
        let log = CallLog::new();
        assert_eq!(log.find_insertion_index(Timestamp::new(5, 0, 0)), 0);
    }

    #[test]
    fn insertion_index_finds_gap() {
        let mut log = CallLog::new();
        log.insert_at(0, entry(1, 0));
        log.insert_at(1, entry(3, 1));
        log.insert_at(2, entry(5, 2));

        assert_eq!(log.find_insertion_index(Timestamp::new(3, 0, 0)), 2);
        assert_eq!(log.find_insertion_index(Timestamp::new(0, 0, 0)), 0);
        assert_eq!(log.find_insertion_index(Timestamp::new(5, 0, 0)), 3);
        assert_eq!(log.find_insertion_index(Timestamp::new(10, 0, 0)), 3);
    }

    #[test]
    fn remove_prefix_drops_earliest_entries() {
        let mut log = CallLog::new();
        for i in 0..5 {
            log.insert_at(i, entry(i as i64, i));
        }
        log.remove_prefix(2);
        assert_eq!(log.len(), 3);
        assert_eq!(log.get(0).unwrap().timestamp, Timestamp::new(2, 0, 0));
    }

    #[test]
    fn linear_and_binary_search_agree() {
        let mut log = CallLog::new();
        for i in 0..200 {
            log.insert_at(i, entry(i as i64 * 2, i));
        }
        // Odd query values fall strictly between two entries.
        for q in [-1i64, 1, 51, 397, 1000] {
            let expected = log
                .entries
                .iter()
                .position(|e| e.timestamp.time > q)
                .unwrap_or(log.len());
            assert_eq!(log.find_insertion_index(Timestamp::new(q, 0, 0)), expected);
        }
    }
}

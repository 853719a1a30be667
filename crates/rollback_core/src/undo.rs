//! Undo records captured by the instrumented callbacks.

use crate::scalar::Scalar;

/// One reversible mutation, captured just before it was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoRecord {
    /// Captured just before a store of `old_bytes.len()` bytes at `location`.
    MemoryWrite { location: u32, old_bytes: Vec<u8> },
    /// Captured just before linear memory is grown.
    MemoryGrow { old_page_count: u32 },
    /// Captured just before a typed global is overwritten.
    GlobalWrite { global_index: u32, old_value: Scalar },
}

//! Error taxonomy for the rollback core.
//!
//! All other conditions (invalid undo record, Journal/Call Log invariant
//! violation) are assertion failures indicating an engine bug, not a
//! `CoreError` variant — they panic via `debug_assert!`/`unreachable!`
//! at the call site instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine setup failed: {0}")]
    SetupFailed(#[source] anyhow::Error),

    #[error("rewind failed: VM reinstantiation errored, engine is now poisoned: {0}")]
    RewindFailed(#[source] anyhow::Error),

    #[error("engine is poisoned by a prior rewind failure and rejects all further calls")]
    Poisoned,

    #[error("guest export '{export}' trapped: {source}")]
    GuestTrap {
        export: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("guest export '{0}' not found")]
    MissingExport(String),

    #[error("out-of-order insert for player {player_id}: offset {offset} is not greater than a prior offset at the same time")]
    OutOfOrderInsert { player_id: u32, offset: u32 },

    #[error("unsupported wasm value type: {0}")]
    UnsupportedValueType(String),

    #[error("global type mismatch at index {index}: undo record tag does not match the guest's declared type")]
    GlobalTypeMismatch { index: u32 },

    #[error("memory access out of bounds: location {location}, len {len}, memory size {memory_size}")]
    OutOfBoundsMemory {
        location: u32,
        len: usize,
        memory_size: usize,
    },
}

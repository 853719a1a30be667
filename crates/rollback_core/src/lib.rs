//! Deterministic rollback/replay engine for an instrumented WebAssembly
//! guest: a Journal of undo records, a Call Log of timestamped
//! invocations, a Rewinder that restores past VM states, and a Scheduler
//! that drives both in response to out-of-order inserts and a recurring
//! tick.

pub mod call_log;
pub mod diagnostics;
pub mod error;
pub mod journal;
pub mod rewind;
pub mod rewriter;
pub mod scalar;
pub mod scheduler;
pub mod timestamp;
pub mod undo;
pub mod vm;

pub use call_log::{CallLog, CallLogEntry};
pub use diagnostics::{default_sink, DiagnosticSink, TracingSink};
pub use error::CoreError;
pub use journal::Journal;
pub use rewind::Rewinder;
pub use rewriter::{instrument, BinaryRewriter};
pub use scalar::Scalar;
pub use scheduler::{EngineConfig, Scheduler};
pub use timestamp::Timestamp;
pub use undo::UndoRecord;
pub use vm::GuestVm;

use std::sync::Arc;

use anyhow::Result;
use wasmtime::{Engine, Module};

/// Build the `wasmtime::Engine` this crate runs instrumented guests under.
///
/// Synchronous by design: unlike a host juggling many concurrent guest
/// invocations behind an async boundary, the rollback engine runs one
/// timeline at a time and every entry point (`call_at`, `call_and_revert`,
/// `advance_time`) is on the hot path of rewind/replay, which itself must
/// stay synchronous to keep Journal and Call Log mutations atomic with
/// respect to each other.
pub fn engine() -> Result<Engine> {
    let mut config = wasmtime::Config::new();
    config.wasm_backtrace_details(wasmtime::WasmBacktraceDetails::Enable);
    config.wasm_bulk_memory(true);
    config.wasm_reference_types(true);
    Engine::new(&config)
}

/// Compile an already-instrumented module (see [`rewriter`] for the
/// instrumentation contract) and bring up a [`GuestVm`] for it.
pub fn load(engine: Engine, instrumented_wasm: &[u8], initial_pages: u32) -> Result<GuestVm> {
    let module = Module::new(&engine, instrumented_wasm)?;
    Ok(GuestVm::instantiate(engine, module, initial_pages, default_sink())?)
}

/// Convenience constructor: build an engine, compile and instantiate the
/// instrumented module, and wrap it in a [`Scheduler`] ready to take
/// `call_at`/`advance_time` calls.
pub fn start(
    instrumented_wasm: &[u8],
    config: EngineConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> Result<Scheduler> {
    let engine = engine()?;
    let module = Module::new(&engine, instrumented_wasm)?;
    let vm = GuestVm::instantiate(engine, module, config.initial_pages, diagnostics)?;
    Ok(Scheduler::new(vm, config))
}

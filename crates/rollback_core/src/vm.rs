//! The instrumented guest VM: owns the wasmtime `Engine`/`Module`/
//! `Store`/`Instance`, wires the three instrumented callbacks plus the two
//! diagnostic imports, and exposes the primitives the Rewinder and
//! Scheduler need (memory/global read-write, export calls, and
//! reinstantiation on `MemoryGrow` undo).
//!
//! # Guest contract
//!
//! The instrumented module this VM loads must:
//! - import its single linear memory as `env.memory`, and re-export that
//!   same memory under the name `memory` (so the host can find it via
//!   [`wasmtime::Caller::get_export`] from inside a host function, which
//!   only sees the calling instance's *exports*, not its raw import
//!   table);
//! - export every mutable global it instruments under the name
//!   `__rtglobal_{index}`, where `index` is the value passed to
//!   `on_global_set` for that global.
//!
//! This sidesteps the "cyclic references" problem noted in the design: a
//! host function closure registered on a [`wasmtime::Linker`] is
//! `'static` and cannot capture the `Instance` it will eventually run
//! inside of (the `Instance` doesn't exist until after the imports are
//! resolved). `Caller::get_export` lets the closure reach into the
//! *calling* instance's exports at call time instead.

use std::sync::Arc;

use wasmtime::{Caller, Engine, Extern, Global, Instance, Linker, Memory, MemoryType, Module, Store, Val};

use crate::diagnostics::DiagnosticSink;
use crate::error::CoreError;
use crate::journal::Journal;
use crate::scalar::Scalar;
use crate::undo::UndoRecord;

/// Fixed per spec §4.4.
pub const PAGE_SIZE: u32 = 65_536;

pub(crate) fn global_export_name(index: u32) -> String {
    format!("__rtglobal_{index}")
}

/// State carried inside the wasmtime `Store`. Lives for as long as the
/// current `Store`/`Instance` pair does; moved across `Store` recreation
/// on `MemoryGrow` undo so the Journal itself always belongs to the
/// engine, never to a particular VM incarnation.
pub struct HostState {
    journal: Journal,
    diagnostics: Arc<dyn DiagnosticSink>,
}

fn memory_export(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow::anyhow!("guest module has no 'memory' export"))
}

fn global_export(caller: &mut Caller<'_, HostState>, name: &str) -> anyhow::Result<Global> {
    caller
        .get_export(name)
        .and_then(Extern::into_global)
        .ok_or_else(|| anyhow::anyhow!("guest module has no '{name}' export"))
}

fn read_memory_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<String> {
    let memory = memory_export(caller)?;
    let data = memory.data(&caller);
    let (p, l) = (ptr as usize, len as usize);
    let end = p
        .checked_add(l)
        .ok_or_else(|| anyhow::anyhow!("diagnostic message pointer overflow"))?;
    if end > data.len() {
        anyhow::bail!("diagnostic message out of bounds: {p}..{end} vs memory len {}", data.len());
    }
    Ok(String::from_utf8_lossy(&data[p..end]).into_owned())
}

fn build_linker(engine: &Engine) -> anyhow::Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);

    linker.func_wrap(
        "env",
        "on_store",
        |mut caller: Caller<'_, HostState>, location: i32, size: i32| -> anyhow::Result<()> {
            let memory = memory_export(&mut caller)?;
            let (loc, len) = (location as usize, size as usize);
            let end = loc
                .checked_add(len)
                .ok_or_else(|| anyhow::anyhow!("on_store pointer overflow"))?;
            let data = memory.data(&caller);
            if end > data.len() {
                anyhow::bail!("on_store out of bounds: {loc}..{end} vs memory len {}", data.len());
            }
            let old_bytes = data[loc..end].to_vec();
            caller.data_mut().journal.append(UndoRecord::MemoryWrite {
                location: location as u32,
                old_bytes,
            });
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "on_grow",
        |mut caller: Caller<'_, HostState>, _pages: i32| -> anyhow::Result<()> {
            let memory = memory_export(&mut caller)?;
            let old_page_count = memory.size(&caller) as u32;
            caller
                .data_mut()
                .journal
                .append(UndoRecord::MemoryGrow { old_page_count });
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "on_global_set",
        |mut caller: Caller<'_, HostState>, global_index: i32| -> anyhow::Result<()> {
            let index = global_index as u32;
            let name = global_export_name(index);
            let global = global_export(&mut caller, &name)?;
            let old_val = global.get(&mut caller);
            let old_value = Scalar::from_val(&old_val).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            caller
                .data_mut()
                .journal
                .append(UndoRecord::GlobalWrite {
                    global_index: index,
                    old_value,
                });
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "external_log",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = read_memory_string(&mut caller, ptr, len)?;
            caller.data().diagnostics.log(&message);
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "external_error",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = read_memory_string(&mut caller, ptr, len)?;
            caller.data().diagnostics.error(&message);
            Ok(())
        },
    )?;

    Ok(linker)
}

/// The instrumented guest: one wasmtime `Store`/`Instance` plus the
/// Journal (carried inside the `Store`'s data, see [`HostState`]).
pub struct GuestVm {
    engine: Engine,
    module: Module,
    store: Store<HostState>,
    instance: Instance,
}

impl GuestVm {
    /// Instantiate the VM from an already-instrumented module image, with
    /// a fresh linear memory of `initial_pages` pages.
    pub fn instantiate(
        engine: Engine,
        module: Module,
        initial_pages: u32,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, CoreError> {
        let state = HostState {
            journal: Journal::new(),
            diagnostics,
        };
        let mut store = Store::new(&engine, state);

        let memory = Memory::new(&mut store, MemoryType::new(initial_pages, None))
            .map_err(CoreError::SetupFailed)?;

        let mut linker = build_linker(&engine).map_err(CoreError::SetupFailed)?;
        linker
            .define(&mut store, "env", "memory", memory)
            .map_err(CoreError::SetupFailed)?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(CoreError::SetupFailed)?;

        Ok(Self {
            engine,
            module,
            store,
            instance,
        })
    }

    fn memory(&mut self) -> Result<Memory, CoreError> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| CoreError::SetupFailed(anyhow::anyhow!("missing 'memory' export")))
    }

    pub fn journal(&self) -> &Journal {
        &self.store.data().journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.store.data_mut().journal
    }

    pub fn read_memory(&mut self, location: u32, len: usize) -> Result<Vec<u8>, CoreError> {
        let memory = self.memory()?;
        let data = memory.data(&self.store);
        let (loc, end) = (location as usize, location as usize + len);
        if end > data.len() {
            return Err(CoreError::OutOfBoundsMemory {
                location,
                len,
                memory_size: data.len(),
            });
        }
        Ok(data[loc..end].to_vec())
    }

    pub fn write_memory(&mut self, location: u32, bytes: &[u8]) -> Result<(), CoreError> {
        let memory = self.memory()?;
        let data = memory.data_mut(&mut self.store);
        let (loc, end) = (location as usize, location as usize + bytes.len());
        if end > data.len() {
            return Err(CoreError::OutOfBoundsMemory {
                location,
                len: bytes.len(),
                memory_size: data.len(),
            });
        }
        data[loc..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn current_page_count(&mut self) -> Result<u32, CoreError> {
        let memory = self.memory()?;
        Ok(memory.size(&self.store) as u32)
    }

    pub fn read_global(&mut self, index: u32) -> Result<Scalar, CoreError> {
        let name = global_export_name(index);
        let global = self
            .instance
            .get_global(&mut self.store, &name)
            .ok_or_else(|| CoreError::SetupFailed(anyhow::anyhow!("missing global export '{name}'")))?;
        let val = global.get(&mut self.store);
        Scalar::from_val(&val)
    }

    /// Restore a typed global to `value`, validating the tag against the
    /// guest's declared type first (spec §9 "Dynamic typing of globals").
    pub fn write_global(&mut self, index: u32, value: Scalar) -> Result<(), CoreError> {
        let name = global_export_name(index);
        let global = self
            .instance
            .get_global(&mut self.store, &name)
            .ok_or_else(|| CoreError::SetupFailed(anyhow::anyhow!("missing global export '{name}'")))?;
        let ty = global.ty(&self.store);
        if !value.matches(&ty) {
            return Err(CoreError::GlobalTypeMismatch { index });
        }
        global
            .set(&mut self.store, value.to_val())
            .map_err(CoreError::RewindFailed)?;
        Ok(())
    }

    /// Call an exported function by name with typed scalar arguments.
    pub fn call_export(&mut self, name: &str, args: &[Scalar]) -> Result<Vec<Scalar>, CoreError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| CoreError::MissingExport(name.to_string()))?;
        let ty = func.ty(&self.store);
        let params: Vec<Val> = args.iter().map(|s| s.to_val()).collect();
        let mut results = vec![Val::I32(0); ty.results().len()];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|source| CoreError::GuestTrap {
                export: name.to_string(),
                source,
            })?;
        results.iter().map(Scalar::from_val).collect()
    }

    /// The VM supports no shrink, so reinstantiation is the only way to
    /// give it a smaller memory: allocate a fresh memory of `page_count`
    /// pages, copy the surviving bytes into it, and reinstantiate the VM
    /// from the retained module image with this memory.
    ///
    /// Two callers rely on this, with different expectations about the
    /// globals it resets (instantiation re-runs whatever
    /// global-initializers the module has, regardless of caller):
    /// - `Rewinder::rewind_to`, undoing a `MemoryGrow`: safe because the
    ///   undo records that follow in the same rewind sweep restore
    ///   globals afterward — this call only needs to be correct about
    ///   memory.
    /// - `load_memory_image`, backing `Scheduler::reset`: there is no
    ///   follow-up undo sweep, so the reset-to-initializers *is* the
    ///   globals behavior `reset` wants, applied unconditionally so it
    ///   doesn't depend on whether the new image happens to need more or
    ///   fewer pages than the old one.
    pub fn reinstantiate_with_pages(&mut self, page_count: u32) -> Result<(), CoreError> {
        let copy_len = (page_count as usize).saturating_mul(PAGE_SIZE as usize);
        let snapshot = {
            let memory = self.memory()?;
            let data = memory.data(&self.store);
            let n = copy_len.min(data.len());
            data[..n].to_vec()
        };

        let journal = std::mem::take(&mut self.store.data_mut().journal);
        let diagnostics = self.store.data().diagnostics.clone();

        let mut new_store = Store::new(&self.engine, HostState { journal, diagnostics });

        let new_memory = Memory::new(&mut new_store, MemoryType::new(page_count, None))
            .map_err(CoreError::RewindFailed)?;
        new_memory.data_mut(&mut new_store)[..snapshot.len()].copy_from_slice(&snapshot);

        let mut linker = build_linker(&self.engine).map_err(CoreError::RewindFailed)?;
        linker
            .define(&mut new_store, "env", "memory", new_memory)
            .map_err(CoreError::RewindFailed)?;
        let new_instance = linker
            .instantiate(&mut new_store, &self.module)
            .map_err(CoreError::RewindFailed)?;

        self.store = new_store;
        self.instance = new_instance;
        Ok(())
    }

    /// Replace the VM's linear memory contents wholesale (used by
    /// `Scheduler::reset`). Always reinstantiates with a freshly sized
    /// memory, regardless of whether the new image needs more or fewer
    /// pages than the current one.
    ///
    /// Reinstantiation reruns the module's global initializers, so this
    /// always resets every guest global to its declared initial value as
    /// a side effect. That's intentional, not incidental: `reset` has no
    /// follow-up undo sweep to restore globals the way a `MemoryGrow`
    /// rewind does (see `reinstantiate_with_pages`), so growing memory in
    /// place instead of reinstantiating would leave globals untouched —
    /// making whether `reset` resets globals depend on a page-count
    /// coincidence between the old and new image. Always reinstantiating
    /// makes that behavior uniform and spec-independent of image size.
    pub fn load_memory_image(&mut self, image: &[u8]) -> Result<(), CoreError> {
        let needed_pages = (image.len() as u32).div_ceil(PAGE_SIZE).max(1);
        self.reinstantiate_with_pages(needed_pages)?;

        self.write_memory(0, image)?;
        let total = needed_pages as usize * PAGE_SIZE as usize;
        if image.len() < total {
            let zeros = vec![0u8; total - image.len()];
            self.write_memory(image.len() as u32, &zeros)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A tiny instrumented guest used throughout the unit/integration
    /// tests: one mutable i32 global `g0` (index 0), exports `inc`,
    /// `noop`, `tick` (aliases of `inc`), and `alloc` (grows memory by
    /// one page and writes a marker byte at the start of the new page).
    pub const TEST_GUEST_WAT: &str = r#"
        (module
          (import "env" "on_store" (func $on_store (param i32 i32)))
          (import "env" "on_grow" (func $on_grow (param i32)))
          (import "env" "on_global_set" (func $on_global_set (param i32)))
          (import "env" "memory" (memory 1))
          (export "memory" (memory 0))
          (global $g0 (export "__rtglobal_0") (mut i32) (i32.const 0))
          (func (export "inc")
            (call $on_global_set (i32.const 0))
            (global.set $g0 (i32.add (global.get $g0) (i32.const 1))))
          (func (export "tick")
            (call $on_global_set (i32.const 0))
            (global.set $g0 (i32.add (global.get $g0) (i32.const 1))))
          (func (export "noop"))
          (func (export "alloc")
            (call $on_grow (i32.const 1))
            (drop (memory.grow (i32.const 1)))
            (call $on_store (i32.const 65536) (i32.const 1))
            (i32.store8 (i32.const 65536) (i32.const 0xAB))))
    "#;

    pub fn build_test_vm(diagnostics: Arc<dyn DiagnosticSink>) -> GuestVm {
        let engine = Engine::default();
        let module = Module::new(&engine, TEST_GUEST_WAT).expect("test guest compiles");
        GuestVm::instantiate(engine, module, 1, diagnostics).expect("test guest instantiates")
    }
}

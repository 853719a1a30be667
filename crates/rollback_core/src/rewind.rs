//! Applies undo records in reverse to restore the VM to a past journal
//! length.

use tracing::debug;

use crate::error::CoreError;
use crate::undo::UndoRecord;
use crate::vm::GuestVm;

/// Stateless — operates entirely on the `GuestVm` it's given, per spec
/// §4.4.
pub struct Rewinder;

impl Rewinder {
    /// Pop undo records from the Journal tail until its length equals
    /// `target_journal_length`, applying each record's inverse in pop
    /// order.
    pub fn rewind_to(vm: &mut GuestVm, target_journal_length: usize) -> Result<(), CoreError> {
        while vm.journal().len() > target_journal_length {
            let record = vm
                .journal_mut()
                .pop()
                .expect("journal length checked above the loop condition");

            match record {
                UndoRecord::MemoryWrite { location, old_bytes } => {
                    vm.write_memory(location, &old_bytes)?;
                }
                UndoRecord::GlobalWrite {
                    global_index,
                    old_value,
                } => {
                    vm.write_global(global_index, old_value)?;
                }
                UndoRecord::MemoryGrow { old_page_count } => {
                    debug!(old_page_count, "rewinding memory grow via reinstantiation");
                    vm.reinstantiate_with_pages(old_page_count)?;
                }
            }
        }

        debug_assert_eq!(vm.journal().len(), target_journal_length);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::TracingSink;
    use crate::scalar::Scalar;
    use crate::vm::test_support::build_test_vm;
    use crate::vm::PAGE_SIZE;
    use std::sync::Arc;

    #[test]
    fn rewind_undoes_a_single_global_write() {
        let mut vm = build_test_vm(Arc::new(TracingSink));
        vm.call_export("inc", &[]).unwrap();
        assert_eq!(vm.read_global(0).unwrap(), Scalar::I32(1));

        Rewinder::rewind_to(&mut vm, 0).unwrap();
        assert_eq!(vm.journal().len(), 0);
        assert_eq!(vm.read_global(0).unwrap(), Scalar::I32(0));
    }

    #[test]
    fn rewind_undoes_memory_grow_and_restores_page_count() {
        let mut vm = build_test_vm(Arc::new(TracingSink));
        vm.call_export("alloc", &[]).unwrap();
        assert_eq!(vm.current_page_count().unwrap(), 2);

        Rewinder::rewind_to(&mut vm, 0).unwrap();
        assert_eq!(vm.journal().len(), 0);
        assert_eq!(vm.current_page_count().unwrap(), 1);
    }

    #[test]
    fn partial_rewind_stops_at_target_length() {
        let mut vm = build_test_vm(Arc::new(TracingSink));
        vm.call_export("inc", &[]).unwrap(); // journal len 1
        vm.call_export("inc", &[]).unwrap(); // journal len 2
        assert_eq!(vm.read_global(0).unwrap(), Scalar::I32(2));

        Rewinder::rewind_to(&mut vm, 1).unwrap();
        assert_eq!(vm.journal().len(), 1);
        assert_eq!(vm.read_global(0).unwrap(), Scalar::I32(1));
    }

    #[test]
    fn rewind_replay_round_trip_restores_bitwise_state() {
        let mut vm = build_test_vm(Arc::new(TracingSink));
        vm.call_export("alloc", &[]).unwrap();
        vm.call_export("inc", &[]).unwrap();
        vm.call_export("inc", &[]).unwrap();

        let memory_before = vm.read_memory(0, PAGE_SIZE as usize * 2).unwrap();
        let global_before = vm.read_global(0).unwrap();

        Rewinder::rewind_to(&mut vm, 0).unwrap();

        // Replay in the same order.
        vm.call_export("alloc", &[]).unwrap();
        vm.call_export("inc", &[]).unwrap();
        vm.call_export("inc", &[]).unwrap();

        let memory_after = vm.read_memory(0, PAGE_SIZE as usize * 2).unwrap();
        let global_after = vm.read_global(0).unwrap();

        assert_eq!(memory_before, memory_after);
        assert_eq!(global_before, global_after);
    }
}

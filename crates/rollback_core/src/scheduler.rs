//! The Timeline Scheduler (spec's `CoreState`) and the Recurring-Tick
//! Driver that rides on top of it.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::call_log::{CallLog, CallLogEntry};
use crate::error::CoreError;
use crate::rewind::Rewinder;
use crate::scalar::Scalar;
use crate::timestamp::Timestamp;
use crate::vm::GuestVm;

/// Everything about an engine that isn't the VM image itself: how much
/// memory to start with, and the recurring-tick configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_pages: u32,
    pub interval: i64,
    pub next_fire_time: i64,
    pub tick_function_name: String,
    /// When set, `call_at` rejects an insert whose `(time, player_id)`
    /// pair has a lower-or-equal `offset` than one already in the Call
    /// Log, instead of silently letting the log become unsorted (spec
    /// §4.5's "Scheduler does not enforce this" is the default; this is
    /// the opt-in validation spec §4.5 allows).
    pub strict_peer_order: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            interval: 0,
            next_fire_time: 0,
            tick_function_name: "tick".to_string(),
            strict_peer_order: false,
        }
    }
}

/// Owns the VM, the Call Log, and the clock/tick configuration (spec's
/// `CoreState`). The Journal lives inside the VM's `Store` (see
/// `vm::HostState`) and is reached through `GuestVm` accessors.
pub struct Scheduler {
    vm: GuestVm,
    call_log: CallLog,
    current_time: i64,
    offset: u32,
    interval: i64,
    next_fire_time: i64,
    tick_function_name: String,
    strict_peer_order: bool,
    poisoned: bool,
}

impl Scheduler {
    pub fn new(vm: GuestVm, config: EngineConfig) -> Self {
        Self {
            vm,
            call_log: CallLog::new(),
            current_time: 0,
            offset: 0,
            interval: config.interval,
            next_fire_time: config.next_fire_time,
            tick_function_name: config.tick_function_name,
            strict_peer_order: config.strict_peer_order,
            poisoned: false,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn current_time(&self) -> i64 {
        self.current_time
    }

    pub fn next_fire_time(&self) -> i64 {
        self.next_fire_time
    }

    /// Diagnostic only — see the doc comment on `advance_time` for why
    /// this counter isn't load-bearing for ordering.
    pub fn pending_tick_offset(&self) -> u32 {
        self.offset
    }

    pub fn call_log_timestamps(&self) -> Vec<Timestamp> {
        self.call_log.timestamps()
    }

    pub fn journal_len(&self) -> usize {
        self.vm.journal().len()
    }

    pub fn read_global(&mut self, index: u32) -> Result<Scalar, CoreError> {
        self.vm.read_global(index)
    }

    fn guard_poisoned(&self) -> Result<(), CoreError> {
        if self.poisoned {
            Err(CoreError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&mut self, err: CoreError) -> CoreError {
        error!("rewind failed, poisoning engine: {err}");
        self.poisoned = true;
        err
    }

    fn validate_peer_order(&self, ts: Timestamp) -> Result<(), CoreError> {
        let max_offset = self
            .call_log
            .iter()
            .filter(|e| e.timestamp.time == ts.time && e.timestamp.player_id == ts.player_id)
            .map(|e| e.timestamp.offset)
            .max();

        if let Some(max_offset) = max_offset {
            if ts.offset <= max_offset {
                warn!(
                    player_id = ts.player_id,
                    offset = ts.offset,
                    "rejecting out-of-order per-peer insert"
                );
                return Err(CoreError::OutOfOrderInsert {
                    player_id: ts.player_id,
                    offset: ts.offset,
                });
            }
        }
        Ok(())
    }

    /// Insert a new invocation at its timestamp's position, rewinding and
    /// replaying as needed (spec §4.5).
    pub fn call_at(&mut self, ts: Timestamp, name: &str, args: Vec<Scalar>) -> Result<(), CoreError> {
        self.guard_poisoned()?;

        if self.strict_peer_order {
            self.validate_peer_order(ts)?;
        }

        let i = self.call_log.find_insertion_index(ts);
        let target_len = match self.call_log.get(i) {
            Some(entry) => entry.journal_length_before,
            None => self.vm.journal().len(),
        };

        if i < self.call_log.len() {
            debug!(target_len, index = i, "rewinding for insert");
            Rewinder::rewind_to(&mut self.vm, target_len).map_err(|e| self.poison(e))?;
        }

        let journal_length_before = self.vm.journal().len();
        debug_assert_eq!(journal_length_before, target_len);

        self.vm.call_export(name, &args)?;

        self.call_log.insert_at(
            i,
            CallLogEntry {
                name: name.to_string(),
                args,
                journal_length_before,
                timestamp: ts,
            },
        );

        for j in (i + 1)..self.call_log.len() {
            let journal_length_before = self.vm.journal().len();
            let entry = self
                .call_log
                .get_mut(j)
                .expect("index j is within bounds by loop construction");
            entry.journal_length_before = journal_length_before;
            let name = entry.name.clone();
            let args = entry.args.clone();
            debug!(index = j, %name, "replaying");
            self.vm.call_export(&name, &args)?;
        }

        Ok(())
    }

    /// Run `name(args)` and immediately undo its effects; does not touch
    /// the Call Log. On trap, also rewinds — this crate resolves the
    /// "Transient trap policy" open question by always preserving
    /// transient purity (spec §8).
    pub fn call_and_revert(&mut self, name: &str, args: Vec<Scalar>) -> Result<Vec<Scalar>, CoreError> {
        self.guard_poisoned()?;

        let snapshot = self.vm.journal().len();
        let result = self.vm.call_export(name, &args);

        match Rewinder::rewind_to(&mut self.vm, snapshot) {
            Ok(()) => result,
            Err(rewind_err) => Err(self.poison(rewind_err)),
        }
    }

    /// Synthesize periodic invocations of `tick_function_name` as
    /// logical time advances (spec §4.6).
    pub fn advance_time(&mut self, delta: i64) -> Result<(), CoreError> {
        if delta <= 0 || self.interval == 0 {
            return Ok(());
        }

        self.current_time += delta;
        self.offset = 0;

        while self.current_time - self.next_fire_time > self.interval {
            self.next_fire_time += self.interval;
            let ts = Timestamp::new(self.next_fire_time, 0, 0);
            self.offset += 1;

            let name = self.tick_function_name.clone();
            self.call_at(ts, &name, vec![])?;
        }

        Ok(())
    }

    /// Join point used when the engine synchronizes to a peer's snapshot
    /// (spec §4.7). Always reinstantiates the VM (see
    /// `GuestVm::load_memory_image`), so every guest global snaps back to
    /// its module-declared initial value as part of this call, regardless
    /// of whether `new_memory_image` needs more or fewer pages than the
    /// current memory.
    pub fn reset(
        &mut self,
        new_memory_image: &[u8],
        new_current_time: i64,
        new_next_fire_time: i64,
    ) -> Result<(), CoreError> {
        self.guard_poisoned()?;

        self.vm.load_memory_image(new_memory_image)?;
        self.vm.journal_mut().clear();
        self.call_log.clear();
        self.current_time = new_current_time;
        self.next_fire_time = new_next_fire_time;
        self.offset = 0;
        Ok(())
    }

    /// Drop Call Log entries and Journal records that no future insert
    /// can legally target (spec §4.8). Uses `>=`, not `>`, per spec's
    /// note that the name's apparent exclusivity isn't the intended
    /// cutoff.
    pub fn forget_before(&mut self, t: Timestamp) {
        let k = self
            .call_log
            .iter()
            .position(|e| e.timestamp >= t)
            .unwrap_or(self.call_log.len());

        if k == 0 {
            return;
        }

        let cutoff = self
            .call_log
            .get(k)
            .map(|e| e.journal_length_before)
            .unwrap_or_else(|| self.vm.journal().len());

        self.vm.journal_mut().truncate_head(cutoff);
        self.call_log.remove_prefix(k);
        self.call_log.rebase_journal_lengths(cutoff);
    }
}

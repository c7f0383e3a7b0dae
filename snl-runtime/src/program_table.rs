//! The compiled program table (§6 "Program table (compiled artifact)")
//! and the context object the five per-state callbacks operate through.
//!
//! The original passes the five callbacks as function pointers reading
//! and writing a raw variable buffer by offset (§9 "type-erased variable
//! access... prefer an explicit type tag + length/offset pair"). Here the
//! variable area is a concrete user type `V` and the callbacks are plain
//! `fn` pointers over it — the struct-of-five-function-pointers shape from
//! §9's "model as a struct of five function pointers" is kept exactly,
//! just generic instead of `void*`-typed.

use std::sync::Arc;
use std::time::Duration;

use snl_pv::DbrType;

use crate::channel::{Channel, GetMode, PutMode};
use crate::delay::DelayList;
use crate::error::Result;
use crate::event_flags::EventBits;
use crate::options::{ProgramOptions, StateOptions};
use crate::queue::QueueEntry;
use snl_sync::Mutex;

/// A compiled channel descriptor (§6): everything the compiler knows
/// about one declared variable before the program ever runs.
pub struct ChanDesc {
    pub var_name: &'static str,
    pub default_pv_name: &'static str,
    pub dtype: DbrType,
    pub count: usize,
    pub ev_flag: Option<usize>,
    pub mon_flag: bool,
    pub queue_capacity: Option<usize>,
}

/// One state's five callbacks and its static metadata. `event` returns
/// `true` the first time its guarded condition is observed true, having
/// first called `StateContext::fire` to record which transition number
/// fired and the candidate next state (the "fire one" of §4.5 step 6);
/// `action` runs on the fired transition and may further override the
/// next state via `StateContext::transition` (§6's state-change
/// primitive).
pub struct StateDesc<V> {
    pub name: &'static str,
    pub options: StateOptions,
    /// Event-bitset indices (event flags and/or channel bits) that can
    /// wake a waiter evaluating this state — the compiled "event mask".
    pub event_mask: &'static [usize],
    pub num_delays: usize,
    pub entry: Option<fn(&mut StateContext<V>)>,
    pub exit: Option<fn(&mut StateContext<V>)>,
    pub delay: Option<fn(&mut StateContext<V>)>,
    pub event: fn(&mut StateContext<V>) -> bool,
    pub action: fn(&mut StateContext<V>),
}

pub struct SsDesc<V> {
    pub name: &'static str,
    pub states: Vec<StateDesc<V>>,
}

/// The static, immutable-at-runtime compiled artifact (§3 "Program
/// table"). One instance is shared (via `Arc`) by every thread of a
/// running program.
pub struct ProgramTable<V> {
    pub magic: u32,
    pub name: &'static str,
    pub chans: Vec<ChanDesc>,
    pub state_sets: Vec<SsDesc<V>>,
    pub num_ev_flags: usize,
    pub options: ProgramOptions,
}

/// Magic tag every table must carry; checked at `seq()` startup (§7
/// Configuration error if mismatched).
pub const PROGRAM_TABLE_MAGIC: u32 = 0x534e_4c31; // "SNL1"

impl<V> ProgramTable<V> {
    pub fn validate(&self) -> Result<()> {
        if self.magic != PROGRAM_TABLE_MAGIC {
            return Err(crate::error::Error::Configuration(format!(
                "bad program table magic 0x{:08x} for {}",
                self.magic, self.name
            )));
        }
        if self.state_sets.is_empty() {
            return Err(crate::error::Error::Configuration(format!(
                "program {} declares no state sets",
                self.name
            )));
        }
        Ok(())
    }
}

/// The program-wide surface a `StateContext` delegates to: channels,
/// the event-flag bitset, and macro lookup. Implemented by `Program`
/// (kept as a trait so `program_table`/`channel` do not need to know
/// about the controller's full shape).
pub trait RuntimeHandle: Send + Sync {
    fn channel(&self, id: usize) -> &Arc<Channel>;
    fn num_channels(&self) -> usize;
    fn event_bits(&self) -> &Mutex<EventBits>;
    fn set_event_flag(&self, k: usize);
    fn program_async(&self) -> bool;
    fn default_timeout(&self) -> Duration;
    fn safe_mode(&self) -> bool;
    fn flush(&self) -> snl_pv::PvResult<()>;
    /// `NEWEF` (§6): event flags are not auto-cleared by the evaluation
    /// that observed them set.
    fn newef(&self) -> bool;
}

/// The `ss`/`vars` argument bundle passed to every compiled callback
/// (§4.5's `st.entryFunc(ss, vars, ...)` family).
pub struct StateContext<'a, V> {
    pub vars: &'a mut V,
    pub ss_index: usize,
    pub delays: &'a mut DelayList,
    pub runtime: &'a dyn RuntimeHandle,
    /// Per-state-set local copies kept current by `ss_read_all_buffer`
    /// (§4.4) when the program is compiled in safe mode; `None` for a
    /// channel not yet written since the last `clear`.
    pub local: &'a [Option<(snl_pv::PvData, snl_pv::PvMeta)>],
    pub trans_num: &'a mut usize,
    pub next_state: &'a mut usize,
}

impl<'a, V> StateContext<'a, V> {
    /// Records which transition fired and its candidate next state
    /// (`st.eventFunc(ss, vars, &transNum, &nextState)`, §4.5 step 6).
    pub fn fire(&mut self, trans_num: usize, next_state: usize) {
        *self.trans_num = trans_num;
        *self.next_state = next_state;
    }

    /// The state-change primitive (§6): lets `action` override the
    /// candidate next state recorded by `event`.
    pub fn transition(&mut self, next_state: usize) {
        *self.next_state = next_state;
    }
}

impl<'a, V> StateContext<'a, V> {
    pub fn ef_test(&self, k: usize) -> bool {
        self.runtime.event_bits().lock().test(k)
    }

    /// Tests flag `k`, clearing it unless the program was started with
    /// `NEWEF` (§6) — in which case this degrades to a peek so the flag
    /// stays visible to the next evaluation (and to any other state set
    /// sharing it).
    pub fn ef_test_and_clear(&self, k: usize) -> bool {
        if self.runtime.newef() {
            self.runtime.event_bits().lock().test(k)
        } else {
            self.runtime.event_bits().lock().test_and_clear(k)
        }
    }

    pub fn ef_set(&self, k: usize) {
        self.runtime.set_event_flag(k);
    }

    pub fn ef_clear(&self, k: usize) {
        self.runtime.event_bits().lock().clear(k);
    }

    /// A compiled `delay(d)` guard expression at dense id `i`.
    pub fn delay(&mut self, i: usize) -> bool {
        self.delays.check(i)
    }

    pub fn delay_init(&mut self, i: usize, seconds: f64) {
        self.delays.arm(i, seconds);
    }

    pub fn pv_get(&self, chan: usize, mode: GetMode) -> Result<()> {
        let timeout = self.runtime.default_timeout();
        let async_default = self.runtime.program_async();
        self.runtime.channel(chan).pv_get(self.ss_index, mode, async_default, timeout)
    }

    pub fn pv_put(&self, chan: usize, mode: PutMode, value: snl_pv::PvData) -> Result<()> {
        let timeout = self.runtime.default_timeout();
        self.runtime.channel(chan).pv_put(self.ss_index, mode, value, timeout)
    }

    pub fn pv_get_complete(&self, chan: usize) -> bool {
        self.runtime.channel(chan).pv_get_complete(self.ss_index)
    }

    pub fn pv_put_complete(&self, chan: usize) -> bool {
        self.runtime.channel(chan).pv_put_complete(self.ss_index)
    }

    pub fn pv_get_cancel(&self, chan: usize) {
        self.runtime.channel(chan).pv_get_cancel(self.ss_index)
    }

    pub fn pv_put_cancel(&self, chan: usize) {
        self.runtime.channel(chan).pv_put_cancel(self.ss_index)
    }

    pub fn pv_get_q(&self, chan: usize) -> (Option<QueueEntry>, bool) {
        self.runtime.channel(chan).pv_get_q()
    }

    pub fn pv_flush_q(&self, chan: usize) {
        self.runtime.channel(chan).pv_flush_q()
    }

    pub fn pv_assign(&self, chan: usize, name: &str) -> Result<()> {
        self.runtime.channel(chan).assign(name)
    }

    pub fn pv_monitor(&self, chan: usize, on: bool) -> Result<()> {
        self.runtime.channel(chan).monitor(on)
    }

    pub fn pv_sync(&self, chan: usize, ef: Option<usize>) {
        self.runtime.channel(chan).sync(ef)
    }

    /// The value/meta user code should observe for `chan` during this
    /// evaluation: the state set's local snapshot in safe mode (§4.4,
    /// §8 property 3), or the live shared slot otherwise.
    pub fn pv_value(&self, chan: usize) -> (snl_pv::PvData, snl_pv::PvMeta) {
        if self.runtime.safe_mode() {
            if let Some(pair) = &self.local[chan] {
                return pair.clone();
            }
        }
        self.runtime.channel(chan).snapshot()
    }
}

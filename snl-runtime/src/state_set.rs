//! The per-state-set scheduler (§4.5, component C6): the thread body run
//! once per declared state set. Grounded on
//! `examples/original_source/src/seq/seq_task.c`'s `ss_entry()` main loop
//! and, for the "wait with a computed timeout, re-check on wake" shape,
//! on `examples/msft-mirror-aosp-platform.external.crosvm/devices/src/virtio/block/block.rs`'s
//! `Worker::run` (`WaitContext::wait` with a bounded timeout instead of
//! blocking forever, so a kill/shutdown signal is never missed).

use std::sync::Arc;
use std::time::Duration;

use snl_base::{Event, Signal};
use snl_pv::{PvData, PvMeta};
use snl_sync::Mutex;

use crate::delay::DelayList;
use crate::options::StateOptions;
use crate::program_table::{ProgramTable, RuntimeHandle, StateContext};

/// Everything one state-set thread needs beyond the shared program
/// table: its own sync semaphore, the program-wide `die`/`dead` signals,
/// an optional first-connect barrier, and the (possibly shared, under
/// the reentrant option) user variable area.
pub struct StateSetHandle<V> {
    pub ss_index: usize,
    pub table: Arc<ProgramTable<V>>,
    pub runtime: Arc<dyn RuntimeHandle>,
    pub sync: Arc<Signal>,
    pub die: Arc<Event>,
    pub dead: Arc<Event>,
    pub first_connect_barrier: Option<Arc<Event>>,
    pub vars: Arc<Mutex<V>>,
}

/// Upper bound on how long the thread waits between checks of `die` when
/// no delay is armed and no stimulus has arrived — the loopback/test
/// equivalent of a `WaitContext` timeout slice; a real deployment's
/// semaphore wake on `seqStop` makes this a backstop, not the common
/// path.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub fn run<V: Send>(h: StateSetHandle<V>) {
    if let Some(barrier) = &h.first_connect_barrier {
        barrier.wait();
    }

    let num_chans = h.runtime.num_channels();
    let mut local: Vec<Option<(PvData, PvMeta)>> = vec![None; num_chans];
    let states = &h.table.state_sets[h.ss_index].states;

    let mut current_state = 0usize;
    let mut prev_state: Option<usize> = None;
    let mut delays = DelayList::new(states[current_state].num_delays);

    'run: loop {
        let st = &states[current_state];
        let self_transition = prev_state == Some(current_state);
        let reset_timer = !(self_transition && st.options.contains(StateOptions::NO_RESET_TIMERS));
        delays.clear(st.num_delays, reset_timer);

        let run_entry = !self_transition || st.options.contains(StateOptions::DO_ENTRY_FROM_SELF);
        if run_entry {
            if let Some(entry) = st.entry {
                let mut trans_num = 0;
                let mut next_state = current_state;
                let mut vg = h.vars.lock();
                let mut ctx = StateContext {
                    vars: &mut vg,
                    ss_index: h.ss_index,
                    delays: &mut delays,
                    runtime: h.runtime.as_ref(),
                    local: &local,
                    trans_num: &mut trans_num,
                    next_state: &mut next_state,
                };
                entry(&mut ctx);
            }
        }

        if let Err(e) = flush_adapter(&h) {
            log::warn!("{}: flush after entry failed: {}", h.table.name, e);
        }

        if let Some(delay_fn) = st.delay {
            let mut trans_num = 0;
            let mut next_state = current_state;
            let mut vg = h.vars.lock();
            let mut ctx = StateContext {
                vars: &mut vg,
                ss_index: h.ss_index,
                delays: &mut delays,
                runtime: h.runtime.as_ref(),
                local: &local,
                trans_num: &mut trans_num,
                next_state: &mut next_state,
            };
            delay_fn(&mut ctx);
        }

        // §4.5 step 5: guarantee at least one evaluation even with no
        // stimulus pending.
        h.sync.post();

        loop {
            let wait_for = delays.next_timeout().unwrap_or(IDLE_POLL);
            h.sync.wait_timeout(wait_for);
            if h.die.is_set() {
                break 'run;
            }
            if h.runtime.safe_mode() {
                for cid in 0..num_chans {
                    if let Some(pair) = h.runtime.channel(cid).read_buffer_if_dirty(h.ss_index) {
                        local[cid] = Some(pair);
                    }
                }
            }
            let mut trans_num = 0;
            let mut candidate = current_state;
            let fired = {
                let mut vg = h.vars.lock();
                let mut ctx = StateContext {
                    vars: &mut vg,
                    ss_index: h.ss_index,
                    delays: &mut delays,
                    runtime: h.runtime.as_ref(),
                    local: &local,
                    trans_num: &mut trans_num,
                    next_state: &mut candidate,
                };
                (st.event)(&mut ctx)
            };
            if fired {
                let mut final_state = candidate;
                {
                    let mut vg = h.vars.lock();
                    let mut tn = trans_num;
                    let mut ctx = StateContext {
                        vars: &mut vg,
                        ss_index: h.ss_index,
                        delays: &mut delays,
                        runtime: h.runtime.as_ref(),
                        local: &local,
                        trans_num: &mut tn,
                        next_state: &mut final_state,
                    };
                    (st.action)(&mut ctx);
                }
                let exit_needed = final_state != current_state || st.options.contains(StateOptions::DO_EXIT_TO_SELF);
                if exit_needed {
                    if let Some(exit_fn) = st.exit {
                        let mut trans_num2 = trans_num;
                        let mut next2 = final_state;
                        let mut vg = h.vars.lock();
                        let mut ctx = StateContext {
                            vars: &mut vg,
                            ss_index: h.ss_index,
                            delays: &mut delays,
                            runtime: h.runtime.as_ref(),
                            local: &local,
                            trans_num: &mut trans_num2,
                            next_state: &mut next2,
                        };
                        exit_fn(&mut ctx);
                    }
                }
                prev_state = Some(current_state);
                current_state = final_state;
                break;
            }
        }
    }

    h.dead.set();
}

fn flush_adapter<V>(h: &StateSetHandle<V>) -> snl_pv::PvResult<()> {
    h.runtime.flush()
}

//! A small built-in program: a traffic light cycling red/green/yellow on
//! a timer, with a pedestrian "walk" PV that starts a crossing phase if
//! requested while the light is red.
//!
//! Ported from `examples/original_source/examples/traffic/trafficMain.c`
//! (a `seq` program with a default macro string and a standalone main);
//! here the PV layer is the in-process loopback adapter rather than a
//! real database, so the demo runs standalone.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use snl_pv::{DbrType, PvData};
use snl_runtime::{ChanDesc, ProgramOptions, ProgramTable, SsDesc, StateContext, StateDesc, StateOptions, PROGRAM_TABLE_MAGIC};

pub const CHAN_LIGHT: usize = 0;
pub const CHAN_WALK: usize = 1;

const LIGHT_RED: i32 = 0;
const LIGHT_GREEN: i32 = 1;
const LIGHT_YELLOW: i32 = 2;

/// Per-instance variable area: just a counter of completed red->green->
/// yellow cycles, readable by the shell without going through a PV get.
#[derive(Default)]
pub struct TrafficVars {
    pub cycles: AtomicI64,
}

/// `Program::start` takes the variable area by value and owns it from
/// then on; wrapping it in an `Arc` lets the shell keep its own handle
/// for `cycles` display without reaching into the running program.
pub type Vars = Arc<TrafficVars>;

fn red_delay(ctx: &mut StateContext<Vars>) {
    ctx.delay_init(0, 4.0);
}
fn red_event(ctx: &mut StateContext<Vars>) -> bool {
    if ctx.delay(0) {
        ctx.fire(0, 1);
        return true;
    }
    // A pedestrian pressing the walk button cuts the red phase short
    // instead of waiting out the full 4 seconds.
    let (entry, _) = ctx.pv_get_q(CHAN_WALK);
    if let Some((PvData::Long(v), _)) = entry {
        if v.first().copied().unwrap_or(0) != 0 {
            ctx.fire(1, 1);
            return true;
        }
    }
    false
}
fn red_entry(ctx: &mut StateContext<Vars>) {
    ctx.vars.cycles.fetch_add(1, Ordering::SeqCst);
    let _ = ctx.pv_put(CHAN_LIGHT, snl_runtime::PutMode::Default, PvData::Long(vec![LIGHT_RED]));
}

fn green_delay(ctx: &mut StateContext<Vars>) {
    ctx.delay_init(0, 6.0);
}
fn green_event(ctx: &mut StateContext<Vars>) -> bool {
    if ctx.delay(0) {
        ctx.fire(0, 1);
        true
    } else {
        false
    }
}

fn yellow_delay(ctx: &mut StateContext<Vars>) {
    ctx.delay_init(0, 2.0);
}
fn yellow_event(ctx: &mut StateContext<Vars>) -> bool {
    if ctx.delay(0) {
        ctx.fire(0, 1);
        true
    } else {
        false
    }
}

fn noop_action(_ctx: &mut StateContext<Vars>) {}

pub fn program_table() -> Arc<ProgramTable<Vars>> {
    Arc::new(ProgramTable {
        magic: PROGRAM_TABLE_MAGIC,
        name: "traffic",
        chans: vec![
            ChanDesc {
                var_name: "light",
                default_pv_name: "traffic:light",
                dtype: DbrType::Long,
                count: 1,
                ev_flag: None,
                mon_flag: false,
                queue_capacity: None,
            },
            ChanDesc {
                var_name: "walk",
                default_pv_name: "traffic:walk",
                dtype: DbrType::Long,
                count: 1,
                ev_flag: Some(1),
                mon_flag: true,
                queue_capacity: Some(4),
            },
        ],
        state_sets: vec![SsDesc {
            name: "light",
            states: vec![
                StateDesc {
                    name: "red",
                    options: StateOptions::empty(),
                    event_mask: &[],
                    num_delays: 1,
                    entry: Some(red_entry),
                    exit: None,
                    delay: Some(red_delay),
                    event: red_event,
                    action: noop_action,
                },
                StateDesc {
                    name: "green",
                    options: StateOptions::empty(),
                    event_mask: &[],
                    num_delays: 1,
                    entry: Some(green_entry),
                    exit: None,
                    delay: Some(green_delay),
                    event: green_event,
                    action: noop_action,
                },
                StateDesc {
                    name: "yellow",
                    options: StateOptions::empty(),
                    event_mask: &[],
                    num_delays: 1,
                    entry: Some(yellow_entry),
                    exit: None,
                    delay: Some(yellow_delay),
                    event: yellow_event,
                    action: noop_action,
                },
            ],
        }],
        num_ev_flags: 1,
        options: ProgramOptions::empty(),
    })
}

fn green_entry(ctx: &mut StateContext<Vars>) {
    let _ = ctx.pv_put(CHAN_LIGHT, snl_runtime::PutMode::Default, PvData::Long(vec![LIGHT_GREEN]));
}

fn yellow_entry(ctx: &mut StateContext<Vars>) {
    let _ = ctx.pv_put(CHAN_LIGHT, snl_runtime::PutMode::Default, PvData::Long(vec![LIGHT_YELLOW]));
}

//! Command-line shell for running State Notation Runtime programs.
//!
//! The top-level argument parsing follows crosvm's own `src/main.rs`
//! (a single binary, `argh`-derived options, dispatch into a small
//! number of entry points). The resident show/stop commands are
//! grounded on `examples/original_source/src/seq/seqCommands.c`'s
//! `seqShow`/`seqChanShow`/`seqQueueShow`/`seqStop` iocsh registrations
//! — reimplemented here as lines read from stdin, since this runtime has
//! no iocsh to register against.

mod demo;

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;

use snl_pv::loopback::LoopbackAdapter;
use snl_runtime::{ChannelReport, Program, ProgramHandle, Registry};

/// Run the built-in traffic-light program and drive it from a small
/// resident shell (`show`, `queue`, `cycles`, `stop`).
#[derive(FromArgs)]
struct Args {
    /// caller-supplied macro string, e.g. `P=XF:OP,N=3` (§4.7)
    #[argh(option, default = "String::new()")]
    macros: String,

    /// enable verbose runtime logging
    #[argh(switch)]
    debug: bool,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    snl_base::logging::init();
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    }

    let registry = Registry::new();
    let adapter = Arc::new(LoopbackAdapter::new(HashMap::new()));
    let vars: demo::Vars = Arc::default();
    let program = Program::start(demo::program_table(), "", &args.macros, adapter, Arc::clone(&vars), &registry)
        .context("failed to start the traffic program")?;

    println!(
        "program '{}' instance {} running — commands: seqShow [thread], seqChanShow thread [pattern], \
         seqQueueShow thread, seqStop thread, seqcar level, cycles, quit",
        program.name,
        program.instance_index()
    );
    run_shell(&registry, &program, &vars)
}

/// Resolves a `<thread>` shell argument the way `seqCommands.c`'s
/// `findThread` does: first as a numeric thread id, falling back to a
/// program name (taking its first running instance — this shell only
/// ever starts one).
fn resolve_thread(registry: &Registry, token: &str) -> Option<Arc<dyn ProgramHandle>> {
    if let Ok(tid) = token.parse::<u64>() {
        if let Some(h) = registry.find_by_thread(tid) {
            return Some(h);
        }
    }
    registry.find_by_name(token).into_iter().next()
}

fn run_shell(registry: &Registry, program: &Arc<Program<demo::Vars>>, vars: &demo::Vars) -> Result<()> {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.context("reading command")?;
        let mut words = line.trim().split_whitespace();
        match words.next() {
            Some("seqShow") => match words.next() {
                Some(thread) => match resolve_thread(registry, thread) {
                    Some(h) => seq_show_one(h.as_ref()),
                    None => println!("no such program/thread: {thread}"),
                },
                None => seq_show_all(registry),
            },
            Some("seqChanShow") => match words.next() {
                Some(thread) => match resolve_thread(registry, thread) {
                    Some(h) => seq_chan_show(h.as_ref(), words.next()),
                    None => println!("no such program/thread: {thread}"),
                },
                None => println!("usage: seqChanShow thread [pattern]"),
            },
            Some("seqQueueShow") => match words.next() {
                Some(thread) => match resolve_thread(registry, thread) {
                    Some(h) => seq_queue_show(h.as_ref()),
                    None => println!("no such program/thread: {thread}"),
                },
                None => println!("usage: seqQueueShow thread"),
            },
            Some("seqStop") => match words.next() {
                Some(thread) => match resolve_thread(registry, thread) {
                    Some(h) => {
                        h.stop();
                        println!("stopped {}", h.name());
                    }
                    None => println!("no such program/thread: {thread}"),
                },
                None => println!("usage: seqStop thread"),
            },
            Some("seqcar") => {
                let level: u32 = words.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                seqcar(registry, level);
            }
            Some("cycles") => {
                println!("{} red->green->yellow cycles completed", vars.cycles.load(std::sync::atomic::Ordering::SeqCst));
            }
            Some("stop") | Some("quit") | Some("exit") => {
                program.shutdown();
                println!("stopped");
                break;
            }
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn seq_show_all(registry: &Registry) {
    let handles = registry.list();
    if handles.is_empty() {
        println!("(no programs running)");
        return;
    }
    for h in handles {
        println!("{:<16} instance={:<3} threads={}", h.name(), h.instance_index(), h.thread_ids().len());
    }
}

fn seq_show_one(h: &dyn ProgramHandle) {
    println!("{} instance {} threads {:?}", h.name(), h.instance_index(), h.thread_ids());
    seq_chan_show(h, None);
    seq_queue_show(h);
}

/// `seqChanShow`: a leading `+`/`-` restricts to connected/disconnected
/// channels, anything else is a plain substring match against the PV
/// name (§6).
fn seq_chan_show(h: &dyn ProgramHandle, pattern: Option<&str>) {
    for chan in h.channel_report() {
        if !matches_pattern(&chan, pattern) {
            continue;
        }
        println!("{:<16} connected={:<5} monitored={}", chan.name, chan.connected, chan.monitored);
    }
}

fn matches_pattern(chan: &ChannelReport, pattern: Option<&str>) -> bool {
    match pattern {
        None => true,
        Some("+") => chan.connected,
        Some("-") => !chan.connected,
        Some(substr) => chan.name.contains(substr),
    }
}

fn seq_queue_show(h: &dyn ProgramHandle) {
    let reports = h.queue_report();
    if reports.is_empty() {
        println!("(no queued channels)");
        return;
    }
    for q in reports {
        println!("{:<16} used={}/{}", q.chan_name, q.used, q.capacity);
    }
}

/// `seqcar level`: per-program CA connectivity report. Level 0 prints
/// just the assigned/connected/monitored totals per program; level >= 1
/// also lists each channel, as `seq_if.c`'s `seqcar` does.
fn seqcar(registry: &Registry, level: u32) {
    for h in registry.list() {
        let chans = h.channel_report();
        let connected = chans.iter().filter(|c| c.connected).count();
        let monitored = chans.iter().filter(|c| c.monitored).count();
        println!(
            "{:<16} assigned={} connected={} monitored={}",
            h.name(),
            chans.len(),
            connected,
            monitored
        );
        if level >= 1 {
            seq_chan_show(h.as_ref(), None);
        }
    }
}

//! The program controller (§4.7, component C7): startup, first-connect
//! rendezvous, shutdown, and the `RuntimeHandle`/`EventHub` surface the
//! compiled callbacks and channels run against.
//!
//! Grounded on `examples/original_source/src/seq/seq_task.c`'s
//! `sequencer()`/`seq()` startup path and `seqStop`/`seq_free` teardown,
//! and on the worker-thread-per-device spawn pattern in
//! `examples/msft-mirror-aosp-platform.external.crosvm/devices/src/lib.rs`
//! (`thread::Builder::new().name(...).spawn(...)`, one thread per unit of
//! concurrency, joined on shutdown by the first one).

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};

use snl_base::{Event, Signal};
use snl_pv::PvAdapter;
use snl_sync::Mutex;

use crate::channel::{Channel, EventHub};
use crate::error::{Error, Result};
use crate::event_flags::EventBits;
use crate::macros::MacroTable;
use crate::options::ProgramOptions;
use crate::program_table::{ProgramTable, RuntimeHandle};
use crate::registry::{ChannelReport, ProgramHandle, QueueReport, Registry};
use crate::state_set::{self, StateSetHandle};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

struct Counters {
    assign_count: AtomicUsize,
    first_connect_count: AtomicUsize,
    first_monitor_count: AtomicUsize,
    num_monitored_chans: usize,
}

/// A running program instance (SPROG). One per `Program::start` call;
/// `V` is the compiled program's user variable area.
pub struct Program<V> {
    pub name: String,
    instance_index: AtomicU32,
    table: Arc<ProgramTable<V>>,
    channels: Vec<Arc<Channel>>,
    event_bits: Mutex<EventBits>,
    ss_syncs: Vec<Arc<Signal>>,
    dead_signals: Vec<Arc<Event>>,
    thread_ids: Mutex<Vec<u64>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    die: Arc<Event>,
    first_connect_barrier: Arc<Event>,
    adapter: Arc<dyn PvAdapter>,
    vars: Arc<Mutex<V>>,
    options: ProgramOptions,
    counters: Counters,
    timeout: Duration,
    registry: Registry,
}

fn read_options_from_macros(options: ProgramOptions, macros: &MacroTable) -> (ProgramOptions, Option<String>) {
    let mut opts = options;
    if let Some(v) = macros.get("debug") {
        if v != "0" && !v.is_empty() {
            opts |= ProgramOptions::DEBUG;
        }
    }
    let name_override = macros.get("name").map(|s| s.to_string());
    if let Some(stack) = macros.get("stack") {
        debug!("stack macro {} ignored: thread stacks are sized by the platform", stack);
    }
    if let Some(priority) = macros.get("priority") {
        debug!("priority macro {} ignored: no real-time scheduling in this runtime", priority);
    }
    if let Some(pvsys) = macros.get("pvsys") {
        debug!("pvsys macro {} ignored: adapter is selected by the caller of start()", pvsys);
    }
    (opts, name_override)
}

impl<V: Send + 'static> Program<V> {
    /// `seq(prog, macros, stackSize)` (§4.7). `program_macros` is the
    /// program-embedded default macro string (possibly empty);
    /// `caller_macros` is parsed second so it wins on conflict (§4.7,
    /// grounded in `macros.rs`'s doc comment).
    pub fn start(
        table: Arc<ProgramTable<V>>,
        program_macros: &str,
        caller_macros: &str,
        adapter: Arc<dyn PvAdapter>,
        vars: V,
        registry: &Registry,
    ) -> Result<Arc<Program<V>>> {
        table.validate()?;

        let mut macros = MacroTable::new();
        macros.parse(program_macros);
        macros.parse(caller_macros);
        let (options, name_override) = read_options_from_macros(table.options, &macros);
        let name = name_override.unwrap_or_else(|| table.name.to_string());

        let bits_width = table.num_ev_flags.max(table.num_ev_flags + table.chans.len()) + 1;
        let num_ss = table.state_sets.len();
        let hub_placeholder: Arc<Mutex<Option<Arc<Program<V>>>>> = Arc::new(Mutex::new(None));

        struct Forwarder<V: Send + 'static> {
            inner: Arc<Mutex<Option<Arc<Program<V>>>>>,
        }
        impl<V: Send + 'static> EventHub for Forwarder<V> {
            fn set_and_wake(&self, bit: usize) {
                if let Some(p) = self.inner.lock().as_ref() {
                    p.set_and_wake(bit);
                }
            }
            fn wake_all(&self) {
                if let Some(p) = self.inner.lock().as_ref() {
                    p.wake_all();
                }
            }
            fn test_and_clear(&self, bit: usize) -> bool {
                self.inner.lock().as_ref().map(|p| p.test_and_clear(bit)).unwrap_or(false)
            }
            fn note_first_connect(&self) {
                if let Some(p) = self.inner.lock().as_ref() {
                    p.note_first_connect();
                }
            }
            fn note_first_monitor(&self) {
                if let Some(p) = self.inner.lock().as_ref() {
                    p.note_first_monitor();
                }
            }
        }
        let hub: Arc<dyn EventHub> = Arc::new(Forwarder { inner: hub_placeholder.clone() });

        let mut num_monitored = 0usize;
        let mut channels = Vec::with_capacity(table.chans.len());
        for (id, desc) in table.chans.iter().enumerate() {
            if desc.mon_flag {
                num_monitored += 1;
            }
            let channel_bit = table.num_ev_flags + id + 1;
            channels.push(Channel::new(
                id,
                desc.dtype,
                desc.count,
                channel_bit,
                num_ss,
                desc.queue_capacity,
                Arc::clone(&adapter),
                Arc::clone(&hub),
            ));
        }

        let program = Arc::new(Program {
            name: name.clone(),
            instance_index: AtomicU32::new(0),
            table: Arc::clone(&table),
            channels,
            event_bits: Mutex::new(EventBits::new(bits_width)),
            ss_syncs: (0..num_ss).map(|_| Arc::new(Signal::new())).collect(),
            dead_signals: (0..num_ss).map(|_| Arc::new(Event::new())).collect(),
            thread_ids: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            die: Arc::new(Event::new()),
            first_connect_barrier: Arc::new(Event::new()),
            adapter: Arc::clone(&adapter),
            vars: Arc::new(Mutex::new(vars)),
            options,
            counters: Counters {
                assign_count: AtomicUsize::new(0),
                first_connect_count: AtomicUsize::new(0),
                first_monitor_count: AtomicUsize::new(0),
                num_monitored_chans: num_monitored,
            },
            timeout: DEFAULT_TIMEOUT,
            registry: registry.clone(),
        });
        *hub_placeholder.lock() = Some(Arc::clone(&program));

        for (id, desc) in table.chans.iter().enumerate() {
            if !desc.default_pv_name.is_empty() {
                let resolved = macros.eval(desc.default_pv_name);
                program.channels[id].assign(&resolved)?;
                program.counters.assign_count.fetch_add(1, Ordering::SeqCst);
                if let Some(ef) = desc.ev_flag {
                    program.channels[id].sync(Some(ef));
                }
                if desc.mon_flag {
                    program.channels[id].monitor(true)?;
                }
            }
        }

        let instance_index = registry.register(Arc::clone(&program) as Arc<dyn ProgramHandle>);
        program.instance_index.store(instance_index, Ordering::SeqCst);

        // A program with nothing to connect or monitor satisfies the
        // barrier trivially; otherwise it opens later, as channels
        // report their first connect/monitor (§8 property 5).
        program.maybe_open_barrier();

        program.adapter.attach()?;

        let wait_for_conn = options.contains(ProgramOptions::CONN);
        let mut handles = Vec::with_capacity(num_ss);
        let mut tids = Vec::with_capacity(num_ss);
        for ss in 0..num_ss {
            let handle = StateSetHandle {
                ss_index: ss,
                table: Arc::clone(&table),
                runtime: Arc::clone(&program) as Arc<dyn RuntimeHandle>,
                sync: Arc::clone(&program.ss_syncs[ss]),
                die: Arc::clone(&program.die),
                dead: Arc::clone(&program.dead_signals[ss]),
                first_connect_barrier: wait_for_conn.then(|| Arc::clone(&program.first_connect_barrier)),
                vars: Arc::clone(&program.vars),
            };
            let thread_name = format!("{}-ss{}", name, ss);
            let join = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || state_set::run(handle))
                .map_err(|e| Error::Resource(format!("failed to spawn state set {}: {}", ss, e)))?;
            tids.push(thread_id_as_u64(&join));
            handles.push(join);
        }
        *program.threads.lock() = handles;
        *program.thread_ids.lock() = tids;

        info!("program {} (instance {}) started, {} state sets, {} channels", name, instance_index, num_ss, table.chans.len());
        Ok(program)
    }

    fn note_first_connect(&self) {
        self.counters.first_connect_count.fetch_add(1, Ordering::SeqCst);
        self.maybe_open_barrier();
    }

    fn note_first_monitor(&self) {
        self.counters.first_monitor_count.fetch_add(1, Ordering::SeqCst);
        self.maybe_open_barrier();
    }

    /// §8 property 5 / §4.3: the barrier opens once every assigned
    /// channel has connected at least once and every monitored channel
    /// has delivered at least one sample.
    fn maybe_open_barrier(&self) {
        let connect_ok =
            self.counters.first_connect_count.load(Ordering::SeqCst) >= self.counters.assign_count.load(Ordering::SeqCst);
        let monitor_ok = self.counters.first_monitor_count.load(Ordering::SeqCst) >= self.counters.num_monitored_chans;
        if connect_ok && monitor_ok {
            self.first_connect_barrier.set();
        }
    }

    fn set_and_wake(&self, bit: usize) {
        self.event_bits.lock().set(bit);
        for sync in &self.ss_syncs {
            sync.post();
        }
    }

    fn wake_all(&self) {
        for sync in &self.ss_syncs {
            sync.post();
        }
    }

    fn test_and_clear(&self, bit: usize) -> bool {
        self.event_bits.lock().test_and_clear(bit)
    }

    /// `assign`/`monitor`/`sync`/`stop` are reentrant through the program
    /// lock (§4.7); since each channel guards itself and the registry is
    /// separately locked, no additional program-wide lock is needed here.
    pub fn assign(&self, chan: usize, name: &str) -> Result<()> {
        self.channels[chan].assign(name)
    }

    pub fn channel(&self, id: usize) -> &Arc<Channel> {
        &self.channels[id]
    }

    /// `seqStop` (§4.7, §5): sets `die`, wakes every state set, waits for
    /// each to exit, disconnects every channel, and deregisters from the
    /// registry — after this returns, `seqShow`/`seqcar`/`find_by_name`
    /// no longer see this instance (§8 property 8).
    pub fn shutdown(self: &Arc<Self>) {
        self.die.set();
        self.wake_all();
        let handles = std::mem::take(&mut *self.threads.lock());
        for h in handles {
            if let Err(e) = h.join() {
                warn!("state set thread for {} panicked: {:?}", self.name, e);
            }
        }
        for chan in &self.channels {
            let _ = chan.assign("");
        }
        self.registry.deregister(&self.name, self.instance_index.load(Ordering::SeqCst));
        info!("program {} instance {} shut down", self.name, self.instance_index.load(Ordering::SeqCst));
    }
}

fn thread_id_as_u64(h: &JoinHandle<()>) -> u64 {
    // `ThreadId` has no stable numeric accessor; derive a stable-enough
    // key from its `Debug` form for the registry's reverse lookup, which
    // only needs uniqueness within this process.
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{:?}", h.thread().id()).hash(&mut hasher);
    hasher.finish()
}

impl<V: Send + 'static> RuntimeHandle for Program<V> {
    fn channel(&self, id: usize) -> &Arc<Channel> {
        &self.channels[id]
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn event_bits(&self) -> &Mutex<EventBits> {
        &self.event_bits
    }

    fn set_event_flag(&self, k: usize) {
        self.set_and_wake(k);
    }

    fn program_async(&self) -> bool {
        self.options.contains(ProgramOptions::ASYNC)
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn safe_mode(&self) -> bool {
        self.options.contains(ProgramOptions::SAFE)
    }

    fn flush(&self) -> snl_pv::PvResult<()> {
        self.adapter.flush()
    }

    fn newef(&self) -> bool {
        self.options.contains(ProgramOptions::NEWEF)
    }
}

impl<V: Send + 'static> ProgramHandle for Program<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_index(&self) -> u32 {
        self.instance_index.load(Ordering::SeqCst)
    }

    fn thread_ids(&self) -> Vec<u64> {
        self.thread_ids.lock().clone()
    }

    fn stop(&self) {
        self.die.set();
        self.wake_all();
        let handles = std::mem::take(&mut *self.threads.lock());
        for h in handles {
            if let Err(e) = h.join() {
                warn!("state set thread for {} panicked: {:?}", self.name, e);
            }
        }
        for chan in &self.channels {
            let _ = chan.assign("");
        }
        self.registry.deregister(&self.name, self.instance_index.load(Ordering::SeqCst));
    }

    fn channel_report(&self) -> Vec<ChannelReport> {
        self.channels
            .iter()
            .map(|c| ChannelReport {
                name: c.name(),
                connected: c.is_connected(),
                monitored: c.is_monitored(),
            })
            .collect()
    }

    fn queue_report(&self) -> Vec<QueueReport> {
        self.channels
            .iter()
            .filter_map(|c| c.queue_status().map(|(used, capacity)| QueueReport { chan_name: c.name(), used, capacity }))
            .collect()
    }
}

//! Channel record and the get/put protocol (§4.3, §4.4, component C3/C4).
//!
//! Grounded on `examples/original_source/src/seq/seq_task.c`'s
//! `pv_get_callback`/`pv_put_callback`/`pv_monitor_callback`/`pvPutValue`
//! family and on the worker-thread callback wiring in
//! `examples/msft-mirror-aosp-platform.external.crosvm/devices/src/virtio/block/block.rs`
//! (a request carries its own completion channel rather than a shared
//! slot the issuer polls). Each `Channel` owns a `snl_sync::Mutex` guarding
//! its shared slot, independent of the program lock (§5's "Channel shared
//! slot + meta | per-channel mutex").

use std::sync::Arc;
use std::time::Duration;

use smallvec::{smallvec, SmallVec};
use snl_base::Signal;
use snl_pv::{ConnCallback, DbrType, GetCallback, MonitorCallback, PutCallback, PvAdapter, PvData, PvMeta, PvResult, PvSeverity, PvStatus};
use snl_sync::Mutex;

use crate::error::{Error, Result};
use crate::queue::{MonitorQueue, QueueEntry};

/// The program-wide rendezvous surface a channel needs: setting its
/// companion event flag and waking waiters, or testing-and-clearing one
/// (`pvGetQ`, §6). Implemented by the program controller (§4.7) over its
/// `EventBits` plus per-state-set wakeups; kept as a trait here so this
/// module does not need to know about state sets or the program lock.
pub trait EventHub: Send + Sync {
    /// Sets bit `k` and wakes every state set whose mask includes it.
    fn set_and_wake(&self, bit: usize);
    /// `wakeup(0)` (§4.1): wakes every state set unconditionally.
    fn wake_all(&self);
    /// Tests and clears bit `k`, returning its pre-clear value.
    fn test_and_clear(&self, bit: usize) -> bool;
    /// A channel just transitioned disconnected→connected for the first
    /// time in its lifetime (§4.3 first-connect rendezvous, §3
    /// `firstConnectCount`).
    fn note_first_connect(&self);
    /// A channel just delivered its first monitor sample (§4.3, §3
    /// `firstMonitorCount`).
    fn note_first_monitor(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GetMode {
    Default,
    Async,
    Sync,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutMode {
    Default,
    Async,
    Sync,
}

struct ChannelShared {
    name: String,
    assigned: bool,
    connected: bool,
    handle: Option<snl_pv::PvHandle>,
    sub: Option<snl_pv::SubId>,
    monitored: bool,
    ef: Option<usize>,
    queue: Option<MonitorQueue>,
    value: PvData,
    meta: PvMeta,
    // One slot per state set; almost every program declares only a
    // handful, so this stays on the stack in the common case.
    dirty: SmallVec<[bool; 4]>,
    get_complete: SmallVec<[bool; 4]>,
    put_complete: SmallVec<[bool; 4]>,
    first_connect_counted: bool,
    first_monitor_counted: bool,
}

/// Per-PV channel state (C3). `channel_bit` is the dedicated event-flag
/// bit this channel owns in the program's bitset (§4.1: bit `k` is owned
/// by event flag `k` or by channel `k − numEvFlags − 1`); it is distinct
/// from `ef`, the optional *companion* flag a program assigns via
/// `sync()`.
pub struct Channel {
    pub id: usize,
    pub dtype: DbrType,
    pub count: usize,
    pub channel_bit: usize,
    adapter: Arc<dyn PvAdapter>,
    hub: Arc<dyn EventHub>,
    shared: Mutex<ChannelShared>,
    get_sems: Vec<Signal>,
    put_sems: Vec<Signal>,
}

fn empty_value(dtype: DbrType, count: usize) -> PvData {
    match dtype {
        DbrType::Char => PvData::Char(vec![0; count]),
        DbrType::Short => PvData::Short(vec![0; count]),
        DbrType::Long => PvData::Long(vec![0; count]),
        DbrType::Float => PvData::Float(vec![0.0; count]),
        DbrType::Double => PvData::Double(vec![0.0; count]),
        DbrType::String => PvData::String(vec![String::new(); count]),
    }
}

impl Channel {
    pub fn new(
        id: usize,
        dtype: DbrType,
        count: usize,
        channel_bit: usize,
        num_state_sets: usize,
        queue_capacity: Option<usize>,
        adapter: Arc<dyn PvAdapter>,
        hub: Arc<dyn EventHub>,
    ) -> Arc<Channel> {
        Arc::new(Channel {
            id,
            dtype,
            count,
            channel_bit,
            adapter,
            hub,
            shared: Mutex::new(ChannelShared {
                name: String::new(),
                assigned: false,
                connected: false,
                handle: None,
                sub: None,
                monitored: false,
                ef: None,
                queue: queue_capacity.map(MonitorQueue::new),
                value: empty_value(dtype, count),
                meta: PvMeta::disconnected(),
                dirty: smallvec![false; num_state_sets],
                get_complete: smallvec![false; num_state_sets],
                put_complete: smallvec![false; num_state_sets],
                first_connect_counted: false,
                first_monitor_counted: false,
            }),
            get_sems: (0..num_state_sets).map(|_| Signal::new()).collect(),
            put_sems: (0..num_state_sets).map(|_| Signal::new()).collect(),
        })
    }

    pub fn name(&self) -> String {
        self.shared.lock().name.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    pub fn is_assigned(&self) -> bool {
        self.shared.lock().assigned
    }

    pub fn is_monitored(&self) -> bool {
        self.shared.lock().monitored
    }

    pub fn queue_status(&self) -> Option<(usize, usize)> {
        self.shared.lock().queue.as_ref().map(|q| (q.used(), q.num_elems()))
    }

    pub fn snapshot(&self) -> (PvData, PvMeta) {
        let g = self.shared.lock();
        (g.value.clone(), g.meta.clone())
    }

    /// `assign(c, name)` (§4.3): rewires the PV binding. An empty name
    /// unassigns the channel, tearing down any existing handle.
    pub fn assign(self: &Arc<Self>, name: &str) -> Result<()> {
        let was_monitored = {
            let mut g = self.shared.lock();
            if let Some(h) = g.handle.take() {
                if let Some(s) = g.sub.take() {
                    self.adapter.var_monitor_off(h, s);
                }
                self.adapter.var_destroy(h);
            }
            g.name = name.to_string();
            g.assigned = !name.is_empty();
            g.connected = false;
            g.meta = PvMeta::disconnected();
            g.monitored
        };
        if name.is_empty() {
            return Ok(());
        }
        let me = Arc::clone(self);
        let cb: ConnCallback = Box::new(move |connected| me.on_connect(connected));
        let handle = self
            .adapter
            .var_create(name, cb)
            .map_err(|e| Error::Transport(name.to_string(), e.to_string()))?;
        self.shared.lock().handle = Some(handle);
        if was_monitored {
            self.monitor(true)?;
        }
        Ok(())
    }

    fn on_connect(self: &Arc<Self>, connected: bool) {
        let (first, resync_handle) = {
            let mut g = self.shared.lock();
            g.connected = connected;
            if !connected {
                g.meta = PvMeta::disconnected();
            }
            let first = if connected && !g.first_connect_counted {
                g.first_connect_counted = true;
                true
            } else {
                false
            };
            let resync_handle = if connected && g.monitored { g.handle } else { None };
            (first, resync_handle)
        };
        if first {
            self.hub.note_first_connect();
        }
        if let Some(handle) = resync_handle {
            // `assign` and `monitor(true)` run back-to-back with no
            // ordering guarantee against the adapter's own connect
            // callback; a channel that connects after it was already
            // monitored would otherwise never deliver a first sample.
            // Replay the current value through the monitor path so
            // `note_first_monitor` still fires (§4.3 first-monitor
            // rendezvous) — `on_monitor`'s own latch makes this safe to
            // run alongside the adapter's immediate subscribe-time
            // delivery, if that also happened to win the race.
            let me = Arc::clone(self);
            self.adapter
                .var_get_callback(handle, self.dtype, self.count, Box::new(move |result| me.on_monitor(result)));
        }
        self.hub.wake_all();
    }

    /// `monitor(c, on)` (§4.3): arms or disarms the standing subscription.
    pub fn monitor(self: &Arc<Self>, on: bool) -> Result<()> {
        if on {
            let (handle, name) = {
                let g = self.shared.lock();
                if !g.assigned {
                    return Err(Error::Assignment(g.name.clone()));
                }
                (g.handle, g.name.clone())
            };
            let handle = handle.ok_or(Error::Disconnected(name))?;
            let me = Arc::clone(self);
            let cb: MonitorCallback = Box::new(move |result| me.on_monitor(result));
            let sub = self
                .adapter
                .var_monitor_on(handle, self.dtype, self.count, cb)
                .map_err(|e| Error::Transport(self.shared.lock().name.clone(), e.to_string()))?;
            let mut g = self.shared.lock();
            g.monitored = true;
            g.sub = Some(sub);
        } else {
            let (handle, sub) = {
                let mut g = self.shared.lock();
                g.monitored = false;
                (g.handle, g.sub.take())
            };
            if let (Some(h), Some(s)) = (handle, sub) {
                self.adapter.var_monitor_off(h, s);
            }
        }
        Ok(())
    }

    fn on_monitor(self: &Arc<Self>, result: PvResult<(PvData, PvMeta)>) {
        let (value, meta) = match result {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("channel {} monitor error: {}", self.id, e);
                return;
            }
        };
        let (first, ef, queued) = {
            let mut g = self.shared.lock();
            g.value = value.clone();
            g.meta = meta.clone();
            for d in g.dirty.iter_mut() {
                *d = true;
            }
            let first = if !g.first_monitor_counted {
                g.first_monitor_counted = true;
                true
            } else {
                false
            };
            let queued = if let Some(q) = g.queue.as_mut() {
                q.put((value.first_only(), meta));
                true
            } else {
                false
            };
            (first, g.ef, queued)
        };
        if queued {
            if let Some(k) = ef {
                self.hub.set_and_wake(k);
            }
        } else {
            self.hub.set_and_wake(self.channel_bit);
        }
        if first {
            self.hub.note_first_monitor();
            self.hub.wake_all();
        }
    }

    /// `sync(c, ef)` (§4.3): associates or clears the companion event
    /// flag. `ef = None` is `NOEVFLAG`.
    pub fn sync(&self, ef: Option<usize>) {
        self.shared.lock().ef = ef;
    }

    /// `pvGet` (§4.3). `program_async` is the program's `async` option,
    /// consulted only when `mode == Default`.
    pub fn pv_get(self: &Arc<Self>, ss: usize, mode: GetMode, program_async: bool, timeout: Duration) -> Result<()> {
        let (connected, handle, name) = {
            let g = self.shared.lock();
            (g.connected, g.handle, g.name.clone())
        };
        if !connected {
            let mut g = self.shared.lock();
            g.meta = PvMeta::disconnected();
            return Err(Error::Disconnected(name));
        }
        let handle = handle.expect("connected channel always has a handle");
        let blocking = match mode {
            GetMode::Async => false,
            GetMode::Sync => true,
            GetMode::Default => !program_async,
        };
        {
            let mut g = self.shared.lock();
            g.get_complete[ss] = false;
        }
        if blocking {
            self.get_sems[ss].drain();
        }
        let me = Arc::clone(self);
        let cb: GetCallback = Box::new(move |result| me.on_get_complete(ss, result));
        self.adapter.var_get_callback(handle, self.dtype, self.count, cb);
        if blocking {
            if !self.get_sems[ss].wait_timeout(timeout) {
                let mut g = self.shared.lock();
                g.meta = PvMeta::timeout("get completion timeout");
                return Err(Error::Timeout(g.name.clone()));
            }
        }
        Ok(())
    }

    fn on_get_complete(self: &Arc<Self>, ss: usize, result: PvResult<(PvData, PvMeta)>) {
        let ef = {
            let mut g = self.shared.lock();
            match result {
                Ok((value, meta)) => {
                    g.value = value;
                    g.meta = meta;
                }
                Err(e) => {
                    g.meta = PvMeta {
                        status: PvStatus::Read,
                        severity: PvSeverity::Invalid,
                        timestamp: snl_base::wallclock_now(),
                        message: e.to_string(),
                    };
                }
            }
            g.get_complete[ss] = true;
            for d in g.dirty.iter_mut() {
                *d = true;
            }
            g.ef
        };
        self.get_sems[ss].post();
        if let Some(k) = ef {
            self.hub.set_and_wake(k);
        }
    }

    /// `pvPut` (§4.3). `Default` is always fire-and-forget, regardless of
    /// the program's `async` option; only `Async`/`Sync` request a
    /// completion callback.
    pub fn pv_put(self: &Arc<Self>, ss: usize, mode: PutMode, value: PvData, timeout: Duration) -> Result<()> {
        let (connected, handle, name) = {
            let g = self.shared.lock();
            (g.connected, g.handle, g.name.clone())
        };
        if !connected {
            return Err(Error::Disconnected(name));
        }
        let handle = handle.expect("connected channel always has a handle");
        match mode {
            PutMode::Default => self
                .adapter
                .var_put_no_block(handle, self.dtype, self.count, value)
                .map_err(|e| Error::Transport(name, e.to_string())),
            PutMode::Async | PutMode::Sync => {
                {
                    let mut g = self.shared.lock();
                    g.put_complete[ss] = false;
                }
                if matches!(mode, PutMode::Sync) {
                    self.put_sems[ss].drain();
                }
                let me = Arc::clone(self);
                let cb: PutCallback = Box::new(move |result| me.on_put_complete(ss, result));
                self.adapter.var_put_callback(handle, self.dtype, self.count, value, cb);
                if matches!(mode, PutMode::Sync) && !self.put_sems[ss].wait_timeout(timeout) {
                    let mut g = self.shared.lock();
                    g.meta = PvMeta::timeout("put completion timeout");
                    return Err(Error::Timeout(g.name.clone()));
                }
                Ok(())
            }
        }
    }

    fn on_put_complete(self: &Arc<Self>, ss: usize, result: PvResult<()>) {
        let ef = {
            let mut g = self.shared.lock();
            if let Err(e) = result {
                g.meta = PvMeta {
                    status: PvStatus::Write,
                    severity: PvSeverity::Invalid,
                    timestamp: snl_base::wallclock_now(),
                    message: e.to_string(),
                };
            }
            g.put_complete[ss] = true;
            g.ef
        };
        self.put_sems[ss].post();
        if let Some(k) = ef {
            self.hub.set_and_wake(k);
        }
    }

    pub fn pv_get_complete(&self, ss: usize) -> bool {
        self.shared.lock().get_complete[ss]
    }

    pub fn pv_put_complete(&self, ss: usize) -> bool {
        self.shared.lock().put_complete[ss]
    }

    /// Clears a pending completion flag without aborting the in-flight
    /// transport request; a late callback simply flips it back (§5).
    pub fn pv_get_cancel(&self, ss: usize) {
        self.shared.lock().get_complete[ss] = false;
    }

    pub fn pv_put_cancel(&self, ss: usize) {
        self.shared.lock().put_complete[ss] = false;
    }

    /// `pvGetQ(c)`: pops one queue entry, returning it alongside whether
    /// the companion flag was set on entry (tested and cleared as part
    /// of the call).
    pub fn pv_get_q(&self) -> (Option<QueueEntry>, bool) {
        let mut g = self.shared.lock();
        let was_set = g.ef.map(|k| self.hub.test_and_clear(k)).unwrap_or(false);
        let entry = g.queue.as_mut().and_then(|q| q.get());
        (entry, was_set)
    }

    /// `pvFlushQ(c)`: drains the queue and clears its companion flag.
    /// The original's `pvFreeQ` recursively called itself instead of
    /// calling the equivalent of this function (§9 Design Notes); there
    /// is nothing to port from that body, so this implements the flush
    /// the recursive call was clearly meant to perform (see `DESIGN.md`).
    pub fn pv_flush_q(&self) {
        let mut g = self.shared.lock();
        if let Some(q) = g.queue.as_mut() {
            q.flush();
        }
        if let Some(k) = g.ef {
            self.hub.test_and_clear(k);
        }
    }

    /// `ss_read_all_buffer` (§4.4): if this channel is dirty for `ss`,
    /// copies the shared slot into a local snapshot and clears the dirty
    /// bit. Used only when the program is compiled in safe mode.
    pub fn read_buffer_if_dirty(&self, ss: usize) -> Option<(PvData, PvMeta)> {
        let mut g = self.shared.lock();
        if !g.dirty[ss] {
            return None;
        }
        g.dirty[ss] = false;
        Some((g.value.clone(), g.meta.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snl_pv::loopback::LoopbackAdapter;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct TestHub {
        set_bits: StdMutex<Vec<usize>>,
        woke_all: StdMutex<usize>,
    }

    impl TestHub {
        fn new() -> Arc<Self> {
            Arc::new(TestHub {
                set_bits: StdMutex::new(Vec::new()),
                woke_all: StdMutex::new(0),
            })
        }
    }

    impl EventHub for TestHub {
        fn set_and_wake(&self, bit: usize) {
            self.set_bits.lock().unwrap().push(bit);
        }
        fn wake_all(&self) {
            *self.woke_all.lock().unwrap() += 1;
        }
        fn test_and_clear(&self, bit: usize) -> bool {
            let mut bits = self.set_bits.lock().unwrap();
            if let Some(pos) = bits.iter().position(|b| *b == bit) {
                bits.remove(pos);
                true
            } else {
                false
            }
        }
        fn note_first_connect(&self) {}
        fn note_first_monitor(&self) {}
    }

    #[test]
    fn assign_and_sync_get_roundtrip() {
        let mut seed = HashMap::new();
        seed.insert("X:val".to_string(), PvData::Double(vec![3.5]));
        let adapter = Arc::new(LoopbackAdapter::new(seed));
        let hub = TestHub::new();
        let chan = Channel::new(0, DbrType::Double, 1, 10, 1, None, adapter, hub);
        chan.assign("X:val").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(chan.is_connected());
        chan.pv_get(0, GetMode::Sync, false, Duration::from_secs(1)).unwrap();
        let (value, _) = chan.snapshot();
        assert_eq!(value, PvData::Double(vec![3.5]));
    }

    #[test]
    fn get_on_unconnected_channel_is_disconnected() {
        let adapter = Arc::new(LoopbackAdapter::new(HashMap::new()));
        let hub = TestHub::new();
        let chan = Channel::new(0, DbrType::Double, 1, 10, 1, None, adapter, hub);
        chan.assign("never:connects").unwrap();
        let err = chan.pv_get(0, GetMode::Sync, false, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Disconnected(_)));
    }

    #[test]
    fn queued_monitor_sets_companion_flag_not_channel_bit() {
        let mut seed = HashMap::new();
        seed.insert("X:q".to_string(), PvData::Long(vec![1]));
        let adapter = Arc::new(LoopbackAdapter::new(seed));
        let hub = TestHub::new();
        let chan = Channel::new(0, DbrType::Long, 1, 42, 1, Some(3), adapter, hub.clone());
        chan.assign("X:q").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        chan.sync(Some(7));
        chan.monitor(true).unwrap();
        chan.pv_put(0, PutMode::Default, PvData::Long(vec![9]), Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(hub.set_bits.lock().unwrap().contains(&7));
        assert!(!hub.set_bits.lock().unwrap().contains(&42));
        let (entry, was_set) = chan.pv_get_q();
        assert!(was_set);
        assert_eq!(entry.unwrap().0, PvData::Long(vec![1]));
        let (entry, _) = chan.pv_get_q();
        assert_eq!(entry.unwrap().0, PvData::Long(vec![9]));
    }
}

//! An in-process loopback PV adapter used by the test suite.
//!
//! Every "connected" PV is just an entry in a shared table; gets return the
//! last stored value, puts overwrite it and (if monitored) push the new
//! value to subscribers. All callbacks are delivered from a single
//! dedicated worker thread rather than from the caller's stack — the same
//! shape as the teacher's per-device worker
//! (`devices/src/virtio/pmem.rs::run_worker`) delivering completions
//! off-thread — so the runtime's synchronous get/put paths genuinely
//! exercise the cross-thread `Signal` rendezvous instead of short-circuiting
//! through a same-thread callback.
//!
//! A PV name that is not present in the seed table never connects, which
//! is how the test suite reproduces §8 scenario S3 (synchronous get
//! timeout on an unconnected channel).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use snl_sync::Mutex;

use crate::{
    ConnCallback, DbrType, GetCallback, MonitorCallback, PvAdapter, PvData, PvError, PvHandle,
    PvMeta, PvResult, PutCallback, SubId,
};

struct Record {
    name: String,
    value: PvData,
    meta: PvMeta,
    connected: bool,
    conn_cb: Option<ConnCallback>,
    monitors: HashMap<u64, MonitorCallback>,
}

enum Job {
    DeliverConnect(u64),
    Get(u64, DbrType, usize, GetCallback),
    Put(u64, PvData, Option<PutCallback>),
    Stop,
}

struct Shared {
    seed: HashMap<String, PvData>,
    records: Mutex<HashMap<u64, Record>>,
}

/// A configurable in-memory PV transport for tests.
pub struct LoopbackAdapter {
    shared: std::sync::Arc<Shared>,
    next_handle: AtomicU64,
    next_sub: AtomicU64,
    tx: Sender<Job>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LoopbackAdapter {
    /// Creates an adapter where the PVs named in `seed` connect
    /// immediately with the given initial value; any other name is never
    /// resolved (stays disconnected forever, for timeout tests).
    pub fn new(seed: HashMap<String, PvData>) -> Self {
        let shared = std::sync::Arc::new(Shared {
            seed,
            records: Mutex::new(HashMap::new()),
        });
        let (tx, rx) = mpsc::channel::<Job>();
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("snl-pv-loopback".into())
            .spawn(move || Self::run(worker_shared, rx))
            .expect("failed to spawn loopback adapter worker");
        LoopbackAdapter {
            shared,
            next_handle: AtomicU64::new(1),
            next_sub: AtomicU64::new(1),
            tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    fn run(shared: std::sync::Arc<Shared>, rx: mpsc::Receiver<Job>) {
        for job in rx {
            match job {
                Job::Stop => break,
                Job::DeliverConnect(h) => {
                    let cb = {
                        let mut recs = shared.records.lock();
                        if let Some(rec) = recs.get_mut(&h) {
                            rec.connected = true;
                            rec.meta = PvMeta::ok(snl_base::wallclock_now());
                            rec.conn_cb.take()
                        } else {
                            None
                        }
                    };
                    if let Some(cb) = cb {
                        cb(true);
                    }
                }
                Job::Get(h, dtype, count, cb) => {
                    let result = {
                        let recs = shared.records.lock();
                        match recs.get(&h) {
                            Some(rec) if rec.connected => {
                                Ok((convert(&rec.value, dtype, count), rec.meta.clone()))
                            }
                            Some(rec) => Err(PvError::Transport(format!("{} not connected", rec.name))),
                            None => Err(PvError::Transport("unknown handle".into())),
                        }
                    };
                    cb(result);
                }
                Job::Put(h, value, cb) => {
                    let result = {
                        let mut recs = shared.records.lock();
                        match recs.get_mut(&h) {
                            Some(rec) if rec.connected => {
                                rec.value = value.clone();
                                rec.meta = PvMeta::ok(snl_base::wallclock_now());
                                for mon in rec.monitors.values() {
                                    mon(Ok((value.clone(), rec.meta.clone())));
                                }
                                Ok(())
                            }
                            Some(_) => Err(PvError::Transport("not connected".into())),
                            None => Err(PvError::Transport("unknown handle".into())),
                        }
                    };
                    if let Some(cb) = cb {
                        cb(result);
                    }
                }
            }
        }
    }
}

/// Converts a stored value to the requested element type/count. This
/// adapter only ever stores values of one declared type per PV, so this is
/// a length truncation/padding, not a real type conversion — a real
/// transport would do unit conversion here (§4.3 `assign` comment on type
/// conversion).
fn convert(stored: &PvData, _dtype: DbrType, count: usize) -> PvData {
    if count == 0 || count >= stored.len() {
        stored.clone()
    } else {
        stored.truncated(count)
    }
}

impl Drop for LoopbackAdapter {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Stop);
        if let Some(h) = self.worker.lock().take() {
            let _ = h.join();
        }
    }
}

impl PvAdapter for LoopbackAdapter {
    fn attach(&self) -> PvResult<()> {
        Ok(())
    }

    fn flush(&self) -> PvResult<()> {
        Ok(())
    }

    fn var_create(&self, name: &str, conn_cb: ConnCallback) -> PvResult<PvHandle> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let seeded = self.shared.seed.get(name).cloned();
        let connects = seeded.is_some();
        let record = Record {
            name: name.to_string(),
            value: seeded.unwrap_or(PvData::Double(vec![0.0])),
            meta: PvMeta::disconnected(),
            connected: false,
            conn_cb: Some(conn_cb),
            monitors: HashMap::new(),
        };
        self.shared.records.lock().insert(id, record);
        if connects {
            let _ = self.tx.send(Job::DeliverConnect(id));
        }
        Ok(PvHandle(id))
    }

    fn var_destroy(&self, handle: PvHandle) {
        self.shared.records.lock().remove(&handle.0);
    }

    fn var_get_callback(&self, handle: PvHandle, dtype: DbrType, count: usize, cb: GetCallback) {
        if self.tx.send(Job::Get(handle.0, dtype, count, cb)).is_err() {
            log::error!("loopback adapter worker gone; get dropped");
        }
    }

    fn var_put_callback(
        &self,
        handle: PvHandle,
        _dtype: DbrType,
        _count: usize,
        value: PvData,
        cb: PutCallback,
    ) {
        if self.tx.send(Job::Put(handle.0, value, Some(cb))).is_err() {
            log::error!("loopback adapter worker gone; put dropped");
        }
    }

    fn var_put_no_block(&self, handle: PvHandle, _dtype: DbrType, _count: usize, value: PvData) -> PvResult<()> {
        self.tx
            .send(Job::Put(handle.0, value, None))
            .map_err(|_| PvError::Transport("worker gone".into()))
    }

    fn var_monitor_on(
        &self,
        handle: PvHandle,
        _dtype: DbrType,
        _count: usize,
        cb: MonitorCallback,
    ) -> PvResult<SubId> {
        let sub = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let mut recs = self.shared.records.lock();
        let rec = recs.get_mut(&handle.0).ok_or(PvError::Transport("unknown handle".into()))?;
        // Deliver the current value immediately, as a real transport would
        // on first subscribe.
        if rec.connected {
            cb(Ok((rec.value.clone(), rec.meta.clone())));
        }
        rec.monitors.insert(sub, cb);
        Ok(SubId(sub))
    }

    fn var_monitor_off(&self, handle: PvHandle, sub: SubId) {
        if let Some(rec) = self.shared.records.lock().get_mut(&handle.0) {
            rec.monitors.remove(&sub.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn connect_then_get_roundtrip() {
        let mut seed = HashMap::new();
        seed.insert("x".to_string(), PvData::Double(vec![1.5]));
        let adapter = LoopbackAdapter::new(seed);
        let (tx, rx) = channel();
        let h = adapter
            .var_create("x", Box::new(move |_connected| { let _ = tx.send(()); }))
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();

        let (gtx, grx) = channel();
        adapter.var_get_callback(
            h,
            DbrType::Double,
            1,
            Box::new(move |res| {
                let _ = gtx.send(res);
            }),
        );
        let (val, _meta) = grx.recv_timeout(std::time::Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(val, PvData::Double(vec![1.5]));
    }

    #[test]
    fn unseeded_name_never_connects() {
        let adapter = LoopbackAdapter::new(HashMap::new());
        let (tx, rx) = channel::<bool>();
        let _h = adapter.var_create("nowhere", Box::new(move |c| { let _ = tx.send(c); }));
        assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
    }
}

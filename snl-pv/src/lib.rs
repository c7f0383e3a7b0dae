//! The narrow PV-client interface the runtime consumes (§6, component C5).
//!
//! This crate defines the *shape* of the adapter only — create/destroy,
//! async get/put with callback, monitor on/off, connection callback, flush
//! — and ships one concrete implementation (`loopback`) used by the
//! integration tests. A real deployment supplies its own adapter (e.g. a
//! Channel Access or PV Access binding) that implements `PvAdapter`,
//! selected at runtime by the `pvsys` macro (§6); wiring an actual network
//! transport is out of scope (§1 Non-goals).

mod error;
pub mod loopback;
mod types;

pub use error::{PvError, PvResult};
pub use types::{DbrType, PvData, PvMeta, PvSeverity, PvStatus};

/// Opaque handle to a created PV binding, analogous to the `chid`/`pvid`
/// the original `pv.h` interface hands back from `pvVarCreate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PvHandle(pub u64);

/// Opaque monitor subscription id, analogous to `pvVarMonitorOn`'s
/// returned `evid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubId(pub u64);

pub type ConnCallback = Box<dyn Fn(bool) + Send + Sync>;
pub type GetCallback = Box<dyn FnOnce(PvResult<(PvData, PvMeta)>) + Send>;
pub type PutCallback = Box<dyn FnOnce(PvResult<()>) + Send>;
pub type MonitorCallback = Box<dyn Fn(PvResult<(PvData, PvMeta)>) + Send + Sync>;

/// The consumed PV-client interface (§6). One instance is attached per
/// program (`SysCreate`/`SysAttach` in the original); `var_*` operations
/// are per-channel.
pub trait PvAdapter: Send + Sync {
    /// `SysAttach` — called once per program, at the end of
    /// `Program::start`, before any state-set thread is spawned.
    fn attach(&self) -> PvResult<()>;

    /// `SysFlush` — pushes any queued outbound requests (puts issued by
    /// entry actions, §4.5 step 3).
    fn flush(&self) -> PvResult<()>;

    /// `VarCreate` — establishes (or begins establishing) a binding to
    /// `name`. `conn_cb` fires with `true` on connect and `false` on
    /// disconnect; the adapter must tolerate being asked to create a
    /// handle for a name that never resolves.
    fn var_create(&self, name: &str, conn_cb: ConnCallback) -> PvResult<PvHandle>;

    /// `VarDestroy` — tears down the binding. No further callbacks may
    /// fire for `handle` afterward.
    fn var_destroy(&self, handle: PvHandle);

    /// `VarGetCallback` — initiates an asynchronous fetch; `cb` fires
    /// exactly once, on success or failure.
    fn var_get_callback(&self, handle: PvHandle, dtype: DbrType, count: usize, cb: GetCallback);

    /// `VarPutCallback` — initiates an asynchronous write with completion
    /// notification.
    fn var_put_callback(
        &self,
        handle: PvHandle,
        dtype: DbrType,
        count: usize,
        value: PvData,
        cb: PutCallback,
    );

    /// `VarPutNoBlock` — fire-and-forget write; no completion is ever
    /// reported (§4.3: `pvPutComplete` in `DEFAULT` mode is unspecified).
    fn var_put_no_block(&self, handle: PvHandle, dtype: DbrType, count: usize, value: PvData) -> PvResult<()>;

    /// `VarMonitorOn` — arms a standing subscription; `cb` fires on every
    /// update, indefinitely, until `var_monitor_off`.
    fn var_monitor_on(
        &self,
        handle: PvHandle,
        dtype: DbrType,
        count: usize,
        cb: MonitorCallback,
    ) -> PvResult<SubId>;

    /// `VarMonitorOff` — disarms the subscription.
    fn var_monitor_off(&self, handle: PvHandle, sub: SubId);
}

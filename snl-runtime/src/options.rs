//! Runtime option bits (§6), grounded on the `bitflags`-based option enums
//! used elsewhere in the corpus (e.g. `hypervisor`'s capability flags).

use bitflags::bitflags;

bitflags! {
    /// Program-wide option bits, set at compile time and overridable in
    /// part by macros (§4.7, §6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProgramOptions: u32 {
        /// `pvGet` default mode is asynchronous.
        const ASYNC = 1 << 0;
        /// Startup blocks until all assigned channels connect and all
        /// monitored channels deliver a first sample.
        const CONN = 1 << 1;
        /// Verbose runtime logging for this program instance.
        const DEBUG = 1 << 2;
        /// Do not auto-clear event flags after a triggering evaluation.
        const NEWEF = 1 << 3;
        /// Build a standalone main program (compile-time only; inert at
        /// runtime, retained for table compatibility).
        const MAIN = 1 << 4;
        /// Variable area is per-instance rather than shared.
        const REENT = 1 << 5;
        /// Enables double-buffering (§4.4).
        const SAFE = 1 << 6;
    }
}

impl Default for ProgramOptions {
    fn default() -> Self {
        ProgramOptions::empty()
    }
}

bitflags! {
    /// Per-state option bits (§6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StateOptions: u32 {
        /// Run the entry action even on a self-transition.
        const DO_ENTRY_FROM_SELF = 1 << 0;
        /// Run the exit action even on a self-transition.
        const DO_EXIT_TO_SELF = 1 << 1;
        /// Do not reset `timeEntered` on a self-transition.
        const NO_RESET_TIMERS = 1 << 2;
    }
}

impl Default for StateOptions {
    fn default() -> Self {
        StateOptions::empty()
    }
}

//! The runtime's internal error taxonomy (§7). These are the kinds a user
//! action primitive or a program start can fail with; note that only
//! `Configuration` is fatal (it aborts `seq()` before any thread is
//! created) — every other kind is surfaced through a return code plus the
//! affected channel's `(status, severity, message)` triple, never by
//! unwinding.

use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Attempt to `pvGet`/`pvPut` an unassigned channel.
    #[error("channel {0} is not assigned")]
    Assignment(String),
    /// Bad program magic, bad mode enum, invalid macro syntax.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Channel not currently connected.
    #[error("channel {0} is disconnected")]
    Disconnected(String),
    /// Queue allocation failure on a monitor callback.
    #[error("resource exhausted: {0}")]
    Resource(String),
    /// Synchronous wait exceeded its limit.
    #[error("timeout waiting for {0}")]
    Timeout(String),
    /// PV adapter returned a non-OK status.
    #[error("transport error on {0}: {1}")]
    Transport(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;

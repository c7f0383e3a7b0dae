//! Cross-cutting utilities shared by the sequencer runtime: rendezvous
//! primitives (`Event`, `Signal`), a monotonic time source, and logging
//! setup. Analogous in role to the teacher's `base` crate, trimmed to the
//! subset a userspace-only runtime needs (no raw descriptors, no mmap, no
//! syslog transport).

mod event;
pub mod logging;
mod time;

pub use event::{Event, Signal};
pub use time::{monotonic_now, wallclock_now};

//! The sequencer's execution engine: event flags, the monitor queue,
//! channels, the safe-mode double buffer, delays, the per-state-set
//! scheduler, the program controller, and the program registry (§2
//! components C1–C10). See `SPEC_FULL.md` for the full design and
//! `DESIGN.md` for how each module is grounded in the reference corpus.

mod channel;
mod delay;
mod error;
mod event_flags;
mod macros;
mod options;
mod program;
mod program_table;
mod queue;
mod registry;
mod state_set;

pub use channel::{Channel, EventHub, GetMode, PutMode};
pub use delay::DelayList;
pub use error::{Error, Result};
pub use event_flags::EventBits;
pub use macros::MacroTable;
pub use options::{ProgramOptions, StateOptions};
pub use program::{Program, DEFAULT_TIMEOUT};
pub use program_table::{ChanDesc, ProgramTable, RuntimeHandle, SsDesc, StateContext, StateDesc, PROGRAM_TABLE_MAGIC};
pub use queue::{MonitorQueue, QueueEntry};
pub use registry::{ChannelReport, ProgramHandle, QueueReport, Registry};
pub use state_set::StateSetHandle;

//! Logging setup.
//!
//! Mirrors `base::syslog::init`: a single process-wide, idempotent
//! initialization that installs a `log` backend. The teacher talks to the
//! host syslog; this runtime has no equivalent host, so `env_logger` (one of
//! `base`'s own dependencies) is used directly.

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global logger. Safe to call more than once (and from more
/// than one program instance running in the same process) — only the first
/// call takes effect, matching the original runtime's tolerance for
/// multiple `seq()` invocations sharing one host process.
pub fn init() {
    INIT.get_or_init(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(false)
            .try_init();
    });
}

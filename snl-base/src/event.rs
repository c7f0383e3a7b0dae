//! Rendezvous primitives the runtime is built on.
//!
//! `base::Event` and `base::Timer` in the teacher crate are backed by Linux
//! `eventfd`/`timerfd` so they can be multiplexed with `WaitContext` (an
//! `epoll` wrapper) alongside real file descriptors. This runtime has no
//! file descriptors to multiplex — every stimulus (a PV callback, an event
//! flag set, a delay firing) ultimately wakes a single waiting thread — so
//! the same semantics are reimplemented here directly on a
//! `Condvar`/`Mutex` pair. The public shape (level-style sticky `Event`,
//! binary auto-consuming `Signal`, a `wait_timeout` that reports whether
//! the deadline elapsed) mirrors how `base::Event` and the teacher's worker
//! loops (e.g. `devices/src/virtio/block/block.rs::Worker::run`) use their
//! primitives, just without the descriptor plumbing.

use std::time::Duration;

use snl_sync::{Condvar, Mutex};

/// A sticky, level-triggered signal: once `set()`, every past and future
/// `wait()` returns immediately until `clear()` is called. Any number of
/// threads may wait on it concurrently.
///
/// Used for the program's `ready`/`dead` signals and the first-connect
/// barrier (§4.3, §4.7), all of which may have more than one waiter.
#[derive(Default)]
pub struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        *self.state.lock() = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.state.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Blocks until `set()` has been observed.
    pub fn wait(&self) {
        let mut guard = self.state.lock();
        while !*guard {
            guard = self.cond.wait(guard);
        }
    }

    /// Blocks until `set()` has been observed or `timeout` elapses.
    /// Returns `true` if the event was observed set, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.state.lock();
        if *guard {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let now = std::time::Instant::now();
            if now >= deadline {
                return *guard;
            }
            let (g, timed_out) = self.cond.wait_timeout(guard, deadline - now);
            guard = g;
            if *guard {
                return true;
            }
            if timed_out {
                return false;
            }
        }
    }
}

/// A binary, auto-consuming semaphore, matching EPICS `epicsEvent`
/// semantics: `post()` is idempotent (it does not accumulate), and a
/// single pending post satisfies exactly one `wait()`/`wait_timeout()`.
///
/// Used for each state set's sync semaphore and each channel's per-state-set
/// `getSem`/`putSem` (§3).
#[derive(Default)]
pub struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Marks the signal pending and wakes one waiter. Idempotent.
    pub fn post(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    /// Clears any pending post without waiting (used to discard a stale
    /// completion before issuing a fresh synchronous request, §4.3).
    pub fn drain(&self) {
        *self.pending.lock() = false;
    }

    /// Blocks until a post is observed, consuming it.
    pub fn wait(&self) {
        let mut guard = self.pending.lock();
        while !*guard {
            guard = self.cond.wait(guard);
        }
        *guard = false;
    }

    /// Blocks until a post is observed (consuming it) or `timeout` elapses.
    /// Returns `true` if a post was consumed, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.pending.lock();
        if *guard {
            *guard = false;
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, timed_out) = self.cond.wait_timeout(guard, deadline - now);
            guard = g;
            if *guard {
                *guard = false;
                return true;
            }
            if timed_out {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn event_wakes_waiters() {
        let ev = Arc::new(Event::new());
        let ev2 = ev.clone();
        let t = thread::spawn(move || {
            ev2.wait();
        });
        thread::sleep(Duration::from_millis(20));
        ev.set();
        t.join().unwrap();
    }

    #[test]
    fn event_wait_timeout_elapses() {
        let ev = Event::new();
        assert!(!ev.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn signal_is_binary_not_counting() {
        let sig = Signal::new();
        sig.post();
        sig.post();
        sig.post();
        assert!(sig.wait_timeout(Duration::from_millis(10)));
        assert!(!sig.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn signal_drain_discards_stale_post() {
        let sig = Signal::new();
        sig.post();
        sig.drain();
        assert!(!sig.wait_timeout(Duration::from_millis(10)));
    }
}

//! Thin wrappers around `std::sync` primitives that treat a poisoned lock as
//! a programming error rather than a recoverable condition.
//!
//! The sequencer runtime's program lock, channel locks, and per-state-set
//! signals are held only across short, panic-free critical sections; if a
//! thread ever panics while holding one, every other thread touching that
//! program is already in an unrecoverable state. `epicsMutexMustLock` in the
//! original C runtime never returns failure either — it calls `cantProceed`
//! on deadlock detection. We mirror that by unwrapping the poison `Result`
//! instead of propagating it.

use std::sync::{self, Condvar as StdCondvar, MutexGuard};
use std::time::Duration;

/// A `Mutex` whose `lock()` cannot fail with a poison error.
pub struct Mutex<T: ?Sized>(sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Mutex(sync::Mutex::new(val))
    }

    pub fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A `Condvar` whose wait methods cannot fail with a poison error.
#[derive(Default)]
pub struct Condvar(StdCondvar);

impl Condvar {
    pub fn new() -> Self {
        Condvar(StdCondvar::new())
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the guard and whether the wait timed out (`true` if the
    /// timeout elapsed without a notification being observed).
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let (guard, result) = self
            .0
            .wait_timeout(guard, dur)
            .unwrap_or_else(|e| e.into_inner());
        (guard, result.timed_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutex_basic() {
        let m = Mutex::new(0i32);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn mutex_survives_poison() {
        let m = std::sync::Arc::new(Mutex::new(0i32));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            let _g = m2.lock();
            panic!("intentional");
        })
        .join();
        // still usable afterwards
        assert_eq!(*m.lock(), 0);
    }
}

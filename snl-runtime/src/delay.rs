//! Per-state delay heap and wait-timeout computation (§4.6, component
//! C10). Grounded on `examples/original_source/src/seq/seq_task.c`'s
//! `sequencer()`/`pv_delay`/`delay_wakeup` family: a dense `0..k` id per
//! `delay()` occurrence in a state's guards, a requested duration per id,
//! and a sticky "already fired" latch that is only cleared by re-entering
//! the state.
//!
//! Time is read from `snl_base::monotonic_now()` rather than wall clock,
//! so a host clock step cannot shorten or lengthen an armed delay — an
//! intentional choice documented in `DESIGN.md`, since the original reads
//! `epicsTimeGetCurrent` which is itself monotonic on most EPICS targets.

use std::time::Duration;

use snl_base::monotonic_now;

pub struct DelayList {
    time_entered: f64,
    delay: Vec<Option<Duration>>,
    expired: Vec<bool>,
}

impl DelayList {
    pub fn new(num_slots: usize) -> Self {
        DelayList {
            time_entered: monotonic_now(),
            delay: vec![None; num_slots],
            expired: vec![false; num_slots],
        }
    }

    /// Resizes to `num_slots` for the state now being entered and clears
    /// every slot (`clearDelay`, §4.5 step 4). `reset_timer` is false only
    /// for a self-transition into a state with `NO_RESET_TIMERS` set
    /// (§6, §8 scenario S5): `timeEntered` then keeps its prior value so
    /// delays re-armed on the self-transition still expire relative to
    /// the original entry.
    pub fn clear(&mut self, num_slots: usize, reset_timer: bool) {
        self.delay = vec![None; num_slots];
        self.expired = vec![false; num_slots];
        if reset_timer {
            self.time_entered = monotonic_now();
        }
    }

    /// `delayInit(i, seconds)`: arms slot `i` with the requested duration.
    pub fn arm(&mut self, i: usize, seconds: f64) {
        self.delay[i] = Some(Duration::from_secs_f64(seconds.max(0.0)));
        self.expired[i] = false;
    }

    /// The value a compiled `delay(d)` guard expression reads: `true`
    /// once the deadline for slot `i` has passed, sticky until the next
    /// `clear`.
    pub fn check(&mut self, i: usize) -> bool {
        if self.expired[i] {
            return true;
        }
        let elapsed = Duration::from_secs_f64((monotonic_now() - self.time_entered).max(0.0));
        if let Some(d) = self.delay[i] {
            if elapsed >= d {
                self.expired[i] = true;
                return true;
            }
        }
        false
    }

    /// `getTimeout`: the duration the state-set thread should wait before
    /// its next event evaluation. Scans every unexpired slot; a slot
    /// already due is latched expired and `Duration::ZERO` is returned
    /// immediately (no need to wait further — re-evaluate now). Otherwise
    /// the minimum remaining duration across all armed, unexpired slots,
    /// or `None` if no delay is armed.
    pub fn next_timeout(&mut self) -> Option<Duration> {
        let elapsed = Duration::from_secs_f64((monotonic_now() - self.time_entered).max(0.0));
        let mut min_remaining = None;
        for i in 0..self.delay.len() {
            if self.expired[i] {
                continue;
            }
            if let Some(d) = self.delay[i] {
                if elapsed >= d {
                    self.expired[i] = true;
                    return Some(Duration::ZERO);
                }
                let remaining = d - elapsed;
                min_remaining = Some(match min_remaining {
                    Some(m) if m <= remaining => m,
                    _ => remaining,
                });
            }
        }
        min_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn unarmed_never_times_out() {
        let mut dl = DelayList::new(2);
        assert_eq!(dl.next_timeout(), None);
        assert!(!dl.check(0));
    }

    #[test]
    fn armed_delay_fires_after_duration() {
        let mut dl = DelayList::new(1);
        dl.arm(0, 0.05);
        assert!(!dl.check(0));
        sleep(Duration::from_millis(70));
        assert!(dl.check(0));
        // sticky until cleared
        assert!(dl.check(0));
    }

    #[test]
    fn clear_resets_latch_and_timer() {
        let mut dl = DelayList::new(1);
        dl.arm(0, 0.01);
        sleep(Duration::from_millis(20));
        assert!(dl.check(0));
        dl.clear(1, true);
        dl.arm(0, 0.01);
        assert!(!dl.check(0));
    }

    #[test]
    fn no_reset_timer_keeps_original_entry_time() {
        // §8 S5: self-transition with NO_RESET_TIMERS keeps timeEntered,
        // so a freshly re-armed delay fires relative to the original
        // entry, not the self-transition instant.
        let mut dl = DelayList::new(1);
        dl.arm(0, 0.05);
        sleep(Duration::from_millis(30));
        dl.clear(1, false); // self-transition, timer not reset
        dl.arm(0, 0.05);
        sleep(Duration::from_millis(30)); // total elapsed since original entry: ~60ms
        assert!(dl.check(0));
    }

    #[test]
    fn next_timeout_returns_minimum_remaining() {
        let mut dl = DelayList::new(2);
        dl.arm(0, 0.20);
        dl.arm(1, 0.05);
        let t = dl.next_timeout().unwrap();
        assert!(t <= Duration::from_millis(60));
    }
}

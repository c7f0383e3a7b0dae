//! Event-flag bitset (§4.1, component C1).
//!
//! A fixed-width bit array, index 0 reserved and always false. This type
//! is a plain data structure with no locking of its own: callers embed it
//! inside a larger structure (the program's state, §5) that is guarded by
//! the program lock, matching how the original keeps the bitset inline in
//! `SPROG` rather than giving it its own mutex.
pub struct EventBits {
    bits: Vec<bool>,
}

impl EventBits {
    /// `width` is `max(numEvFlags, numEvFlags + numChans) + 1` per §4.1;
    /// callers compute that before constructing.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        EventBits {
            bits: vec![false; width],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn in_range(&self, k: usize) -> bool {
        k != 0 && k < self.bits.len()
    }

    /// Sets bit `k`. Returns `false` if `k` is out of range or reserved.
    /// Callers are responsible for invoking `wakeup(k)` afterwards (§4.1)
    /// — this type has no notion of the program's state sets.
    pub fn set(&mut self, k: usize) -> bool {
        if !self.in_range(k) {
            return false;
        }
        self.bits[k] = true;
        true
    }

    pub fn clear(&mut self, k: usize) -> bool {
        if !self.in_range(k) {
            return false;
        }
        self.bits[k] = false;
        true
    }

    pub fn test(&self, k: usize) -> bool {
        self.in_range(k) && self.bits[k]
    }

    /// Tests bit `k` and clears it if set, returning the pre-clear value.
    pub fn test_and_clear(&mut self, k: usize) -> bool {
        if !self.in_range(k) {
            return false;
        }
        let was_set = self.bits[k];
        self.bits[k] = false;
        was_set
    }

    /// True if any bit in `mask` (event numbers, 1-based) is set — used by
    /// a state set to decide whether its wait condition is satisfied.
    pub fn any_in_mask(&self, mask: &[usize]) -> bool {
        mask.iter().any(|&k| self.test(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_reserved() {
        let mut eb = EventBits::new(4);
        assert!(!eb.set(0));
        assert!(!eb.test(0));
        assert!(!eb.clear(0));
    }

    #[test]
    fn set_test_clear_roundtrip() {
        let mut eb = EventBits::new(4);
        assert!(!eb.test(2));
        eb.set(2);
        assert!(eb.test(2));
        eb.clear(2);
        assert!(!eb.test(2));
    }

    #[test]
    fn test_and_clear_consumes_once() {
        let mut eb = EventBits::new(4);
        eb.set(1);
        assert!(eb.test_and_clear(1));
        assert!(!eb.test_and_clear(1));
    }

    #[test]
    fn out_of_range_is_a_noop() {
        let mut eb = EventBits::new(4);
        assert!(!eb.set(99));
        assert!(!eb.test(99));
    }

    #[test]
    fn any_in_mask_checks_union() {
        let mut eb = EventBits::new(8);
        eb.set(3);
        assert!(eb.any_in_mask(&[1, 2, 3]));
        assert!(!eb.any_in_mask(&[1, 2]));
    }
}

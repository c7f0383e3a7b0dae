//! Bounded monitor queue (§3, §4.2, component C2).
//!
//! Ported from `examples/original_source/src/seq/seq_queue.c`
//! (`seqQueueCreate`/`Put`/`Get`/`Flush`/`Free`/`Used`/`IsFull`/`IsEmpty`).
//! The C implementation always allocates one more slot than the declared
//! capacity so that `nextGet == nextPut` can mean "empty" unambiguously
//! and a full queue's "one past the newest" slot can be overwritten
//! without colliding with the oldest (`nextGet`) slot; the same scheme is
//! used here (`buffer.len() == capacity + 1`).

use snl_pv::{PvData, PvMeta};

/// One entry pushed by a monitor callback on a queued channel: the value
/// (first element only, for arrays — §4.3) and its meta-data.
pub type QueueEntry = (PvData, PvMeta);

pub struct MonitorQueue {
    buffer: Vec<Option<QueueEntry>>,
    next_put: usize,
    next_get: usize,
}

impl MonitorQueue {
    /// `capacity` is the number of elements observable at once (§8
    /// property 4); internally one extra slot is reserved.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "monitor queue capacity must be positive");
        MonitorQueue {
            buffer: vec![None; capacity + 1],
            next_put: 0,
            next_get: 0,
        }
    }

    fn slots(&self) -> usize {
        self.buffer.len()
    }

    pub fn num_elems(&self) -> usize {
        self.slots() - 1
    }

    /// Copies `entry` into the ring. If the ring would become full after
    /// advancing, `next_put` is *not* advanced — the newest slot is
    /// overwritten in place on every subsequent put until a `get` frees
    /// room. Returns whether this put overwrote a pending entry.
    pub fn put(&mut self, entry: QueueEntry) -> bool {
        let n = self.slots();
        let next_next_put = (self.next_put + 1) % n;
        let full = next_next_put == self.next_get;
        self.buffer[self.next_put] = Some(entry);
        if !full {
            self.next_put = next_next_put;
        }
        full
    }

    /// Pops the oldest entry, or `None` if the queue is empty.
    pub fn get(&mut self) -> Option<QueueEntry> {
        if self.is_empty() {
            return None;
        }
        let n = self.slots();
        let v = self.buffer[self.next_get].take();
        self.next_get = (self.next_get + 1) % n;
        v
    }

    /// Discards all pending entries.
    pub fn flush(&mut self) {
        let n = self.slots();
        let mut i = self.next_get;
        while i != self.next_put {
            self.buffer[i] = None;
            i = (i + 1) % n;
        }
        self.next_get = self.next_put;
    }

    pub fn is_empty(&self) -> bool {
        self.next_get == self.next_put
    }

    pub fn is_full(&self) -> bool {
        (self.next_put + 1) % self.slots() == self.next_get
    }

    pub fn used(&self) -> usize {
        let n = self.slots() as i64;
        ((self.next_put as i64 - self.next_get as i64).rem_euclid(n)) as usize
    }

    pub fn free(&self) -> usize {
        let n = self.slots() as i64;
        ((self.next_get as i64 - self.next_put as i64 - 1).rem_euclid(n)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snl_pv::PvMeta;

    fn entry(v: i32) -> QueueEntry {
        (PvData::Long(vec![v]), PvMeta::ok(0.0))
    }

    fn value_of(e: &QueueEntry) -> i32 {
        match &e.0 {
            PvData::Long(v) => v[0],
            _ => unreachable!(),
        }
    }

    /// §8 S2 / property 4: N-capacity queue, N+1 puts, only first N
    /// observable in order, 4th get is empty.
    #[test]
    fn overflow_overwrites_newest_not_oldest() {
        let mut q = MonitorQueue::new(3);
        for v in 1..=5 {
            q.put(entry(v));
        }
        assert_eq!(value_of(&q.get().unwrap()), 1);
        assert_eq!(value_of(&q.get().unwrap()), 2);
        assert_eq!(value_of(&q.get().unwrap()), 3);
        assert!(q.get().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn put_returns_overwrite_flag() {
        let mut q = MonitorQueue::new(2);
        assert!(!q.put(entry(1)));
        assert!(!q.put(entry(2)));
        assert!(q.put(entry(3))); // overflow: overwrites
    }

    #[test]
    fn flush_drains_without_reading() {
        let mut q = MonitorQueue::new(4);
        q.put(entry(1));
        q.put(entry(2));
        q.flush();
        assert!(q.is_empty());
        assert!(q.get().is_none());
    }

    #[test]
    fn used_and_free_track_correctly() {
        let mut q = MonitorQueue::new(3);
        assert_eq!(q.used(), 0);
        assert_eq!(q.free(), 3);
        q.put(entry(1));
        q.put(entry(2));
        assert_eq!(q.used(), 2);
        assert_eq!(q.free(), 1);
        q.get();
        assert_eq!(q.used(), 1);
        assert_eq!(q.free(), 2);
    }
}

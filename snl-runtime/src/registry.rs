//! Process-wide program registry (§4.8, component C9). Grounded on
//! `examples/original_source/src/seq/seqCommands.c`'s linked list of
//! `sequencerProgram` nodes consulted by `seqShow`/`seqChanShow`/
//! `seqStop`, and on the name→instance-list shape described in §3/§4.8.
//!
//! The registry lock is intentionally a separate `snl_sync::Mutex` from
//! any per-program lock (§4.8: "traversal is done under a registry lock
//! that is distinct from per-program locks").

use std::collections::HashMap;
use std::sync::Arc;

use snl_sync::Mutex;

/// A shell-command-facing view of one running program instance, owned by
/// the program controller and registered/deregistered around its
/// lifetime. Kept as a trait so the registry does not depend on the
/// generic `Program<V>`.
pub trait ProgramHandle: Send + Sync {
    fn name(&self) -> &str;
    fn instance_index(&self) -> u32;
    fn thread_ids(&self) -> Vec<u64>;
    fn stop(&self);
    fn channel_report(&self) -> Vec<ChannelReport>;
    fn queue_report(&self) -> Vec<QueueReport>;
}

#[derive(Clone, Debug)]
pub struct ChannelReport {
    pub name: String,
    pub connected: bool,
    pub monitored: bool,
}

#[derive(Clone, Debug)]
pub struct QueueReport {
    pub chan_name: String,
    pub used: usize,
    pub capacity: usize,
}

struct Entry {
    instances: Vec<Arc<dyn ProgramHandle>>,
    // Monotonic; must not be derived from `instances.len()`, which shrinks
    // on deregister and would otherwise hand out an index already in use
    // by a still-live instance.
    next_index: u32,
}

/// Cheap to clone (an `Arc` around the map): `Program` keeps its own
/// handle so it can deregister itself on shutdown without the caller
/// having to hold the original `Registry` alive for that long.
#[derive(Default, Clone)]
pub struct Registry {
    by_name: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `handle`, assigning it the next instance index for its
    /// program name (§3: "an instance index assigned on registration,
    /// unique per program name").
    pub fn register(&self, handle: Arc<dyn ProgramHandle>) -> u32 {
        let mut map = self.by_name.lock();
        let entry = map
            .entry(handle.name().to_string())
            .or_insert_with(|| Entry { instances: Vec::new(), next_index: 0 });
        let index = entry.next_index;
        entry.next_index += 1;
        entry.instances.push(handle);
        index
    }

    pub fn deregister(&self, name: &str, instance_index: u32) {
        let mut map = self.by_name.lock();
        if let Some(entry) = map.get_mut(name) {
            entry.instances.retain(|h| h.instance_index() != instance_index);
            if entry.instances.is_empty() {
                map.remove(name);
            }
        }
    }

    pub fn find_by_name(&self, name: &str) -> Vec<Arc<dyn ProgramHandle>> {
        self.by_name
            .lock()
            .get(name)
            .map(|e| e.instances.clone())
            .unwrap_or_default()
    }

    pub fn find_by_thread(&self, tid: u64) -> Option<Arc<dyn ProgramHandle>> {
        let map = self.by_name.lock();
        for entry in map.values() {
            for inst in &entry.instances {
                if inst.thread_ids().contains(&tid) {
                    return Some(inst.clone());
                }
            }
        }
        None
    }

    pub fn list(&self) -> Vec<Arc<dyn ProgramHandle>> {
        self.by_name.lock().values().flat_map(|e| e.instances.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: String,
        idx: u32,
    }
    impl ProgramHandle for Fake {
        fn name(&self) -> &str {
            &self.name
        }
        fn instance_index(&self) -> u32 {
            self.idx
        }
        fn thread_ids(&self) -> Vec<u64> {
            vec![]
        }
        fn stop(&self) {}
        fn channel_report(&self) -> Vec<ChannelReport> {
            vec![]
        }
        fn queue_report(&self) -> Vec<QueueReport> {
            vec![]
        }
    }

    #[test]
    fn instance_index_increments_per_name() {
        let reg = Registry::new();
        let a = reg.register(Arc::new(Fake { name: "demo".into(), idx: 0 }));
        let b = reg.register(Arc::new(Fake { name: "demo".into(), idx: 1 }));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(reg.find_by_name("demo").len(), 2);
    }

    #[test]
    fn deregister_does_not_reuse_index_of_a_still_live_instance() {
        let reg = Registry::new();
        let a = reg.register(Arc::new(Fake { name: "demo".into(), idx: 0 }));
        let b = reg.register(Arc::new(Fake { name: "demo".into(), idx: 1 }));
        reg.deregister("demo", a);
        let c = reg.register(Arc::new(Fake { name: "demo".into(), idx: 2 }));
        assert_ne!(c, b);
        assert_eq!(reg.find_by_name("demo").len(), 2);
    }

    #[test]
    fn deregister_removes_empty_entry() {
        let reg = Registry::new();
        reg.register(Arc::new(Fake { name: "demo".into(), idx: 0 }));
        reg.deregister("demo", 0);
        assert!(reg.find_by_name("demo").is_empty());
    }
}

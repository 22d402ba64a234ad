//! Thread Assignment — spec §4.4.
//!
//! A UUID v4 gives 122 bits of randomness (6 bits are fixed version/variant
//! out of 128), matching the "uniform random, 122-bit collision resistance"
//! requirement directly — no bespoke generator needed.

use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

/// Returns `existing` verbatim if present and non-empty, otherwise mints a
/// fresh thread identifier.
pub fn assign_thread_id(existing: Option<String>) -> String {
    match existing {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    }
}

/// Tracks every thread id the driver has ever seen a message for. Not load
/// bearing for routing or dispatch — it exists so a future console/TUI can
/// answer "what threads are live" without scanning the queue, the same role
/// it plays for the organism's `thread_scheduling` hint (breadth-first vs
/// depth-first): that hint is accepted on the config but the driver is
/// strictly FIFO, matching spec's own disclaimer that ordering across
/// threads is not guaranteed.
#[derive(Default)]
pub struct ThreadRegistry {
    seen: Mutex<HashSet<String>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        ThreadRegistry::default()
    }

    /// Records `thread_id`, returning `true` the first time it's seen.
    pub fn observe(&self, thread_id: &str) -> bool {
        self.seen.lock().unwrap().insert(thread_id.to_string())
    }

    pub fn known_threads(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_existing_id() {
        assert_eq!(assign_thread_id(Some("T1".into())), "T1");
    }

    #[test]
    fn generates_fresh_id_when_absent() {
        let a = assign_thread_id(None);
        let b = assign_thread_id(None);
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn generates_fresh_id_when_blank() {
        let id = assign_thread_id(Some("   ".into()));
        assert!(!id.trim().is_empty());
    }

    #[test]
    fn registry_counts_distinct_threads_once() {
        let reg = ThreadRegistry::new();
        assert!(reg.observe("T1"));
        assert!(!reg.observe("T1"));
        assert!(reg.observe("T2"));
        assert_eq!(reg.known_threads(), 2);
    }
}

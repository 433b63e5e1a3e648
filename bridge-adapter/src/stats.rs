//! Counters describing what the adapter did with inbound traffic.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the adapter's tasks.
#[derive(Debug, Default)]
pub struct AdapterStats {
    pub(crate) messages_enqueued: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) unresolved_topics: AtomicU64,
    pub(crate) sessions_created: AtomicU64,
    pub(crate) sessions_destroyed: AtomicU64,
    pub(crate) forward_failures: AtomicU64,
}

impl AdapterStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unresolved_topics: self.unresolved_topics.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the adapter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_enqueued: u64,
    pub messages_dropped: u64,
    pub decode_failures: u64,
    pub unresolved_topics: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub forward_failures: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Adapter Stats:")?;
        writeln!(
            f,
            "  Messages: {} enqueued, {} dropped",
            self.messages_enqueued, self.messages_dropped
        )?;
        writeln!(
            f,
            "  Skipped: {} undecodable, {} unresolved topics, {} forward failures",
            self.decode_failures, self.unresolved_topics, self.forward_failures
        )?;
        writeln!(
            f,
            "  Sessions: {} created, {} destroyed",
            self.sessions_created, self.sessions_destroyed
        )
    }
}

//! The durable command queue abstraction (spec §4.4, §9 "Durable queue").
//!
//! Every writer reads its pending INDEX/CINDEX/DELETE/CDELETE/COMMIT
//! commands off one [`DurableQueue`] per endpoint. Two implementations are
//! provided: an in-memory one (fast, lost on crash) and a file-backed one
//! modeled closely on the original implementation's `FileQueue` (crash
//! survivable, replayed on restart).

mod file;
mod memory;

pub use file::FileQueue;
pub use memory::MemoryQueue;

use std::time::Duration;

/// A FIFO byte-queue with blocking, timeout-bounded `get`.
///
/// Implementors serialize whatever envelope the writer puts in (spec §4.4
/// defines the envelope: endpoint + command + cmd_id) to bytes before
/// calling `put`; this trait only moves bytes, it does not know about
/// commands.
pub trait DurableQueue: Send + Sync {
    /// Enqueues a record. Never blocks (`FileQueue`'s write path is O(1)
    /// append; `MemoryQueue` is an unbounded channel).
    fn put(&self, value: Vec<u8>) -> anyhow::Result<()>;

    /// Dequeues the next record, blocking up to `timeout` (or forever if
    /// `None`) for one to become available. `Ok(None)` means the timeout
    /// elapsed with nothing queued.
    fn get(&self, timeout: Option<Duration>) -> anyhow::Result<Option<Vec<u8>>>;

    /// Whether this queue survives a process restart. The writer manager
    /// uses this to decide whether replaying the queue on startup is
    /// meaningful (spec §9 Open Question: "persistent" queue alias).
    fn is_persistent(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_queue_is_not_persistent() {
        let q = MemoryQueue::new();
        assert!(!q.is_persistent());
    }
}

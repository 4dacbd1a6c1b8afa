//! The commit-timing policy (spec §4.5): decides, on every pass of a
//! writer's loop, whether the pending writes on an endpoint are due a
//! commit yet, grounded in the original implementation's `Timeouts`
//! triad and `xapiand_run()` scheduling loop.
//!
//! Given a configured `commit_timeout` (call it `T`), three derived
//! timeouts govern the decision:
//!
//! - `timeout`  = clamp(round(T * 0.3), 1, 3) seconds — how long a writer
//!   loop iteration blocks waiting for the next queued command.
//! - `commit`   = T       seconds since the first write — a normal commit.
//! - `delayed`  = T * 3.0 seconds since the first *delayed* write — used
//!   when a commit attempt was deferred because the global semaphore was
//!   full.
//! - `maximum`  = T * 9.0 seconds since the first write — force a commit
//!   even if the semaphore is still full, logging a warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, TryAcquireError};

use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub timeout: Duration,
    pub commit: Duration,
    pub delayed: Duration,
    pub maximum: Duration,
}

impl Timeouts {
    pub fn from_commit_timeout(commit_timeout: Duration) -> Self {
        let t = commit_timeout.as_secs_f64();
        let timeout_secs = (t * 0.3).round().max(1.0).min(3.0);
        Self {
            timeout: Duration::from_secs_f64(timeout_secs),
            commit: commit_timeout,
            delayed: Duration::from_secs_f64(t * 3.0),
            maximum: Duration::from_secs_f64(t * 9.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    first_write: Instant,
    first_delayed: Option<Instant>,
    latest_write: Instant,
}

/// What the writer loop should do about a pending commit this pass.
#[derive(Debug, PartialEq, Eq)]
pub enum CommitDecision {
    /// No pending writes, or not due yet.
    Wait,
    /// Commit now; a semaphore permit was acquired.
    Commit,
    /// Commit now unconditionally (maximum timeout exceeded); the caller
    /// should `log::warn!` and block-acquire a permit via
    /// [`CommitPolicy::block_acquire_permit`] before committing.
    ForceCommit,
}

/// Tracks pending-write ages per endpoint and gates commit concurrency
/// through a single process-wide counting semaphore (spec §4.5 "global
/// commit concurrency limit").
pub struct CommitPolicy {
    timeouts: Timeouts,
    semaphore: Arc<Semaphore>,
    pending: Mutex<HashMap<Endpoint, PendingWrite>>,
}

impl CommitPolicy {
    pub fn new(timeouts: Timeouts, max_concurrent_commits: usize) -> Self {
        Self {
            timeouts,
            semaphore: Arc::new(Semaphore::new(max_concurrent_commits)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Records that a write landed on `endpoint`'s queue; call this once
    /// per INDEX/CINDEX/DELETE/CDELETE accepted by the writer.
    pub fn note_write(&self, endpoint: &Endpoint) {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        pending
            .entry(endpoint.clone())
            .and_modify(|p| p.latest_write = now)
            .or_insert(PendingWrite {
                first_write: now,
                first_delayed: None,
                latest_write: now,
            });
    }

    /// Clears the pending-write bookkeeping for an endpoint; call this
    /// right after a successful commit.
    pub fn note_committed(&self, endpoint: &Endpoint) {
        self.pending.lock().remove(endpoint);
    }

    /// Implements spec §4.5's four-branch decision:
    ///
    /// 1. No pending writes -> `Wait`.
    /// 2. `now - first_write >= maximum` -> `ForceCommit` (caller logs a
    ///    warning and blocks on the semaphore rather than bypassing it).
    /// 3. `(first_delayed.is_some() && now - first_delayed >= delayed) ||
    ///    now - first_write >= commit` -> try to acquire a permit; if it
    ///    succeeds, `Commit`; if the semaphore is full, mark
    ///    `first_delayed` (if unset) and fall through to `Wait`.
    /// 4. Otherwise -> `Wait`.
    pub fn decide(&self, endpoint: &Endpoint) -> CommitDecision {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let entry = match pending.get_mut(endpoint) {
            Some(p) => p,
            None => return CommitDecision::Wait,
        };

        if now.duration_since(entry.first_write) >= self.timeouts.maximum {
            return CommitDecision::ForceCommit;
        }

        let due_on_delay = entry
            .first_delayed
            .map(|t| now.duration_since(t) >= self.timeouts.delayed)
            .unwrap_or(false);
        let due_on_commit = now.duration_since(entry.first_write) >= self.timeouts.commit;

        if due_on_delay || due_on_commit {
            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    // Permit is released as soon as the caller's commit
                    // finishes; hold it for the duration of that call.
                    std::mem::forget(permit);
                    return CommitDecision::Commit;
                }
                Err(TryAcquireError::NoPermits) => {
                    if entry.first_delayed.is_none() {
                        entry.first_delayed = Some(now);
                    }
                    return CommitDecision::Wait;
                }
                Err(TryAcquireError::Closed) => return CommitDecision::ForceCommit,
            }
        }

        CommitDecision::Wait
    }

    /// Blocks until a commit-concurrency permit is available (spec §4.5:
    /// "log a warning and block-acquire the semaphore to guarantee
    /// commit"). Called on the `ForceCommit` path so a commit forced by
    /// the maximum timeout still respects `commit_slots` rather than
    /// bypassing it, preserving invariant #4 (commit parallelism bound).
    pub fn block_acquire_permit(&self, runtime: &tokio::runtime::Handle) {
        let permit = runtime.block_on(self.semaphore.clone().acquire_owned());
        std::mem::forget(permit.expect("commit semaphore is never closed"));
    }

    /// Releases a commit-concurrency permit acquired by a prior
    /// `CommitDecision::Commit` or by `block_acquire_permit`.
    pub fn release_commit_permit(&self) {
        self.semaphore.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_timeouts_match_the_0_3_3_9_triad() {
        let t = Timeouts::from_commit_timeout(Duration::from_secs(10));
        assert_eq!(t.timeout, Duration::from_secs(3));
        assert_eq!(t.commit, Duration::from_secs(10));
        assert_eq!(t.delayed, Duration::from_secs(30));
        assert_eq!(t.maximum, Duration::from_secs(90));
    }

    #[test]
    fn short_commit_timeout_clamps_to_one_second() {
        let t = Timeouts::from_commit_timeout(Duration::from_millis(500));
        assert_eq!(t.timeout, Duration::from_secs(1));
    }

    #[test]
    fn no_pending_writes_means_wait() {
        let policy = CommitPolicy::new(Timeouts::from_commit_timeout(Duration::from_secs(1)), 4);
        let ep = Endpoint::parse("/tmp/a").unwrap();
        assert_eq!(policy.decide(&ep), CommitDecision::Wait);
    }

    #[test]
    fn fresh_write_is_not_due_immediately() {
        let policy = CommitPolicy::new(
            Timeouts::from_commit_timeout(Duration::from_secs(60)),
            4,
        );
        let ep = Endpoint::parse("/tmp/a").unwrap();
        policy.note_write(&ep);
        assert_eq!(policy.decide(&ep), CommitDecision::Wait);
    }

    #[test]
    fn block_acquire_permit_waits_for_a_free_slot() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        let policy = Arc::new(CommitPolicy::new(
            Timeouts::from_commit_timeout(Duration::from_secs(1)),
            1,
        ));
        let ep = Endpoint::parse("/tmp/a").unwrap();
        policy.note_write(&ep);
        // Drain the only permit via the normal `Commit` path first.
        assert_eq!(policy.decide(&ep), CommitDecision::Commit);

        let policy2 = policy.clone();
        let handle = std::thread::spawn(move || {
            policy2.block_acquire_permit(&rt.handle().clone());
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "force-commit should block while the one permit is held");

        policy.release_commit_permit();
        handle.join().unwrap();
    }

    #[test]
    fn committed_endpoint_clears_pending_state() {
        let policy = CommitPolicy::new(Timeouts::from_commit_timeout(Duration::from_secs(60)), 4);
        let ep = Endpoint::parse("/tmp/a").unwrap();
        policy.note_write(&ep);
        policy.note_committed(&ep);
        assert_eq!(policy.decide(&ep), CommitDecision::Wait);
    }
}

//! Per-connection command cancellation (spec §4.8, §9).
//!
//! A connection only ever has one command "alive" at a time: issuing a
//! new command bumps a per-connection counter, and any handler still
//! running for a now-stale counter value observes [`AliveToken::check`]
//! fail and unwinds via [`Dead`]. This lets a client cancel a long-running
//! SEARCH simply by sending another command on the same connection,
//! without the dispatcher having to reach into the handler's stack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared per-connection sequence counter.
pub struct CommandSequence {
    current: AtomicU64,
}

impl CommandSequence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicU64::new(0),
        })
    }

    /// Starts a new command, superseding whatever token was issued before
    /// it, and returns a token the handler should check periodically.
    pub fn begin(self: &Arc<Self>) -> AliveToken {
        let id = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        AliveToken {
            sequence: self.clone(),
            cmd_id: id,
        }
    }
}

impl Default for CommandSequence {
    fn default() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }
}

/// A handle to one in-flight command. `check` is cheap enough to call
/// between every row emitted by the search executor (spec §4.7).
#[derive(Clone)]
pub struct AliveToken {
    sequence: Arc<CommandSequence>,
    cmd_id: u64,
}

impl AliveToken {
    pub fn cmd_id(&self) -> u64 {
        self.cmd_id
    }

    pub fn is_alive(&self) -> bool {
        self.sequence.current.load(Ordering::Acquire) == self.cmd_id
    }

    /// Returns `Err(Dead)` once a newer command has superseded this one.
    pub fn check(&self) -> Result<(), Dead> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Dead { cmd_id: self.cmd_id })
        }
    }
}

/// Raised (as an error, not a panic) when a handler notices mid-flight
/// that it has been superseded. The dispatcher logs this as "Command N
/// cancelled" rather than an error (spec §4.8).
#[derive(Debug)]
pub struct Dead {
    pub cmd_id: u64,
}

impl std::fmt::Display for Dead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command {} superseded", self.cmd_id)
    }
}

impl std::error::Error for Dead {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_is_alive_until_superseded() {
        let seq = CommandSequence::new();
        let first = seq.begin();
        assert!(first.is_alive());

        let _second = seq.begin();
        assert!(!first.is_alive());
        assert!(first.check().is_err());
    }

    #[test]
    fn latest_token_is_always_alive() {
        let seq = CommandSequence::new();
        let _first = seq.begin();
        let second = seq.begin();
        assert!(second.check().is_ok());
    }
}

//! Server configuration (spec §6.4, SPEC_FULL.md §4.10).
//!
//! Parsed by `structopt` in `xapiand-server::main` and handed down as a
//! plain value; nothing here touches the CLI crate directly so the engine
//! stays usable from a test harness without pulling in `structopt`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::queue::{DurableQueue, FileQueue, MemoryQueue};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` the TCP listener binds to.
    pub listener: String,

    /// Root directory under which every endpoint's sub-index lives.
    pub data: std::path::PathBuf,

    /// Base commit timeout (`T` in the commit-policy triad, §4.5).
    pub commit_timeout: Duration,

    /// Capacity of the global commit-concurrency semaphore (§4.5).
    pub commit_slots: usize,

    /// `memory` or `file`-backed durable queue (§4.4, §9).
    pub queue: QueueKind,

    /// Reader pool's `unused` retention cap per key (§4.3, default 100).
    pub pool_size: usize,

    /// Cap on concurrently dispatched commands (§4.8, `COMMANDS_POOL_SIZE`
    /// in the original).
    pub commands_pool_size: usize,

    /// Cap on concurrently running per-endpoint writers.
    pub writers_pool_size: usize,

    /// `log::LevelFilter` verbosity, as an integer count of `-v` flags.
    pub verbosity: u8,

    /// Deadline for a pool acquisition to succeed before surfacing a
    /// timeout to the caller (§4.3). `None` blocks indefinitely.
    pub reader_pool_timeout: Option<Duration>,

    /// How long a per-endpoint writer idles with an empty queue before it
    /// exits and releases its handle (`DATABASE_MAX_LIFE`, §4.4).
    pub writer_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener: "127.0.0.1:8890".to_string(),
            data: std::path::PathBuf::from("./data"),
            commit_timeout: Duration::from_secs(1),
            commit_slots: 10,
            queue: QueueKind::Memory,
            pool_size: 100,
            commands_pool_size: 20,
            writers_pool_size: 10,
            verbosity: 0,
            reader_pool_timeout: Some(Duration::from_secs(30)),
            writer_idle_timeout: Duration::from_secs(900),
        }
    }
}

impl ServerConfig {
    /// Maps `-v` flag counts to a `log::LevelFilter`, mirroring teacher's
    /// `log_level` handling in `lnx-server/src/main.rs`.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Whether the configured queue kind survives a restart (§9 Open
    /// Question: treated as a plain synonym, not a separate alias).
    pub fn is_persistent_queue(&self) -> bool {
        matches!(self.queue, QueueKind::File)
    }

    /// Opens (or creates) the durable queue backing one writable endpoint,
    /// per the configured `queue` option (§6.4).
    pub fn open_queue(&self, endpoint: &Endpoint) -> anyhow::Result<Arc<dyn DurableQueue>> {
        match self.queue {
            QueueKind::Memory => Ok(Arc::new(MemoryQueue::new())),
            QueueKind::File => {
                let base = self
                    .data
                    .join("queues")
                    .join(crate::helpers::short_hash(&endpoint.canonical()));
                Ok(Arc::new(FileQueue::open(base)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verbosity_is_info() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn two_verbose_flags_is_trace() {
        let mut cfg = ServerConfig::default();
        cfg.verbosity = 2;
        assert_eq!(cfg.log_level(), log::LevelFilter::Trace);
    }
}

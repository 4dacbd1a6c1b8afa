//! Command-line configuration (spec §6.4), mirroring the shape and
//! doc-comment style of the teacher's original `Settings` struct.

use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use xapiand_engine::{PoolConfig, QueueKind, ServerConfig};

#[derive(Debug, Clone, Copy)]
pub struct QueueArg(pub QueueKind);

impl std::str::FromStr for QueueArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(QueueArg(QueueKind::Memory)),
            "file" => Ok(QueueArg(QueueKind::File)),
            other => Err(format!(
                "unknown queue kind '{}' (expected 'memory' or 'file')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "xapiand", about = "A multi-tenant indexing and search server.")]
pub struct Settings {
    /// The `host:port` the TCP listener binds to.
    #[structopt(long, short, default_value = "0.0.0.0:8890", env)]
    pub listener: String,

    /// Base directory for file-scheme endpoints and queue files.
    #[structopt(long, default_value = "./data", env)]
    pub data: PathBuf,

    /// `T`, the base commit timeout, in seconds. Derived timeouts are
    /// `3T` (delayed) and `9T` (forced).
    #[structopt(long, default_value = "1", env)]
    pub commit_timeout: u64,

    /// Capacity of the global commit-concurrency semaphore.
    #[structopt(long, default_value = "10", env)]
    pub commit_slots: usize,

    /// `memory` or `file`-backed durable queue.
    #[structopt(long, default_value = "memory", env)]
    pub queue: QueueArg,

    /// Reader pool's retention cap per `(writable, endpoints)` key.
    #[structopt(long, default_value = "100", env)]
    pub pool_size: usize,

    /// Cap on concurrently dispatched threaded commands (SEARCH, FIND,
    /// TERMS, FACETS).
    #[structopt(long, default_value = "20", env)]
    pub commands_pool_size: usize,

    /// Cap on concurrently running per-endpoint writers.
    #[structopt(long, default_value = "10", env)]
    pub writers_pool_size: usize,

    /// Verbosity; repeat for more detail (`-v`, `-vv`).
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// An optional file to send persistent logs to.
    #[structopt(long, env)]
    pub log_file: Option<String>,

    /// Whether to use ANSI colours for log levels. You probably want to
    /// disable this if using file-based logging.
    #[structopt(long, env)]
    pub pretty_logs: Option<bool>,

    /// The number of worker threads for the tokio runtime. Defaults to
    /// the number of logical cores.
    #[structopt(long, short = "threads", env)]
    pub runtime_threads: Option<usize>,

    /// Deadline, in seconds, for a reader pool acquisition before it fails
    /// with "no connections available".
    #[structopt(long, default_value = "30", env)]
    pub reader_pool_timeout: u64,

    /// How long, in seconds, a per-endpoint writer idles with an empty
    /// queue before exiting (`DATABASE_MAX_LIFE`).
    #[structopt(long, default_value = "900", env)]
    pub writer_idle_timeout: u64,
}

impl Settings {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listener: self.listener.clone(),
            data: self.data.clone(),
            commit_timeout: Duration::from_secs(self.commit_timeout),
            commit_slots: self.commit_slots,
            queue: self.queue.0.clone(),
            pool_size: self.pool_size,
            commands_pool_size: self.commands_pool_size,
            writers_pool_size: self.writers_pool_size,
            verbosity: self.verbose,
            reader_pool_timeout: Some(Duration::from_secs(self.reader_pool_timeout)),
            writer_idle_timeout: Duration::from_secs(self.writer_idle_timeout),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            reader_concurrency: None,
            acquire_timeout: Some(Duration::from_secs(self.reader_pool_timeout)),
            reap_after: Duration::from_secs(self.writer_idle_timeout),
        }
    }
}

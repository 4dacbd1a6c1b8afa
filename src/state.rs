//! Shared server state handed to every connection (spec §2 data flow).

use std::sync::Arc;

use tokio::sync::Semaphore;
use xapiand_engine::{DbPool, Endpoint, ServerConfig, WriteEnvelope, WriterManager};

pub struct AppState {
    pub config: ServerConfig,
    pub pool: Arc<DbPool>,
    pub writer_manager: Arc<WriterManager>,
    /// The "central queue" of spec §2: every write command funnels
    /// through this channel to the dedicated writer-manager thread
    /// (`dispatch::run_writer_manager_loop`), which owns all blocking
    /// queue I/O so the tokio reactor never blocks on it.
    pub central_tx: crossbeam::channel::Sender<(Endpoint, WriteEnvelope)>,
    /// Bounds SEARCH/FIND/TERMS/FACETS/COUNT concurrency server-wide
    /// (spec §4.8, `commands_pool_size`).
    pub commands_semaphore: Arc<Semaphore>,
}

//! The per-endpoint writer loop and its manager (spec §4.4, §4.5, §6.3).
//!
//! One OS thread per writable endpoint pulls [`WriteEnvelope`]s off that
//! endpoint's [`DurableQueue`], applies them through the
//! [`EngineFacade`]'s retry wrapper, and defers to [`CommitPolicy`] for
//! when to actually flush. The [`WriterManager`] spawns writers on
//! demand and tracks them in a registry so at most one writer exists per
//! writable endpoint at a time (spec §8 invariant #1), persisting the
//! active roster to `Xapian-Writers.db` (spec §6.3) for crash recovery.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::command::{WriteEnvelope, WriteOp};
use crate::commit_policy::{CommitDecision, CommitPolicy, Timeouts};
use crate::config::ServerConfig;
use crate::document::build_engine_document;
use crate::endpoint::Endpoint;
use crate::error::EngineError;
use crate::facade::EngineFacade;
use crate::pool::DbPool;
use crate::queue::DurableQueue;

/// Default `DATABASE_MAX_LIFE` (spec §4.4); overridable via
/// `WriterContext::writer_idle_timeout` / `ServerConfig::writer_idle_timeout`.
const DATABASE_MAX_LIFE: Duration = Duration::from_secs(900);

/// Everything a writer thread needs that is shared across all writers.
pub struct WriterContext {
    pub pool: Arc<DbPool>,
    pub commit_policy: Arc<CommitPolicy>,
    pub writers_db_path: PathBuf,
    /// How long a writer idles with an empty queue before exiting (spec
    /// §4.4 `DATABASE_MAX_LIFE`, configurable via
    /// `ServerConfig::writer_idle_timeout`).
    pub writer_idle_timeout: Duration,
}

/// Tracks the one live writer per writable endpoint (spec §8 invariant
/// #1 is enforced upstream by the pool's semaphore capacity=1; this
/// registry exists so the manager doesn't spawn a second thread for an
/// endpoint that already has one).
pub struct WriterManager {
    ctx: Arc<WriterContext>,
    registry: DashMap<Endpoint, std::thread::JoinHandle<()>>,
    roster: Mutex<HashSet<Endpoint>>,
    /// One durable queue per endpoint that has ever been dispatched to or
    /// recovered, cached so repeated dispatches (and the writer loop that
    /// drains them) all share the same queue instance (spec §2 "writer
    /// manager ... forwards commands to the writer's sub-queue").
    queues: DashMap<Endpoint, Arc<dyn DurableQueue>>,
    /// Caps concurrently running writer threads at `writers_pool_size`
    /// (spec §5 "writers pool"); a writer spawn beyond the cap blocks
    /// until a permit frees up, held for the writer thread's lifetime.
    writers_semaphore: Arc<tokio::sync::Semaphore>,
}

impl WriterManager {
    pub fn new(ctx: Arc<WriterContext>, writers_pool_size: usize) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            registry: DashMap::new(),
            roster: Mutex::new(HashSet::new()),
            queues: DashMap::new(),
            writers_semaphore: Arc::new(tokio::sync::Semaphore::new(writers_pool_size.max(1))),
        })
    }

    /// The "writer manager main loop" of spec §2: called once per command
    /// read off the central queue. Gets or opens the destination endpoint's
    /// durable queue, makes sure a writer thread is draining it, and
    /// appends the envelope. Callers are expected to serialize calls for
    /// a given endpoint themselves (the real server funnels every write
    /// command through one central-queue consumer task), so the
    /// get-or-create race on `queues` below never triggers in practice.
    pub fn dispatch(
        self: &Arc<Self>,
        config: &ServerConfig,
        endpoint: Endpoint,
        envelope: &WriteEnvelope,
        runtime: tokio::runtime::Handle,
    ) -> anyhow::Result<()> {
        let queue = match self.queues.get(&endpoint) {
            Some(q) => q.clone(),
            None => {
                let q = config.open_queue(&endpoint)?;
                self.queues.insert(endpoint.clone(), q.clone());
                q
            }
        };
        self.ensure_writer(endpoint, queue.clone(), runtime);
        queue.put(envelope.encode()?)?;
        Ok(())
    }

    /// Crash recovery (spec §6.3, §9): if the configured queue is
    /// persistent, re-spawns a writer for every endpoint listed in
    /// `Xapian-Writers.db` so outstanding queued items get drained.
    pub fn recover(self: &Arc<Self>, config: &ServerConfig, runtime: tokio::runtime::Handle) {
        if !config.is_persistent_queue() {
            return;
        }
        for endpoint in Self::load_roster(&self.ctx.writers_db_path) {
            match config.open_queue(&endpoint) {
                Ok(queue) => {
                    self.queues.insert(endpoint.clone(), queue.clone());
                    self.ensure_writer(endpoint, queue, runtime.clone());
                }
                Err(e) => log::error!("failed to reopen persisted queue: {}", e),
            }
        }
    }

    /// Ensures a writer thread is running for `endpoint`, spawning one if
    /// needed (spec §4.4 step 1, idempotent per endpoint).
    pub fn ensure_writer(
        self: &Arc<Self>,
        endpoint: Endpoint,
        queue: Arc<dyn DurableQueue>,
        runtime: tokio::runtime::Handle,
    ) {
        if self.registry.contains_key(&endpoint) {
            return;
        }

        self.roster.lock().insert(endpoint.clone());
        self.persist_roster();

        // Blocks until a writer slot frees up (spec §5 `writers_pool_size`);
        // the permit is held for the thread's whole lifetime and dropped
        // when the writer exits on idle timeout.
        let permit = runtime
            .block_on(self.writers_semaphore.clone().acquire_owned())
            .expect("writers semaphore never closes");

        let manager = self.clone();
        let ep = endpoint.clone();
        let ctx = self.ctx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("writer-{}", crate::helpers::short_hash(&ep.canonical())))
            .spawn(move || {
                let _permit = permit;
                run_writer_loop(ctx, ep.clone(), queue, runtime);
                manager.registry.remove(&ep);
                manager.roster.lock().remove(&ep);
                manager.persist_roster();
            })
            .expect("failed to spawn writer thread");

        self.registry.insert(endpoint, handle);
    }

    pub fn is_running(&self, endpoint: &Endpoint) -> bool {
        self.registry.contains_key(endpoint)
    }

    /// Writes the active-writer roster to `Xapian-Writers.db`, one
    /// canonical endpoint per line (spec §6.3), so a restart can respawn
    /// writers for endpoints with outstanding queued items.
    fn persist_roster(&self) {
        let roster = self.roster.lock();
        let mut out = String::new();
        for ep in roster.iter() {
            out.push_str(&ep.canonical());
            out.push('\n');
        }
        if let Ok(mut f) = std::fs::File::create(&self.ctx.writers_db_path) {
            let _ = f.write_all(out.as_bytes());
        }
    }

    /// Reads `Xapian-Writers.db`, if present, returning the endpoints a
    /// persistent queue should be replayed for on startup.
    pub fn load_roster(path: &PathBuf) -> Vec<Endpoint> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| Endpoint::parse(line.trim()).ok())
            .collect()
    }
}

fn run_writer_loop(
    ctx: Arc<WriterContext>,
    endpoint: Endpoint,
    queue: Arc<dyn DurableQueue>,
    runtime: tokio::runtime::Handle,
) {
    let handle = match runtime.block_on(ctx.pool.database(std::slice::from_ref(&endpoint), true, false)) {
        Ok(h) => h,
        Err(e) => {
            log::error!("writer for {} failed to acquire handle: {}", endpoint, e);
            return;
        }
    };
    let facade = EngineFacade::new(handle.subs()[0].clone());
    let timeouts = ctx.commit_policy.timeouts();

    let mut last_activity = Instant::now();

    loop {
        match ctx.commit_policy.decide(&endpoint) {
            CommitDecision::ForceCommit => {
                log::warn!("commit forced for {}", endpoint);
                ctx.commit_policy.block_acquire_permit(&runtime);
                commit(&facade, &ctx.commit_policy, &endpoint, true);
            }
            CommitDecision::Commit => {
                commit(&facade, &ctx.commit_policy, &endpoint, true);
            }
            CommitDecision::Wait => {}
        }

        match queue.get(Some(timeouts.timeout)) {
            Ok(Some(bytes)) => {
                last_activity = Instant::now();
                match WriteEnvelope::decode(&bytes) {
                    Ok(envelope) if envelope.endpoint == endpoint => {
                        apply(&facade, &ctx.commit_policy, &endpoint, envelope.op, &runtime);
                    }
                    Ok(_) => {
                        log::warn!("writer for {} dropped a misrouted envelope", endpoint);
                    }
                    Err(e) => log::error!("corrupt envelope on {}'s queue: {}", endpoint, e),
                }
            }
            Ok(None) => {
                if last_activity.elapsed() > ctx.writer_idle_timeout {
                    log::info!("writer for {} idle, exiting", endpoint);
                    break;
                }
            }
            Err(e) => {
                log::error!("queue read failed for {}: {}", endpoint, e);
                break;
            }
        }
    }

    // Exit is a forced final commit (spec §4.4 step 3, §4.5 "if force,
    // try-acquire (blocking) the commit semaphore; always commit") — it
    // must go through the same semaphore as the `ForceCommit` path above,
    // not bypass it.
    ctx.commit_policy.block_acquire_permit(&runtime);
    commit(&facade, &ctx.commit_policy, &endpoint, true);
    facade.database().close();
}

fn apply(
    facade: &EngineFacade,
    policy: &Arc<CommitPolicy>,
    endpoint: &Endpoint,
    op: WriteOp,
    runtime: &tokio::runtime::Handle,
) {
    match op {
        WriteOp::Index { doc, commit: should_commit } => {
            match build_engine_document(&doc) {
                Ok(engine_doc) => {
                    let result = facade.retry(|db| db.replace_document(engine_doc.clone()));
                    match result {
                        Ok(()) => policy.note_write(endpoint),
                        Err(EngineError::InvalidArgument(msg)) => {
                            log::warn!("rejected document {}: {}", doc.id, msg);
                        }
                        Err(e) => log::error!("index failed for {}: {}", doc.id, e),
                    }
                }
                Err(e) => log::warn!("rejected document {}: {}", doc.id, e),
            }
            if should_commit {
                // CINDEX's inline commit bypassed the commit-concurrency
                // semaphore entirely; acquire a permit first, same as the
                // loop's own `Commit`/`ForceCommit` decisions do.
                policy.block_acquire_permit(runtime);
                commit(facade, policy, endpoint, true);
            }
        }
        WriteOp::Delete { id, commit: should_commit } => {
            match facade.retry(|db| db.delete_document(&id)) {
                Ok(()) => policy.note_write(endpoint),
                Err(e) => log::error!("delete failed for {}: {}", id, e),
            }
            if should_commit {
                policy.block_acquire_permit(runtime);
                commit(facade, policy, endpoint, true);
            }
        }
        WriteOp::Commit => {
            // An explicit client `COMMIT` never went through `decide()`'s
            // try-acquire, so it must acquire its own permit before
            // `commit(..., true)` releases one — otherwise every COMMIT
            // inflates the semaphore above `commit_slots` permanently.
            policy.block_acquire_permit(runtime);
            commit(facade, policy, endpoint, true);
        }
    }
}

fn commit(facade: &EngineFacade, policy: &Arc<CommitPolicy>, endpoint: &Endpoint, release_permit: bool) {
    match facade.retry(|db| db.commit()) {
        Ok(()) => {
            policy.note_committed(endpoint);
            if release_permit {
                policy.release_commit_permit();
            }
        }
        Err(e) => log::error!("commit failed for {}: {}", endpoint, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_max_life_matches_spec_default() {
        assert_eq!(DATABASE_MAX_LIFE, Duration::from_secs(900));
    }

    #[test]
    fn roster_round_trips_through_a_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("xapiand-writers-test-{}.db", std::process::id()));
        let eps = vec![
            Endpoint::parse("/tmp/a").unwrap(),
            Endpoint::parse("/tmp/b").unwrap(),
        ];
        let body: String = eps.iter().map(|e| format!("{}\n", e.canonical())).collect();
        std::fs::write(&path, body).unwrap();

        let loaded = WriterManager::load_roster(&path);
        assert_eq!(loaded.len(), 2);
        std::fs::remove_file(&path).ok();
    }
}

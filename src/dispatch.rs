//! Accept loop, per-connection read loop, and graceful shutdown (spec
//! §4.8, §4.9).
//!
//! Non-threaded commands (OPEN, INDEX, COMMIT, ...) run inline on the
//! connection's own task so their replies can't race each other.
//! Threaded commands (SEARCH and its siblings) are hewn off onto a
//! separate task gated by `commands_semaphore`, so a slow search doesn't
//! block the connection from reading — and cancelling — its next
//! command.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use xapiand_engine::CommandSequence;

use crate::help;
use crate::protocol::Writer;
use crate::receiver::{self, Ctx};
use crate::session::Session;
use crate::state::AppState;

/// How long the server waits for in-flight connections to wrap up after
/// the first shutdown signal before aborting them outright (spec §4.9).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(listener: tokio::net::TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let state = state.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                log::debug!("connection {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => log::warn!("accept failed: {}", e),
                }
            }
            _ = wait_for_signal() => {
                log::info!("shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    drain(connections).await;
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

/// Waits for every outstanding connection to finish on its own, up to
/// `SHUTDOWN_GRACE`; a second signal during the wait aborts whatever is
/// still running instead of waiting out the rest of the grace period.
async fn drain(mut connections: JoinSet<()>) {
    if connections.is_empty() {
        return;
    }
    log::info!(
        "waiting up to {:?} for {} connection(s) to finish",
        SHUTDOWN_GRACE,
        connections.len()
    );

    tokio::select! {
        _ = async {
            while connections.join_next().await.is_some() {}
        } => {
            log::info!("all connections drained");
        }
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
            log::warn!("grace period expired, aborting {} remaining connection(s)", connections.len());
            connections.shutdown().await;
        }
        _ = wait_for_signal() => {
            log::warn!("second shutdown signal received, aborting remaining connections");
            connections.shutdown().await;
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = tokio::io::split(stream);
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    let session = Arc::new(RwLock::new(Session::new()));
    let sequence = CommandSequence::new();

    while let Some(raw) = lines.next_line().await? {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (cmd, payload) = match line.split_once(' ') {
            Some((c, p)) => (c, p.trim_start()),
            None => (line, ""),
        };

        let token = sequence.begin();
        let ctx = Ctx {
            state: state.clone(),
            session: session.clone(),
            writer: writer.clone(),
            cmd_id: token.cmd_id(),
            token,
        };

        let threaded = help::find(cmd).map(|c| c.threaded).unwrap_or(false);

        if threaded {
            spawn_threaded(ctx, cmd.to_string(), payload.to_string());
        } else if receiver::dispatch(&ctx, cmd, payload).await {
            break;
        }
    }

    Ok(())
}

/// Logs pool pressure the moment a threaded command is about to wait for
/// a slot (spec §4.8 point 5): a warning past two-thirds full, an error
/// once every slot is already taken.
async fn acquire_command_permit(state: &AppState) -> tokio::sync::OwnedSemaphorePermit {
    let total = state.config.commands_pool_size.max(1);
    let available = state.commands_semaphore.available_permits();
    let in_use = total.saturating_sub(available);
    if available == 0 {
        log::error!("command pool at capacity ({}/{}), command will queue", in_use, total);
    } else if available * 3 <= total {
        log::warn!("command pool over two-thirds full ({}/{})", in_use, total);
    }
    state
        .commands_semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("commands semaphore is never closed")
}

/// Hands a threaded command (SEARCH and friends) off to its own task so
/// the connection's read loop stays free to notice a superseding command
/// (spec §4.8 cancellation). Spawns first and acquires the pool permit
/// *inside* the spawned task: acquiring it here, before spawning, would
/// make the reader loop itself block on pool pressure, which is exactly
/// what spec §4.8 point 5 ("at capacity ... still accept") rules out.
fn spawn_threaded(ctx: Ctx, cmd: String, payload: String) {
    tokio::spawn(async move {
        let permit = acquire_command_permit(&ctx.state).await;
        let _permit = permit;
        receiver::dispatch(&ctx, &cmd, &payload).await;
    });
}

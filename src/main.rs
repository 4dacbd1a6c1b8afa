mod cli;
mod dispatch;
mod help;
mod protocol;
mod receiver;
mod session;
mod state;

use std::sync::Arc;

use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use structopt::StructOpt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use xapiand_engine::{CommitPolicy, DbPool, Timeouts, WriterContext, WriterManager};

use crate::cli::Settings;
use crate::state::AppState;

fn main() {
    let settings = Settings::from_args();

    let log_level = settings.server_config().log_level();
    if let Err(e) = setup_logger(log_level, &settings.log_file, settings.pretty_logs.unwrap_or(true)) {
        eprintln!("error during logger setup: {:?}", e);
        return;
    }

    let threads = settings.runtime_threads.unwrap_or_else(num_cpus::get);
    log::info!("starting runtime with {} threads", threads);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("error during runtime creation: {:?}", e);
            return;
        }
    };

    let handle = runtime.handle().clone();
    if let Err(e) = runtime.block_on(start(settings, handle)) {
        log::error!("error during server runtime: {:?}", e);
    }
}

fn setup_logger(level: LevelFilter, log_file: &Option<String>, pretty: bool) -> Result<()> {
    let mut colours = ColoredLevelConfig::new();

    if pretty {
        colours = colours
            .info(Color::Green)
            .warn(Color::Yellow)
            .error(Color::BrightRed)
            .debug(Color::Magenta)
            .trace(Color::Cyan);
    }

    let mut builder = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} | {} | {:<5} - {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colours.color(record.level()),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(file) = log_file {
        builder = builder.chain(fern::log_file(file)?);
    }

    builder.apply()?;

    Ok(())
}

async fn start(settings: Settings, runtime: tokio::runtime::Handle) -> Result<()> {
    let config = settings.server_config();
    std::fs::create_dir_all(&config.data)?;

    let pool = Arc::new(DbPool::new(config.data.clone(), settings.pool_config()));

    let timeouts = Timeouts::from_commit_timeout(config.commit_timeout);
    let commit_policy = Arc::new(CommitPolicy::new(timeouts, config.commit_slots));

    let writer_ctx = Arc::new(WriterContext {
        pool: pool.clone(),
        commit_policy,
        writers_db_path: config.data.join("Xapian-Writers.db"),
        writer_idle_timeout: config.writer_idle_timeout,
    });
    let writer_manager = WriterManager::new(writer_ctx, config.writers_pool_size);

    log::info!("checking for writers left running before the last shutdown");
    writer_manager.recover(&config, runtime.clone());

    let (central_tx, central_rx) = crossbeam::channel::unbounded();

    {
        let writer_manager = writer_manager.clone();
        let config = config.clone();
        let runtime = runtime.clone();
        std::thread::Builder::new()
            .name("writer-manager".to_string())
            .spawn(move || {
                while let Ok((endpoint, envelope)) = central_rx.recv() {
                    if let Err(e) =
                        writer_manager.dispatch(&config, endpoint.clone(), &envelope, runtime.clone())
                    {
                        log::error!("failed to dispatch write for {}: {}", endpoint, e);
                    }
                }
                log::info!("writer manager loop exiting, central queue closed");
            })
            .expect("failed to spawn writer manager thread");
    }

    tokio::spawn(pool.clone().run_reaper());

    let state = Arc::new(AppState {
        commands_semaphore: Arc::new(Semaphore::new(config.commands_pool_size.max(1))),
        config: config.clone(),
        pool,
        writer_manager,
        central_tx,
    });

    let listener = TcpListener::bind(&config.listener).await?;
    log::info!("listening on {}", config.listener);

    dispatch::run(listener, state).await
}

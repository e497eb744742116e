mod analyzer;
mod config;
mod encoder;
mod error;
mod queue;
mod recovery;
mod singleton;
mod store;
mod utils;

use anyhow::{Context, bail};
use clap::Parser;
use config::DaemonConfig;
use encoder::Ffmpeg;
use error::LockError;
use queue::ConversionWorker;
use recovery::RecoveryMarker;
use singleton::SingletonGuard;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::SqliteJobStore;
use tokio::signal;
use tracing::{error, info};

/// Converts uploaded videos to FLV, polling the upload table for work
#[derive(Debug, Parser)]
#[command(name = "flvconvd", version, about)]
struct Args {
    /// Configuration file [default: <work-dir>/conf/application.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the instance lock and the recovery marker; relative
    /// config and database paths are resolved against it
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Also write a daily rolling log file into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Create the upload table if the database does not have it yet
    #[arg(long)]
    init_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = utils::init_logging(args.log_dir.as_deref());

    info!("Video conversion daemon starting...");

    // Held until the process exits
    let instance = lock_instance(&args.work_dir)?;
    info!("Holding instance lock {}", instance.path().display());

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.work_dir.join(DaemonConfig::default_path()));
    let config = DaemonConfig::load(&config_path).context("Failed to load configuration")?;

    if !utils::check_transcoder(&config.converter.ffmpeg_path) {
        bail!(
            "{} -version failed, check converter.ffmpeg_path",
            config.converter.ffmpeg_path.display()
        );
    }

    let store = SqliteJobStore::new(config.database.resolve(&args.work_dir));
    if args.init_schema {
        store
            .ensure_schema()
            .context("Failed to create the upload table")?;
    }
    store.check_connection().with_context(|| {
        format!(
            "Failed to connect to job store {}",
            store.path().display()
        )
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker = ConversionWorker::new(
        store,
        Ffmpeg::new(&config.converter.ffmpeg_path),
        RecoveryMarker::in_dir(&args.work_dir),
        &config,
        stop.clone(),
    );

    info!(
        "Converting jobs for host filter {:?}",
        config.converter.host_filter
    );
    let mut handle = tokio::task::spawn_blocking(move || worker.run());

    tokio::select! {
        result = &mut handle => {
            result.context("Conversion worker panicked")??;
            return Ok(());
        }
        _ = shutdown_signal() => {
            info!("Stopping, please wait...");
            stop.store(true, Ordering::Relaxed);
        }
    }

    handle.await.context("Conversion worker panicked")??;
    info!("Video conversion daemon stopped");
    Ok(())
}

fn lock_instance(work_dir: &Path) -> anyhow::Result<SingletonGuard> {
    match SingletonGuard::acquire_in(work_dir) {
        Ok(instance) => Ok(instance),
        Err(LockError::AlreadyRunning) => bail!(
            "Another instance is already running in {}",
            work_dir.display()
        ),
        Err(e) => Err(e).context("Failed to take the instance lock"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

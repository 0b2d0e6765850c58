use anyhow::{Context, Result};
use backup_jobs::backup::{BackupManager, JobContext, ParallelExecutionManager, RunState};
use backup_jobs::events::{BroadcastListener, EventManager};
use backup_jobs::net::StatusServer;
use backup_jobs::storage::{JobRepository, StateStore};
use backup_jobs::utils::config::{Config, SettingsProvider};
use backup_jobs::utils::logging::init_tracing;
use backup_jobs::utils::DailyJsonLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// How long job threads get to reach a checkpoint after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;
    init_tracing(&config.log_format);

    info!("Starting backup-jobs v{}", env!("CARGO_PKG_VERSION"));
    info!("CPU cores available: {}", num_cpus::get());
    info!("Data directory: {}", config.data_dir.display());

    // State file, observers and the push channel for socket clients
    let (updates, _) = broadcast::channel(256);
    let events = EventManager::new(StateStore::open(config.state_file()));
    events.subscribe(Arc::new(BroadcastListener::new(updates.clone())));

    let settings: Arc<dyn SettingsProvider> = Arc::new(config.clone());
    let executor = ParallelExecutionManager::new(settings.as_ref());
    let context = JobContext::new(settings, events)
        .with_log_sink(Arc::new(DailyJsonLog::new(config.log_dir())));

    let manager = BackupManager::open(JobRepository::new(config.jobs_file()), context, executor)
        .context("loading jobs")?;
    info!("{} job(s) configured", manager.jobs().len());

    // A selection argument runs those jobs once and exits
    if let Some(selection) = std::env::args().nth(1) {
        let names = manager.select(&selection)?;
        info!("Running {:?}", names);

        let runner = manager.clone();
        let outcomes = tokio::task::spawn_blocking(move || runner.execute_jobs(&names)).await??;

        let mut failed = 0;
        for outcome in &outcomes {
            match outcome.state {
                RunState::Completed => {
                    info!("{}: completed in {}ms", outcome.job_name, outcome.duration_ms)
                }
                state => {
                    failed += 1;
                    warn!(
                        "{}: {:?} {}",
                        outcome.job_name,
                        state,
                        outcome.error.as_deref().unwrap_or_default()
                    );
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} job(s) did not complete", failed, outcomes.len());
        }
        return Ok(());
    }

    // Otherwise serve the status protocol until a signal arrives
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = StatusServer::new(manager.clone(), updates);
    let serving = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    serving.await??;

    manager.shutdown();
    let executor = manager.executor().clone();
    let drained = tokio::task::spawn_blocking(move || executor.wait_idle(DRAIN_TIMEOUT)).await?;
    if !drained {
        warn!("Some jobs were still copying when the drain timeout expired");
    }

    info!("Stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

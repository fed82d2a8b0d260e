use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use knocker::{config, db, ids, queue::QueueClient, scheduler, worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Scheduler,
    Worker,
    Api,
    All,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributed uptime monitoring", long_about = None)]
struct Args {
    /// Process mode to run.
    #[arg(value_enum, default_value_t = Mode::All)]
    mode: Mode,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation.
    let file_appender = rolling::daily("logs", "knocker.log");
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).json();

    // Log to stdout: human-readable format.
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging();
    dotenv().ok();

    let cfg = config::init()?;
    info!(app = %cfg.app_name, env = ?cfg.app_env, "starting");

    ids::init(cfg.app_machine_id)?;

    let pool = db::init_pool().await?;
    config::init_regions(&pool).await?;

    let queue = QueueClient::connect(&cfg.redis_url()).await?;

    let run_all = args.mode == Mode::All;

    if run_all || args.mode == Mode::Api {
        // The admin API ships separately; the mode is accepted so process
        // managers using it keep working.
        warn!("admin api is not part of this build, mode is a no-op");
    }

    let mut worker_recorder = None;
    if run_all || args.mode == Mode::Worker {
        let recorder = worker::new_recorder(pool.clone());
        worker_recorder = Some(recorder.clone());

        let worker_pool = pool.clone();
        let worker_queue = queue.clone();
        tokio::spawn(async move {
            if let Err(err) = worker::run(worker_pool, worker_queue, recorder).await {
                error!(error = %err, "worker terminated");
            }
        });
    }

    if run_all || args.mode == Mode::Scheduler {
        let scheduler_pool = pool.clone();
        let scheduler_queue = queue.clone();
        tokio::spawn(async move {
            scheduler::run(scheduler_pool, scheduler_queue).await;
        });
    }

    wait_for_shutdown().await;
    info!("shutting down gracefully");

    // Drain buffered samples before the process exits; everything recorded
    // up to the signal is persisted or re-enqueued.
    if let Some(recorder) = worker_recorder {
        recorder.shutdown().await;
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

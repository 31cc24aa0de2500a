use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use hd_common::clock::SystemClock;
use hd_common::config::DripConfig;
use hd_common::db::{create_pool_from_url_checked, run_migrations};
use hd_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use hd_common::queue::PgQueue;
use hd_common::store::PgLeadStore;
use hd_common::transport::LogTransport;
use hd_common::worker::Worker;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hd-worker", about = "Drain today's drip message queue")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    /// Worker id recorded in logs
    #[arg(long, default_value = "hd-worker")]
    worker_id: String,

    /// Optional cap on how many entries to process in one run
    #[arg(long)]
    max_entries: Option<usize>,

    /// Drain today's queue and exit instead of polling forever
    #[arg(long, default_value_t = false)]
    exit_on_empty: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let args = Cli::parse();
    let config = DripConfig::from_env();

    let pool = create_pool_from_url_checked(&args.db_url).await?;
    run_migrations(&pool).await?;

    let status = pool.status();
    info!(
        size = status.size,
        available = status.available,
        worker_id = %args.worker_id,
        daily_max = config.daily_max,
        poll_interval_ms = config.poll_interval_ms,
        message_delay_ms = config.message_delay_ms,
        visibility_timeout_secs = config.visibility_timeout_secs,
        retention_days = config.retention_days,
        test_mode = config.test_mode,
        "created postgres connection pool for drip worker"
    );

    let worker = Worker::new(
        Arc::new(PgQueue::new(pool.clone())),
        Arc::new(PgLeadStore::new(pool)),
        Arc::new(LogTransport),
        Arc::new(SystemClock),
        config,
    );

    if args.exit_on_empty {
        let processed = worker.drain(args.max_entries).await;
        info!(processed, "queue drained; exiting");
        return Ok(());
    }

    worker.start().await;
    shutdown_signal().await;
    info!("shutdown signal received");
    worker.stop().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("hd-worker failed: {err}");
        std::process::exit(1);
    }
}

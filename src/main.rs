mod api;
mod config;
mod db;
mod error;
mod notify;
mod orchestrator;
mod scheduler;
mod sources;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::{
    min_send_interval, Config, HTTP_TIMEOUT_SECS, NOTIFIER_SHUTDOWN_SECS, QUEUE_CAPACITY,
    SHUTDOWN_TIMEOUT_SECS,
};
use crate::db::store::open_pool;
use crate::db::SqliteListingStore;
use crate::error::Result;
use crate::notify::{NotificationQueue, TelegramClient};
use crate::orchestrator::Orchestrator;
use crate::scheduler::ScrapeScheduler;
use crate::sources::{KarlancerSource, PonishaSource, SourceFetcher};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database ---
    let pool = open_pool(&cfg.db_path).await?;
    let store = Arc::new(SqliteListingStore::new(pool.clone()));

    // --- Shared HTTP client (sources + Telegram) ---
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    // --- Notification delivery ---
    let telegram = Arc::new(TelegramClient::new(http.clone(), &cfg));
    let (queue, delivery) = NotificationQueue::spawn(telegram, QUEUE_CAPACITY, min_send_interval());
    info!(
        chat = %cfg.telegram_chat,
        thread = ?cfg.telegram_thread_id,
        "Telegram delivery worker started"
    );

    // --- Sources + orchestrator ---
    let sources: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(PonishaSource::new(http.clone(), cfg.ponisha_base_url.clone())),
        Arc::new(KarlancerSource::new(http.clone(), cfg.karlancer_base_url.clone())),
    ];
    let orchestrator = Arc::new(Orchestrator::new(sources, store, Arc::new(queue)));

    // --- Triggers ---
    let root = CancellationToken::new();
    let scheduler_cancel = root.child_token();
    let scheduler = ScrapeScheduler::new(&cfg.scrape_cron, Arc::clone(&orchestrator), scheduler_cancel.clone())?;
    let scheduler_task = tokio::spawn(scheduler.run());

    let app = router(ApiState {
        orchestrator: Arc::clone(&orchestrator),
        shutdown: root.clone(),
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown ---
    info!("Shutting down...");
    let shutdown = async {
        scheduler_cancel.cancel();
        if let Err(e) = scheduler_task.await {
            warn!("Scheduler task ended abnormally: {e}");
        }
        root.cancel();
        delivery
            .shutdown(Duration::from_secs(NOTIFIER_SHUTDOWN_SECS))
            .await;
        pool.close().await;
    };
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), shutdown)
        .await
        .is_err()
    {
        warn!("Shutdown did not finish within {SHUTDOWN_TIMEOUT_SECS}s");
    }
    info!("Stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

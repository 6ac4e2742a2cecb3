//! feedrelay service entrypoint: scheduler, retention sweeper and admin API.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use feedrelay_common::config::{AppConfig, ConfigStore};
use feedrelay_common::db;
use feedrelay_engine::formatter::{Formatter, TemplateFormatter};
use feedrelay_engine::ledger::{Ledger, SqliteLedger};
use feedrelay_feeds::{FeedFetcher, HttpFeedFetcher};
use feedrelay_notifier::{Pacer, RateLimitedSender, RetryPolicy, TelegramClient};
use feedrelay_scheduler::{FeedScheduler, RetentionSweeper, SourcePoller};

use feedrelay_api::routes::create_router;
use feedrelay_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "feedrelay=info,feedrelay_api=info,feedrelay_scheduler=info,\
                 feedrelay_notifier=info,feedrelay_engine=info,feedrelay_feeds=info,\
                 tower_http=info",
            )
        }))
        .json()
        .init();

    tracing::info!("Starting feedrelay...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let store = Arc::new(ConfigStore::load(&config.feeds_config_path)?);

    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher::new(config.http_timeout())?);
    let formatter: Arc<dyn Formatter> = Arc::new(TemplateFormatter);
    let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::new(pool.clone()));
    let transport = Arc::new(TelegramClient::new(
        config.telegram_api_base.clone(),
        config.http_timeout(),
    )?);
    // One pacer for the whole process: scheduled and admin sends share it.
    let sender = Arc::new(RateLimitedSender::new(
        transport,
        Pacer::default(),
        RetryPolicy::default(),
    ));
    let poller = Arc::new(SourcePoller::new(
        fetcher.clone(),
        formatter.clone(),
        ledger.clone(),
        sender.clone(),
    ));
    let scheduler = Arc::new(FeedScheduler::new(poller));

    let sweeper_cancel = CancellationToken::new();
    let sweeper = RetentionSweeper::new(ledger, store.subscribe(), config.sweep_interval())
        .spawn(sweeper_cancel.clone());

    // Initial polls may sit in retry waits for minutes; keep them off the
    // startup path so the admin API comes up immediately.
    let starting = {
        let scheduler = scheduler.clone();
        let sources = store.sources();
        tokio::spawn(async move { scheduler.start(sources).await })
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        config.clone(),
        store,
        scheduler.clone(),
        fetcher,
        formatter,
        sender,
        shutdown.clone(),
    );
    let reloader = spawn_reload_on_hangup(state.clone())?;

    let app = create_router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Admin API listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal.cancel();
        })
        .await?;

    tracing::info!("Received shutdown signal, stopping gracefully...");
    shutdown.cancel();
    scheduler.shutdown().await;
    join_task("scheduler start", starting).await;
    if let Some(reloader) = reloader {
        join_task("reload listener", reloader).await;
    }
    sweeper_cancel.cancel();
    join_task("retention sweeper", sweeper).await;
    pool.close().await;

    tracing::info!("feedrelay stopped.");
    Ok(())
}

/// Await a background task, logging a panic or abort. Returns whether it
/// ended cleanly.
async fn join_task(name: &str, handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(task = name, error = %e, "Background task ended abnormally");
            false
        }
    }
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Reload sources on SIGHUP until shutdown.
#[cfg(unix)]
fn spawn_reload_on_hangup(
    state: AppState,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGHUP received, reloading sources");
                    match state.reload_sources().await {
                        Ok(sources) => tracing::info!(sources, "Sources reloaded"),
                        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current sources"),
                    }
                }
            }
        }
    })))
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(
    _state: AppState,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    Ok(None)
}

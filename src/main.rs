mod analysis;
mod api;
mod backfill;
mod config;
mod db;
mod error;
mod filter;
mod ingest;
mod llm;
mod state;
mod status;
mod types;
mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::{AnalysisCounters, AnalysisScheduler};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::backfill::run_backfill;
use crate::config::{Config, STORE_CHANNEL_CAPACITY, STORE_DRAIN_TIMEOUT_SECS};
use crate::db::{load_snapshot, save_snapshot, DbWriter};
use crate::error::{AppError, Result};
use crate::filter::{FilterPipeline, LlmSemanticFilter, PassThrough, SemanticFilter};
use crate::ingest::{trade_queue, IngestStats, Ingestor, TradeConsumer};
use crate::llm::{ChatClient, Llm};
use crate::state::MarketStore;
use crate::status::{StatusReporter, StatusSources};
use crate::ws::FeedConnector;

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
    // Listen for SIGINT/SIGTERM from here on so every later phase ends through the persist path.
    let signal = shutdown_signal();
    tokio::pin!(signal);

    // --- Database setup + restore ---
    let pool = db::connect(&cfg.db_path).await?;
    let store = MarketStore::new();
    store.load(load_snapshot(&pool).await?);
    info!("[DB] ready at {}, restored {} markets", cfg.db_path, store.len());

    // --- Shared state ---
    let health = Arc::new(HealthState::new());
    let ingest_stats = Arc::new(IngestStats::new());
    let analysis_counters = Arc::new(AnalysisCounters::new());
    let semantic_latency = Arc::new(LatencyStats::new());
    let reasoning_latency = Arc::new(LatencyStats::new());

    // --- AI collaborators ---
    let llm: Option<Arc<dyn Llm>> = match cfg.llm.api_key {
        Some(_) => Some(Arc::new(ChatClient::new(&cfg.llm)?)),
        None => {
            warn!("LLM_API_KEY not set: semantic filter is pass-through and the analysis scheduler is disabled");
            None
        }
    };
    let semantic: Arc<dyn SemanticFilter> = match &llm {
        Some(llm) => Arc::new(LlmSemanticFilter::new(Arc::clone(llm))),
        None => Arc::new(PassThrough),
    };

    // --- Channels ---
    let (store_tx, store_rx) = mpsc::channel(STORE_CHANNEL_CAPACITY);
    let (queue, trade_rx) = trade_queue(cfg.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = Arc::new(FilterPipeline::new(
        &cfg.filter,
        semantic,
        Arc::clone(&semantic_latency),
    ));
    let ingestor = Arc::new(Ingestor::new(
        pipeline,
        Arc::clone(&store),
        cfg.tiers,
        store_tx.clone(),
        Arc::clone(&ingest_stats),
        Arc::clone(&health),
    ));

    // --- Spawn tasks ---
    let mut tasks: JoinSet<&'static str> = JoinSet::new();

    // Store writer first so backfill events have somewhere to go.
    let writer = DbWriter::new(pool.clone(), store_rx, Arc::clone(&health));
    tasks.spawn(async move {
        writer.run().await;
        "store writer"
    });

    // Historical backfill (one-shot, before the feed connects)
    if cfg.backfill_enabled {
        let interrupted = until_signal(&mut signal, async {
            if let Err(e) = run_backfill(&cfg, &ingestor).await {
                warn!("[BACKFILL] skipped: {e}");
            }
        })
        .await;
        if let Some(name) = interrupted {
            info!("{name} received during backfill, shutting down");
            health.set_shutting_down();
            let _ = shutdown_tx.send(true);
            persist(&pool, &store, &health).await;
            tasks.abort_all();
            return Ok(());
        }
    }

    // Feed connector
    let connector = FeedConnector::new(
        cfg.ws_url.clone(),
        queue.clone(),
        Arc::clone(&health),
        cfg.reconnect_delay,
        shutdown_rx.clone(),
    );
    tasks.spawn(async move {
        connector.run().await;
        "feed connector"
    });

    // Queue consumer
    let consumer = TradeConsumer::new(trade_rx, Arc::clone(&ingestor));
    tasks.spawn(async move {
        consumer.run().await;
        "queue consumer"
    });

    // Status reporter
    let sources = StatusSources {
        store: Arc::clone(&store),
        ingest: Arc::clone(&ingest_stats),
        analysis: Arc::clone(&analysis_counters),
        queue,
        health: Arc::clone(&health),
    };
    let reporter = StatusReporter::new(sources.clone(), cfg.status_interval);
    tasks.spawn(async move {
        reporter.run().await;
        "status reporter"
    });

    // Analysis scheduler (only with a reasoning collaborator)
    if let Some(llm) = llm {
        let scheduler = AnalysisScheduler::new(
            Arc::clone(&store),
            llm,
            cfg.analysis.clone(),
            store_tx,
            analysis_counters,
            Arc::clone(&reasoning_latency),
            Arc::clone(&health),
        );
        tasks.spawn(async move {
            scheduler.run().await;
            "analysis scheduler"
        });
    }

    // HTTP API server
    let app = router(ApiState {
        sources,
        semantic_latency,
        reasoning_latency,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let failure = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!("HTTP API listening on {bind_addr}");
            let mut api_shutdown = shutdown_rx;
            tasks.spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = api_shutdown.changed().await;
                });
                if let Err(e) = serve.await {
                    error!("HTTP API error: {e}");
                }
                "http api"
            });
            // --- Wait for a signal or a task that should never end ---
            supervise(&mut signal, &mut tasks).await
        }
        Err(e) => {
            let reason = format!("HTTP API bind on {bind_addr} failed: {e}");
            error!("{reason}");
            Some(reason)
        }
    };

    health.set_shutting_down();
    let _ = shutdown_tx.send(true);
    persist(&pool, &store, &health).await;
    tasks.abort_all();

    match failure {
        Some(reason) => Err(AppError::Task(reason)),
        None => Ok(()),
    }
}

/// Drive `work` to completion unless `signal` fires first; returns the signal name if so.
async fn until_signal<S, W>(signal: &mut S, work: W) -> Option<&'static str>
where
    S: Future<Output = &'static str> + Unpin,
    W: Future<Output = ()>,
{
    tokio::select! {
        _ = work => None,
        name = signal => Some(name),
    }
}

/// Wait for a shutdown signal (`None`) or for any supervised task to end (`Some(reason)`).
async fn supervise<S>(signal: &mut S, tasks: &mut JoinSet<&'static str>) -> Option<String>
where
    S: Future<Output = &'static str> + Unpin,
{
    tokio::select! {
        name = signal => {
            info!("{name} received, shutting down");
            None
        }
        Some(joined) = tasks.join_next() => {
            let reason = match joined {
                Ok(name) => format!("{name} exited unexpectedly"),
                Err(e) => format!("task panicked: {e}"),
            };
            error!("{reason}");
            Some(reason)
        }
    }
}

/// Save the market table, then give the store writer a bounded window to flush queued events.
async fn persist(pool: &sqlx::SqlitePool, store: &MarketStore, health: &HealthState) {
    if let Err(e) = save_snapshot(pool, &store.snapshot()).await {
        error!("[DB] failed to persist market table: {e}");
    }
    if !drain_writes(health, Duration::from_secs(STORE_DRAIN_TIMEOUT_SECS)).await {
        warn!(
            "[DB] {} store events still pending at exit",
            health.write_queue_pending()
        );
    }
}

/// True once the writer has no pending events; false if `timeout` elapses first.
async fn drain_writes(health: &HealthState, timeout: Duration) -> bool {
    let drained = async {
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        while health.write_queue_pending() > 0 {
            tick.tick().await;
        }
    };
    tokio::time::timeout(timeout, drained).await.is_ok()
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

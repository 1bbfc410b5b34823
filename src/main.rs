//! engagement-relay server entry point.
//!
//! Wires the delivery core together and serves the event stream, event
//! injection and health endpoints until Ctrl-C or SIGTERM.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use engagement_relay::api;
use engagement_relay::app_state::AppState;
use engagement_relay::automation::{AutomationBridge, LogActionSink};
use engagement_relay::config::{LogFormat, RelayConfig};
use engagement_relay::error::RelayError;
use engagement_relay::event::{Bus, MemoryBus, ResilientPublisher};
use engagement_relay::persistence::DeadLetterSink;
use engagement_relay::sse::{BroadcastHub, HubBridge, stats_job};
use engagement_relay::worker::{Scheduler, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    init_tracing(log_format);

    // Load configuration
    let config = RelayConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting engagement-relay");

    // Delivery core
    let sink = Arc::new(DeadLetterSink::open(&config.event_deadletter_path)?);
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let publisher = Arc::new(ResilientPublisher::new(
        Arc::clone(&bus),
        Arc::clone(&sink),
        config.retry_settings(),
    ));

    // Streaming
    let hub = Arc::new(BroadcastHub::new(config.hub_settings()));
    hub.start().await;
    HubBridge::new(Arc::clone(&hub)).subscribe(bus.as_ref());

    // Stream automation
    AutomationBridge::new(Arc::new(LogActionSink)).subscribe(bus.as_ref());

    // Background work
    let pool = Arc::new(WorkerPool::new(
        config.worker_pool_size,
        config.worker_queue_capacity,
    ));
    pool.start().await;
    let scheduler = Scheduler::new(Arc::clone(&pool));
    scheduler.schedule(config.hub_stats_interval, stats_job(&hub));

    // Build router
    let app_state = AppState {
        publisher: Arc::clone(&publisher),
        hub: Arc::clone(&hub),
        keepalive: config.sse_keepalive,
    };
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let stop_http = CancellationToken::new();
    let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(stop_http.clone().cancelled_owned())
            .into_future(),
    );

    let mut server_done = false;
    tokio::select! {
        () = shutdown_signal() => {}
        finished = &mut server => {
            server_done = true;
            log_server_exit(finished);
        }
    }

    // Ordered shutdown
    let timeout = config.shutdown_timeout;
    stop_http.cancel();
    let drained = server_done || wait_server(&mut server, timeout).await;
    if !drained {
        tracing::warn!("open streams kept the HTTP server alive, closing them via the hub");
    }

    report("scheduler", scheduler.shutdown(timeout).await);
    report("worker pool", pool.shutdown(timeout).await);
    report("broadcast hub", hub.shutdown(timeout).await);
    if !drained && !wait_server(&mut server, timeout).await {
        tracing::warn!("HTTP server did not stop, aborting it");
        server.abort();
    }
    report("resilient publisher", publisher.shutdown(timeout).await);
    report("dead-letter sink", sink.close().await);

    tracing::info!(
        dead_lettered = publisher.dead_lettered(),
        "engagement-relay stopped"
    );
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Waits for Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

/// Waits up to `timeout` for the server task. Returns `true` once it ended.
async fn wait_server(server: &mut JoinHandle<std::io::Result<()>>, timeout: Duration) -> bool {
    match time::timeout(timeout, server).await {
        Ok(finished) => {
            log_server_exit(finished);
            true
        }
        Err(_) => false,
    }
}

fn log_server_exit(finished: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => tracing::info!("HTTP server stopped"),
        Ok(Err(err)) => tracing::error!(error = %err, "HTTP server failed"),
        Err(err) => tracing::error!(error = %err, "HTTP server task failed"),
    }
}

fn report(component: &str, result: Result<(), RelayError>) {
    match result {
        Ok(()) => tracing::debug!(component, "component stopped"),
        Err(err) if err.is_timeout() => {
            tracing::warn!(component, error = %err, "shutdown timed out, continuing");
        }
        Err(err) => tracing::error!(component, error = %err, "shutdown failed"),
    }
}

//! Kraken auto-sell agent entrypoint
//!
//! Startup order matters: authenticate and load the pair catalog, run the
//! cold pass over the fetched balance, and only then start the stream so
//! the first snapshot reconciles against cold-pass state instead of
//! duplicating its work.

use anyhow::{Context, Result};
use clap::Parser;
use kraken_autosell::services::{
    AssetRegistry, AutoSellEngine, BalanceFeed, FeedStatus, KrakenClient, LogSink, Metrics,
};
use kraken_autosell::{api, Config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Feed-to-engine channel depth; a burst of updates larger than this
/// backpressures the socket reader, which is fine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for in-flight submissions to settle
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "kraken-autosell")]
#[command(about = "Liquidates every non-fiat Kraken balance into the target fiat")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let log_level = if cli.verbose || config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!(
        "starting kraken-autosell: target fiat {}, sandbox {}",
        config.target_fiat, config.sandbox
    );

    let metrics = Metrics::new();
    let sink = LogSink::start(config.log_sink_url.clone(), config.log_sink_token.clone());
    let client = Arc::new(KrakenClient::new(&config, metrics.clone()));

    let registry = Arc::new(AssetRegistry::new(&config.target_fiat));
    let catalog = client
        .asset_pairs()
        .await
        .context("failed to load the tradable pair catalog")?;
    registry.load(catalog);
    info!("loaded {} tradable pair listings", registry.pair_count());

    let engine = Arc::new(AutoSellEngine::new(
        client.clone(),
        registry.clone(),
        metrics.clone(),
        sink.clone(),
    ));
    // Also the startup authentication check: bad credentials die here
    engine.cold_pass().await.context("cold pass failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let feed_status = Arc::new(FeedStatus::new());
    let feed = BalanceFeed::new(
        client.clone(),
        config.ws_url().to_string(),
        event_tx,
        feed_status.clone(),
        metrics.clone(),
    );
    let feed_task = tokio::spawn(feed.run(shutdown_rx.clone()));
    let engine_task = tokio::spawn(engine.clone().run(event_rx, shutdown_rx.clone()));

    let running = Arc::new(AtomicBool::new(true));
    let state = api::AppState::new(
        engine.clone(),
        client.clone(),
        feed_status,
        metrics,
        running.clone(),
    );
    let app = api::create_app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    info!("status surface listening on {}", listener.local_addr()?);

    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while server_shutdown.changed().await.is_ok() {
                    if *server_shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    running.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(true);

    // In-flight submissions are never aborted mid-flight; give them a
    // bounded window to settle.
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while engine.in_flight() > 0 && Instant::now() < deadline {
        sleep(Duration::from_millis(100)).await;
    }
    let remaining = engine.in_flight();
    if remaining > 0 {
        warn!("exiting with {} submission cycle(s) still in flight", remaining);
    }

    let _ = feed_task.await;
    let _ = engine_task.await;
    let _ = server_task.await;

    info!("clean shutdown");
    Ok(())
}

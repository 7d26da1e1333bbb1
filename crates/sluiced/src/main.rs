//! sluiced — the autoscaling queue-consumer daemon.
//!
//! Wires the metrics engine, worker pool, and scaler together around a
//! queue transport and runs until SIGTERM/SIGINT. This build carries the
//! in-memory transport for local runs; production transports implement
//! `sluice_queue::QueueClient` out of tree.
//!
//! # Usage
//!
//! ```text
//! sluiced --initial-workers 5 --min-workers 2 --max-workers 100
//! sluiced --seed-messages 500 --simulate-processing-ms 250
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use sluice_autoscale::{Scaler, ScalerConfig};
use sluice_consumer::{handler_fn, Consumer, ConsumerConfig};
use sluice_metrics::{LogPublisher, MetricsEngine};
use sluice_queue::MemoryQueue;

#[derive(Parser)]
#[command(name = "sluiced", about = "Autoscaling queue consumer daemon")]
struct Cli {
    /// Queue to drain.
    #[arg(long, default_value = "memory://events")]
    queue_url: String,

    /// Workers started at boot.
    #[arg(long, default_value = "5")]
    initial_workers: usize,

    /// Lower pool bound.
    #[arg(long, default_value = "2")]
    min_workers: usize,

    /// Upper pool bound.
    #[arg(long, default_value = "100")]
    max_workers: usize,

    /// Queue depth above which the pool grows.
    #[arg(long, default_value = "50")]
    scale_up_threshold: f64,

    /// Queue depth below which the pool may shrink.
    #[arg(long, default_value = "10")]
    scale_down_threshold: f64,

    /// Scale-down cooldown in seconds.
    #[arg(long, default_value = "30")]
    cooldown_secs: u64,

    /// Target processing time in seconds (also the visibility
    /// reservation taken per receive).
    #[arg(long, default_value = "30")]
    target_processing_secs: u64,

    /// Namespace reported to the metric sink.
    #[arg(long, default_value = "sluice")]
    metrics_namespace: String,

    /// Demo messages enqueued at boot (local mode).
    #[arg(long, default_value = "0")]
    seed_messages: usize,

    /// Simulated per-message processing delay in milliseconds.
    #[arg(long, default_value = "0")]
    simulate_processing_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sluiced=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    info!("sluiced starting");

    // ── Initialize subsystems ──────────────────────────────────

    let queue = Arc::new(MemoryQueue::new());
    for i in 0..cli.seed_messages {
        queue.send(format!("demo-{i}")).await;
    }
    if cli.seed_messages > 0 {
        info!(count = cli.seed_messages, "seeded demo messages");
    }

    let engine = MetricsEngine::new(Arc::new(LogPublisher), cli.metrics_namespace.clone());
    info!(namespace = %cli.metrics_namespace, "metrics engine initialized");

    let simulated_delay = Duration::from_millis(cli.simulate_processing_ms);
    let handler = handler_fn(move |message| async move {
        info!(message_id = %message.id, "processing message");
        if !simulated_delay.is_zero() {
            tokio::time::sleep(simulated_delay).await;
        }
        Ok(())
    });

    let consumer_config = ConsumerConfig {
        queue_url: cli.queue_url.clone(),
        initial_workers: cli.initial_workers,
        min_workers: cli.min_workers,
        max_workers: cli.max_workers,
        processing_time: Duration::from_secs(cli.target_processing_secs),
    };
    let scaler_config = ScalerConfig {
        scale_up_threshold: cli.scale_up_threshold,
        scale_down_threshold: cli.scale_down_threshold,
        cooldown: Duration::from_secs(cli.cooldown_secs),
        target_processing_time: Duration::from_secs(cli.target_processing_secs),
        ..ScalerConfig::default()
    };

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start the consumer system ──────────────────────────────

    let consumer = Arc::new(Consumer::new(
        queue,
        engine.clone(),
        handler,
        consumer_config,
        shutdown_rx.clone(),
    ));
    consumer.start().await?;

    let engine_runner = engine.clone();
    let engine_shutdown = shutdown_rx.clone();
    let engine_handle = tokio::spawn(async move {
        engine_runner.run(engine_shutdown).await;
    });

    let mut scaler = Scaler::new(engine, Arc::clone(&consumer), scaler_config);
    let scaler_shutdown = shutdown_rx.clone();
    let scaler_handle = tokio::spawn(async move {
        scaler.run(scaler_shutdown).await;
    });

    // ── Wait for shutdown ──────────────────────────────────────

    shutdown_signal().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    consumer.shutdown().await;

    let _ = engine_handle.await;
    let _ = scaler_handle.await;

    info!("sluiced stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }
}

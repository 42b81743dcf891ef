//! Validator entry point: load config, resolve the symbol map, spawn the
//! three venue feeds, run the aggregator until SIGINT/SIGTERM, then flush
//! and close the record files under a hard shutdown ceiling.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arb_validator::aggregator::{Aggregator, Outputs, VenueMetrics};
use arb_validator::config::Config;
use arb_validator::feeds::binance::BinanceClient;
use arb_validator::feeds::bittap::BittapClient;
use arb_validator::feeds::okx::OkxClient;
use arb_validator::metadata::build_symbol_maps;
use arb_validator::output::JsonlWriter;

/// Everything past the aggregator exit (final snapshot, writer close) must
/// finish inside this window or the process force-exits.
const SHUTDOWN_CEILING: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "arb-validator")]
#[command(about = "Latency-arbitrage feasibility validator (paper trading only)")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load config: {err:#}");
            std::process::exit(1);
        }
    };

    init_tracing(&cfg.app.log_level);

    if let Err(err) = run(cfg).await {
        error!(error = %format!("{err:#}"), "validator exited with error");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("arb_validator={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cfg: Config) -> Result<()> {
    info!(app = %cfg.app.name, symbols = cfg.symbols.len(), "starting validator");

    // Startup collaborator: resolve every configured symbol against all
    // three venues, failing fast on any miss.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(cfg.metadata.timeout_ms))
        .user_agent("arb-validator/0.1")
        .build()
        .context("building http client")?;
    let symbol_maps = build_symbol_maps(&http, &cfg)
        .await
        .context("building symbol maps")?;
    info!(mapped = symbol_maps.len(), "symbol maps ready");

    // Record sinks.
    let outputs = Outputs {
        signals: if cfg.output.signals_enabled {
            Some(
                JsonlWriter::create(
                    format!("{}/signals.jsonl", cfg.output.dir),
                    cfg.output.buffer_size,
                )
                .await?,
            )
        } else {
            None
        },
        paper_trades: if cfg.output.paper_trades_enabled {
            Some(
                JsonlWriter::create(
                    format!("{}/paper_trades.jsonl", cfg.output.dir),
                    cfg.output.buffer_size,
                )
                .await?,
            )
        } else {
            None
        },
        metrics: if cfg.output.metrics_enabled {
            Some(
                JsonlWriter::create(
                    format!("{}/metrics.jsonl", cfg.output.dir),
                    cfg.output.buffer_size,
                )
                .await?,
            )
        } else {
            None
        },
    };

    // Venue feeds. Each client owns its socket and pushes normalized events
    // through a bounded channel; the aggregator is the only consumer.
    let (okx, okx_rx) = OkxClient::new(cfg.ws.okx.clone(), &symbol_maps);
    let (binance, binance_rx) = BinanceClient::new(cfg.ws.binance.clone(), &symbol_maps);
    let (bittap, bittap_rx) = BittapClient::new(cfg.ws.bittap.clone(), &symbol_maps);

    let venue_metrics = VenueMetrics {
        okx: okx.metrics(),
        binance: binance.metrics(),
        bittap: bittap.metrics(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx.clone());

    let okx_task = tokio::spawn(okx.run(shutdown_rx.clone()));
    let binance_task = tokio::spawn(binance.run(shutdown_rx.clone()));
    let bittap_task = tokio::spawn(bittap.run(shutdown_rx.clone()));

    let mut aggregator = Aggregator::new(&cfg);
    let run_result = aggregator
        .run(
            okx_rx,
            binance_rx,
            bittap_rx,
            &venue_metrics,
            &outputs,
            shutdown_rx,
        )
        .await;

    // Make sure the feed tasks are told to stop even when the aggregator
    // exited on its own (e.g. every channel closed).
    let _ = shutdown_tx.send(true);

    let shutdown = async {
        // One last snapshot so offline analysis sees the end state.
        if let Some(writer) = &outputs.metrics {
            let snap = aggregator.metrics_snapshot(&venue_metrics);
            writer.try_write(&snap);
        }

        for task in [okx_task, binance_task, bittap_task] {
            if let Err(err) = task.await {
                warn!(error = %err, "feed task join failed");
            }
        }

        if let Some(writer) = outputs.signals {
            if let Err(err) = writer.close().await {
                warn!(error = %format!("{err:#}"), "closing signals writer");
            }
        }
        if let Some(writer) = outputs.paper_trades {
            if let Err(err) = writer.close().await {
                warn!(error = %format!("{err:#}"), "closing paper trades writer");
            }
        }
        if let Some(writer) = outputs.metrics {
            if let Err(err) = writer.close().await {
                warn!(error = %format!("{err:#}"), "closing metrics writer");
            }
        }
    };

    if tokio::time::timeout(SHUTDOWN_CEILING, shutdown).await.is_err() {
        warn!("shutdown ceiling exceeded, forcing exit");
    } else {
        info!("shutdown complete");
    }

    run_result
}

/// First SIGINT/SIGTERM triggers the cooperative shutdown; everything
/// observing the watch channel unwinds from there.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(error = %err, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        let _ = shutdown_tx.send(true);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

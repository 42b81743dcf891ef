//! The single-writer hub.
//!
//! One task owns every piece of mutable core state: the book store, the lag
//! tracker, and a per-leader (engine, executor, EV) triple. All book events
//! from the three venue channels funnel through `handle_event` sequentially,
//! so no lock guards any of it; the only cross-task memory is the bounded
//! channels and the venues' atomic connection metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::SignalEngine;
use crate::feeds::{ConnectionMetrics, ConnectionMetricsSnapshot};
use crate::model::{BookEvent, ExitReason, Venue, LEADERS};
use crate::output::JsonlWriter;
use crate::paper::PaperExecutor;
use crate::stats::ev::{apply_rejection, EvCalculator, EvStats};
use crate::stats::latency::{LagTracker, LatencyStats};
use crate::store::BookStore;
use crate::util::clock;

/// How long the post-shutdown drain may keep processing buffered events.
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// Signal engine, paper executor and EV window for one leader. The triple
/// lives and dies together so state can never cross leader links.
pub struct LeaderLink {
    pub leader: Venue,
    pub engine: SignalEngine,
    pub executor: PaperExecutor,
    pub ev: EvCalculator,
}

/// Atomic gauge handles published by the three venue clients.
pub struct VenueMetrics {
    pub okx: Arc<ConnectionMetrics>,
    pub binance: Arc<ConnectionMetrics>,
    pub bittap: Arc<ConnectionMetrics>,
}

/// Enabled record sinks. A `None` writer disables that record stream.
pub struct Outputs {
    pub signals: Option<JsonlWriter>,
    pub paper_trades: Option<JsonlWriter>,
    pub metrics: Option<JsonlWriter>,
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub ts_unix_ns: i64,
    pub okx: ConnectionMetricsSnapshot,
    pub binance: ConnectionMetricsSnapshot,
    pub bittap: ConnectionMetricsSnapshot,
    pub latency_okx: LatencyStats,
    pub latency_binance: LatencyStats,
    pub ev_okx: EvStats,
    pub ev_binance: EvStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updates_per_sec: Vec<UpdateRate>,
}

#[derive(Serialize)]
pub struct UpdateRate {
    pub exchange: Venue,
    pub symbol_canon: String,
    pub updates_per_sec: f64,
}

pub struct Aggregator {
    store: BookStore,
    lag: LagTracker,
    links: [LeaderLink; 2],
    counts: HashMap<(Venue, String), i64>,
    last_counts: HashMap<(Venue, String), i64>,
    last_metrics_at_ns: i64,
    metrics_interval_ms: u64,
}

impl Aggregator {
    pub fn new(cfg: &Config) -> Self {
        let links = LEADERS.map(|leader| LeaderLink {
            leader,
            engine: SignalEngine::new(leader, cfg.strategy.clone()),
            executor: PaperExecutor::new(leader, cfg.paper.clone(), cfg.fees.bittap),
            ev: EvCalculator::new(crate::stats::ev::DEFAULT_WINDOW),
        });
        Self {
            store: BookStore::new(),
            lag: LagTracker::default(),
            links,
            counts: HashMap::new(),
            last_counts: HashMap::new(),
            last_metrics_at_ns: clock::now_ns(),
            metrics_interval_ms: cfg.output.metrics_interval_ms.max(1),
        }
    }

    /// Select over the three venue queues and the metrics tick until shutdown
    /// fires or every queue closes, then drain what is already buffered.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &mut self,
        mut okx_rx: mpsc::Receiver<BookEvent>,
        mut binance_rx: mpsc::Receiver<BookEvent>,
        mut bittap_rx: mpsc::Receiver<BookEvent>,
        venue_metrics: &VenueMetrics,
        outputs: &Outputs,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = interval(Duration::from_millis(self.metrics_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        let mut okx_open = true;
        let mut binance_open = true;
        let mut bittap_open = true;

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                ev = okx_rx.recv(), if okx_open => match ev {
                    Some(ev) => self.handle_event(ev, outputs).await,
                    None => okx_open = false,
                },

                ev = binance_rx.recv(), if binance_open => match ev {
                    Some(ev) => self.handle_event(ev, outputs).await,
                    None => binance_open = false,
                },

                ev = bittap_rx.recv(), if bittap_open => match ev {
                    Some(ev) => self.handle_event(ev, outputs).await,
                    None => bittap_open = false,
                },

                _ = ticker.tick() => {
                    self.emit_metrics(venue_metrics, outputs).await;
                }
            }

            if !okx_open && !binance_open && !bittap_open {
                info!("all venue channels closed, aggregator exiting");
                return Ok(());
            }
        }

        // Cancellation path: keep the record stream consistent by handling
        // whatever the feeds already enqueued, under a hard deadline.
        let deadline = Instant::now() + DRAIN_DEADLINE;
        for rx in [&mut okx_rx, &mut binance_rx, &mut bittap_rx] {
            while Instant::now() < deadline {
                match rx.try_recv() {
                    Ok(ev) => self.handle_event(ev, outputs).await,
                    Err(_) => break,
                }
            }
        }

        Ok(())
    }

    /// Per-event pipeline: rate counter, validity gate, store update, lag
    /// sample (follower events only), then per-leader signal and executor
    /// evaluation.
    pub async fn handle_event(&mut self, ev: BookEvent, outputs: &Outputs) {
        if ev.symbol_canon.is_empty() {
            return;
        }

        *self
            .counts
            .entry((ev.venue, ev.symbol_canon.clone()))
            .or_insert(0) += 1;

        // Malformed or one-sided books never reach the store. Momentarily
        // crossed books pass: open positions must be able to exit on them,
        // and the engine's own validity gate keeps them from firing signals.
        if !ev.has_both_sides() {
            debug!(venue = %ev.venue, symbol = %ev.symbol_canon, "dropping malformed book event");
            return;
        }

        let venue = ev.venue;
        let symbol = ev.symbol_canon.clone();
        let now_ns = ev.arrived_at_ns;

        self.store.update(ev);

        // Lag is sampled only when the follower moves, against the freshest
        // leader snapshot of the same symbol.
        if venue == Venue::Bittap {
            if let Some(follower_book) = self.store.get(Venue::Bittap, &symbol) {
                for leader in LEADERS {
                    if let Some(leader_book) = self.store.get(leader, &symbol) {
                        self.lag.add(leader_book, follower_book);
                    }
                }
            }
        }

        for link in self.links.iter_mut() {
            let (leader_book, follower_book) = self.store.get_pair(link.leader, &symbol);
            let (Some(leader_book), Some(follower_book)) = (leader_book, follower_book) else {
                continue;
            };

            // Signal path: evaluate, gate on EV, persist, maybe open.
            if let Some(mut sig) = link.engine.evaluate(now_ns, leader_book, follower_book) {
                let stats = link.ev.stats();
                apply_rejection(&mut sig, &stats);

                if let Some(writer) = &outputs.signals {
                    if let Err(err) = writer.write(&sig).await {
                        warn!(error = %err, "failed to persist signal");
                    }
                }

                if !sig.rejected_by_ev {
                    match link.executor.try_open(&sig) {
                        Ok(Some(pos)) => {
                            debug!(
                                leader = %pos.leader,
                                symbol = %pos.symbol_canon,
                                side = pos.side.as_str(),
                                entry_px = pos.entry_px,
                                "paper position opened"
                            );
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, leader = %link.leader, symbol = %symbol, "paper open refused");
                        }
                    }
                }
            }

            // Executor path: exits feed the EV window, stop losses arm the
            // engine cooldown, closed trades go to the record stream.
            if let Some(closed) = link.executor.evaluate(now_ns, leader_book, follower_book) {
                link.ev.add(&closed);
                if closed.exit_reason == Some(ExitReason::Sl) {
                    link.engine.notify_stop_loss(&closed.symbol_canon, now_ns);
                }
                if let Some(writer) = &outputs.paper_trades {
                    let row = closed.to_paper_trade(Some(link.ev.snapshot()));
                    if let Err(err) = writer.write(&row).await {
                        warn!(error = %err, "failed to persist paper trade");
                    }
                }
            }
        }
    }

    /// Assemble a metrics snapshot: connection gauges, lag and EV stats per
    /// leader, and per-(venue, symbol) update rates since the previous tick.
    pub fn metrics_snapshot(&mut self, venue_metrics: &VenueMetrics) -> MetricsSnapshot {
        let now_ns = clock::now_ns();
        let mut elapsed_sec = (now_ns - self.last_metrics_at_ns) as f64 / 1e9;
        if elapsed_sec <= 0.0 {
            elapsed_sec = self.metrics_interval_ms as f64 / 1_000.0;
        }

        let mut rates = Vec::with_capacity(self.counts.len());
        for (key, &count) in &self.counts {
            let prev = self.last_counts.get(key).copied().unwrap_or(0);
            rates.push(UpdateRate {
                exchange: key.0,
                symbol_canon: key.1.clone(),
                updates_per_sec: (count - prev) as f64 / elapsed_sec,
            });
        }
        self.last_counts.clone_from(&self.counts);
        self.last_metrics_at_ns = now_ns;

        MetricsSnapshot {
            ts_unix_ns: now_ns,
            okx: venue_metrics.okx.snapshot(true),
            binance: venue_metrics.binance.snapshot(false),
            bittap: venue_metrics.bittap.snapshot(false),
            latency_okx: self.lag.stats(Venue::Okx),
            latency_binance: self.lag.stats(Venue::Binance),
            ev_okx: self.links[0].ev.stats(),
            ev_binance: self.links[1].ev.stats(),
            updates_per_sec: rates,
        }
    }

    async fn emit_metrics(&mut self, venue_metrics: &VenueMetrics, outputs: &Outputs) {
        let Some(writer) = &outputs.metrics else {
            return;
        };
        let snap = self.metrics_snapshot(venue_metrics);
        // Metrics are droppable: never let a slow disk stall event handling.
        if writer.try_write(&snap) {
            if let Err(err) = writer.flush().await {
                warn!(error = %err, "failed to flush metrics");
            }
        }
    }
}

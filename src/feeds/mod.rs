//! Venue market-data feeds.
//!
//! Three independent WebSocket clients share only the `BookEvent` output
//! contract and the primitives in this module; each venue keeps its own wire
//! schema, heartbeat contract, and decoder. Nothing here blocks the reader
//! loop: book events go out through a bounded channel with drop-on-full, and
//! connection metrics are plain atomics read by the aggregator's tick.

pub mod binance;
pub mod bittap;
pub mod okx;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::model::{BookEvent, Venue};
use crate::util::clock;

/// Capacity of each venue's book-event channel. On overflow the newest event
/// is dropped on the producer side so a stalled aggregator can never wedge a
/// socket read loop.
pub const BOOK_CHANNEL_CAPACITY: usize = 1_000;

/// How often each venue refreshes its updates/sec and staleness gauges.
const METRICS_TICK: Duration = Duration::from_secs(1);

/// Lock-free connection quality gauges, written by the venue tasks and read
/// by the aggregator's metrics tick.
#[derive(Default)]
pub struct ConnectionMetrics {
    reconnect_count: AtomicI64,
    parse_error_count: AtomicI64,
    update_count: AtomicI64,
    updates_per_sec_bits: AtomicU64,
    last_msg_ns: AtomicI64,
    last_message_age_ms: AtomicI64,
    ws_rtt_ms: AtomicI64,
}

impl ConnectionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn note_message(&self, now_ns: i64) {
        self.last_msg_ns.store(now_ns, Ordering::Relaxed);
    }

    #[inline]
    pub fn note_update(&self) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_parse_error(&self) {
        self.parse_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_ws_rtt_ms(&self, rtt_ms: i64) {
        self.ws_rtt_ms.store(rtt_ms, Ordering::Relaxed);
    }

    pub fn update_count(&self) -> i64 {
        self.update_count.load(Ordering::Relaxed)
    }

    fn set_updates_per_sec(&self, qps: f64) {
        self.updates_per_sec_bits
            .store(qps.to_bits(), Ordering::Relaxed);
    }

    fn refresh_last_message_age(&self, now_ns: i64) {
        let last = self.last_msg_ns.load(Ordering::Relaxed);
        let age_ms = if last > 0 { (now_ns - last) / 1_000_000 } else { 0 };
        self.last_message_age_ms.store(age_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy for a metrics record. `with_rtt` is set for OKX,
    /// the only venue with an application-level ping round trip to report.
    pub fn snapshot(&self, with_rtt: bool) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            parse_error_count: self.parse_error_count.load(Ordering::Relaxed),
            updates_per_sec: f64::from_bits(self.updates_per_sec_bits.load(Ordering::Relaxed)),
            last_message_age_ms: self.last_message_age_ms.load(Ordering::Relaxed),
            ws_rtt_ms: with_rtt.then(|| self.ws_rtt_ms.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub reconnect_count: i64,
    pub parse_error_count: i64,
    pub updates_per_sec: f64,
    pub last_message_age_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_rtt_ms: Option<i64>,
}

/// Background gauge refresh, one task per venue. Mirrors the cadence the
/// dashboard expects: updates/sec over trailing one-second windows.
pub(crate) fn spawn_metrics_task(
    metrics: Arc<ConnectionMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(METRICS_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_count = 0i64;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let count = metrics.update_count();
                    metrics.set_updates_per_sec((count - last_count) as f64);
                    last_count = count;
                    metrics.refresh_last_message_age(clock::now_ns());
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

/// Sampled logging of undecodable payloads: at most one raw sample per 100
/// errors and no more than one per minute, truncated to 200 bytes, so a
/// schema change upstream cannot amplify into log-disk exhaustion.
pub(crate) struct ParseErrorSampler {
    count: AtomicU64,
    last_log_ns: AtomicI64,
}

const SAMPLE_EVERY: u64 = 100;
const SAMPLE_MIN_SPACING_NS: i64 = 60_000_000_000;
const SAMPLE_MAX_BYTES: usize = 200;

impl ParseErrorSampler {
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            last_log_ns: AtomicI64::new(0),
        }
    }

    pub(crate) fn maybe_log(&self, venue: Venue, error: &str, payload: &[u8]) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SAMPLE_EVERY != 0 {
            return;
        }
        let now_ns = clock::now_ns();
        let last = self.last_log_ns.load(Ordering::Relaxed);
        if last > 0 && now_ns - last < SAMPLE_MIN_SPACING_NS {
            return;
        }
        self.last_log_ns.store(now_ns, Ordering::Relaxed);

        let sample = &payload[..payload.len().min(SAMPLE_MAX_BYTES)];
        warn!(
            venue = %venue,
            error,
            payload = %String::from_utf8_lossy(sample),
            "failed to decode frame (sampled)"
        );
    }
}

/// Push one decoded event downstream without ever blocking the reader.
pub(crate) fn forward_event(
    tx: &mpsc::Sender<BookEvent>,
    metrics: &ConnectionMetrics,
    ev: BookEvent,
) {
    metrics.note_update();
    match tx.try_send(ev) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(ev)) => {
            warn!(venue = %ev.venue, symbol = %ev.symbol_canon, "book channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(ev)) => {
            debug!(venue = %ev.venue, "book channel closed, dropping event");
        }
    }
}

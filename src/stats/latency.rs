//! Lead-lag latency measurement.
//!
//! Two fully independent links (OKX -> Bittap, Binance -> Bittap), each
//! keeping rolling windows of arrival lag and event lag. A sample from one
//! link never touches the other link's windows.

use serde::Serialize;

use crate::model::{BookEvent, Venue};
use crate::util::clock;

/// Default rolling window size per series.
pub const DEFAULT_WINDOW: usize = 10_000;

/// Percentile snapshot of one leader link, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub leader: String,
    /// Cumulative arrival-lag sample count (not capped by the window).
    pub count: i64,
    pub arrived_p50_ms: f64,
    pub arrived_p90_ms: f64,
    pub arrived_p99_ms: f64,
    pub event_p50_ms: f64,
    pub event_p90_ms: f64,
    pub event_p99_ms: f64,
}

struct RollingWindow {
    size: usize,
    buf: Vec<i64>,
    pos: usize,
    full: bool,
    count: i64,
}

impl RollingWindow {
    fn new(size: usize) -> Self {
        Self {
            size,
            buf: Vec::with_capacity(size),
            pos: 0,
            full: false,
            count: 0,
        }
    }

    fn add(&mut self, v: i64) {
        self.count += 1;
        if self.size == 0 {
            return;
        }
        if !self.full {
            self.buf.push(v);
            if self.buf.len() == self.size {
                self.full = true;
                self.pos = 0;
            }
            return;
        }
        self.buf[self.pos] = v;
        self.pos += 1;
        if self.pos >= self.size {
            self.pos = 0;
        }
    }

    /// Floor-index quantiles over a sorted copy of the current window:
    /// idx = floor(q * (n - 1)), clamped for q <= 0 and q >= 1.
    fn quantiles(&self, qs: &[f64]) -> (i64, Vec<i64>) {
        if self.buf.is_empty() {
            return (self.count, vec![0; qs.len()]);
        }
        let mut sorted = self.buf.clone();
        sorted.sort_unstable();
        let n = sorted.len();
        let values = qs
            .iter()
            .map(|&q| {
                if q <= 0.0 {
                    sorted[0]
                } else if q >= 1.0 {
                    sorted[n - 1]
                } else {
                    sorted[((n - 1) as f64 * q) as usize]
                }
            })
            .collect();
        (self.count, values)
    }
}

struct LinkWindows {
    arrived: RollingWindow,
    event: RollingWindow,
}

impl LinkWindows {
    fn new(size: usize) -> Self {
        Self {
            arrived: RollingWindow::new(size),
            event: RollingWindow::new(size),
        }
    }
}

/// Per-leader lag tracker.
pub struct LagTracker {
    okx: LinkWindows,
    binance: LinkWindows,
}

impl LagTracker {
    pub fn new(window_size: usize) -> Self {
        let size = if window_size == 0 {
            DEFAULT_WINDOW
        } else {
            window_size
        };
        Self {
            okx: LinkWindows::new(size),
            binance: LinkWindows::new(size),
        }
    }

    /// Record one leader/follower pairing. Meaningful only when the follower
    /// event is from Bittap and both carry the same canonical symbol.
    ///
    /// arrival_lag = follower.arrived_at_ns - leader.arrived_at_ns
    /// event_lag   = follower.arrived_at_ns - leader.exch_ts_ms * 1e6
    ///               (only when the leader supplied an event time)
    pub fn add(&mut self, leader_ev: &BookEvent, follower_ev: &BookEvent) {
        if follower_ev.venue != Venue::Bittap {
            return;
        }
        if leader_ev.symbol_canon.is_empty()
            || leader_ev.symbol_canon != follower_ev.symbol_canon
        {
            return;
        }

        let arrival_lag = follower_ev.arrived_at_ns - leader_ev.arrived_at_ns;
        let event_lag = if leader_ev.exch_ts_ms > 0 {
            follower_ev.arrived_at_ns - clock::ms_to_ns(leader_ev.exch_ts_ms)
        } else {
            0
        };

        let link = match leader_ev.venue {
            Venue::Okx => &mut self.okx,
            Venue::Binance => &mut self.binance,
            Venue::Bittap => return,
        };
        link.arrived.add(arrival_lag);
        if event_lag != 0 {
            link.event.add(event_lag);
        }
    }

    pub fn stats(&self, leader: Venue) -> LatencyStats {
        let link = match leader {
            Venue::Okx => &self.okx,
            Venue::Binance => &self.binance,
            Venue::Bittap => {
                return LatencyStats {
                    leader: leader.as_str().to_string(),
                    ..Default::default()
                }
            }
        };

        let (count, arrived) = link.arrived.quantiles(&[0.50, 0.90, 0.99]);
        let (_, event) = link.event.quantiles(&[0.50, 0.90, 0.99]);

        LatencyStats {
            leader: leader.as_str().to_string(),
            count,
            arrived_p50_ms: clock::ns_to_ms_f64(arrived[0]),
            arrived_p90_ms: clock::ns_to_ms_f64(arrived[1]),
            arrived_p99_ms: clock::ns_to_ms_f64(arrived[2]),
            event_p50_ms: clock::ns_to_ms_f64(event[0]),
            event_p90_ms: clock::ns_to_ms_f64(event[1]),
            event_p99_ms: clock::ns_to_ms_f64(event[2]),
        }
    }
}

impl Default for LagTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn ev(venue: Venue, arrived_ns: i64, exch_ts_ms: i64) -> BookEvent {
        BookEvent {
            venue,
            symbol_canon: "BTCUSDT".to_string(),
            best_bid_px: 100.0,
            best_bid_qty: 1.0,
            best_ask_px: 100.1,
            best_ask_qty: 1.0,
            levels: Vec::new(),
            arrived_at_ns: arrived_ns,
            exch_ts_ms,
            seq: 0,
        }
    }

    #[test]
    fn arrival_lag_definition() {
        // Randomized: observed P50 of a single sample equals the lag in ms.
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let leader_ns: i64 = rng.gen_range(0..1_000_000_000_000);
            let lag_ns: i64 = rng.gen_range(0..500_000_000);
            let mut tracker = LagTracker::new(16);
            tracker.add(
                &ev(Venue::Okx, leader_ns, 0),
                &ev(Venue::Bittap, leader_ns + lag_ns, 0),
            );
            let stats = tracker.stats(Venue::Okx);
            assert_eq!(stats.count, 1);
            assert!((stats.arrived_p50_ms - lag_ns as f64 / 1e6).abs() < 1e-9);
        }
    }

    #[test]
    fn floor_index_quantiles_match_sorted_copy() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let n = rng.gen_range(1..200usize);
            let mut w = RollingWindow::new(256);
            let mut samples: Vec<i64> = Vec::with_capacity(n);
            for _ in 0..n {
                let v = rng.gen_range(-1_000_000i64..1_000_000);
                samples.push(v);
                w.add(v);
            }
            samples.sort_unstable();
            for q in [0.50, 0.90, 0.99] {
                let (_, got) = w.quantiles(&[q]);
                let idx = ((n - 1) as f64 * q) as usize;
                assert_eq!(got[0], samples[idx], "q={q} n={n}");
            }
            let (_, lo) = w.quantiles(&[0.0]);
            let (_, hi) = w.quantiles(&[1.0]);
            assert_eq!(lo[0], samples[0]);
            assert_eq!(hi[0], samples[n - 1]);
        }
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let mut w = RollingWindow::new(4);
        for v in [10, 20, 30, 40, 50, 60] {
            w.add(v);
        }
        // Window now holds {50, 60, 30, 40}; count keeps the full tally.
        let (count, q) = w.quantiles(&[0.0, 1.0]);
        assert_eq!(count, 6);
        assert_eq!(q[0], 30);
        assert_eq!(q[1], 60);
    }

    #[test]
    fn leader_links_are_independent() {
        let mut tracker = LagTracker::new(64);
        for i in 0..50 {
            let base = i * 1_000_000_000;
            tracker.add(
                &ev(Venue::Okx, base, 0),
                &ev(Venue::Bittap, base + 10_000_000, 0),
            );
            tracker.add(
                &ev(Venue::Binance, base, 0),
                &ev(Venue::Bittap, base + 100_000_000, 0),
            );
        }
        let okx = tracker.stats(Venue::Okx);
        let binance = tracker.stats(Venue::Binance);
        assert!((okx.arrived_p50_ms - 10.0).abs() < 1e-9);
        assert!((binance.arrived_p50_ms - 100.0).abs() < 1e-9);
        assert_eq!(okx.count, 50);
        assert_eq!(binance.count, 50);
    }

    #[test]
    fn event_lag_requires_leader_event_time() {
        let mut tracker = LagTracker::new(64);
        // exch_ts_ms = 0: only arrival lag is recorded.
        tracker.add(&ev(Venue::Okx, 0, 0), &ev(Venue::Bittap, 5_000_000, 0));
        let stats = tracker.stats(Venue::Okx);
        assert!((stats.arrived_p50_ms - 5.0).abs() < 1e-9);
        assert_eq!(stats.event_p50_ms, 0.0);

        // Leader event time present: event lag = follower arrival - ts.
        tracker.add(
            &ev(Venue::Okx, 1_000_000, 1),
            &ev(Venue::Bittap, 4_000_000, 0),
        );
        let stats = tracker.stats(Venue::Okx);
        assert!((stats.event_p50_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_symbol_or_venue_is_ignored() {
        let mut tracker = LagTracker::new(64);
        let mut other = ev(Venue::Bittap, 1_000_000, 0);
        other.symbol_canon = "ETHUSDT".to_string();
        tracker.add(&ev(Venue::Okx, 0, 0), &other);
        // Follower must be Bittap.
        tracker.add(&ev(Venue::Okx, 0, 0), &ev(Venue::Binance, 1_000_000, 0));
        assert_eq!(tracker.stats(Venue::Okx).count, 0);
    }
}

//! Rolling expected value over closed paper trades.
//!
//! EV = p * (R - f) + (1 - p) * (-L - f)
//! p_required = (L + f) / (R + L)
//!
//! One calculator per leader link. The window is a fixed-capacity ring with
//! O(1) rolling sums: when a slot is overwritten, the evicted sample's
//! contribution is subtracted before the new one is added.

use serde::Serialize;

use crate::model::{EvSnapshot, Position, Signal};

/// Default rolling window of closed trades.
pub const DEFAULT_WINDOW: usize = 1_000;

#[derive(Debug, Clone, Copy, Default)]
struct TradeSample {
    win: bool,
    gross_pnl_bps: f64,
    fee_bps: f64,
}

/// Window summary. `count`/`win_count`/`loss_count` reflect the current
/// window contents, not the lifetime total.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvStats {
    pub count: i64,
    pub win_count: i64,
    pub loss_count: i64,
    pub win_rate: f64,
    /// Mean gross bps over winners (R).
    pub avg_profit: f64,
    /// Mean |gross bps| over losers (L).
    pub avg_loss: f64,
    /// Mean round-trip fee bps (f).
    pub fee_bps: f64,
    pub ev: f64,
    pub p_required: f64,
}

pub struct EvCalculator {
    window_size: usize,
    buf: Vec<TradeSample>,
    pos: usize,
    full: bool,

    count: i64,
    win_count: i64,
    loss_count: i64,
    sum_win_gross: f64,
    sum_loss_abs_gross: f64,
    sum_fee: f64,
}

impl EvCalculator {
    pub fn new(window_size: usize) -> Self {
        let size = if window_size == 0 {
            DEFAULT_WINDOW
        } else {
            window_size
        };
        Self {
            window_size: size,
            buf: vec![TradeSample::default(); size],
            pos: 0,
            full: false,
            count: 0,
            win_count: 0,
            loss_count: 0,
            sum_win_gross: 0.0,
            sum_loss_abs_gross: 0.0,
            sum_fee: 0.0,
        }
    }

    /// Fold one closed position into the window. Open positions are ignored.
    /// A sample is a win iff net_pnl_bps > 0; break-even counts as a loss.
    pub fn add(&mut self, pos: &Position) {
        if !pos.closed {
            return;
        }

        let sample = TradeSample {
            win: pos.net_pnl_bps > 0.0,
            gross_pnl_bps: pos.gross_pnl_bps,
            fee_bps: pos.fee_bps,
        };

        if self.full {
            let old = self.buf[self.pos];
            self.count -= 1;
            if old.win {
                self.win_count -= 1;
                self.sum_win_gross -= old.gross_pnl_bps;
            } else {
                self.loss_count -= 1;
                self.sum_loss_abs_gross -= old.gross_pnl_bps.abs();
            }
            self.sum_fee -= old.fee_bps;
        }

        self.buf[self.pos] = sample;
        self.pos += 1;
        if self.pos >= self.window_size {
            self.pos = 0;
            self.full = true;
        }

        self.count += 1;
        if sample.win {
            self.win_count += 1;
            self.sum_win_gross += sample.gross_pnl_bps;
        } else {
            self.loss_count += 1;
            self.sum_loss_abs_gross += sample.gross_pnl_bps.abs();
        }
        self.sum_fee += sample.fee_bps;
    }

    pub fn stats(&self) -> EvStats {
        let mut out = EvStats {
            count: self.count,
            win_count: self.win_count,
            loss_count: self.loss_count,
            ..Default::default()
        };
        if self.count <= 0 {
            return out;
        }

        out.win_rate = self.win_count as f64 / self.count as f64;
        out.fee_bps = self.sum_fee / self.count as f64;
        if self.win_count > 0 {
            out.avg_profit = self.sum_win_gross / self.win_count as f64;
        }
        if self.loss_count > 0 {
            out.avg_loss = self.sum_loss_abs_gross / self.loss_count as f64;
        }

        let (p, r, l, f) = (out.win_rate, out.avg_profit, out.avg_loss, out.fee_bps);
        out.ev = p * (r - f) + (1.0 - p) * (-l - f);

        let den = r + l;
        out.p_required = if den > 0.0 { (l + f) / den } else { 1.0 };

        out
    }

    pub fn snapshot(&self) -> EvSnapshot {
        let stats = self.stats();
        EvSnapshot {
            win_rate: stats.win_rate,
            avg_profit: stats.avg_profit,
            avg_loss: stats.avg_loss,
            ev: stats.ev,
            p_required: stats.p_required,
        }
    }
}

/// EV gate applied to every signal before paper execution: with at least one
/// sample in the window and negative expectancy, the signal is flagged and
/// persisted but never opens a position.
pub fn apply_rejection(sig: &mut Signal, stats: &EvStats) {
    if stats.count > 0 && stats.ev < 0.0 {
        sig.rejected_by_ev = true;
        sig.filter_reason = "ev_negative".to_string();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::model::{ExitReason, Side, Venue};

    fn book(venue: Venue) -> crate::model::BookEvent {
        crate::model::BookEvent {
            venue,
            symbol_canon: "BTCUSDT".to_string(),
            best_bid_px: 100.0,
            best_bid_qty: 1.0,
            best_ask_px: 100.1,
            best_ask_qty: 1.0,
            levels: Vec::new(),
            arrived_at_ns: 0,
            exch_ts_ms: 0,
            seq: 0,
        }
    }

    fn unrejected_signal() -> Signal {
        Signal {
            id: "s".to_string(),
            leader: Venue::Okx,
            symbol_canon: "BTCUSDT".to_string(),
            side: Side::Long,
            spread_bps: 12.0,
            leader_book: book(Venue::Okx),
            follower_book: book(Venue::Bittap),
            detected_at_ns: 0,
            rejected_by_ev: false,
            filter_reason: String::new(),
        }
    }

    fn closed(gross: f64, fee: f64) -> Position {
        Position {
            id: String::new(),
            leader: Venue::Okx,
            symbol_canon: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_px: 100.0,
            entry_spread_bps: 10.0,
            entry_time_ns: 0,
            exit_px: 100.0,
            exit_time_ns: 1,
            exit_reason: Some(ExitReason::Tp),
            fee_bps: fee,
            gross_pnl_bps: gross,
            net_pnl_bps: gross - fee,
            closed: true,
        }
    }

    /// Closed-form recomputation over the trailing window.
    fn reference_stats(samples: &[(f64, f64)], window: usize) -> EvStats {
        let tail: Vec<_> = samples
            .iter()
            .rev()
            .take(window)
            .rev()
            .copied()
            .collect();
        let mut out = EvStats::default();
        out.count = tail.len() as i64;
        if tail.is_empty() {
            return out;
        }
        let wins: Vec<_> = tail.iter().filter(|(g, f)| g - f > 0.0).collect();
        let losses: Vec<_> = tail.iter().filter(|(g, f)| g - f <= 0.0).collect();
        out.win_count = wins.len() as i64;
        out.loss_count = losses.len() as i64;
        out.win_rate = wins.len() as f64 / tail.len() as f64;
        out.fee_bps = tail.iter().map(|(_, f)| f).sum::<f64>() / tail.len() as f64;
        if !wins.is_empty() {
            out.avg_profit = wins.iter().map(|(g, _)| g).sum::<f64>() / wins.len() as f64;
        }
        if !losses.is_empty() {
            out.avg_loss =
                losses.iter().map(|(g, _)| g.abs()).sum::<f64>() / losses.len() as f64;
        }
        let (p, r, l, f) = (out.win_rate, out.avg_profit, out.avg_loss, out.fee_bps);
        out.ev = p * (r - f) + (1.0 - p) * (-l - f);
        out.p_required = if r + l > 0.0 { (l + f) / (r + l) } else { 1.0 };
        out
    }

    #[test]
    fn empty_window_reports_zeroes_and_p_required_one() {
        let calc = EvCalculator::new(8);
        let stats = calc.stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.ev, 0.0);
        assert_eq!(stats.p_required, 0.0); // count == 0 short-circuits
    }

    #[test]
    fn known_window_yields_known_ev() {
        // gross 10, 20, -15 with fee 2 each: p=2/3, R=15, L=15, f=2, EV=3.
        let mut calc = EvCalculator::new(100);
        for gross in [10.0, 20.0, -15.0] {
            calc.add(&closed(gross, 2.0));
        }
        let stats = calc.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.win_count, 2);
        assert!((stats.avg_profit - 15.0).abs() < 1e-9);
        assert!((stats.avg_loss - 15.0).abs() < 1e-9);
        assert!((stats.ev - 3.0).abs() < 1e-9);
        assert!((stats.p_required - (15.0 + 2.0) / 30.0).abs() < 1e-9);
    }

    #[test]
    fn negative_window_rejects_signals() {
        // gross 1, 1, -20 with fee 2: all nets <= 0, EV < 0.
        let mut calc = EvCalculator::new(100);
        for gross in [1.0, 1.0, -20.0] {
            calc.add(&closed(gross, 2.0));
        }
        let stats = calc.stats();
        assert!(stats.ev < 0.0);

        let mut sig = unrejected_signal();
        apply_rejection(&mut sig, &stats);
        assert!(sig.rejected_by_ev);
        assert_eq!(sig.filter_reason, "ev_negative");
    }

    #[test]
    fn rejection_requires_samples() {
        let calc = EvCalculator::new(8);
        let mut sig = unrejected_signal();
        apply_rejection(&mut sig, &calc.stats());
        assert!(!sig.rejected_by_ev);
    }

    #[test]
    fn rolling_sums_match_closed_form_after_eviction() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let window = rng.gen_range(1..24usize);
            let n = rng.gen_range(0..96usize);
            let mut calc = EvCalculator::new(window);
            let mut samples: Vec<(f64, f64)> = Vec::with_capacity(n);
            for _ in 0..n {
                let gross = rng.gen_range(-50.0..50.0);
                let fee = rng.gen_range(0.0..5.0);
                samples.push((gross, fee));
                calc.add(&closed(gross, fee));
            }
            let got = calc.stats();
            let want = reference_stats(&samples, window);
            assert_eq!(got.count, want.count);
            assert_eq!(got.win_count, want.win_count);
            assert_eq!(got.loss_count, want.loss_count);
            assert!((got.win_rate - want.win_rate).abs() < 1e-9);
            assert!((got.avg_profit - want.avg_profit).abs() < 1e-9);
            assert!((got.avg_loss - want.avg_loss).abs() < 1e-9);
            assert!((got.fee_bps - want.fee_bps).abs() < 1e-9);
            assert!((got.ev - want.ev).abs() < 1e-9);
            if want.count > 0 {
                assert!((got.p_required - want.p_required).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn open_positions_are_ignored() {
        let mut calc = EvCalculator::new(8);
        let mut pos = closed(10.0, 1.0);
        pos.closed = false;
        calc.add(&pos);
        assert_eq!(calc.stats().count, 0);
    }
}

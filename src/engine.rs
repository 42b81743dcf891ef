//! Spread signal detection for one leader link.
//!
//! Each leader (OKX, Binance) gets its own engine instance; state is kept per
//! canonical symbol and never crosses links. Filters run in a fixed order:
//! stop-loss cooldown, depth floor, optional volatility gate, spread
//! threshold, persistence. One `evaluate` call emits at most one signal, and
//! the long side pre-empts the short side on the same tick.

use std::collections::{HashMap, VecDeque};

use crate::config::StrategyConfig;
use crate::model::{BookEvent, Side, Signal, Venue};

/// Mid-price samples kept for realized volatility (one per second).
const VOL_MAX_SAMPLES: usize = 60;

#[derive(Debug, Clone, Copy, Default)]
struct Candidate {
    active: bool,
    start_ns: i64,
    signaled: bool,
}

#[derive(Debug, Default)]
struct VolWindow {
    last_sample_ns: i64,
    samples: VecDeque<f64>,
}

impl VolWindow {
    /// Resample at most once per second; newer intra-second mids are skipped
    /// so the window always spans roughly one minute.
    fn update(&mut self, now_ns: i64, mid_px: f64) {
        if mid_px <= 0.0 {
            return;
        }
        if self.last_sample_ns > 0 && now_ns - self.last_sample_ns < 1_000_000_000 {
            return;
        }
        self.last_sample_ns = now_ns;
        self.samples.push_back(mid_px);
        while self.samples.len() > VOL_MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Realized volatility: sample standard deviation (ddof = 1) of
    /// log-returns between consecutive samples. A single return is its own
    /// magnitude so that any observed movement can trip a zero threshold.
    fn realized_vol(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let mut returns: Vec<f64> = Vec::with_capacity(self.samples.len() - 1);
        let mut prev: Option<f64> = None;
        for &px in &self.samples {
            if let Some(p) = prev {
                if p > 0.0 && px > 0.0 {
                    returns.push((px / p).ln());
                }
            }
            prev = Some(px);
        }

        match returns.len() {
            0 => 0.0,
            1 => returns[0].abs(),
            n => {
                let mean = returns.iter().sum::<f64>() / n as f64;
                let ss = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>();
                (ss / (n - 1) as f64).sqrt()
            }
        }
    }
}

#[derive(Debug, Default)]
struct SymbolState {
    long: Candidate,
    short: Candidate,
    vol: VolWindow,
    cooldown_until_ns: i64,
}

pub struct SignalEngine {
    leader: Venue,
    cfg: StrategyConfig,
    persist_ns: i64,
    states: HashMap<String, SymbolState>,
}

impl SignalEngine {
    pub fn new(leader: Venue, cfg: StrategyConfig) -> Self {
        let persist_ns = cfg.persist_ms as i64 * 1_000_000;
        Self {
            leader,
            cfg,
            persist_ns,
            states: HashMap::new(),
        }
    }

    pub fn leader(&self) -> Venue {
        self.leader
    }

    /// A stop loss on this symbol arms the cooldown window; no new signal
    /// fires before it expires.
    pub fn notify_stop_loss(&mut self, symbol_canon: &str, now_ns: i64) {
        let cooldown_ns = self.cfg.cooldown_ms as i64 * 1_000_000;
        self.state(symbol_canon).cooldown_until_ns = now_ns + cooldown_ns;
    }

    /// Evaluate one (leader, follower) book pair. Returns a signal only when
    /// every filter passes and the persistence state machine fires.
    pub fn evaluate(
        &mut self,
        now_ns: i64,
        leader_book: &BookEvent,
        follower_book: &BookEvent,
    ) -> Option<Signal> {
        if leader_book.venue != self.leader || follower_book.venue != Venue::Bittap {
            return None;
        }
        if leader_book.symbol_canon.is_empty()
            || leader_book.symbol_canon != follower_book.symbol_canon
        {
            return None;
        }
        if !leader_book.is_valid() || !follower_book.is_valid() {
            return None;
        }

        let theta = self.cfg.theta_entry_bps;
        let min_depth = self.cfg.min_depth_usd;
        let vol_enabled = self.cfg.vol_filter_enabled;
        let vol_threshold = self.cfg.vol_threshold;
        let persist_ns = self.persist_ns;
        let leader = self.leader;

        let st = self
            .states
            .entry(leader_book.symbol_canon.clone())
            .or_default();

        // Cooldown: inside the window nothing fires and candidates are left
        // untouched, so the timer state cannot leak across the quiet period.
        if st.cooldown_until_ns > 0 && now_ns < st.cooldown_until_ns {
            return None;
        }

        // Depth floor on the leader's top-5 notional.
        if min_depth > 0.0 && leader_book.top5_depth_usd() < min_depth {
            st.long = Candidate::default();
            st.short = Candidate::default();
            return None;
        }

        // Volatility gate over one-second mid samples.
        if vol_enabled {
            st.vol.update(now_ns, leader_book.mid_price());
            if st.vol.realized_vol() > vol_threshold {
                return None;
            }
        }

        // Long: leader bid rich against follower ask.
        if let Some(long_bps) = long_spread_bps(leader_book, follower_book) {
            if long_bps > theta {
                if let Some(sig) = try_fire(
                    &mut st.long,
                    persist_ns,
                    now_ns,
                    leader,
                    Side::Long,
                    long_bps,
                    leader_book,
                    follower_book,
                ) {
                    return Some(sig);
                }
            } else {
                st.long = Candidate::default();
            }
        } else {
            st.long = Candidate::default();
        }

        // Short: follower bid rich against leader ask.
        if let Some(short_bps) = short_spread_bps(leader_book, follower_book) {
            if short_bps > theta {
                if let Some(sig) = try_fire(
                    &mut st.short,
                    persist_ns,
                    now_ns,
                    leader,
                    Side::Short,
                    short_bps,
                    leader_book,
                    follower_book,
                ) {
                    return Some(sig);
                }
            } else {
                st.short = Candidate::default();
            }
        } else {
            st.short = Candidate::default();
        }

        None
    }

    fn state(&mut self, symbol_canon: &str) -> &mut SymbolState {
        self.states.entry(symbol_canon.to_string()).or_default()
    }
}

pub fn long_spread_bps(leader_book: &BookEvent, follower_book: &BookEvent) -> Option<f64> {
    if leader_book.best_bid_px <= 0.0 || follower_book.best_ask_px <= 0.0 {
        return None;
    }
    Some((leader_book.best_bid_px - follower_book.best_ask_px) / follower_book.best_ask_px * 10_000.0)
}

pub fn short_spread_bps(leader_book: &BookEvent, follower_book: &BookEvent) -> Option<f64> {
    if follower_book.best_bid_px <= 0.0 || leader_book.best_ask_px <= 0.0 {
        return None;
    }
    Some((follower_book.best_bid_px - leader_book.best_ask_px) / leader_book.best_ask_px * 10_000.0)
}

/// Persistence state machine for one side. On first activation the timer
/// arms (or fires immediately when persist is zero); while continuously
/// active it fires exactly once, the first time the spread has held long
/// enough. Re-arming requires the condition to lapse.
#[allow(clippy::too_many_arguments)]
fn try_fire(
    cand: &mut Candidate,
    persist_ns: i64,
    now_ns: i64,
    leader: Venue,
    side: Side,
    spread_bps: f64,
    leader_book: &BookEvent,
    follower_book: &BookEvent,
) -> Option<Signal> {
    if !cand.active {
        cand.active = true;
        cand.start_ns = now_ns;
        cand.signaled = false;

        if persist_ns == 0 {
            cand.signaled = true;
            return Some(make_signal(leader, side, spread_bps, now_ns, leader_book, follower_book));
        }
        return None;
    }

    if cand.signaled {
        return None;
    }
    if now_ns - cand.start_ns < persist_ns {
        return None;
    }

    cand.signaled = true;
    Some(make_signal(leader, side, spread_bps, now_ns, leader_book, follower_book))
}

fn make_signal(
    leader: Venue,
    side: Side,
    spread_bps: f64,
    now_ns: i64,
    leader_book: &BookEvent,
    follower_book: &BookEvent,
) -> Signal {
    Signal {
        id: format!(
            "{}-{}-{}-{}",
            leader,
            leader_book.symbol_canon,
            side.as_str(),
            now_ns
        ),
        leader,
        symbol_canon: leader_book.symbol_canon.clone(),
        side,
        spread_bps,
        leader_book: leader_book.clone(),
        follower_book: follower_book.clone(),
        detected_at_ns: now_ns,
        rejected_by_ev: false,
        filter_reason: String::new(),
    }
}

//! Normalized order-book snapshot emitted by every venue decoder.

use serde::{Deserialize, Serialize};

/// Venue identifier. OKX and Binance lead price discovery; Bittap follows and
/// is the venue every paper fill is priced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Okx,
    Binance,
    Bittap,
}

/// The two leader links, in the order they are evaluated.
pub const LEADERS: [Venue; 2] = [Venue::Okx, Venue::Binance];

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Okx => "okx",
            Venue::Binance => "binance",
            Venue::Bittap => "bittap",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Venue::Okx | Venue::Binance)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One depth level (price, qty).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub qty: f64,
}

/// Venue-normalized top-of-book plus up to five depth levels per side.
///
/// `arrived_at_ns` is assigned from the wall-anchored monotonic clock at the
/// moment the raw frame was read, before any parsing work, and is the sole
/// basis for lag arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEvent {
    pub venue: Venue,
    pub symbol_canon: String,
    pub best_bid_px: f64,
    pub best_bid_qty: f64,
    pub best_ask_px: f64,
    pub best_ask_qty: f64,
    /// Bids first (high to low), then asks (low to high), at most 5 each.
    pub levels: Vec<Level>,
    pub arrived_at_ns: i64,
    /// Venue event time in ms. OKX `ts`, Binance `E`, Bittap none (0).
    pub exch_ts_ms: i64,
    /// Venue sequence number. OKX `seqId`, Bittap `lastUpdateId`, Binance none (0).
    pub seq: i64,
}

impl BookEvent {
    /// A book is usable for signal generation only when both sides are
    /// present and not crossed.
    pub fn is_valid(&self) -> bool {
        self.best_bid_px > 0.0 && self.best_ask_px > 0.0 && self.best_bid_px < self.best_ask_px
    }

    /// Both touches present. A transiently crossed book still clears this:
    /// it must reach the store so an open paper position can exit on it,
    /// while `is_valid` keeps it from seeding new signals.
    pub fn has_both_sides(&self) -> bool {
        self.best_bid_px > 0.0 && self.best_ask_px > 0.0
    }

    pub fn mid_price(&self) -> f64 {
        (self.best_bid_px + self.best_ask_px) / 2.0
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid_price();
        if mid == 0.0 {
            return 0.0;
        }
        (self.best_ask_px - self.best_bid_px) / mid * 10_000.0
    }

    /// Notional value of the first five stored levels, used by the depth filter.
    pub fn top5_depth_usd(&self) -> f64 {
        self.levels
            .iter()
            .take(5)
            .map(|l| l.price * l.qty)
            .sum()
    }
}

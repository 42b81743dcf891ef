//! Arbitrage opportunity proposals produced by the signal engine.

use serde::{Deserialize, Serialize};

use super::BookEvent;
use crate::model::Venue;

/// Trade direction relative to the follower venue.
///
/// `Long` fires when the leader bid trades above the follower ask;
/// `Short` fires when the follower bid trades above the leader ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn direction(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// A detected cross-venue spread opportunity.
///
/// The embedded books are snapshots cloned at firing time, not aliases into
/// the book store, so later store updates cannot mutate an emitted signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub leader: Venue,
    pub symbol_canon: String,
    pub side: Side,
    /// Entry spread in bps, strictly positive at firing time.
    /// long: (leader_bid - follower_ask) / follower_ask * 1e4
    /// short: (follower_bid - leader_ask) / leader_ask * 1e4
    pub spread_bps: f64,
    pub leader_book: BookEvent,
    pub follower_book: BookEvent,
    pub detected_at_ns: i64,
    /// Set by the EV gate when the rolling window says expectancy is negative.
    pub rejected_by_ev: bool,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub filter_reason: String,
}

impl Signal {
    pub fn direction(&self) -> f64 {
        self.side.direction()
    }
}

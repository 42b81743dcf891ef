//! Paper positions and their JSONL output row.
//!
//! Positions are simulation-only. Nothing in this crate places real orders.

use serde::{Deserialize, Serialize};

use super::{Side, Venue};

/// Terminal state of a paper position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    Tp,
    Sl,
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Tp => "tp",
            ExitReason::Sl => "sl",
            ExitReason::Timeout => "timeout",
        }
    }
}

/// One open or closed paper trade on the follower venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub leader: Venue,
    pub symbol_canon: String,
    pub side: Side,
    pub entry_px: f64,
    /// Entry spread in bps, sign and magnitude as fired.
    pub entry_spread_bps: f64,
    pub entry_time_ns: i64,
    pub exit_px: f64,
    pub exit_time_ns: i64,
    pub exit_reason: Option<ExitReason>,
    /// Round-trip taker fee, fixed at open: 2 * taker * (1 - rebate) * 1e4.
    pub fee_bps: f64,
    pub gross_pnl_bps: f64,
    pub net_pnl_bps: f64,
    pub closed: bool,
}

impl Position {
    pub fn direction(&self) -> f64 {
        self.side.direction()
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl_bps > 0.0
    }

    pub fn hold_ms(&self) -> i64 {
        if self.closed {
            (self.exit_time_ns - self.entry_time_ns) / 1_000_000
        } else {
            0
        }
    }

    /// Output row for `paper_trades.jsonl`.
    pub fn to_paper_trade(&self, ev_snapshot: Option<EvSnapshot>) -> PaperTrade {
        PaperTrade {
            leader: self.leader,
            symbol_canon: self.symbol_canon.clone(),
            side: self.side.as_str().to_string(),
            t_entry_ns: self.entry_time_ns,
            t_exit_ns: self.exit_time_ns,
            entry_px: self.entry_px,
            exit_px: self.exit_px,
            gross_pnl_bps: self.gross_pnl_bps,
            fee_bps: self.fee_bps,
            net_pnl_bps: self.net_pnl_bps,
            exit_reason: self
                .exit_reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
            ev_snapshot,
        }
    }
}

/// One line of `paper_trades.jsonl`. The first eleven keys are mandatory for
/// the offline analysis tooling; `ev_snapshot` is advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub leader: Venue,
    pub symbol_canon: String,
    pub side: String,
    pub t_entry_ns: i64,
    pub t_exit_ns: i64,
    pub entry_px: f64,
    pub exit_px: f64,
    pub gross_pnl_bps: f64,
    pub fee_bps: f64,
    pub net_pnl_bps: f64,
    pub exit_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ev_snapshot: Option<EvSnapshot>,
}

/// Compact EV summary embedded in paper-trade rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvSnapshot {
    pub win_rate: f64,
    pub avg_profit: f64,
    pub avg_loss: f64,
    pub ev: f64,
    pub p_required: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_trade_row_carries_all_mandatory_keys() {
        let pos = Position {
            id: "paper-okx-BTCUSDT-1".to_string(),
            leader: Venue::Okx,
            symbol_canon: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_px: 99.9,
            entry_spread_bps: 10.0,
            entry_time_ns: 1,
            exit_px: 100.01,
            exit_time_ns: 2,
            exit_reason: Some(ExitReason::Tp),
            fee_bps: 0.0,
            gross_pnl_bps: 11.0,
            net_pnl_bps: 11.0,
            closed: true,
        };
        let row = serde_json::to_value(pos.to_paper_trade(None)).unwrap();
        let obj = row.as_object().unwrap();
        for key in [
            "leader",
            "symbol_canon",
            "side",
            "t_entry_ns",
            "t_exit_ns",
            "entry_px",
            "exit_px",
            "gross_pnl_bps",
            "fee_bps",
            "net_pnl_bps",
            "exit_reason",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        // ev_snapshot is optional and omitted when absent
        assert!(!obj.contains_key("ev_snapshot"));
    }
}

//! Paper execution for one leader link.
//!
//! Entries fill at the follower touch with configured taker slippage; the
//! round-trip fee is fixed at open. Exits are checked in a strict order
//! (take profit, then stop loss, then timeout) against the same
//! side-specific spread the engine fired on. Simulation only: no order ever
//! leaves this process.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::config::{FeeDetail, PaperConfig};
use crate::engine::{long_spread_bps, short_spread_bps};
use crate::model::{BookEvent, ExitReason, Position, Side, Signal, Venue};

pub struct PaperExecutor {
    leader: Venue,
    cfg: PaperConfig,
    fee: FeeDetail,
    /// At most one open position per canonical symbol. Closed positions stay
    /// behind until the next open overwrites them.
    positions: HashMap<String, Position>,
}

impl PaperExecutor {
    pub fn new(leader: Venue, cfg: PaperConfig, fee: FeeDetail) -> Self {
        Self {
            leader,
            cfg,
            fee,
            positions: HashMap::new(),
        }
    }

    pub fn leader(&self) -> Venue {
        self.leader
    }

    /// Open a position from a passing signal.
    ///
    /// `Ok(None)` means the signal was refused without being wrong (foreign
    /// leader, or the symbol already holds an open position). Malformed
    /// signals, like a wrong follower venue or an unusable follower touch,
    /// are errors.
    pub fn try_open(&mut self, sig: &Signal) -> Result<Option<Position>> {
        if sig.leader != self.leader || sig.symbol_canon.is_empty() {
            return Ok(None);
        }
        if sig.follower_book.venue != Venue::Bittap {
            bail!("signal follower book must come from bittap");
        }

        if let Some(existing) = self.positions.get(&sig.symbol_canon) {
            if !existing.closed {
                return Ok(None);
            }
        }

        let entry_px = entry_px(sig.side, self.cfg.slippage_bps, &sig.follower_book)?;

        // Round-trip taker fee, rebate-adjusted, locked in at open.
        let fee_bps = 2.0 * self.fee.effective_taker_fee() * 10_000.0;

        let pos = Position {
            id: format!(
                "paper-{}-{}-{}",
                self.leader, sig.symbol_canon, sig.detected_at_ns
            ),
            leader: self.leader,
            symbol_canon: sig.symbol_canon.clone(),
            side: sig.side,
            entry_px,
            entry_spread_bps: sig.spread_bps,
            entry_time_ns: sig.detected_at_ns,
            exit_px: 0.0,
            exit_time_ns: 0,
            exit_reason: None,
            fee_bps,
            gross_pnl_bps: 0.0,
            net_pnl_bps: 0.0,
            closed: false,
        };

        self.positions.insert(sig.symbol_canon.clone(), pos.clone());
        Ok(Some(pos))
    }

    /// Check the symbol's open position against the current book pair and
    /// close it if an exit condition holds. Returns the closed position.
    pub fn evaluate(
        &mut self,
        now_ns: i64,
        leader_book: &BookEvent,
        follower_book: &BookEvent,
    ) -> Option<Position> {
        if leader_book.venue != self.leader || follower_book.venue != Venue::Bittap {
            return None;
        }
        if leader_book.symbol_canon.is_empty()
            || leader_book.symbol_canon != follower_book.symbol_canon
        {
            return None;
        }

        let slippage_bps = self.cfg.slippage_bps;
        let tp_ratio = self.cfg.tp_ratio;
        let sl_ratio = self.cfg.sl_ratio;
        let max_hold_ns = self.cfg.max_hold_ms as i64 * 1_000_000;

        let pos = self.positions.get_mut(&leader_book.symbol_canon)?;
        if pos.closed {
            return None;
        }

        let current = match pos.side {
            Side::Long => long_spread_bps(leader_book, follower_book)?,
            Side::Short => short_spread_bps(leader_book, follower_book)?,
        };

        let entry_abs = pos.entry_spread_bps.abs();
        let current_abs = current.abs();

        let reason = if tp_ratio > 0.0 && entry_abs > 0.0 && current_abs <= (1.0 - tp_ratio) * entry_abs
        {
            ExitReason::Tp
        } else if sl_ratio > 0.0 && entry_abs > 0.0 && current_abs >= (1.0 + sl_ratio) * entry_abs {
            ExitReason::Sl
        } else if max_hold_ns > 0 && now_ns - pos.entry_time_ns > max_hold_ns {
            ExitReason::Timeout
        } else {
            return None;
        };

        let exit_px = exit_px(pos.side, slippage_bps, follower_book)?;

        pos.exit_px = exit_px;
        pos.exit_time_ns = now_ns;
        pos.exit_reason = Some(reason);
        pos.closed = true;
        pos.gross_pnl_bps = (pos.exit_px - pos.entry_px) / pos.entry_px * 10_000.0 * pos.direction();
        pos.net_pnl_bps = pos.gross_pnl_bps - pos.fee_bps;

        Some(pos.clone())
    }

    pub fn open_position(&self, symbol_canon: &str) -> Option<&Position> {
        self.positions
            .get(symbol_canon)
            .filter(|p| !p.closed)
    }
}

fn entry_px(side: Side, slippage_bps: f64, follower_book: &BookEvent) -> Result<f64> {
    let slip = slippage_bps / 10_000.0;
    match side {
        Side::Long => {
            if follower_book.best_ask_px <= 0.0 {
                bail!("follower best ask unusable for long entry");
            }
            Ok(follower_book.best_ask_px * (1.0 + slip))
        }
        Side::Short => {
            if follower_book.best_bid_px <= 0.0 {
                bail!("follower best bid unusable for short entry");
            }
            Ok(follower_book.best_bid_px * (1.0 - slip))
        }
    }
}

fn exit_px(side: Side, slippage_bps: f64, follower_book: &BookEvent) -> Option<f64> {
    let slip = slippage_bps / 10_000.0;
    match side {
        Side::Long => {
            if follower_book.best_bid_px <= 0.0 {
                return None;
            }
            Some(follower_book.best_bid_px * (1.0 - slip))
        }
        Side::Short => {
            if follower_book.best_ask_px <= 0.0 {
                return None;
            }
            Some(follower_book.best_ask_px * (1.0 + slip))
        }
    }
}

//! Latency-arbitrage feasibility validator for USDT perpetual futures.
//!
//! Consumes public order-book feeds from two leader venues (OKX, Binance)
//! and one follower venue (Bittap), measures per-venue propagation lag,
//! detects transient cross-venue spreads, and paper-trades the round trip a
//! reactive trader would have made on the follower. Signals, paper-trade
//! outcomes and periodic metrics land in append-only JSONL files for offline
//! analysis. No real orders are ever placed and no authenticated endpoint is
//! contacted.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod metadata;
pub mod model;
pub mod output;
pub mod paper;
pub mod stats;
pub mod store;
pub mod util;

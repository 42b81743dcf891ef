//! Startup metadata: venue REST instrument listings and the symbol map.
//!
//! Runs once before any socket is opened. Every configured symbol must
//! resolve to an identifier on all three venues or startup fails; the core
//! treats the resulting map as immutable.

mod fetcher;
mod mapper;

pub use fetcher::{fetch_binance, fetch_bittap, fetch_okx};
pub use mapper::{build_symbol_maps, normalize_symbol};

/// Per-symbol venue identifiers resolved at startup.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    /// Internal canonical identifier, e.g. `BTCUSDT`.
    pub canon: String,
    /// The symbol exactly as the operator wrote it, e.g. `BTC-USDT`.
    pub user_input: String,
    /// OKX instrument id, e.g. `BTC-USDT-SWAP`.
    pub okx_inst_id: String,
    /// Binance symbol, lowercased for stream subscription.
    pub binance_sym: String,
    /// Bittap contract id, e.g. `BTC-USDT-M`.
    pub bittap_sym: String,
    /// Bittap depth granularity used in the subscription topic.
    pub bittap_tick: String,
    /// OKX price tick, carried along for reporting.
    pub tick_size: f64,
}

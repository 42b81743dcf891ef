//! Symbol canonicalization and cross-venue mapping.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use super::fetcher::{
    fetch_binance, fetch_bittap, fetch_okx, BinanceSymbol, BittapData, OkxInstrument,
};
use super::SymbolMap;
use crate::config::Config;

/// Canonicalize a symbol: strip separators, trim contract suffixes, uppercase.
/// `BTC-USDT` / `btc_usdt` / `BTC-USDT-SWAP` / `BTC-USDT-M` all become
/// `BTCUSDT`. The trailing-`M` trim exists for Bittap contract ids; a base
/// asset that genuinely ends in `M` would need special handling.
pub fn normalize_symbol(s: &str) -> String {
    let mut out: String = s
        .chars()
        .filter(|c| *c != '-' && *c != '_' && *c != '/')
        .collect::<String>()
        .to_uppercase();
    if let Some(stripped) = out.strip_suffix("SWAP") {
        out = stripped.to_string();
    }
    if let Some(stripped) = out.strip_suffix('M') {
        out = stripped.to_string();
    }
    out
}

struct BittapEntry {
    symbol: String,
    depths: Vec<String>,
}

fn build_okx_index(insts: &[OkxInstrument]) -> HashMap<String, &OkxInstrument> {
    insts
        .iter()
        .filter(|i| i.is_usdt_linear_swap())
        .map(|i| (normalize_symbol(&i.uly), i))
        .collect()
}

fn build_binance_index(symbols: &[BinanceSymbol]) -> HashMap<String, &BinanceSymbol> {
    symbols
        .iter()
        .filter(|s| s.is_usdt_perpetual())
        .map(|s| (s.symbol.to_uppercase(), s))
        .collect()
}

/// Contract listings take priority, then the legacy futures listing, then
/// spot. Only USDT-quoted, open symbols are indexed.
fn build_bittap_index(data: &BittapData) -> HashMap<String, BittapEntry> {
    let mut index = HashMap::new();

    for sym in &data.contract_symbols {
        if sym.quote_code != "USDT" {
            continue;
        }
        if !sym.status.is_empty() && sym.status != "OPEN" && sym.status != "TRADING" {
            continue;
        }
        index.insert(
            normalize_symbol(&sym.symbol_id),
            BittapEntry {
                symbol: sym.symbol_id.clone(),
                depths: sym.depths.clone(),
            },
        );
    }
    if !index.is_empty() {
        return index;
    }

    for sym in &data.futures_symbols {
        if sym.quote_code != "USDT" {
            continue;
        }
        if !sym.status.is_empty() && sym.status != "OPEN" && sym.status != "TRADING" {
            continue;
        }
        index.insert(
            normalize_symbol(&sym.symbol),
            BittapEntry {
                symbol: sym.symbol.clone(),
                depths: sym.depths.clone(),
            },
        );
    }
    if !index.is_empty() {
        return index;
    }

    for sym in &data.spot_symbols {
        if sym.status != "OPEN" || sym.quote_code != "USDT" {
            continue;
        }
        index.insert(
            normalize_symbol(&sym.symbol_id),
            BittapEntry {
                symbol: sym.symbol_id.clone(),
                depths: sym.depths.clone(),
            },
        );
    }

    index
}

fn build_mapping(
    user_input: &str,
    okx_index: &HashMap<String, &OkxInstrument>,
    binance_index: &HashMap<String, &BinanceSymbol>,
    bittap_index: &HashMap<String, BittapEntry>,
) -> Result<SymbolMap> {
    let canon = normalize_symbol(user_input);

    let okx = okx_index
        .get(&canon)
        .with_context(|| format!("okx has no USDT linear swap for {canon}"))?;
    let binance = binance_index
        .get(&canon)
        .with_context(|| format!("binance has no USDT perpetual for {canon}"))?;
    let bittap = bittap_index
        .get(&canon)
        .with_context(|| format!("bittap has no USDT listing for {canon}"))?;

    let tick_size = okx.tick_sz.parse::<f64>().unwrap_or(0.01);
    let bittap_tick = bittap
        .depths
        .first()
        .cloned()
        .unwrap_or_else(|| "0.1".to_string());

    Ok(SymbolMap {
        canon,
        user_input: user_input.to_string(),
        okx_inst_id: okx.inst_id.clone(),
        binance_sym: binance.symbol.to_lowercase(),
        bittap_sym: bittap.symbol.clone(),
        bittap_tick,
        tick_size,
    })
}

/// Fetch all three venue listings and resolve every configured symbol.
/// Any unmappable symbol fails startup with a descriptive error.
pub async fn build_symbol_maps(
    http: &reqwest::Client,
    cfg: &Config,
) -> Result<HashMap<String, SymbolMap>> {
    let (okx_insts, binance_syms, bittap_data) = tokio::try_join!(
        fetch_okx(http, &cfg.metadata.okx),
        fetch_binance(http, &cfg.metadata.binance),
        fetch_bittap(http, &cfg.metadata.bittap),
    )?;

    let okx_index = build_okx_index(&okx_insts);
    let binance_index = build_binance_index(&binance_syms);
    let bittap_index = build_bittap_index(&bittap_data);

    let mut maps = HashMap::with_capacity(cfg.symbols.len());
    for sym in &cfg.symbols {
        let mapping = build_mapping(&sym.input, &okx_index, &binance_index, &bittap_index)
            .with_context(|| format!("mapping symbol '{}'", sym.input))?;
        maps.insert(mapping.canon.clone(), mapping);
    }

    if maps.is_empty() {
        bail!("no symbols could be mapped");
    }
    Ok(maps)
}

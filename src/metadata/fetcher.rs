//! REST metadata fetch, public endpoints only.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

// --- OKX: GET /api/v5/public/instruments?instType=SWAP ---

#[derive(Debug, Deserialize)]
pub struct OkxResponse {
    pub code: String,
    #[serde(default)]
    pub data: Vec<OkxInstrument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkxInstrument {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "instType", default)]
    pub inst_type: String,
    #[serde(default)]
    pub uly: String,
    #[serde(rename = "ctType", default)]
    pub ct_type: String,
    #[serde(rename = "settleCcy", default)]
    pub settle_ccy: String,
    #[serde(rename = "tickSz", default)]
    pub tick_sz: String,
    #[serde(default)]
    pub state: String,
}

impl OkxInstrument {
    pub fn is_usdt_linear_swap(&self) -> bool {
        self.inst_type == "SWAP" && self.ct_type == "linear" && self.settle_ccy == "USDT"
    }
}

// --- Binance: GET /fapi/v1/exchangeInfo ---

#[derive(Debug, Deserialize)]
pub struct BinanceResponse {
    #[serde(default)]
    pub symbols: Vec<BinanceSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSymbol {
    pub symbol: String,
    #[serde(rename = "contractType", default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "quoteAsset", default)]
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<BinanceFilter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceFilter {
    #[serde(rename = "filterType")]
    pub filter_type: String,
    #[serde(rename = "tickSize", default)]
    pub tick_size: Option<String>,
}

impl BinanceSymbol {
    pub fn is_usdt_perpetual(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.quote_asset == "USDT" && self.status == "TRADING"
    }
}

// --- Bittap: GET /api/v1/exchangeInfo ---

#[derive(Debug, Deserialize)]
pub struct BittapResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub data: BittapData,
}

#[derive(Debug, Default, Deserialize)]
pub struct BittapData {
    #[serde(rename = "spotSymbols", default)]
    pub spot_symbols: Vec<BittapSpotSymbol>,
    #[serde(rename = "contractSymbols", default)]
    pub contract_symbols: Vec<BittapContractSymbol>,
    #[serde(rename = "futuresSymbols", default)]
    pub futures_symbols: Vec<BittapFuturesSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BittapSpotSymbol {
    #[serde(rename = "symbolId")]
    pub symbol_id: String,
    #[serde(rename = "quoteCode", default)]
    pub quote_code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub depths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BittapContractSymbol {
    #[serde(rename = "symbolId")]
    pub symbol_id: String,
    #[serde(rename = "quoteCode", default)]
    pub quote_code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub depths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BittapFuturesSymbol {
    pub symbol: String,
    #[serde(rename = "quoteCode", default)]
    pub quote_code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub depths: Vec<String>,
}

pub async fn fetch_okx(http: &reqwest::Client, url: &str) -> Result<Vec<OkxInstrument>> {
    let resp: OkxResponse = http
        .get(url)
        .send()
        .await
        .context("requesting okx instruments")?
        .error_for_status()
        .context("okx instruments endpoint")?
        .json()
        .await
        .context("decoding okx instruments")?;
    if resp.code != "0" {
        bail!("okx instruments endpoint returned code {}", resp.code);
    }
    Ok(resp.data)
}

pub async fn fetch_binance(http: &reqwest::Client, url: &str) -> Result<Vec<BinanceSymbol>> {
    let resp: BinanceResponse = http
        .get(url)
        .send()
        .await
        .context("requesting binance exchange info")?
        .error_for_status()
        .context("binance exchange info endpoint")?
        .json()
        .await
        .context("decoding binance exchange info")?;
    Ok(resp.symbols)
}

pub async fn fetch_bittap(http: &reqwest::Client, url: &str) -> Result<BittapData> {
    let resp: BittapResponse = http
        .get(url)
        .send()
        .await
        .context("requesting bittap exchange info")?
        .error_for_status()
        .context("bittap exchange info endpoint")?
        .json()
        .await
        .context("decoding bittap exchange info")?;
    Ok(resp.data)
}

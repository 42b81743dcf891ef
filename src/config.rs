//! YAML configuration surface.
//!
//! Loaded once at startup from the `--config` path; validation collects every
//! complaint into a single descriptive error so a bad file fails fast with
//! the full picture instead of one field at a time.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    pub metadata: MetadataConfig,
    pub ws: WsConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_app_name() -> String {
    "arb-validator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// User-facing symbol, e.g. `BTC-USDT`.
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub okx: String,
    pub binance: String,
    pub bittap: String,
    #[serde(default = "default_metadata_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_metadata_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    pub okx: ExchangeWsConfig,
    pub binance: ExchangeWsConfig,
    pub bittap: ExchangeWsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeWsConfig {
    pub url: String,
    #[serde(default)]
    pub ping_interval_ms: u64,
    #[serde(default)]
    pub pong_timeout_ms: u64,
    #[serde(default)]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeesConfig {
    #[serde(default)]
    pub bittap: FeeDetail,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeeDetail {
    /// Taker rate as a fraction (0.0005 = 5 bps), range [0, 1].
    #[serde(default)]
    pub taker_rate: f64,
    #[serde(default)]
    pub maker_rate: f64,
    /// Fraction of the fee rebated back, range [0, 1].
    #[serde(default)]
    pub rebate_rate: f64,
}

impl FeeDetail {
    pub fn effective_taker_fee(&self) -> f64 {
        self.taker_rate * (1.0 - self.rebate_rate)
    }

    pub fn effective_maker_fee(&self) -> f64 {
        self.maker_rate * (1.0 - self.rebate_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum spread in bps that admits a signal. Must be positive.
    pub theta_entry_bps: f64,
    /// How long the spread must hold before firing. 0 fires immediately.
    #[serde(default = "default_persist_ms")]
    pub persist_ms: u64,
    /// Leader top-5 notional floor in USD. 0 disables the filter.
    #[serde(default)]
    pub min_depth_usd: f64,
    #[serde(default)]
    pub vol_filter_enabled: bool,
    #[serde(default)]
    pub vol_threshold: f64,
    /// Post-stop-loss quiet window per (leader, symbol).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_persist_ms() -> u64 {
    100
}

fn default_cooldown_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Take profit when |spread| converges to (1 - tp_ratio) * |entry|.
    #[serde(default)]
    pub tp_ratio: f64,
    /// Stop loss when |spread| diverges to (1 + sl_ratio) * |entry|.
    #[serde(default)]
    pub sl_ratio: f64,
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,
    /// Taker slippage applied symmetrically at entry and exit.
    #[serde(default)]
    pub slippage_bps: f64,
}

fn default_max_hold_ms() -> u64 {
    60_000
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            tp_ratio: 0.0,
            sl_ratio: 0.0,
            max_hold_ms: default_max_hold_ms(),
            slippage_bps: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_true")]
    pub signals_enabled: bool,
    #[serde(default = "default_true")]
    pub paper_trades_enabled: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Writer op-channel capacity.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_interval_ms() -> u64 {
    10_000
}

fn default_buffer_size() -> usize {
    1_000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            signals_enabled: true,
            paper_trades_enabled: true,
            metrics_enabled: true,
            metrics_interval_ms: default_metrics_interval_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut cfg: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.ws.okx.ping_interval_ms == 0 {
            self.ws.okx.ping_interval_ms = 25_000;
        }
        if self.ws.okx.pong_timeout_ms == 0 {
            self.ws.okx.pong_timeout_ms = 10_000;
        }
        if self.ws.bittap.ping_interval_ms == 0 {
            self.ws.bittap.ping_interval_ms = 18_000;
        }
        if self.ws.binance.read_timeout_ms == 0 {
            self.ws.binance.read_timeout_ms = 30_000;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errs: Vec<String> = Vec::new();

        if self.symbols.is_empty() {
            errs.push("symbols: at least one symbol must be configured".to_string());
        }
        for (i, sym) in self.symbols.iter().enumerate() {
            if sym.input.trim().is_empty() {
                errs.push(format!("symbols[{i}].input: symbol must not be empty"));
            }
        }

        if self.metadata.okx.is_empty() {
            errs.push("metadata.okx: endpoint must not be empty".to_string());
        }
        if self.metadata.binance.is_empty() {
            errs.push("metadata.binance: endpoint must not be empty".to_string());
        }
        if self.metadata.bittap.is_empty() {
            errs.push("metadata.bittap: endpoint must not be empty".to_string());
        }

        if self.ws.okx.url.is_empty() {
            errs.push("ws.okx.url: websocket url must not be empty".to_string());
        }
        if self.ws.binance.url.is_empty() {
            errs.push("ws.binance.url: websocket url must not be empty".to_string());
        }
        if self.ws.bittap.url.is_empty() {
            errs.push("ws.bittap.url: websocket url must not be empty".to_string());
        }

        validate_rate(&mut errs, self.fees.bittap.taker_rate, "fees.bittap.taker_rate");
        validate_rate(&mut errs, self.fees.bittap.maker_rate, "fees.bittap.maker_rate");
        validate_rate(&mut errs, self.fees.bittap.rebate_rate, "fees.bittap.rebate_rate");

        if self.strategy.theta_entry_bps <= 0.0 {
            errs.push("strategy.theta_entry_bps: entry threshold must be positive".to_string());
        }
        if self.strategy.min_depth_usd < 0.0 {
            errs.push("strategy.min_depth_usd: depth floor must not be negative".to_string());
        }
        if self.strategy.vol_threshold < 0.0 {
            errs.push("strategy.vol_threshold: threshold must not be negative".to_string());
        }

        if !(0.0..=1.0).contains(&self.paper.tp_ratio) {
            errs.push("paper.tp_ratio: must be within [0, 1]".to_string());
        }
        if self.paper.sl_ratio < 0.0 {
            errs.push("paper.sl_ratio: must not be negative".to_string());
        }
        if self.paper.max_hold_ms == 0 {
            errs.push("paper.max_hold_ms: must be positive".to_string());
        }
        if self.paper.slippage_bps < 0.0 {
            errs.push("paper.slippage_bps: must not be negative".to_string());
        }

        match self.app.log_level.to_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => errs.push(format!(
                "app.log_level: unknown level '{other}', expected debug, info, warn or error"
            )),
        }

        if errs.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", errs.join("\n  - "))
        }
    }

    pub fn symbol_inputs(&self) -> Vec<&str> {
        self.symbols.iter().map(|s| s.input.as_str()).collect()
    }
}

fn validate_rate(errs: &mut Vec<String>, rate: f64, field: &str) {
    if !(0.0..=1.0).contains(&rate) {
        errs.push(format!("{field}: rate must be within [0, 1], got {rate}"));
    }
}

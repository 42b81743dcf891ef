//! End-to-end scenarios over the aggregator pipeline: book events in,
//! signal / paper-trade records out, using real JSONL writers on disk.

use arb_validator::aggregator::{Aggregator, Outputs, VenueMetrics};
use arb_validator::config::{
    AppConfig, Config, ExchangeWsConfig, FeeDetail, FeesConfig, MetadataConfig, OutputConfig,
    PaperConfig, StrategyConfig, SymbolConfig, WsConfig,
};
use arb_validator::engine::SignalEngine;
use arb_validator::feeds::ConnectionMetrics;
use arb_validator::model::{BookEvent, Level, Side, Venue};
use arb_validator::output::JsonlWriter;
use arb_validator::paper::PaperExecutor;
use arb_validator::stats::ev::{apply_rejection, EvCalculator};

fn test_config() -> Config {
    Config {
        app: AppConfig::default(),
        symbols: vec![SymbolConfig {
            input: "BTC-USDT".to_string(),
        }],
        metadata: MetadataConfig {
            okx: "unused".to_string(),
            binance: "unused".to_string(),
            bittap: "unused".to_string(),
            timeout_ms: 1_000,
        },
        ws: WsConfig {
            okx: ExchangeWsConfig::default(),
            binance: ExchangeWsConfig::default(),
            bittap: ExchangeWsConfig::default(),
        },
        fees: FeesConfig {
            bittap: FeeDetail::default(),
        },
        strategy: StrategyConfig {
            theta_entry_bps: 10.0,
            persist_ms: 0,
            min_depth_usd: 0.0,
            vol_filter_enabled: false,
            vol_threshold: 0.0,
            cooldown_ms: 3_000,
        },
        paper: PaperConfig {
            tp_ratio: 0.5,
            sl_ratio: 1.0,
            max_hold_ms: 60_000,
            slippage_bps: 0.0,
        },
        output: OutputConfig::default(),
    }
}

fn venue_metrics() -> VenueMetrics {
    VenueMetrics {
        okx: ConnectionMetrics::new(),
        binance: ConnectionMetrics::new(),
        bittap: ConnectionMetrics::new(),
    }
}

async fn file_outputs(dir: &std::path::Path) -> Outputs {
    Outputs {
        signals: Some(
            JsonlWriter::create(dir.join("signals.jsonl"), 64)
                .await
                .unwrap(),
        ),
        paper_trades: Some(
            JsonlWriter::create(dir.join("paper_trades.jsonl"), 64)
                .await
                .unwrap(),
        ),
        metrics: None,
    }
}

async fn close_outputs(mut outputs: Outputs) {
    if let Some(w) = outputs.signals.take() {
        w.close().await.unwrap();
    }
    if let Some(w) = outputs.paper_trades.take() {
        w.close().await.unwrap();
    }
}

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    if !path.exists() {
        return Vec::new();
    }
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn ev(venue: Venue, bid: f64, ask: f64, arrived_ns: i64) -> BookEvent {
    BookEvent {
        venue,
        symbol_canon: "BTCUSDT".to_string(),
        best_bid_px: bid,
        best_bid_qty: 10.0,
        best_ask_px: ask,
        best_ask_qty: 10.0,
        levels: vec![
            Level { price: bid, qty: 10.0 },
            Level { price: ask, qty: 10.0 },
        ],
        arrived_at_ns: arrived_ns,
        exch_ts_ms: 0,
        seq: 0,
    }
}

const SEC: i64 = 1_000_000_000;

#[tokio::test]
async fn s1_long_take_profit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut agg = Aggregator::new(&test_config());
    let outputs = file_outputs(dir.path()).await;

    // t=1s: leader rich by ~10 bps against the follower ask.
    agg.handle_event(ev(Venue::Okx, 100.00, 100.10, SEC), &outputs).await;
    agg.handle_event(ev(Venue::Bittap, 99.80, 99.90, SEC + 1_000_000), &outputs)
        .await;

    // t=1.2s: follower catches up, spread collapses to ~1 bp.
    agg.handle_event(
        ev(Venue::Bittap, 100.01, 99.99, SEC + 200_000_000),
        &outputs,
    )
    .await;

    close_outputs(outputs).await;

    let signals = read_lines(&dir.path().join("signals.jsonl"));
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["side"], "long");
    assert_eq!(signals[0]["leader"], "okx");
    let entry_spread = signals[0]["spread_bps"].as_f64().unwrap();
    assert!((entry_spread - (100.00 - 99.90) / 99.90 * 10_000.0).abs() < 1e-9);
    assert_eq!(signals[0]["rejected_by_ev"], false);

    let trades = read_lines(&dir.path().join("paper_trades.jsonl"));
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade["exit_reason"], "tp");
    assert!((trade["entry_px"].as_f64().unwrap() - 99.90).abs() < 1e-9);
    assert!((trade["exit_px"].as_f64().unwrap() - 100.01).abs() < 1e-9);
    let want_gross = (100.01 - 99.90) / 99.90 * 10_000.0;
    assert!((trade["gross_pnl_bps"].as_f64().unwrap() - want_gross).abs() < 1e-6);
    assert!((trade["net_pnl_bps"].as_f64().unwrap() - want_gross).abs() < 1e-6);
    assert_eq!(trade["fee_bps"].as_f64().unwrap(), 0.0);

    // Paper-trade rows carry every mandatory key.
    let obj = trade.as_object().unwrap();
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
}

#[tokio::test]
async fn s2_long_stop_loss_on_divergence() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config();
    cfg.paper.sl_ratio = 0.5;
    let mut agg = Aggregator::new(&cfg);
    let outputs = file_outputs(dir.path()).await;

    agg.handle_event(ev(Venue::Okx, 100.00, 100.10, SEC), &outputs).await;
    agg.handle_event(ev(Venue::Bittap, 99.80, 99.90, SEC + 1_000_000), &outputs)
        .await;
    // t=1.2s: follower falls out of bed, spread blows far past 1.5x entry.
    agg.handle_event(
        ev(Venue::Bittap, 90.00, 90.01, SEC + 200_000_000),
        &outputs,
    )
    .await;

    close_outputs(outputs).await;

    let trades = read_lines(&dir.path().join("paper_trades.jsonl"));
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["exit_reason"], "sl");
    assert!((trades[0]["exit_px"].as_f64().unwrap() - 90.00).abs() < 1e-9);
    assert!(trades[0]["net_pnl_bps"].as_f64().unwrap() < 0.0);
}

#[tokio::test]
async fn s3_timeout_closes_at_current_touch() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config();
    cfg.paper.max_hold_ms = 10;
    let mut agg = Aggregator::new(&cfg);
    let outputs = file_outputs(dir.path()).await;

    agg.handle_event(ev(Venue::Okx, 100.00, 100.10, SEC), &outputs).await;
    agg.handle_event(ev(Venue::Bittap, 99.80, 99.90, SEC + 1_000_000), &outputs)
        .await;
    // 20 ms later, books unchanged: only the hold timer can fire.
    agg.handle_event(
        ev(Venue::Bittap, 99.80, 99.90, SEC + 21_000_000),
        &outputs,
    )
    .await;

    close_outputs(outputs).await;

    let trades = read_lines(&dir.path().join("paper_trades.jsonl"));
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["exit_reason"], "timeout");
    // PnL computed from the then-current follower bid.
    assert!((trades[0]["exit_px"].as_f64().unwrap() - 99.80).abs() < 1e-9);
}

#[tokio::test]
async fn s4_persistence_then_cooldown_gate() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config();
    cfg.strategy.persist_ms = 100;
    cfg.strategy.cooldown_ms = 3_000;
    cfg.paper.sl_ratio = 0.5;
    let mut agg = Aggregator::new(&cfg);
    let outputs = file_outputs(dir.path()).await;

    let wide_leader = ev(Venue::Okx, 100.00, 100.10, 0);
    let follower = ev(Venue::Bittap, 99.80, 99.90, 0);

    let at = |mut e: BookEvent, t: i64| {
        e.arrived_at_ns = t;
        e
    };

    // t=0: condition becomes active; t=50ms: still arming; t=110ms: fires.
    agg.handle_event(at(wide_leader.clone(), 1), &outputs).await;
    agg.handle_event(at(follower.clone(), 2), &outputs).await;
    agg.handle_event(at(follower.clone(), 50_000_000), &outputs).await;
    agg.handle_event(at(follower.clone(), 110_000_000), &outputs).await;

    // t=1s: follower collapses, stop loss closes the position and arms the
    // 3s cooldown.
    agg.handle_event(at(ev(Venue::Bittap, 90.00, 90.01, 0), SEC), &outputs)
        .await;

    // t=1.5s: condition holds again but the cooldown swallows it.
    agg.handle_event(at(follower.clone(), SEC + 500_000_000), &outputs).await;

    // After expiry: a lapse clears the candidate, re-activation re-arms, and
    // the signal fires once the spread has persisted again.
    agg.handle_event(
        at(ev(Venue::Okx, 99.80, 99.90, 0), 4_050_000_000),
        &outputs,
    )
    .await; // flat leader: condition lapses
    agg.handle_event(at(wide_leader.clone(), 4_100_000_000), &outputs).await;
    agg.handle_event(at(follower.clone(), 4_150_000_000), &outputs).await;
    agg.handle_event(at(follower.clone(), 4_250_000_000), &outputs).await;

    close_outputs(outputs).await;

    let signals = read_lines(&dir.path().join("signals.jsonl"));
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0]["detected_at_ns"].as_i64().unwrap(), 110_000_000);
    assert_eq!(signals[1]["detected_at_ns"].as_i64().unwrap(), 4_250_000_000);

    let trades = read_lines(&dir.path().join("paper_trades.jsonl"));
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["exit_reason"], "sl");
}

#[tokio::test]
async fn s5_lag_separation_between_leaders() {
    let mut agg = Aggregator::new(&test_config());
    let vm = venue_metrics();
    let outputs = Outputs {
        signals: None,
        paper_trades: None,
        metrics: None,
    };

    // Flat books so no signals fire; OKX leads Bittap by 10 ms, Binance by
    // 100 ms, steadily.
    for i in 0..200i64 {
        let base = i * 500_000_000;
        agg.handle_event(ev(Venue::Okx, 100.00, 100.01, base + 90_000_000), &outputs)
            .await;
        agg.handle_event(ev(Venue::Binance, 100.00, 100.01, base), &outputs)
            .await;
        agg.handle_event(
            ev(Venue::Bittap, 100.00, 100.01, base + 100_000_000),
            &outputs,
        )
        .await;
    }

    let snap = agg.metrics_snapshot(&vm);
    assert!((snap.latency_okx.arrived_p50_ms - 10.0).abs() < 1e-9);
    assert!((snap.latency_binance.arrived_p50_ms - 100.0).abs() < 1e-9);
    assert_eq!(snap.latency_okx.count, 200);
    assert_eq!(snap.latency_binance.count, 200);
}

#[tokio::test]
async fn s6_ev_rejection_blocks_paper_execution() {
    // Positive window: gross 10, 20, -15 with fee 2 -> EV = 3.
    let mut positive = EvCalculator::new(100);
    for gross in [10.0, 20.0, -15.0] {
        positive.add(&closed_position(gross, 2.0));
    }
    assert!((positive.stats().ev - 3.0).abs() < 1e-9);

    // Degraded window: gross 1, 1, -20 with fee 2 -> EV < 0.
    let mut negative = EvCalculator::new(100);
    for gross in [1.0, 1.0, -20.0] {
        negative.add(&closed_position(gross, 2.0));
    }
    assert!(negative.stats().ev < 0.0);

    // The next emitted signal is flagged and must not open a position.
    let mut engine = SignalEngine::new(
        Venue::Okx,
        StrategyConfig {
            theta_entry_bps: 10.0,
            persist_ms: 0,
            min_depth_usd: 0.0,
            vol_filter_enabled: false,
            vol_threshold: 0.0,
            cooldown_ms: 0,
        },
    );
    let leader = ev(Venue::Okx, 100.00, 100.10, 1);
    let follower = ev(Venue::Bittap, 99.80, 99.90, 1);
    let mut sig = engine.evaluate(1, &leader, &follower).expect("signal fires");
    apply_rejection(&mut sig, &negative.stats());
    assert!(sig.rejected_by_ev);
    assert_eq!(sig.filter_reason, "ev_negative");

    // Aggregator contract: a rejected signal is persisted but try_open is
    // never called, so the executor stays flat.
    let mut executor = PaperExecutor::new(
        Venue::Okx,
        PaperConfig {
            tp_ratio: 0.5,
            sl_ratio: 1.0,
            max_hold_ms: 60_000,
            slippage_bps: 0.0,
        },
        FeeDetail::default(),
    );
    if !sig.rejected_by_ev {
        executor.try_open(&sig).unwrap();
    }
    assert!(executor.open_position("BTCUSDT").is_none());
}

fn closed_position(gross: f64, fee: f64) -> arb_validator::model::Position {
    arb_validator::model::Position {
        id: String::new(),
        leader: Venue::Okx,
        symbol_canon: "BTCUSDT".to_string(),
        side: Side::Long,
        entry_px: 100.0,
        entry_spread_bps: 10.0,
        entry_time_ns: 0,
        exit_px: 100.0,
        exit_time_ns: 1,
        exit_reason: Some(arb_validator::model::ExitReason::Tp),
        fee_bps: fee,
        gross_pnl_bps: gross,
        net_pnl_bps: gross - fee,
        closed: true,
    }
}

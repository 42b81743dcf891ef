//! Bittap depth feed (follower F), the venue all paper fills price against.
//!
//! Wire contract: `{method:"SUBSCRIBE",params:["f_depth30@<SYM>_<tick>"],
//! id:"1"}`; depth frames `{e:"f_depth30", s:<SYM>, i:<tick>,
//! lastUpdateId:<n>, bids:[...], asks:[...]}`. Heartbeat is a JSON
//! `{"method":"PING"}` every 18s, answered as either `{"result":"PONG"}` or
//! `{"method":"PONG"}` depending on gateway version. No event time is
//! provided, so `exch_ts_ms` stays 0 and `lastUpdateId` maps to `seq`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{
    forward_event, spawn_metrics_task, ConnectionMetrics, ParseErrorSampler,
    BOOK_CHANNEL_CAPACITY,
};
use crate::config::ExchangeWsConfig;
use crate::metadata::SymbolMap;
use crate::model::{BookEvent, Level, Venue};
use crate::util::backoff::Backoff;
use crate::util::clock;
use crate::util::num::parse_f64;

#[derive(Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: Vec<String>,
    id: String,
}

#[derive(Serialize)]
struct PingRequest {
    id: String,
    method: &'static str,
}

enum StreamExit {
    Shutdown,
}

pub struct BittapClient {
    cfg: ExchangeWsConfig,
    topics: Vec<String>,
    /// Uppercased venue symbol -> canonical symbol (venue casing varies).
    symbol_to_canon: HashMap<String, String>,
    book_tx: mpsc::Sender<BookEvent>,
    metrics: Arc<ConnectionMetrics>,
    sampler: ParseErrorSampler,
    backoff: Backoff,
    ping_seq: u64,
}

impl BittapClient {
    pub fn new(
        cfg: ExchangeWsConfig,
        symbols: &HashMap<String, SymbolMap>,
    ) -> (Self, mpsc::Receiver<BookEvent>) {
        let (book_tx, book_rx) = mpsc::channel(BOOK_CHANNEL_CAPACITY);
        let mut topics = Vec::with_capacity(symbols.len());
        let mut symbol_to_canon = HashMap::with_capacity(symbols.len());
        for m in symbols.values() {
            topics.push(format!("f_depth30@{}_{}", m.bittap_sym, m.bittap_tick));
            symbol_to_canon.insert(m.bittap_sym.to_uppercase(), m.canon.clone());
        }
        (
            Self {
                cfg,
                topics,
                symbol_to_canon,
                book_tx,
                metrics: ConnectionMetrics::new(),
                sampler: ParseErrorSampler::new(),
                backoff: Backoff::default(),
                ping_seq: 0,
            },
            book_rx,
        )
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let metrics_task = spawn_metrics_task(self.metrics(), shutdown.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(StreamExit::Shutdown) => break,
                Err(err) => {
                    self.metrics.note_reconnect();
                    let delay = self.backoff.next();
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "bittap stream failed, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        metrics_task.abort();
        info!("bittap client stopped");
    }

    async fn connect_and_stream(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamExit> {
        let mut request = self
            .cfg
            .url
            .as_str()
            .into_client_request()
            .context("building bittap ws request")?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("arb-validator/0.1"));

        let (ws, _) = connect_async(request)
            .await
            .context("connecting to bittap")?;
        self.backoff.reset();
        info!(url = %self.cfg.url, topics = self.topics.len(), "bittap connected");

        let (mut write, mut read) = ws.split();

        let sub = SubscribeRequest {
            method: "SUBSCRIBE",
            params: self.topics.clone(),
            id: "1".to_string(),
        };
        write
            .send(Message::Text(serde_json::to_string(&sub)?))
            .await
            .context("sending bittap subscribe")?;

        let mut heartbeat = interval(Duration::from_millis(self.cfg.ping_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset();

        let mut parse_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(StreamExit::Shutdown);
                    }
                }

                _ = heartbeat.tick() => {
                    self.ping_seq += 1;
                    let ping = PingRequest {
                        id: self.ping_seq.to_string(),
                        method: "PING",
                    };
                    write
                        .send(Message::Text(serde_json::to_string(&ping)?))
                        .await
                        .context("sending bittap ping")?;
                }

                msg = read.next() => {
                    let arrived_at_ns = clock::now_ns();
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(err)) => bail!("bittap read error: {err}"),
                        None => bail!("bittap stream closed"),
                    };
                    self.metrics.note_message(arrived_at_ns);

                    match msg {
                        Message::Text(text) => {
                            self.handle_frame(text.as_bytes(), arrived_at_ns, &mut parse_buf);
                        }
                        Message::Binary(data) => {
                            self.handle_frame(&data, arrived_at_ns, &mut parse_buf);
                        }
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(frame) => {
                            bail!("bittap closed the connection: {frame:?}");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_frame(&self, raw: &[u8], arrived_at_ns: i64, parse_buf: &mut Vec<u8>) {
        parse_buf.clear();
        parse_buf.extend_from_slice(raw);

        match decode(parse_buf, arrived_at_ns, &self.symbol_to_canon) {
            Ok(Decoded::Book(ev)) => forward_event(&self.book_tx, &self.metrics, ev),
            Ok(Decoded::Pong) => debug!("bittap pong"),
            Ok(Decoded::Ignore) => {}
            Err(err) => {
                self.metrics.note_parse_error();
                self.sampler.maybe_log(Venue::Bittap, &err.to_string(), raw);
            }
        }
    }
}

enum Decoded {
    Book(BookEvent),
    Pong,
    Ignore,
}

#[derive(Debug)]
enum DecodeError {
    InvalidJson,
    NotObject,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidJson => f.write_str("invalid json"),
            DecodeError::NotObject => f.write_str("frame is not an object"),
        }
    }
}

/// Decode one Bittap frame. Pong detection runs first because both pong
/// shapes are plain objects that would otherwise fall through to `Ignore`.
fn decode(
    raw: &mut [u8],
    arrived_at_ns: i64,
    symbol_to_canon: &HashMap<String, String>,
) -> Result<Decoded, DecodeError> {
    use simd_json::prelude::*;

    let value = simd_json::to_borrowed_value(raw).map_err(|_| DecodeError::InvalidJson)?;
    let obj = value.as_object().ok_or(DecodeError::NotObject)?;

    // {"result":"PONG"} or {"method":"PONG"}
    let is_pong = obj.get("result").and_then(|v| v.as_str()) == Some("PONG")
        || obj.get("method").and_then(|v| v.as_str()) == Some("PONG");
    if is_pong {
        return Ok(Decoded::Pong);
    }

    if obj.get("e").and_then(|v| v.as_str()) != Some("f_depth30") {
        return Ok(Decoded::Ignore);
    }

    let venue_symbol = obj
        .get("s")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase())
        .unwrap_or_default();
    let Some(canon) = symbol_to_canon.get(&venue_symbol) else {
        return Ok(Decoded::Ignore); // unmapped symbol, dropped silently
    };

    let seq = obj.get("lastUpdateId").and_then(|v| v.as_i64()).unwrap_or(0);

    let mut levels: Vec<Level> = Vec::with_capacity(10);
    let (best_bid_px, best_bid_qty) =
        collect_side(obj.get("bids").and_then(|v| v.as_array()), &mut levels);
    let (best_ask_px, best_ask_qty) =
        collect_side(obj.get("asks").and_then(|v| v.as_array()), &mut levels);

    Ok(Decoded::Book(BookEvent {
        venue: Venue::Bittap,
        symbol_canon: canon.clone(),
        best_bid_px,
        best_bid_qty,
        best_ask_px,
        best_ask_qty,
        levels,
        arrived_at_ns,
        exch_ts_ms: 0,
        seq,
    }))
}

fn collect_side(
    side: Option<&Vec<simd_json::BorrowedValue<'_>>>,
    levels: &mut Vec<Level>,
) -> (f64, f64) {
    use simd_json::prelude::*;

    let mut best_px = 0.0;
    let mut best_qty = 0.0;
    let Some(rows) = side else {
        return (best_px, best_qty);
    };
    for (i, row) in rows.iter().take(5).enumerate() {
        let Some(cells) = row.as_array() else { break };
        if cells.len() < 2 {
            break;
        }
        let px = cells[0].as_str().map(parse_f64).unwrap_or(0.0);
        let qty = cells[1].as_str().map(parse_f64).unwrap_or(0.0);
        if i == 0 {
            best_px = px;
            best_qty = qty;
        }
        levels.push(Level { price: px, qty });
    }
    (best_px, best_qty)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn canon_map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("BTC-USDT-M".to_string(), "BTCUSDT".to_string());
        m
    }

    fn depth_frame(sym: &str, bid: f64, ask: f64, last_update_id: i64) -> Vec<u8> {
        format!(
            r#"{{"e":"f_depth30","s":"{sym}","i":"0.1","lastUpdateId":{last_update_id},"bids":[["{bid}","5"],["{}","7"]],"asks":[["{ask}","4"],["{}","6"]]}}"#,
            bid - 0.1,
            ask + 0.1,
        )
        .into_bytes()
    }

    #[test]
    fn decodes_depth_frame_with_field_mapping() {
        let mut raw = depth_frame("BTC-USDT-M", 50_000.1, 50_000.9, 987_654);
        let Decoded::Book(ev) = decode(&mut raw, 3_000, &canon_map()).unwrap() else {
            panic!("expected book");
        };
        assert_eq!(ev.venue, Venue::Bittap);
        assert_eq!(ev.symbol_canon, "BTCUSDT");
        assert!((ev.best_bid_px - 50_000.1).abs() < 1e-2);
        assert!((ev.best_ask_px - 50_000.9).abs() < 1e-2);
        assert_eq!(ev.exch_ts_ms, 0);
        assert_eq!(ev.seq, 987_654);
        assert_eq!(ev.arrived_at_ns, 3_000);
    }

    #[test]
    fn decode_round_trip_randomized() {
        let mut rng = StdRng::seed_from_u64(19);
        let map = canon_map();
        for _ in 0..100 {
            let bid = rng.gen_range(0.5..70_000.0);
            let ask = bid + rng.gen_range(0.01..15.0);
            let update_id = rng.gen_range(1..i64::MAX / 2);
            let mut raw = depth_frame("BTC-USDT-M", bid, ask, update_id);
            let Decoded::Book(ev) = decode(&mut raw, 1, &map).unwrap() else {
                panic!("expected book");
            };
            assert!((ev.best_bid_px - bid).abs() < 1e-2);
            assert!((ev.best_ask_px - ask).abs() < 1e-2);
            assert_eq!(ev.exch_ts_ms, 0);
            assert_eq!(ev.seq, update_id);
        }
    }

    #[test]
    fn venue_symbol_lookup_is_case_insensitive() {
        let mut raw = depth_frame("btc-usdt-m", 100.0, 100.2, 1);
        let Decoded::Book(ev) = decode(&mut raw, 1, &canon_map()).unwrap() else {
            panic!("expected book");
        };
        assert_eq!(ev.symbol_canon, "BTCUSDT");
    }

    #[test]
    fn both_pong_shapes_are_recognized() {
        let mut a = br#"{"result":"PONG"}"#.to_vec();
        assert!(matches!(decode(&mut a, 1, &canon_map()), Ok(Decoded::Pong)));

        let mut b = br#"{"id":"3","method":"PONG"}"#.to_vec();
        assert!(matches!(decode(&mut b, 1, &canon_map()), Ok(Decoded::Pong)));

        // Null result (subscription ack) is not a pong.
        let mut c = br#"{"result":null,"id":"1"}"#.to_vec();
        assert!(matches!(decode(&mut c, 1, &canon_map()), Ok(Decoded::Ignore)));
    }

    #[test]
    fn unmapped_symbol_is_ignored() {
        let mut raw = depth_frame("DOGE-USDT-M", 0.1, 0.2, 1);
        assert!(matches!(
            decode(&mut raw, 1, &canon_map()),
            Ok(Decoded::Ignore)
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let mut garbage = b"{{{".to_vec();
        assert!(decode(&mut garbage, 1, &canon_map()).is_err());
    }

    #[test]
    fn subscribe_and_ping_wire_shapes() {
        let sub = SubscribeRequest {
            method: "SUBSCRIBE",
            params: vec!["f_depth30@BTC-USDT-M_0.1".to_string()],
            id: "1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&sub).unwrap(),
            r#"{"method":"SUBSCRIBE","params":["f_depth30@BTC-USDT-M_0.1"],"id":"1"}"#
        );

        let ping = PingRequest {
            id: "7".to_string(),
            method: "PING",
        };
        assert_eq!(
            serde_json::to_string(&ping).unwrap(),
            r#"{"id":"7","method":"PING"}"#
        );
    }
}
